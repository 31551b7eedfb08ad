pub mod enricher;
pub mod ledger;
pub mod pipeline;
pub mod poll_loop;

pub use enricher::EventEnricher;
pub use ledger::SessionLedger;
pub use pipeline::{BatchReport, IngestionPipeline};
pub use poll_loop::{BlockingPoller, PollController, StopOutcome};
