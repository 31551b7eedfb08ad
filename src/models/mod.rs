pub mod alert;
pub mod location;
pub mod notification;
pub mod threat;

pub use alert::RawAlertEvent;
pub use location::{Coordinates, GeoLocation};
pub use notification::{ProcessedAlertEvent, ProvenanceRecord, SavedNotification};
pub use threat::ThreatKind;
