use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

use crate::models::{
    ProcessedAlertEvent, ProvenanceRecord, RawAlertEvent, SavedNotification, ThreatKind,
};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where provenance snapshots come from.
#[async_trait]
pub trait ProvenanceSource: Send + Sync {
    async fn capture(&self) -> ProvenanceRecord;
}

/// Snapshot of the machine doing the recording.
pub struct HostProvenance;

#[async_trait]
impl ProvenanceSource for HostProvenance {
    async fn capture(&self) -> ProvenanceRecord {
        let recorder_host = recorder_host();
        let receiver_ip = resolve_ipv4(&recorder_host).await;
        ProvenanceRecord {
            recorder_host,
            receiver_ip: receiver_ip.to_string(),
            machine_arch: std::env::consts::ARCH.to_string(),
        }
    }
}

fn recorder_host() -> String {
    System::host_name().unwrap_or_else(|| "localhost".to_string())
}

async fn resolve_ipv4(host: &str) -> IpAddr {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => addrs
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Err(e) => {
            debug!("Could not resolve own host name {}: {}", host, e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Turns raw feed events into the classified record stored in the parsed
/// collection.
#[derive(Clone)]
pub struct EventEnricher {
    timezone: Tz,
    provenance: Arc<dyn ProvenanceSource>,
}

impl EventEnricher {
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            provenance: Arc::new(HostProvenance),
        }
    }

    pub fn with_provenance(mut self, provenance: Arc<dyn ProvenanceSource>) -> Self {
        self.provenance = provenance;
        self
    }

    /// Unix seconds to local wall-clock time. Out-of-range timestamps fall
    /// back to the epoch rather than failing.
    pub fn format_datetime(&self, unix_seconds: i64) -> String {
        let utc: DateTime<Utc> = Utc
            .timestamp_opt(unix_seconds, 0)
            .single()
            .unwrap_or_default();
        utc.with_timezone(&self.timezone)
            .format(DATETIME_FORMAT)
            .to_string()
    }

    pub fn process(&self, raw: &RawAlertEvent) -> ProcessedAlertEvent {
        ProcessedAlertEvent {
            notification_id: raw.notification_id.clone(),
            formatted_datetime: self.format_datetime(raw.occurred_at_unix),
            threat_name: ThreatKind::from_code(raw.threat_code).name().to_string(),
            locations: raw.cities.clone(),
        }
    }

    pub fn enrich_with(&self, raw: &RawAlertEvent, provenance: ProvenanceRecord) -> SavedNotification {
        SavedNotification {
            raw_notification: raw.clone(),
            processed_notification: self.process(raw),
            meta_data: provenance,
        }
    }

    /// Enriches `raw` with a fresh provenance snapshot.
    pub async fn enrich(&self, raw: &RawAlertEvent) -> SavedNotification {
        let provenance = self.provenance.capture().await;
        self.enrich_with(raw, provenance)
    }
}
