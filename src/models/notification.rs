use serde::{Deserialize, Serialize};

use super::alert::RawAlertEvent;

/// Classified, human-readable view of a raw event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedAlertEvent {
    #[serde(rename = "notificationId")]
    pub notification_id: String,
    #[serde(rename = "datetime")]
    pub formatted_datetime: String,
    #[serde(rename = "munition")]
    pub threat_name: String,
    pub locations: Vec<String>,
}

/// Host that recorded the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    #[serde(rename = "recorder")]
    pub recorder_host: String,
    pub receiver_ip: String,
    #[serde(rename = "machine")]
    pub machine_arch: String,
}

/// Document shape of the parsed-alerts collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedNotification {
    pub raw_notification: RawAlertEvent,
    pub processed_notification: ProcessedAlertEvent,
    pub meta_data: ProvenanceRecord,
}

impl SavedNotification {
    pub fn notification_id(&self) -> &str {
        &self.raw_notification.notification_id
    }
}
