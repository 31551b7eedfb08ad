use serde::{Deserialize, Serialize};

/// Threat classification for the feed's numeric `threat` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatKind {
    Rocket,
    Uav,
    Unknown,
}

impl ThreatKind {
    /// Total: every code maps to something, unmapped codes to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ThreatKind::Rocket,
            5 => ThreatKind::Uav,
            _ => ThreatKind::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThreatKind::Rocket => "ROCKET",
            ThreatKind::Uav => "UAV",
            ThreatKind::Unknown => "UNKNOWN",
        }
    }
}
