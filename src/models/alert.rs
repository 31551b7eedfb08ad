use serde::{Deserialize, Deserializer, Serialize};

/// One notification as published by the upstream alert feed.
///
/// Persisted verbatim into the raw collection, so the serde names are the
/// feed's own field names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RawAlertEvent {
    #[serde(rename = "notificationId")]
    pub notification_id: String,
    #[serde(rename = "time", deserialize_with = "parse_i64_lenient")]
    pub occurred_at_unix: i64,
    #[serde(rename = "threat", deserialize_with = "parse_i64_lenient")]
    pub threat_code: i64,
    #[serde(rename = "isDrill", default)]
    pub is_drill: bool,
    #[serde(default)]
    pub cities: Vec<String>,
}

// The feed is not strict about numeric fields; some publishers quote them.
fn parse_i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::Int(i) => Ok(i),
        StringOrInt::String(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_feed_batch() {
        let payload = r#"
        [
            {
                "notificationId": "a1b2c3d4-0000-4000-8000-000000000001",
                "time": 1700000000,
                "threat": 0,
                "isDrill": false,
                "cities": ["חיפה", "Haifa"]
            },
            {
                "notificationId": "a1b2c3d4-0000-4000-8000-000000000002",
                "time": "1700000042",
                "threat": "5",
                "isDrill": true,
                "cities": []
            }
        ]
        "#;

        let events: Vec<RawAlertEvent> = serde_json::from_str(payload).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].occurred_at_unix, 1700000000);
        assert_eq!(events[0].threat_code, 0);
        assert_eq!(events[0].cities, vec!["חיפה".to_string(), "Haifa".to_string()]);
        assert_eq!(events[1].occurred_at_unix, 1700000042);
        assert_eq!(events[1].threat_code, 5);
        assert!(events[1].is_drill);
        assert!(events[1].cities.is_empty());
    }

    #[test]
    fn test_serializes_with_feed_field_names() {
        let event = RawAlertEvent {
            notification_id: "A1".to_string(),
            occurred_at_unix: 1700000000,
            threat_code: 0,
            is_drill: false,
            cities: vec!["Haifa".to_string()],
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["notificationId"], "A1");
        assert_eq!(value["time"], 1700000000);
        assert_eq!(value["threat"], 0);
        assert_eq!(value["isDrill"], false);
        assert_eq!(value["cities"][0], "Haifa");
    }

    #[test]
    fn test_rejects_non_numeric_time() {
        let payload = r#"{"notificationId":"x","time":"soon","threat":0,"isDrill":false,"cities":[]}"#;
        assert!(serde_json::from_str::<RawAlertEvent>(payload).is_err());
    }
}
