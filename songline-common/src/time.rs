//! Timestamp parsing for SQLite text columns

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 timestamp as stored in SQLite text columns
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339_round_trip() {
        let ts = Utc::now();
        let parsed = parse_rfc3339(&ts.to_rfc3339()).unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_parse_rfc3339_rejects_garbage() {
        assert!(matches!(
            parse_rfc3339("yesterday"),
            Err(crate::Error::Internal(_))
        ));
    }
}
