//! Outbox payload construction. Every payload carries the entity id and an
//! event timestamp; callers merge in event-specific fields.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

/// Base payload: `{"entity_id": ..., "ts": ...}` plus `extra`'s fields.
pub fn event_payload(entity_id: &str, now: DateTime<Utc>, extra: Value) -> Value {
    let mut map = Map::new();
    map.insert("entity_id".to_string(), json!(entity_id));
    map.insert("ts".to_string(), json!(now.timestamp_millis()));
    if let Value::Object(extra) = extra {
        for (k, v) in extra {
            map.insert(k, v);
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn merges_extra_fields_over_base() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap();
        let p = event_payload("ord-1", now, json!({"status": "SENT", "symbol": "005930"}));
        assert_eq!(p["entity_id"], "ord-1");
        assert_eq!(p["ts"], json!(now.timestamp_millis()));
        assert_eq!(p["status"], "SENT");
        assert_eq!(p["symbol"], "005930");
    }
}
