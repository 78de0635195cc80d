use serde::{Deserialize, Serialize};

/// Partition key attribute of the dedup table.
pub const HASH_ATTRIBUTE: &str = "principal_structure_and_action_hash";
/// Expiry attribute, epoch seconds.
pub const TTL_ATTRIBUTE: &str = "ttl";

/// A "this action was already notified, suppress until `ttl`" marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    #[serde(rename = "principal_structure_and_action_hash")]
    pub identity_hash: String,
    pub ttl: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

/// Observable state of a record at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Live,
    Expired,
}

impl DedupRecord {
    pub fn new(identity_hash: impl Into<String>, ttl: i64) -> Self {
        Self {
            identity_hash: identity_hash.into(),
            ttl,
            created_at: None,
            event_name: None,
        }
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    /// A record is live strictly before its ttl.
    pub fn is_live_at(&self, now: i64) -> bool {
        self.ttl > now
    }

    pub fn state_at(&self, now: i64) -> RecordState {
        if self.is_live_at(now) {
            RecordState::Live
        } else {
            RecordState::Expired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_boundary() {
        let record = DedupRecord::new("abc123", 1_000);
        assert!(record.is_live_at(999));
        assert_eq!(record.state_at(1_000), RecordState::Expired);
        assert_eq!(record.state_at(1_001), RecordState::Expired);
    }

    #[test]
    fn test_serializes_with_table_attribute_names() {
        let record = DedupRecord::new("abc123", 1_700_000_300).with_event_name("DeleteBucket");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json[HASH_ATTRIBUTE], "abc123");
        assert_eq!(json[TTL_ATTRIBUTE], 1_700_000_300);
        assert!(json.get("created_at").is_none());
    }
}
