use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// The overlay's view of one storage node, as consumed by the piece
/// classifier and the upload path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    /// Dial target, opaque to this subsystem.
    pub address: String,
    pub last_contact: Option<DateTime<Utc>>,
    /// ISO-3166 alpha-2, empty when unknown.
    pub country_code: String,
    /// The node's /24 subnet. Pieces sharing a subnet are fate-sharing.
    pub last_net: String,
    /// Gracefully leaving the network.
    pub exiting: bool,
    /// Audit reputation suspended.
    pub suspended: bool,
    pub tags: BTreeMap<String, String>,
}

impl NodeRecord {
    /// A node counts as online if it checked in within `online_window`.
    pub fn is_online(&self, now: DateTime<Utc>, online_window: Duration) -> bool {
        self.last_contact
            .is_some_and(|last| now.signed_duration_since(last) <= online_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(last_contact_mins_ago: Option<i64>) -> NodeRecord {
        NodeRecord {
            id: NodeId([7u8; 32]),
            address: "node.test:7777".into(),
            last_contact: last_contact_mins_ago.map(|m| Utc::now() - Duration::minutes(m)),
            country_code: "DE".into(),
            last_net: "10.1.2.0".into(),
            exiting: false,
            suspended: false,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn online_within_window() {
        let n = node(Some(30));
        assert!(n.is_online(Utc::now(), Duration::hours(4)));
    }

    #[test]
    fn offline_past_window() {
        let n = node(Some(60 * 5));
        assert!(!n.is_online(Utc::now(), Duration::hours(4)));
    }

    #[test]
    fn never_contacted_is_offline() {
        let n = node(None);
        assert!(!n.is_online(Utc::now(), Duration::hours(4)));
    }
}
