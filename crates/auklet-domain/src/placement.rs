use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::node::NodeRecord;

/// Placement 0 is the unconstrained default: any node qualifies.
pub const DEFAULT_PLACEMENT: u16 = 0;

// ── Node filters ──────────────────────────────────────────────────────────────

/// Predicate over node attributes. A placement is an opaque ID paired with one
/// of these; the repair core never bakes in geographic rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFilter {
    /// Every node matches.
    Any,
    /// Node's country code must be in the set.
    Countries(BTreeSet<String>),
    /// Node's country code must not be in the set.
    ExcludeCountries(BTreeSet<String>),
    /// Node must carry this tag with this value.
    Tag { key: String, value: String },
    /// All sub-filters must match.
    All(Vec<NodeFilter>),
}

impl NodeFilter {
    pub fn matches(&self, node: &NodeRecord) -> bool {
        match self {
            NodeFilter::Any => true,
            NodeFilter::Countries(set) => set.contains(&node.country_code),
            NodeFilter::ExcludeCountries(set) => !set.contains(&node.country_code),
            NodeFilter::Tag { key, value } => {
                node.tags.get(key).is_some_and(|v| v == value)
            }
            NodeFilter::All(filters) => filters.iter().all(|f| f.matches(node)),
        }
    }
}

// ── Placement rules ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub id: u16,
    pub filter: NodeFilter,
    /// When false, this placement opts out of subnet declumping (e.g. a
    /// single-datacenter placement where shared subnets are expected).
    pub subnet_declumping: bool,
}

impl PlacementRule {
    pub fn new(id: u16, filter: NodeFilter) -> Self {
        PlacementRule { id, filter, subnet_declumping: true }
    }
}

/// Registry of placement rules. Unknown placements resolve to the
/// unconstrained default rule.
#[derive(Debug, Clone)]
pub struct PlacementRules {
    rules: HashMap<u16, PlacementRule>,
    default_rule: PlacementRule,
}

impl PlacementRules {
    pub fn new() -> Self {
        PlacementRules {
            rules: HashMap::new(),
            default_rule: PlacementRule::new(DEFAULT_PLACEMENT, NodeFilter::Any),
        }
    }

    pub fn insert(&mut self, rule: PlacementRule) -> &mut Self {
        self.rules.insert(rule.id, rule);
        self
    }

    pub fn for_placement(&self, id: u16) -> &PlacementRule {
        self.rules.get(&id).unwrap_or(&self.default_rule)
    }
}

impl Default for PlacementRules {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use std::collections::BTreeMap;

    fn node(country: &str, tags: &[(&str, &str)]) -> NodeRecord {
        NodeRecord {
            id: NodeId([1u8; 32]),
            address: "n:7777".into(),
            last_contact: None,
            country_code: country.into(),
            last_net: "10.0.0.0".into(),
            exiting: false,
            suspended: false,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn any_matches_everything() {
        assert!(NodeFilter::Any.matches(&node("", &[])));
    }

    #[test]
    fn countries_filter() {
        let f = NodeFilter::Countries(["DE".to_string(), "FR".to_string()].into());
        assert!(f.matches(&node("DE", &[])));
        assert!(!f.matches(&node("US", &[])));
    }

    #[test]
    fn exclude_countries_filter() {
        let f = NodeFilter::ExcludeCountries(["RU".to_string()].into());
        assert!(f.matches(&node("DE", &[])));
        assert!(!f.matches(&node("RU", &[])));
    }

    #[test]
    fn tag_filter() {
        let f = NodeFilter::Tag { key: "soc2".into(), value: "true".into() };
        assert!(f.matches(&node("US", &[("soc2", "true")])));
        assert!(!f.matches(&node("US", &[("soc2", "false")])));
        assert!(!f.matches(&node("US", &[])));
    }

    #[test]
    fn all_requires_every_subfilter() {
        let f = NodeFilter::All(vec![
            NodeFilter::Countries(["DE".to_string()].into()),
            NodeFilter::Tag { key: "tier".into(), value: "1".into() },
        ]);
        assert!(f.matches(&node("DE", &[("tier", "1")])));
        assert!(!f.matches(&node("DE", &[("tier", "2")])));
        assert!(!f.matches(&node("FR", &[("tier", "1")])));
    }

    #[test]
    fn unknown_placement_falls_back_to_any() {
        let rules = PlacementRules::new();
        let rule = rules.for_placement(42);
        assert_eq!(rule.filter, NodeFilter::Any);
        assert!(rule.subnet_declumping);
    }

    #[test]
    fn registered_placement_is_returned() {
        let mut rules = PlacementRules::new();
        let mut eu = PlacementRule::new(
            1,
            NodeFilter::Countries(["DE".to_string(), "FR".to_string()].into()),
        );
        eu.subnet_declumping = false;
        rules.insert(eu.clone());
        assert_eq!(rules.for_placement(1), &eu);
    }
}
