use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};


use auklet_domain::{NodeId, NodeRecord, Piece, PlacementRule, RedundancyScheme};

// ── Piece sets ────────────────────────────────────────────────────────────────

/// Ordered set of piece numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PieceSet(BTreeSet<u16>);

impl PieceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, number: u16) {
        self.0.insert(number);
    }

    pub fn contains(&self, number: u16) -> bool {
        self.0.contains(&number)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn union(&self, other: &PieceSet) -> PieceSet {
        PieceSet(self.0.union(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &PieceSet) -> PieceSet {
        PieceSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &PieceSet) -> PieceSet {
        PieceSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for PieceSet {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        PieceSet(iter.into_iter().collect())
    }
}

impl Extend<u16> for PieceSet {
    fn extend<T: IntoIterator<Item = u16>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

// ── Classification ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClassifyOptions {
    pub now: DateTime<Utc>,
    pub online_window: Duration,
    pub do_declumping: bool,
    pub do_placement_check: bool,
    pub excluded_countries: BTreeSet<String>,
}

/// Disjoint-or-overlapping piece sets produced by [`classify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PieceCheck {
    /// Node offline or unknown to the overlay.
    pub missing: PieceSet,
    /// Downloadable: complement of missing within present pieces.
    pub retrievable: PieceSet,
    pub suspended: PieceSet,
    /// Pieces beyond the first on the same subnet.
    pub clumped: PieceSet,
    pub exiting: PieceSet,
    pub out_of_placement: PieceSet,
    pub in_excluded_country: PieceSet,
    /// Exiting ∪ out-of-placement ∪ clumped: retrievable but must move.
    pub forcing_repair: PieceSet,
    pub unhealthy: PieceSet,
    pub healthy: PieceSet,
}

/// Outcome of weighing a [`PieceCheck`] against the redundancy scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairDecision {
    /// Fewer than `required` retrievable pieces. Not an error: nodes may
    /// come back; the segment stays queued.
    Irreparable,
    /// More than `repair` healthy pieces; no reconstruction needed.
    NotNeeded,
    Repair,
}

impl PieceCheck {
    pub fn decide(&self, scheme: &RedundancyScheme) -> RepairDecision {
        if self.retrievable.len() < scheme.required as usize {
            RepairDecision::Irreparable
        } else if self.healthy.len() > scheme.repair as usize {
            RepairDecision::NotNeeded
        } else {
            RepairDecision::Repair
        }
    }
}

/// Partition a segment's pieces into health categories.
///
/// Pieces in the operator's excluded countries count against `healthy` (so
/// their loss of redundancy triggers repair) but stay retrievable and are
/// retained after repair until their nodes lose them naturally.
pub fn classify(
    pieces: &[Piece],
    nodes: &HashMap<NodeId, NodeRecord>,
    rule: &PlacementRule,
    opts: &ClassifyOptions,
) -> PieceCheck {
    let mut check = PieceCheck::default();

    for piece in pieces {
        let number = piece.number;
        let node = match nodes.get(&piece.node) {
            Some(node) if node.is_online(opts.now, opts.online_window) => node,
            _ => {
                check.missing.insert(number);
                continue;
            }
        };
        check.retrievable.insert(number);

        if node.suspended {
            check.suspended.insert(number);
        }
        if node.exiting {
            check.exiting.insert(number);
        }
        if opts.do_placement_check && !rule.filter.matches(node) {
            check.out_of_placement.insert(number);
        }
        if opts.excluded_countries.contains(&node.country_code) {
            check.in_excluded_country.insert(number);
        }
    }

    if opts.do_declumping && rule.subnet_declumping {
        let mut seen_subnets: BTreeSet<&str> = BTreeSet::new();
        for piece in pieces {
            let Some(node) = nodes.get(&piece.node) else { continue };
            if node.last_net.is_empty() {
                continue;
            }
            if !seen_subnets.insert(node.last_net.as_str()) {
                check.clumped.insert(piece.number);
            }
        }
    }

    check.forcing_repair = check
        .exiting
        .union(&check.out_of_placement)
        .union(&check.clumped);
    check.unhealthy = check
        .missing
        .union(&check.suspended)
        .union(&check.forcing_repair)
        .union(&check.in_excluded_country);
    let present: PieceSet = pieces.iter().map(|p| p.number).collect();
    check.healthy = present.difference(&check.unhealthy);
    check
}
