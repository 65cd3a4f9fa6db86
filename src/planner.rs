//! Reconciliation planner.
//!
//! Compares freshly parsed data points against the stored fingerprint map
//! and decides what to write:
//!
//! | New parse | Stored | Outcome |
//! |-----------|--------|---------|
//! | fqn present | absent | insert (upsert) |
//! | fqn present, hash differs | present | update (upsert) |
//! | fqn present, hash equal | present | unchanged |
//! | fqn absent | present | delete in FULL mode, kept in INCREMENTAL |
//!
//! Every delete comes from a fqn missing in the new parse and every upsert
//! from one present in it, so the two sets never overlap.

use std::collections::HashSet;

use crate::fingerprint::FingerprintMap;
use crate::models::{DataPoint, IngestionMode};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangePlan {
    /// Inserts and updates, in parse order.
    pub upserts: Vec<DataPoint>,
    /// Stale FQNs, sorted.
    pub deletes: Vec<String>,
    pub unchanged: usize,
    pub inserts: usize,
    pub updates: usize,
    /// FQNs that appeared more than once in the parse; later copies were dropped.
    pub duplicates: Vec<String>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Incremental form of [`plan`]: classifies data points as they are parsed,
/// holding only the FQNs seen so far.
pub struct PlanBuilder<'a> {
    existing: &'a FingerprintMap,
    seen: HashSet<String>,
    inserts: usize,
    updates: usize,
    unchanged: usize,
    duplicates: Vec<String>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(existing: &'a FingerprintMap) -> Self {
        Self {
            existing,
            seen: HashSet::new(),
            inserts: 0,
            updates: 0,
            unchanged: 0,
            duplicates: Vec::new(),
        }
    }

    /// Hands the data point back when it has to be upserted.
    pub fn classify(&mut self, dp: DataPoint) -> Option<DataPoint> {
        if !self.seen.insert(dp.data_point_fqn.clone()) {
            self.duplicates.push(dp.data_point_fqn);
            return None;
        }
        match self.existing.get(&dp.data_point_fqn) {
            None => {
                self.inserts += 1;
                Some(dp)
            }
            Some(hash) if *hash != dp.data_point_hash => {
                self.updates += 1;
                Some(dp)
            }
            Some(_) => {
                self.unchanged += 1;
                None
            }
        }
    }

    /// Keep whatever is stored for `fqn` without classifying anything.
    pub fn retain(&mut self, fqn: &str) {
        self.seen.insert(fqn.to_string());
    }

    /// Counts, duplicates and (FULL mode) deletes. `upserts` is left empty;
    /// they were handed out by [`PlanBuilder::classify`].
    pub fn finish(self, mode: IngestionMode) -> ChangePlan {
        let mut deletes = Vec::new();
        if mode == IngestionMode::Full {
            deletes = self
                .existing
                .keys()
                .filter(|fqn| !self.seen.contains(*fqn))
                .cloned()
                .collect();
            deletes.sort();
        }
        ChangePlan {
            upserts: Vec::new(),
            deletes,
            unchanged: self.unchanged,
            inserts: self.inserts,
            updates: self.updates,
            duplicates: self.duplicates,
        }
    }
}

pub fn plan(
    new_data_points: Vec<DataPoint>,
    existing: &FingerprintMap,
    mode: IngestionMode,
) -> ChangePlan {
    let mut builder = PlanBuilder::new(existing);
    let upserts: Vec<DataPoint> = new_data_points
        .into_iter()
        .filter_map(|dp| builder.classify(dp))
        .collect();
    let mut change = builder.finish(mode);
    change.upserts = upserts;
    change
}
