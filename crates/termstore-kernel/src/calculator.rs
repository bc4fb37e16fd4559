//! Relative position of stamps under a coordinate.
//!
//! Ordering is a strict partial order, not a timeline. The calculator first
//! unfolds the coordinate's path into **segments**: the destination path up
//! to the coordinate time, then every origin path up to the origin time
//! (capped by the time of the hop that reached it). A stamp is *on route*
//! when its path has a segment, its time lies inside that segment, its
//! module passes the filter, and it is not canceled.
//!
//! ```text
//! dev   ─────────●──────────▶ position (dev, 300)
//!               /
//! main ──●─────● origin (main, 150)        main segment ends at 150
//! ```
//!
//! Between two on-route stamps the answer is one of
//! `Before | Equal | After | Contradiction | Unreachable`.

use crate::coordinate::{Precedence, StampCoordinate, StampPosition};
use crate::error::KernelError;
use crate::registry::{PathService, Registries, StampRegistry};
use crate::stamp::{ConceptSequence, Stamp, StampSequence, StampSequenceSet};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Outcome of comparing two stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativePosition {
    Before,
    Equal,
    After,
    /// Same effective position, different edits.
    Contradiction,
    /// No causal relation visible from this coordinate.
    Unreachable,
}

impl RelativePosition {
    pub fn reverse(self) -> Self {
        match self {
            RelativePosition::Before => RelativePosition::After,
            RelativePosition::After => RelativePosition::Before,
            other => other,
        }
    }
}

/// One path's visible window.
#[derive(Debug, Clone)]
struct Segment {
    sequence: usize,
    end_time: i64,
    /// Segment sequences of every transitive origin of this path.
    ancestors: BTreeSet<usize>,
}

/// Partial order over stamps for one coordinate.
pub struct RelativePositionCalculator {
    coordinate: StampCoordinate,
    segments: HashMap<ConceptSequence, Segment>,
    stamps: Arc<dyn StampRegistry>,
}

impl RelativePositionCalculator {
    /// Unfold the coordinate's path graph into segments.
    pub fn new(
        coordinate: StampCoordinate,
        registries: &Registries,
    ) -> Result<Self, KernelError> {
        let mut segments = HashMap::new();
        let mut visiting = Vec::new();
        add_segments(
            coordinate.position(),
            registries.paths(),
            &mut segments,
            &mut visiting,
        )?;
        Ok(Self {
            coordinate,
            segments,
            stamps: registries.stamps_handle(),
        })
    }

    pub fn coordinate(&self) -> &StampCoordinate {
        &self.coordinate
    }

    /// End time of the window visible on `path`, if the path is reachable.
    pub fn visible_until(&self, path: ConceptSequence) -> Option<i64> {
        self.segments.get(&path).map(|segment| segment.end_time)
    }

    /// Whether `stamp` lies inside the coordinate's visible universe.
    ///
    /// The allowed-states filter is not part of the route; it applies to the
    /// reduced latest set.
    pub fn on_route(&self, stamp: StampSequence) -> bool {
        self.lookup(stamp)
            .is_some_and(|resolved| self.stamp_on_route(&resolved))
    }

    fn stamp_on_route(&self, stamp: &Stamp) -> bool {
        if stamp.is_canceled() || !self.coordinate.allows_module(stamp.module) {
            return false;
        }
        self.segments
            .get(&stamp.path)
            .is_some_and(|segment| stamp.time <= segment.end_time)
    }

    /// Order two stamps assuming both are on route.
    pub fn fast_relative_position(
        &self,
        a: StampSequence,
        b: StampSequence,
        precedence: Precedence,
    ) -> RelativePosition {
        if a == b {
            return RelativePosition::Equal;
        }
        let (Some(stamp_a), Some(stamp_b)) = (self.lookup(a), self.lookup(b)) else {
            return RelativePosition::Unreachable;
        };
        self.compare_stamps(&stamp_a, &stamp_b, precedence)
    }

    /// Order two stamps, reporting `Unreachable` if either is off route.
    pub fn relative_position(&self, a: StampSequence, b: StampSequence) -> RelativePosition {
        let (Some(stamp_a), Some(stamp_b)) = (self.lookup(a), self.lookup(b)) else {
            return RelativePosition::Unreachable;
        };
        if !self.stamp_on_route(&stamp_a) || !self.stamp_on_route(&stamp_b) {
            return RelativePosition::Unreachable;
        }
        if a == b {
            return RelativePosition::Equal;
        }
        self.compare_stamps(&stamp_a, &stamp_b, self.coordinate.precedence())
    }

    fn compare_stamps(&self, a: &Stamp, b: &Stamp, precedence: Precedence) -> RelativePosition {
        if a.path == b.path {
            return by_time(a.time, b.time);
        }

        let (Some(segment_a), Some(segment_b)) =
            (self.segments.get(&a.path), self.segments.get(&b.path))
        else {
            return RelativePosition::Unreachable;
        };
        let ancestry = if segment_a.ancestors.contains(&segment_b.sequence) {
            Some(RelativePosition::After)
        } else if segment_b.ancestors.contains(&segment_a.sequence) {
            Some(RelativePosition::Before)
        } else {
            None
        };

        match precedence {
            Precedence::Path => ancestry.unwrap_or(RelativePosition::Unreachable),
            Precedence::Time => match a.time.cmp(&b.time) {
                Ordering::Less => RelativePosition::Before,
                Ordering::Greater => RelativePosition::After,
                Ordering::Equal => ancestry.unwrap_or(RelativePosition::Contradiction),
            },
        }
    }

    /// Reduce `stamps` to the latest visible subset.
    ///
    /// Off-route stamps are dropped first. The remainder is reduced to its
    /// maximal elements; stamps in contradiction are all kept. Finally the
    /// allowed-states filter is applied to the maximal set.
    pub fn latest_stamp_sequences(
        &self,
        stamps: impl IntoIterator<Item = StampSequence>,
    ) -> StampSequenceSet {
        let candidates: BTreeSet<StampSequence> = stamps
            .into_iter()
            .filter(|stamp| self.on_route(*stamp))
            .collect();

        let precedence = self.coordinate.precedence();
        let mut latest: Vec<StampSequence> = Vec::new();
        for candidate in candidates {
            let dominated = latest.iter().any(|current| {
                matches!(
                    self.fast_relative_position(candidate, *current, precedence),
                    RelativePosition::Before | RelativePosition::Equal
                )
            });
            if dominated {
                continue;
            }
            latest.retain(|current| {
                self.fast_relative_position(candidate, *current, precedence)
                    != RelativePosition::After
            });
            latest.push(candidate);
        }

        latest
            .into_iter()
            .filter(|stamp| {
                self.lookup(*stamp)
                    .is_some_and(|resolved| self.coordinate.allows_state(resolved.status))
            })
            .collect()
    }

    /// Whether any latest stamp survives the allowed-states filter.
    pub fn is_latest_active(&self, stamps: impl IntoIterator<Item = StampSequence>) -> bool {
        !self.latest_stamp_sequences(stamps).is_empty()
    }

    fn lookup(&self, stamp: StampSequence) -> Option<Stamp> {
        let resolved = self.stamps.stamp(stamp);
        if resolved.is_none() {
            tracing::warn!(stamp = stamp.0, "stamp not known to the registry");
        }
        resolved
    }
}

impl std::fmt::Debug for RelativePositionCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelativePositionCalculator")
            .field("coordinate", &self.coordinate)
            .field("segments", &self.segments)
            .finish_non_exhaustive()
    }
}

fn by_time(a: i64, b: i64) -> RelativePosition {
    match a.cmp(&b) {
        Ordering::Less => RelativePosition::Before,
        Ordering::Greater => RelativePosition::After,
        Ordering::Equal => RelativePosition::Contradiction,
    }
}

/// Add the segment for `position` and its origins; returns the segment
/// sequences of `position.path` and all its ancestors.
fn add_segments(
    position: StampPosition,
    paths: &dyn PathService,
    segments: &mut HashMap<ConceptSequence, Segment>,
    visiting: &mut Vec<ConceptSequence>,
) -> Result<BTreeSet<usize>, KernelError> {
    if visiting.contains(&position.path) {
        return Err(KernelError::PathCycle(position.path));
    }
    let origins = paths
        .origins(position.path)
        .ok_or(KernelError::UnknownPath(position.path))?;

    visiting.push(position.path);
    let mut ancestors = BTreeSet::new();
    for origin in origins {
        let effective = StampPosition::new(origin.time.min(position.time), origin.path);
        ancestors.extend(add_segments(effective, paths, segments, visiting)?);
    }
    visiting.pop();

    let next_sequence = segments.len();
    let sequence = match segments.entry(position.path) {
        Entry::Occupied(mut entry) => {
            let segment = entry.get_mut();
            segment.end_time = segment.end_time.max(position.time);
            segment.ancestors.extend(ancestors.iter().copied());
            segment.sequence
        }
        Entry::Vacant(entry) => {
            entry.insert(Segment {
                sequence: next_sequence,
                end_time: position.time,
                ancestors: ancestors.clone(),
            });
            next_sequence
        }
    };
    ancestors.insert(sequence);
    Ok(ancestors)
}

/// Shared calculators keyed by coordinate.
///
/// Building a calculator walks the path graph, so readers that evaluate many
/// chronicles under one coordinate share one instance. Call
/// [`CalculatorCache::invalidate`] after the path graph changes.
pub struct CalculatorCache {
    registries: Registries,
    calculators: DashMap<StampCoordinate, Arc<RelativePositionCalculator>>,
}

impl CalculatorCache {
    pub fn new(registries: Registries) -> Self {
        Self {
            registries,
            calculators: DashMap::new(),
        }
    }

    pub fn calculator(
        &self,
        coordinate: &StampCoordinate,
    ) -> Result<Arc<RelativePositionCalculator>, KernelError> {
        if let Some(existing) = self.calculators.get(coordinate) {
            return Ok(Arc::clone(existing.value()));
        }
        let built = Arc::new(RelativePositionCalculator::new(
            coordinate.clone(),
            &self.registries,
        )?);
        let entry = self
            .calculators
            .entry(coordinate.clone())
            .or_insert(built);
        Ok(Arc::clone(entry.value()))
    }

    pub fn invalidate(&self) {
        self.calculators.clear();
    }

    pub fn len(&self) -> usize {
        self.calculators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calculators.is_empty()
    }
}
