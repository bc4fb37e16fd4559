//! View coordinates over stamped history.
//!
//! A [`StampCoordinate`] is an immutable value:
//! - **precedence**: whether path ancestry or raw time decides ordering first
//! - **position**: a reference time on a reference path
//! - **modules**: module concepts to include (empty = all)
//! - **allowed states**: statuses a latest version may carry
//!
//! Coordinates are never edited in place. `make_analog_*` derives a new value
//! with one field overridden.

use crate::stamp::{ConceptSequence, LATEST_TIME, Status};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which rule orders stamps first when they sit on different paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    /// Path ancestry dominates; time orders stamps on the same path.
    Path,
    /// Raw time dominates; path ancestry only breaks ties.
    Time,
}

/// A point on a path: everything on `path` up to and including `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampPosition {
    pub time: i64,
    pub path: ConceptSequence,
}

impl StampPosition {
    pub fn new(time: i64, path: ConceptSequence) -> Self {
        Self { time, path }
    }

    /// The open end of `path`, seeing uncommitted edits.
    pub fn latest(path: ConceptSequence) -> Self {
        Self::new(LATEST_TIME, path)
    }
}

impl fmt::Display for StampPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.time == LATEST_TIME {
            write!(f, "latest on path {}", self.path)
        } else {
            write!(f, "{} on path {}", self.time, self.path)
        }
    }
}

/// A path together with the positions it originates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampPath {
    pub sequence: ConceptSequence,
    pub origins: Vec<StampPosition>,
}

impl StampPath {
    pub fn root(sequence: ConceptSequence) -> Self {
        Self {
            sequence,
            origins: Vec::new(),
        }
    }

    pub fn with_origins(sequence: ConceptSequence, origins: Vec<StampPosition>) -> Self {
        Self { sequence, origins }
    }
}

/// Immutable view filter over time, path, module and state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StampCoordinate {
    precedence: Precedence,
    position: StampPosition,
    modules: BTreeSet<ConceptSequence>,
    allowed_states: BTreeSet<Status>,
}

impl StampCoordinate {
    pub fn new(
        precedence: Precedence,
        position: StampPosition,
        modules: impl IntoIterator<Item = ConceptSequence>,
        allowed_states: impl IntoIterator<Item = Status>,
    ) -> Self {
        Self {
            precedence,
            position,
            modules: modules.into_iter().collect(),
            allowed_states: allowed_states.into_iter().collect(),
        }
    }

    /// Path precedence, all modules, active and inactive states.
    pub fn at(position: StampPosition) -> Self {
        Self::new(
            Precedence::Path,
            position,
            [],
            [Status::Active, Status::Inactive, Status::Primordial],
        )
    }

    /// Path precedence, all modules, active states only.
    pub fn active_at(position: StampPosition) -> Self {
        Self::new(
            Precedence::Path,
            position,
            [],
            [Status::Active, Status::Primordial],
        )
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    pub fn position(&self) -> StampPosition {
        self.position
    }

    pub fn modules(&self) -> &BTreeSet<ConceptSequence> {
        &self.modules
    }

    pub fn allowed_states(&self) -> &BTreeSet<Status> {
        &self.allowed_states
    }

    /// Whether `module` passes the module filter.
    pub fn allows_module(&self, module: ConceptSequence) -> bool {
        self.modules.is_empty() || self.modules.contains(&module)
    }

    pub fn allows_state(&self, status: Status) -> bool {
        self.allowed_states.contains(&status)
    }

    /// Same coordinate, viewed at another time on the same path.
    pub fn make_analog_time(&self, time: i64) -> Self {
        Self {
            position: StampPosition::new(time, self.position.path),
            ..self.clone()
        }
    }

    pub fn make_analog_position(&self, position: StampPosition) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }

    pub fn make_analog_states(&self, states: impl IntoIterator<Item = Status>) -> Self {
        Self {
            allowed_states: states.into_iter().collect(),
            ..self.clone()
        }
    }

    pub fn make_analog_modules(
        &self,
        modules: impl IntoIterator<Item = ConceptSequence>,
    ) -> Self {
        Self {
            modules: modules.into_iter().collect(),
            ..self.clone()
        }
    }

    pub fn make_analog_precedence(&self, precedence: Precedence) -> Self {
        Self {
            precedence,
            ..self.clone()
        }
    }
}

impl fmt::Display for StampCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stamp coordinate {{{:?}, {}, modules: ", self.precedence, self.position)?;
        if self.modules.is_empty() {
            f.write_str("all")?;
        } else {
            let modules: Vec<String> = self.modules.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", modules.join(", "))?;
        }
        let states: Vec<&str> = self.allowed_states.iter().map(|s| s.as_str()).collect();
        write!(f, ", states: [{}]}}", states.join(", "))
    }
}
