//! Dataset lifecycle states.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Furthest stage a dataset has reached.
///
/// ```text
/// Unknown -> Downloading -> Converting -> Cataloged -> Active
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetState {
    Unknown,
    Downloading,
    Converting,
    Cataloged,
    Active,
}

impl DatasetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Downloading => "downloading",
            Self::Converting => "converting",
            Self::Cataloged => "cataloged",
            Self::Active => "active",
        }
    }

    /// Only single forward steps are legal.
    pub fn can_advance_to(&self, next: DatasetState) -> bool {
        matches!(
            (self, next),
            (Self::Unknown, Self::Downloading)
                | (Self::Downloading, Self::Converting)
                | (Self::Converting, Self::Cataloged)
                | (Self::Cataloged, Self::Active)
        )
    }
}

impl fmt::Display for DatasetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pass of `init` (or `use`) through the state machine.
#[derive(Debug)]
pub struct InitRun {
    dataset: String,
    state: DatasetState,
    started: Instant,
}

impl InitRun {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self::starting_at(dataset, DatasetState::Unknown)
    }

    pub fn starting_at(dataset: impl Into<String>, state: DatasetState) -> Self {
        Self {
            dataset: dataset.into(),
            state,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> DatasetState {
        self.state
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn advance(&mut self, next: DatasetState) -> Result<(), CatalogError> {
        if !self.state.can_advance_to(next) {
            return Err(CatalogError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::info!(
            dataset = %self.dataset,
            from = %self.state,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Dataset state changed"
        );
        self.state = next;
        Ok(())
    }
}
