//! DispatchError: unified error type for hdd-dispatch public APIs
//!
//! Every fallible operation in the crate (configuration, transport, dispatch,
//! discretization) reports through this enum so that a failure on any rank can be
//! carried back to the coordinator as plain data.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::dispatch::arena::HandleId;

/// A single rank's contribution to an aggregated collective failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankFailure {
    pub rank: usize,
    pub message: String,
}

impl fmt::Display for RankFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {}: {}", self.rank, self.message)
    }
}

/// Unified error type for hdd-dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Underlying I/O failure (visualization output, config reading after open).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A configuration file exists but could not be parsed.
    #[error("Configuration parse error in `{source_name}` line {line}: {message}")]
    ConfigParse {
        source_name: String,
        line: usize,
        message: String,
    },
    /// A configuration key was looked up but is not present.
    #[error("Configuration key `{0}` is missing")]
    MissingKey(String),
    /// A configuration value could not be converted to the requested type.
    #[error("Configuration key `{key}` has invalid value `{value}` (expected {expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    /// An operation was attempted in the wrong lifecycle state (e.g. mutating a locked object).
    #[error("State violation: {0}")]
    StateViolation(String),
    /// Arguments were rejected before any rank executed the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not available under the current communication policy or backend.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// No object is registered under the given handle on this rank.
    #[error("Unknown handle {0}")]
    UnknownHandle(HandleId),
    /// The object registered under a handle has a different type than requested.
    #[error("Handle {id} does not refer to a `{expected}`")]
    HandleType { id: HandleId, expected: &'static str },
    /// Ranks assigned different ids to the same managed object.
    #[error("Handle tables out of sync: coordinator assigned {expected}, rank {rank} assigned {got}")]
    HandleDesync {
        expected: HandleId,
        rank: usize,
        got: HandleId,
    },
    /// A coordinator-only entry point was called on a worker rank.
    #[error("Operation `{0}` may only be issued from the coordinator (rank 0)")]
    NotCoordinator(&'static str),
    /// The context was already torn down.
    #[error("MPI context has been torn down")]
    ContextClosed,
    /// Transport level failure while talking to a peer rank.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A frame could not be encoded or decoded.
    #[error("Wire format error: {0}")]
    Wire(String),
    /// The local solver did not produce a solution.
    #[error("Solver error: {0}")]
    Solver(String),
    /// One or more ranks failed while executing a collective operation.
    #[error("Collective operation `{operation}` failed on {} rank(s): {}", .failures.len(), format_failures(.failures))]
    RankFailures {
        operation: String,
        failures: Vec<RankFailure>,
    },
}

fn format_failures(failures: &[RankFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl DispatchError {
    /// Ranks named by a [`DispatchError::RankFailures`]; empty for every other variant.
    pub fn failed_ranks(&self) -> Vec<usize> {
        match self {
            DispatchError::RankFailures { failures, .. } => {
                failures.iter().map(|f| f.rank).collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        DispatchError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}

impl From<bincode::Error> for DispatchError {
    fn from(e: bincode::Error) -> Self {
        DispatchError::Wire(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_failures_lists_every_rank() {
        let err = DispatchError::RankFailures {
            operation: "solve".into(),
            failures: vec![
                RankFailure {
                    rank: 1,
                    message: "boom".into(),
                },
                RankFailure {
                    rank: 3,
                    message: "bang".into(),
                },
            ],
        };
        assert_eq!(err.failed_ranks(), vec![1, 3]);
        let text = err.to_string();
        assert!(text.contains("`solve`"));
        assert!(text.contains("rank 1: boom"));
        assert!(text.contains("rank 3: bang"));
    }

    #[test]
    fn other_variants_have_no_failed_ranks() {
        assert!(DispatchError::ContextClosed.failed_ranks().is_empty());
    }
}
