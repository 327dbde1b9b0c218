#![cfg_attr(docsrs, feature(doc_cfg))]
//! # hdd-dispatch
//!
//! Rank-0-driven distributed dispatch for discretization drivers. One coordinator
//! process (rank 0) reads a configuration, builds per-rank objects through the
//! dispatch bridge and issues collective operations against them; every other rank
//! sits in a worker event loop and executes what it is sent.
//!
//! ## Features
//! - Explicit [`dispatch::MpiContext`] with `call`, `call_manage`, `release`,
//!   `event_loop` and `teardown`
//! - Deterministic per-process [`dispatch::HandleArena`]
//! - Aggregated per-rank failures ([`DispatchError::RankFailures`])
//! - Pluggable communication backends (serial, threads, MPI)
//! - `.ini`-style [`config::Configuration`] with default fallback
//! - A distributed discretization wrapper with `NoComm`/`AutoComm` vector policies
//!   and pass-through or generic solves
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! hdd-dispatch = "0.1"
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! Without MPI, [`dispatch::run_local`] runs a whole job in one process, one thread
//! per rank.
//!
//! ## Determinism
//!
//! Handle ids are assigned in call order on every rank. Global reductions are folded
//! on rank 0 in rank order and broadcast, so every rank sees bitwise identical
//! scalars and repeated runs give identical vectors.

pub mod algs;
pub mod config;
pub mod discretization;
pub mod dispatch;
pub mod dispatch_error;
pub mod parallel;

pub use dispatch_error::{DispatchError, RankFailure};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::collective::{Collective, CommCollective};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, SerialComm};
    pub use crate::config::Configuration;
    pub use crate::discretization::{
        LocalVector, MpiCgExample, Parameter, SolverOptions, StationaryDiscretization,
    };
    pub use crate::dispatch::{HandleArena, HandleId, MpiContext, RemoteOp, Reply, run_local};
    pub use crate::dispatch_error::DispatchError;
    pub use crate::parallel::{
        CommPolicy, DriverSettings, MpiDiscretization, MpiVectorArray, Operation, WrapMode,
        run_driver,
    };
}
