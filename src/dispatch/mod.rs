//! Rank-0-driven remote dispatch: managed object ids, the operation trait, the
//! per-process context with its worker event loop, and in-process jobs.

pub mod arena;
pub mod context;
pub mod local_job;
pub mod op;

pub use arena::{HandleArena, HandleId};
pub use context::MpiContext;
pub use local_job::run_local;
pub use op::{RankEnv, RemoteOp, Reply};
