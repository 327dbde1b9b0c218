//! Remotely executable operations.
//!
//! An operation set is a closed, serializable enum implementing [`RemoteOp`]. The
//! coordinator validates an operation against its own arena, the bridge ships the
//! encoded value to every worker, and each rank calls [`RemoteOp::execute`] on its
//! own [`RankEnv`].

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;

use crate::algs::collective::CommCollective;
use crate::algs::communicator::Communicator;
use crate::dispatch::arena::HandleArena;
use crate::dispatch_error::DispatchError;

/// Result of executing an operation on one rank.
pub enum Reply {
    Unit,
    Scalar(f64),
    Scalars(Vec<f64>),
    Text(String),
    /// A rank-local object; only meaningful for managed calls.
    Object(Box<dyn Any>),
}

impl Reply {
    pub fn object<T: Any>(value: T) -> Self {
        Reply::Object(Box::new(value))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Unit => "unit",
            Reply::Scalar(_) => "scalar",
            Reply::Scalars(_) => "scalars",
            Reply::Text(_) => "text",
            Reply::Object(_) => "object",
        }
    }

    pub fn into_scalar(self) -> Result<f64, DispatchError> {
        match self {
            Reply::Scalar(x) => Ok(x),
            other => Err(DispatchError::InvalidArgument(format!(
                "expected a scalar reply, got {}",
                other.kind()
            ))),
        }
    }

    pub fn into_scalars(self) -> Result<Vec<f64>, DispatchError> {
        match self {
            Reply::Scalars(v) => Ok(v),
            other => Err(DispatchError::InvalidArgument(format!(
                "expected a vector reply, got {}",
                other.kind()
            ))),
        }
    }

    pub fn into_text(self) -> Result<String, DispatchError> {
        match self {
            Reply::Text(s) => Ok(s),
            other => Err(DispatchError::InvalidArgument(format!(
                "expected a text reply, got {}",
                other.kind()
            ))),
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Unit => f.write_str("Unit"),
            Reply::Scalar(x) => f.debug_tuple("Scalar").field(x).finish(),
            Reply::Scalars(v) => f.debug_tuple("Scalars").field(v).finish(),
            Reply::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Reply::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// What an operation sees while executing on one rank.
pub struct RankEnv<'a, C: Communicator> {
    pub comm: &'a C,
    pub arena: &'a mut HandleArena,
}

impl<'a, C: Communicator> RankEnv<'a, C> {
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn is_coordinator(&self) -> bool {
        self.comm.rank() == 0
    }

    /// Collectives for rank-local computations that need their peers.
    pub fn collective(&self) -> CommCollective<'a, C> {
        CommCollective(self.comm)
    }
}

/// A member of a closed set of collectively executed operations.
pub trait RemoteOp: Serialize + DeserializeOwned + fmt::Debug {
    /// Short name used in logs and aggregated errors.
    fn name(&self) -> &'static str;

    /// Checks run on the coordinator before anything is broadcast.
    fn validate(&self, _arena: &HandleArena) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Execute on the current rank.
    fn execute<C: Communicator>(&self, env: &mut RankEnv<'_, C>) -> Result<Reply, DispatchError>;
}
