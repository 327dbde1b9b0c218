//! Coordinator-side proxies for distributed vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algs::communicator::Communicator;
use crate::discretization::LocalVector;
use crate::dispatch::arena::HandleId;
use crate::dispatch::context::MpiContext;
use crate::dispatch_error::DispatchError;
use crate::parallel::operations::{Operation, Reduction};

/// Whether vector operations may exchange data between ranks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommPolicy {
    /// Ranks never exchange vector data; global reductions are refused.
    NoComm,
    /// Reductions and gathers run as collectives across ranks.
    AutoComm,
}

impl fmt::Display for CommPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommPolicy::NoComm => "NoComm",
            CommPolicy::AutoComm => "AutoComm",
        })
    }
}

/// A vector that exists as one [`LocalVector`] block per rank.
///
/// Dropping the proxy does not free the blocks; call [`MpiVectorArray::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct MpiVectorArray {
    id: HandleId,
    policy: CommPolicy,
    dim: usize,
}

impl MpiVectorArray {
    /// Proxy for a vector already managed under `id`; the dimension is read from the
    /// coordinator's own block.
    pub fn from_handle<C: Communicator>(
        ctx: &MpiContext<C, Operation>,
        id: HandleId,
        policy: CommPolicy,
    ) -> Result<Self, DispatchError> {
        let dim = ctx.arena().get::<LocalVector>(id)?.dim_global();
        Ok(Self { id, policy, dim })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn policy(&self) -> CommPolicy {
        self.policy
    }

    /// Global dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn require_comm(&self, what: &str) -> Result<(), DispatchError> {
        match self.policy {
            CommPolicy::AutoComm => Ok(()),
            CommPolicy::NoComm => Err(DispatchError::Unsupported(format!(
                "`{what}` needs inter-rank communication, which the {} policy forbids",
                self.policy
            ))),
        }
    }

    fn reduce<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        other: Option<&MpiVectorArray>,
        reduction: Reduction,
    ) -> Result<f64, DispatchError> {
        ctx.call(Operation::VectorReduce {
            vector: self.id,
            other: other.map(|o| o.id),
            reduction,
        })?
        .into_scalar()
    }

    pub fn dot<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        other: &MpiVectorArray,
    ) -> Result<f64, DispatchError> {
        self.require_comm("dot")?;
        other.require_comm("dot")?;
        self.reduce(ctx, Some(other), Reduction::Dot)
    }

    pub fn l2_norm<C: Communicator>(&self, ctx: &mut MpiContext<C, Operation>) -> Result<f64, DispatchError> {
        self.require_comm("l2_norm")?;
        self.reduce(ctx, None, Reduction::L2Norm)
    }

    pub fn sup_norm<C: Communicator>(&self, ctx: &mut MpiContext<C, Operation>) -> Result<f64, DispatchError> {
        self.require_comm("sup_norm")?;
        self.reduce(ctx, None, Reduction::SupNorm)
    }

    /// The whole vector, assembled on the coordinator.
    pub fn to_global<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
    ) -> Result<Vec<f64>, DispatchError> {
        self.require_comm("to_global")?;
        ctx.call(Operation::VectorGather { vector: self.id })?
            .into_scalars()
    }

    /// `self += alpha * x`, rank by rank.
    pub fn axpy<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        alpha: f64,
        x: &MpiVectorArray,
    ) -> Result<(), DispatchError> {
        ctx.call(Operation::VectorAxpy {
            y: self.id,
            alpha,
            x: x.id,
        })
        .map(|_| ())
    }

    pub fn scal<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        alpha: f64,
    ) -> Result<(), DispatchError> {
        ctx.call(Operation::VectorScal {
            vector: self.id,
            alpha,
        })
        .map(|_| ())
    }

    /// Independent copy with the same policy.
    pub fn copy<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
    ) -> Result<MpiVectorArray, DispatchError> {
        let id = ctx.call_manage(Operation::VectorCopy { vector: self.id })?;
        Ok(Self { id, ..*self })
    }

    /// Free the blocks on every rank.
    pub fn release<C: Communicator>(self, ctx: &mut MpiContext<C, Operation>) -> Result<(), DispatchError> {
        ctx.release(self.id)
    }
}
