//! Coordinator-side wrapper over per-rank discretizations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::algs::communicator::Communicator;
use crate::config::Configuration;
use crate::discretization::{Parameter, ParameterType, SolverOptions, StationaryDiscretization};
use crate::dispatch::arena::HandleId;
use crate::dispatch::context::MpiContext;
use crate::dispatch_error::DispatchError;
use crate::parallel::operations::{DiscretizationBox, Operation};
use crate::parallel::vector_array::{CommPolicy, MpiVectorArray};

/// How `solve` reaches the per-rank discretizations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapMode {
    /// One dispatched call to every rank's own `solve`.
    PassThrough,
    /// The coordinator runs the solve algorithm itself and only dispatches operator
    /// applications (`as_vector`, then `apply_inverse`).
    Generic,
}

/// A single logical discretization backed by one instance per rank.
#[derive(Debug)]
pub struct MpiDiscretization {
    id: HandleId,
    policy: CommPolicy,
    mode: WrapMode,
    parameter_type: ParameterType,
    dim: usize,
}

impl MpiDiscretization {
    /// Wrap the managed discretization `id`.
    pub fn wrap<C: Communicator>(
        ctx: &MpiContext<C, Operation>,
        id: HandleId,
        policy: CommPolicy,
        mode: WrapMode,
    ) -> Result<Self, DispatchError> {
        let local = Self::local(ctx, id)?;
        let wrapped = Self {
            id,
            policy,
            mode,
            parameter_type: local.parameter_type(),
            dim: local.dim_global(),
        };
        log::debug!(
            "wrapped {} {id} ({policy}, {mode:?}, dim {})",
            local.name(),
            wrapped.dim
        );
        Ok(wrapped)
    }

    /// The coordinator's own instance; metadata is identical on every rank.
    fn local<C: Communicator>(
        ctx: &MpiContext<C, Operation>,
        id: HandleId,
    ) -> Result<&dyn StationaryDiscretization, DispatchError> {
        Ok(ctx.arena().get::<DiscretizationBox>(id)?.as_ref())
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn policy(&self) -> CommPolicy {
        self.policy
    }

    pub fn mode(&self) -> WrapMode {
        self.mode
    }

    pub fn parameter_type(&self) -> &ParameterType {
        &self.parameter_type
    }

    pub fn parametric(&self) -> bool {
        !self.parameter_type.is_empty()
    }

    /// Global number of degrees of freedom.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn locked<C: Communicator>(&self, ctx: &MpiContext<C, Operation>) -> Result<bool, DispatchError> {
        Ok(Self::local(ctx, self.id)?.locked())
    }

    pub fn solver_options<C: Communicator>(
        &self,
        ctx: &MpiContext<C, Operation>,
    ) -> Result<SolverOptions, DispatchError> {
        Ok(Self::local(ctx, self.id)?.solver_options().clone())
    }

    pub fn lock<C: Communicator>(&self, ctx: &mut MpiContext<C, Operation>) -> Result<(), DispatchError> {
        ctx.call(Operation::Lock { disc: self.id }).map(|_| ())
    }

    pub fn unlock<C: Communicator>(&self, ctx: &mut MpiContext<C, Operation>) -> Result<(), DispatchError> {
        ctx.call(Operation::Unlock { disc: self.id }).map(|_| ())
    }

    /// Replace the solver options on every rank. Fails with
    /// [`DispatchError::StateViolation`] while locked.
    pub fn set_solver_options<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        options: &Configuration,
    ) -> Result<(), DispatchError> {
        ctx.call(Operation::SetSolverOptions {
            disc: self.id,
            options: options.clone(),
        })
        .map(|_| ())
    }

    fn vector<C: Communicator>(
        &self,
        ctx: &MpiContext<C, Operation>,
        id: HandleId,
    ) -> Result<MpiVectorArray, DispatchError> {
        MpiVectorArray::from_handle(ctx, id, self.policy)
    }

    /// Solve for `mu`; the result lives on the ranks until released.
    pub fn solve<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        mu: &Parameter,
    ) -> Result<MpiVectorArray, DispatchError> {
        if !self.locked(ctx)? {
            return Err(DispatchError::StateViolation(format!(
                "discretization {} must be locked before solving",
                self.id
            )));
        }
        log::info!("solving for parameter mu = {mu} ({:?})", self.mode);
        match self.mode {
            WrapMode::PassThrough => {
                let id = ctx.call_manage(Operation::Solve {
                    disc: self.id,
                    mu: mu.clone(),
                })?;
                self.vector(ctx, id)
            }
            WrapMode::Generic => {
                let rhs = self.as_vector(ctx, mu)?;
                let solution = self.apply_inverse(ctx, &rhs, mu);
                let released = rhs.release(ctx);
                let solution = solution?;
                released?;
                Ok(solution)
            }
        }
    }

    /// The right hand side functional as a distributed vector.
    pub fn as_vector<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        mu: &Parameter,
    ) -> Result<MpiVectorArray, DispatchError> {
        let id = ctx.call_manage(Operation::AsVector {
            disc: self.id,
            mu: mu.clone(),
        })?;
        self.vector(ctx, id)
    }

    pub fn apply_inverse<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        rhs: &MpiVectorArray,
        mu: &Parameter,
    ) -> Result<MpiVectorArray, DispatchError> {
        let id = ctx.call_manage(Operation::ApplyInverse {
            disc: self.id,
            rhs: rhs.id(),
            mu: mu.clone(),
        })?;
        self.vector(ctx, id)
    }

    /// `v · A(mu) u` over the whole domain.
    pub fn apply2<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        u: &MpiVectorArray,
        v: &MpiVectorArray,
        mu: &Parameter,
    ) -> Result<f64, DispatchError> {
        if self.policy == CommPolicy::NoComm {
            return Err(DispatchError::Unsupported(
                "apply2 reduces across ranks, which the NoComm policy forbids".into(),
            ));
        }
        ctx.call(Operation::Apply2 {
            disc: self.id,
            u: u.id(),
            v: v.id(),
            mu: mu.clone(),
            reduce: true,
        })?
        .into_scalar()
    }

    /// Write `vector` to `<filename>.vtu` on rank 0 and return the path.
    pub fn visualize<C: Communicator>(
        &self,
        ctx: &mut MpiContext<C, Operation>,
        vector: &MpiVectorArray,
        filename: &str,
        name: &str,
    ) -> Result<PathBuf, DispatchError> {
        let written = ctx
            .call(Operation::Visualize {
                disc: self.id,
                vector: vector.id(),
                filename: filename.to_string(),
                name: name.to_string(),
            })?
            .into_text()?;
        Ok(PathBuf::from(written))
    }

    /// Drop the per-rank discretizations.
    pub fn release<C: Communicator>(self, ctx: &mut MpiContext<C, Operation>) -> Result<(), DispatchError> {
        ctx.release(self.id)
    }
}
