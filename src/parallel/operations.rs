//! The closed set of operations the coordinator can dispatch.
//!
//! Each variant carries only serializable arguments: plain values, configuration,
//! parameters, and [`HandleId`]s of objects every rank already holds.

use serde::{Deserialize, Serialize};

use crate::algs::collective::Collective;
use crate::algs::communicator::Communicator;
use crate::config::Configuration;
use crate::discretization::{
    LocalVector, MpiCgExample, Parameter, SolverOptions, StationaryDiscretization,
};
use crate::dispatch::arena::{HandleArena, HandleId};
use crate::dispatch::op::{RankEnv, RemoteOp, Reply};
use crate::dispatch_error::DispatchError;

/// What the arena holds for a discretization handle.
pub type DiscretizationBox = Box<dyn StationaryDiscretization>;

/// Global reductions over one or two distributed vectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    Dot,
    L2Norm,
    SupNorm,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Operation {
    /// Load the configuration and build an [`MpiCgExample`].
    InitExample {
        config_file: String,
        extra_args: Vec<String>,
    },
    /// Build this rank's discretization from an example, apply the `solver`
    /// sub-configuration and lock it.
    Discretize {
        example: HandleId,
        config_file: String,
    },
    Unlock {
        disc: HandleId,
    },
    Lock {
        disc: HandleId,
    },
    SetSolverOptions {
        disc: HandleId,
        options: Configuration,
    },
    /// Native solve; produces a vector.
    Solve {
        disc: HandleId,
        mu: Parameter,
    },
    /// Right hand side functional as a vector.
    AsVector {
        disc: HandleId,
        mu: Parameter,
    },
    ApplyInverse {
        disc: HandleId,
        rhs: HandleId,
        mu: Parameter,
    },
    /// `v · A(mu) u`; either this rank's share or, with `reduce`, the global value.
    Apply2 {
        disc: HandleId,
        u: HandleId,
        v: HandleId,
        mu: Parameter,
        reduce: bool,
    },
    Visualize {
        disc: HandleId,
        vector: HandleId,
        filename: String,
        name: String,
    },
    VectorReduce {
        vector: HandleId,
        other: Option<HandleId>,
        reduction: Reduction,
    },
    /// `y += alpha * x`
    VectorAxpy {
        y: HandleId,
        alpha: f64,
        x: HandleId,
    },
    VectorScal {
        vector: HandleId,
        alpha: f64,
    },
    VectorCopy {
        vector: HandleId,
    },
    /// Whole vector on rank 0.
    VectorGather {
        vector: HandleId,
    },
}

fn discretization(arena: &HandleArena, id: HandleId) -> Result<&dyn StationaryDiscretization, DispatchError> {
    Ok(arena.get::<DiscretizationBox>(id)?.as_ref())
}

fn vector(arena: &HandleArena, id: HandleId) -> Result<&LocalVector, DispatchError> {
    arena.get::<LocalVector>(id)
}

fn ensure_locked(disc: &dyn StationaryDiscretization, id: HandleId) -> Result<(), DispatchError> {
    if disc.locked() {
        Ok(())
    } else {
        Err(DispatchError::StateViolation(format!(
            "discretization {id} must be locked before solving"
        )))
    }
}

impl RemoteOp for Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::InitExample { .. } => "init_example",
            Operation::Discretize { .. } => "discretize",
            Operation::Unlock { .. } => "unlock",
            Operation::Lock { .. } => "lock",
            Operation::SetSolverOptions { .. } => "set_solver_options",
            Operation::Solve { .. } => "solve",
            Operation::AsVector { .. } => "as_vector",
            Operation::ApplyInverse { .. } => "apply_inverse",
            Operation::Apply2 { .. } => "apply2",
            Operation::Visualize { .. } => "visualize",
            Operation::VectorReduce { .. } => "vector_reduce",
            Operation::VectorAxpy { .. } => "vector_axpy",
            Operation::VectorScal { .. } => "vector_scal",
            Operation::VectorCopy { .. } => "vector_copy",
            Operation::VectorGather { .. } => "vector_gather",
        }
    }

    fn validate(&self, arena: &HandleArena) -> Result<(), DispatchError> {
        match self {
            Operation::InitExample { extra_args, .. } => {
                Configuration::new().apply_args(extra_args)
            }
            Operation::Discretize { example, .. } => arena.get::<MpiCgExample>(*example).map(|_| ()),
            Operation::Unlock { disc } | Operation::Lock { disc } => {
                discretization(arena, *disc).map(|_| ())
            }
            Operation::SetSolverOptions { disc, options } => {
                let d = discretization(arena, *disc)?;
                if d.locked() {
                    return Err(DispatchError::StateViolation(format!(
                        "solver options of {disc} cannot be changed while it is locked"
                    )));
                }
                SolverOptions::from_config(options).map(|_| ())
            }
            Operation::Solve { disc, mu } => {
                let d = discretization(arena, *disc)?;
                ensure_locked(d, *disc)?;
                d.check_parameter(mu)
            }
            Operation::AsVector { disc, mu } => discretization(arena, *disc)?.check_parameter(mu),
            Operation::ApplyInverse { disc, rhs, mu } => {
                let d = discretization(arena, *disc)?;
                vector(arena, *rhs)?;
                d.check_parameter(mu)
            }
            Operation::Apply2 { disc, u, v, mu, .. } => {
                let d = discretization(arena, *disc)?;
                vector(arena, *u)?;
                vector(arena, *v)?;
                d.check_parameter(mu)
            }
            Operation::Visualize {
                disc,
                vector: v,
                filename,
                ..
            } => {
                discretization(arena, *disc)?;
                vector(arena, *v)?;
                if filename.is_empty() {
                    return Err(DispatchError::InvalidArgument(
                        "visualization needs a file name".into(),
                    ));
                }
                Ok(())
            }
            Operation::VectorReduce {
                vector: v, other, ..
            } => {
                let a = vector(arena, *v)?;
                if let Some(o) = other {
                    let b = vector(arena, *o)?;
                    if a.dim_global() != b.dim_global() {
                        return Err(DispatchError::InvalidArgument(format!(
                            "cannot reduce vectors of dimension {} and {}",
                            a.dim_global(),
                            b.dim_global()
                        )));
                    }
                }
                Ok(())
            }
            Operation::VectorAxpy { y, x, alpha } => {
                vector(arena, *y)?;
                vector(arena, *x)?;
                if alpha.is_finite() {
                    Ok(())
                } else {
                    Err(DispatchError::InvalidArgument(format!("alpha = {alpha}")))
                }
            }
            Operation::VectorScal { vector: v, alpha } => {
                vector(arena, *v)?;
                if alpha.is_finite() {
                    Ok(())
                } else {
                    Err(DispatchError::InvalidArgument(format!("alpha = {alpha}")))
                }
            }
            Operation::VectorCopy { vector: v } | Operation::VectorGather { vector: v } => {
                vector(arena, *v).map(|_| ())
            }
        }
    }

    fn execute<C: Communicator>(&self, env: &mut RankEnv<'_, C>) -> Result<Reply, DispatchError> {
        let comm = env.collective();
        match self {
            Operation::InitExample {
                config_file,
                extra_args,
            } => {
                let cfg = Configuration::load_or_default(config_file, extra_args)?;
                let example = MpiCgExample::from_config(&cfg)?;
                if env.is_coordinator() {
                    log::info!(
                        "{} example with {} refinement(s)",
                        MpiCgExample::static_id(),
                        example.refinements()
                    );
                }
                Ok(Reply::object(example))
            }
            Operation::Discretize {
                example,
                config_file,
            } => {
                let example = env.arena.get::<MpiCgExample>(*example)?;
                let mut disc = example.discretization(env.rank(), env.size());
                disc.unlock();
                let cfg = Configuration::load_or_default(config_file, &[])?;
                if env.is_coordinator() {
                    log::info!("configuration from {config_file}:\n{}", cfg.report_string());
                }
                disc.set_solver_options(SolverOptions::from_config(&cfg.sub("solver"))?)?;
                disc.lock();
                let boxed: DiscretizationBox = Box::new(disc);
                Ok(Reply::object(boxed))
            }
            Operation::Unlock { disc } => {
                env.arena.get_mut::<DiscretizationBox>(*disc)?.unlock();
                Ok(Reply::Unit)
            }
            Operation::Lock { disc } => {
                env.arena.get_mut::<DiscretizationBox>(*disc)?.lock();
                Ok(Reply::Unit)
            }
            Operation::SetSolverOptions { disc, options } => {
                let options = SolverOptions::from_config(options)?;
                env.arena
                    .get_mut::<DiscretizationBox>(*disc)?
                    .set_solver_options(options)?;
                Ok(Reply::Unit)
            }
            Operation::Solve { disc, mu } => {
                let u = discretization(env.arena, *disc)?.solve(&comm, mu)?;
                Ok(Reply::object(u))
            }
            Operation::AsVector { disc, mu } => {
                let rhs = discretization(env.arena, *disc)?.as_vector(mu)?;
                Ok(Reply::object(rhs))
            }
            Operation::ApplyInverse { disc, rhs, mu } => {
                let d = discretization(env.arena, *disc)?;
                let x = d.apply_inverse(&comm, vector(env.arena, *rhs)?, mu)?;
                Ok(Reply::object(x))
            }
            Operation::Apply2 {
                disc,
                u,
                v,
                mu,
                reduce,
            } => {
                let d = discretization(env.arena, *disc)?;
                let local = d.apply2(&comm, vector(env.arena, *u)?, vector(env.arena, *v)?, mu)?;
                let value = if *reduce {
                    comm.all_reduce_sum(local)?
                } else {
                    local
                };
                Ok(Reply::Scalar(value))
            }
            Operation::Visualize {
                disc,
                vector: v,
                filename,
                name,
            } => {
                let d = discretization(env.arena, *disc)?;
                let written = d.visualize(&comm, vector(env.arena, *v)?, filename, name)?;
                Ok(match written {
                    Some(path) => Reply::Text(path.display().to_string()),
                    None => Reply::Unit,
                })
            }
            Operation::VectorReduce {
                vector: v,
                other,
                reduction,
            } => {
                let a = vector(env.arena, *v)?;
                let value = match reduction {
                    Reduction::Dot => {
                        let b = match other {
                            Some(o) => vector(env.arena, *o)?,
                            None => a,
                        };
                        comm.all_reduce_sum(a.dot_local(b)?)?
                    }
                    Reduction::L2Norm => comm.all_reduce_sum(a.dot_local(a)?)?.sqrt(),
                    Reduction::SupNorm => comm.all_reduce_max(a.sup_local())?,
                };
                Ok(Reply::Scalar(value))
            }
            Operation::VectorAxpy { y, alpha, x } => {
                let x = vector(env.arena, *x)?.clone();
                env.arena.get_mut::<LocalVector>(*y)?.axpy(*alpha, &x)?;
                Ok(Reply::Unit)
            }
            Operation::VectorScal { vector: v, alpha } => {
                env.arena.get_mut::<LocalVector>(*v)?.scal(*alpha);
                Ok(Reply::Unit)
            }
            Operation::VectorCopy { vector: v } => Ok(Reply::object(vector(env.arena, *v)?.clone())),
            Operation::VectorGather { vector: v } => {
                let gathered = comm.gather_on_root(vector(env.arena, *v)?.values())?;
                Ok(match gathered {
                    Some(blocks) => Reply::Scalars(blocks.into_iter().flatten().collect()),
                    None => Reply::Unit,
                })
            }
        }
    }
}
