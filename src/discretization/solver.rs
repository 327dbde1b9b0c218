//! Distributed conjugate gradients over row-block vectors.
//!
//! All inner products are reduced with [`Collective::all_reduce_sum`], so every rank
//! sees the same scalars, takes the same branch, and stops after the same iteration.

use crate::algs::collective::Collective;
use crate::discretization::solver_options::{SolverKind, SolverOptions};
use crate::discretization::vector::LocalVector;
use crate::dispatch_error::DispatchError;

/// Outcome of a converged solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgReport {
    pub iterations: usize,
    /// `‖r‖ / ‖b‖` at exit.
    pub relative_residual: f64,
}

fn dot(comm: &dyn Collective, a: &LocalVector, b: &LocalVector) -> Result<f64, DispatchError> {
    comm.all_reduce_sum(a.dot_local(b)?)
}

fn precondition(kind: SolverKind, diagonal: &[f64], r: &LocalVector) -> LocalVector {
    let mut z = r.clone();
    if kind == SolverKind::JacobiCg {
        for (zi, d) in z.values_mut().iter_mut().zip(diagonal) {
            *zi /= d;
        }
    }
    z
}

/// Solve `A x = b` for a symmetric positive definite `A` given by `apply`.
///
/// `diagonal` holds this rank's rows of `diag(A)`; it is only read by
/// [`SolverKind::JacobiCg`].
pub fn conjugate_gradient(
    comm: &dyn Collective,
    options: &SolverOptions,
    diagonal: &[f64],
    b: &LocalVector,
    apply: impl Fn(&LocalVector) -> Result<LocalVector, DispatchError>,
) -> Result<(LocalVector, CgReport), DispatchError> {
    if options.kind == SolverKind::JacobiCg && diagonal.len() != b.len() {
        return Err(DispatchError::InvalidArgument(format!(
            "diagonal has {} entries for a block of {}",
            diagonal.len(),
            b.len()
        )));
    }
    let mut x = LocalVector::zeros(b.offset(), b.len(), b.dim_global());
    let b_norm = dot(comm, b, b)?.sqrt();
    if b_norm == 0.0 {
        return Ok((
            x,
            CgReport {
                iterations: 0,
                relative_residual: 0.0,
            },
        ));
    }

    let mut r = b.clone();
    let mut z = precondition(options.kind, diagonal, &r);
    let mut p = z.clone();
    let mut rz = dot(comm, &r, &z)?;

    for iteration in 1..=options.max_iter {
        let ap = apply(&p)?;
        let p_ap = dot(comm, &p, &ap)?;
        if p_ap <= 0.0 {
            return Err(DispatchError::Solver(format!(
                "operator is not positive definite (pᵀAp = {p_ap:e}) at iteration {iteration}"
            )));
        }
        let alpha = rz / p_ap;
        x.axpy(alpha, &p)?;
        r.axpy(-alpha, &ap)?;

        let relative = dot(comm, &r, &r)?.sqrt() / b_norm;
        if options.verbose && comm.rank() == 0 {
            log::info!("cg iteration {iteration}: relative residual {relative:e}");
        }
        if relative <= options.precision {
            log::debug!("cg converged after {iteration} iteration(s), residual {relative:e}");
            return Ok((
                x,
                CgReport {
                    iterations: iteration,
                    relative_residual: relative,
                },
            ));
        }

        z = precondition(options.kind, diagonal, &r);
        let rz_next = dot(comm, &r, &z)?;
        let beta = rz_next / rz;
        rz = rz_next;
        p.scal(beta);
        p.axpy(1.0, &z)?;
    }
    Err(DispatchError::Solver(format!(
        "{} did not reach a relative residual of {:e} within {} iterations",
        options.kind, options.precision, options.max_iter
    )))
}
