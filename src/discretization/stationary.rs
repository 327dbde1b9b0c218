//! The per-rank discretization interface driven by dispatched operations.

use std::path::PathBuf;

use crate::algs::collective::Collective;
use crate::discretization::parameter::{Parameter, ParameterSpace, ParameterType};
use crate::discretization::partition::RowPartition;
use crate::discretization::solver_options::SolverOptions;
use crate::discretization::vector::LocalVector;
use crate::discretization::vtk::VtuWriter;
use crate::dispatch_error::DispatchError;

/// One rank's part of a stationary (linear elliptic) discretization.
///
/// Every method that takes a [`Collective`] is collective: all ranks sharing the
/// discretization must call it in the same order.
pub trait StationaryDiscretization {
    fn name(&self) -> &str;

    /// `None` for non-parametric discretizations.
    fn parameter_space(&self) -> Option<&ParameterSpace>;

    fn parametric(&self) -> bool {
        self.parameter_space().is_some()
    }

    fn parameter_type(&self) -> ParameterType {
        self.parameter_space()
            .map(|s| s.parameter_type().clone())
            .unwrap_or_default()
    }

    /// Reject `mu` unless it fits the parameter space; non-parametric
    /// discretizations only accept the empty parameter.
    fn check_parameter(&self, mu: &Parameter) -> Result<(), DispatchError> {
        match self.parameter_space() {
            Some(space) => space.validate(mu),
            None if mu.is_empty() => Ok(()),
            None => Err(DispatchError::InvalidArgument(format!(
                "`{}` is not parametric but got `{mu}`",
                self.name()
            ))),
        }
    }

    fn rank(&self) -> usize;

    fn partition(&self) -> RowPartition;

    fn dim_global(&self) -> usize {
        self.partition().dim_global()
    }

    /// Zero vector on this rank's rows.
    fn create_vector(&self) -> LocalVector {
        let p = self.partition();
        let own = p.owned(self.rank());
        LocalVector::zeros(own.start, own.len(), p.dim_global())
    }

    fn solver_options(&self) -> &SolverOptions;

    /// Fails with [`DispatchError::StateViolation`] while locked.
    fn set_solver_options(&mut self, options: SolverOptions) -> Result<(), DispatchError>;

    fn lock(&mut self);

    fn unlock(&mut self);

    fn locked(&self) -> bool;

    /// The right hand side functional as a vector.
    fn as_vector(&self, mu: &Parameter) -> Result<LocalVector, DispatchError>;

    /// `A(mu) u`
    fn apply(
        &self,
        comm: &dyn Collective,
        u: &LocalVector,
        mu: &Parameter,
    ) -> Result<LocalVector, DispatchError>;

    /// Solve `A(mu) x = rhs` with the current solver options.
    fn apply_inverse(
        &self,
        comm: &dyn Collective,
        rhs: &LocalVector,
        mu: &Parameter,
    ) -> Result<LocalVector, DispatchError>;

    /// This rank's share of `v · A(mu) u`; summing over ranks gives the bilinear form.
    fn apply2(
        &self,
        comm: &dyn Collective,
        u: &LocalVector,
        v: &LocalVector,
        mu: &Parameter,
    ) -> Result<f64, DispatchError> {
        self.apply(comm, u, mu)?.dot_local(v)
    }

    /// Native solve. Only defined once the discretization is locked.
    fn solve(&self, comm: &dyn Collective, mu: &Parameter) -> Result<LocalVector, DispatchError> {
        if !self.locked() {
            return Err(DispatchError::StateViolation(format!(
                "`{}` must be locked before solving",
                self.name()
            )));
        }
        self.check_parameter(mu)?;
        let rhs = self.as_vector(mu)?;
        self.apply_inverse(comm, &rhs, mu)
    }

    /// Coordinates of every grid vertex, Dirichlet boundary included.
    fn grid_points(&self) -> Vec<f64>;

    /// Embed a full vector of degrees of freedom into vertex values.
    fn dofs_to_vertex_values(&self, dofs: &[f64]) -> Vec<f64>;

    /// Gather `u` on rank 0 and write `<filename>.vtu` there. Returns the path on
    /// rank 0, `None` on the other ranks.
    fn visualize(
        &self,
        comm: &dyn Collective,
        u: &LocalVector,
        filename: &str,
        name: &str,
    ) -> Result<Option<PathBuf>, DispatchError> {
        let Some(blocks) = comm.gather_on_root(u.values())? else {
            return Ok(None);
        };
        let dofs: Vec<f64> = blocks.into_iter().flatten().collect();
        if dofs.len() != self.dim_global() {
            return Err(DispatchError::InvalidArgument(format!(
                "gathered {} values for a vector of dimension {}",
                dofs.len(),
                self.dim_global()
            )));
        }
        let path = vtu_path(filename);
        VtuWriter::new(name).write_file(
            &path,
            &self.grid_points(),
            &self.dofs_to_vertex_values(&dofs),
        )?;
        log::info!("wrote `{name}` to {}", path.display());
        Ok(Some(path))
    }
}

/// `solution` → `solution.vtu`; names already ending in `.vtu` are kept.
pub fn vtu_path(filename: &str) -> PathBuf {
    if filename.ends_with(".vtu") {
        PathBuf::from(filename)
    } else {
        PathBuf::from(format!("{filename}.vtu"))
    }
}
