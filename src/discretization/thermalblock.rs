//! Reference problem: two-block thermal diffusion on the unit interval.
//!
//! `-(κ u')' = 1` on `(0, 1)` with `u(0) = u(1) = 0`, where `κ = 1` on the left
//! block `(0, ½)` and `κ = μ` on the right block `(½, 1)`. Continuous piecewise
//! linear elements on `4 · 2^R` uniform cells; the interior vertices are the degrees
//! of freedom and are distributed over ranks in contiguous blocks.

use serde::{Deserialize, Serialize};

use crate::algs::collective::Collective;
use crate::config::{Configuration, DEFAULT_GRID_REFINEMENTS, GRID_REFINEMENTS_KEY};
use crate::discretization::parameter::{Parameter, ParameterSpace, ParameterType};
use crate::discretization::partition::RowPartition;
use crate::discretization::solver::conjugate_gradient;
use crate::discretization::solver_options::SolverOptions;
use crate::discretization::stationary::StationaryDiscretization;
use crate::discretization::vector::LocalVector;
use crate::dispatch_error::DispatchError;

/// Name of the diffusion parameter component.
pub const DIFFUSION_COMPONENT: &str = "mu";
/// Admissible range of the right block's diffusion.
pub const PARAMETER_RANGE: (f64, f64) = (0.1, 1.0);
/// Configuration key switching the right block's diffusion to a fixed value.
pub const PARAMETRIC_KEY: &str = "problem.parametric";
/// Largest accepted refinement level.
pub const MAX_REFINEMENTS: usize = 20;

const COARSE_CELLS: usize = 4;

/// Grid and problem description shared by every rank; cheap to build and to ship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiCgExample {
    refinements: usize,
    parametric: bool,
}

impl MpiCgExample {
    pub fn new(refinements: usize) -> Result<Self, DispatchError> {
        if refinements > MAX_REFINEMENTS {
            return Err(DispatchError::InvalidValue {
                key: GRID_REFINEMENTS_KEY.into(),
                value: refinements.to_string(),
                expected: "a refinement level of at most 20",
            });
        }
        Ok(Self {
            refinements,
            parametric: true,
        })
    }

    /// Refinement level from `grids.refinements` (default 2) and the
    /// `problem.parametric` switch (default on).
    pub fn from_config(cfg: &Configuration) -> Result<Self, DispatchError> {
        let refinements = cfg.get_or(GRID_REFINEMENTS_KEY, DEFAULT_GRID_REFINEMENTS)?;
        let parametric = if cfg.has_key(PARAMETRIC_KEY) {
            cfg.get_bool(PARAMETRIC_KEY)?
        } else {
            true
        };
        Ok(Self::new(refinements)?.with_parametric(parametric))
    }

    pub fn with_parametric(mut self, parametric: bool) -> Self {
        self.parametric = parametric;
        self
    }

    pub fn static_id() -> &'static str {
        "mpi_cg"
    }

    pub fn refinements(&self) -> usize {
        self.refinements
    }

    pub fn n_cells(&self) -> usize {
        COARSE_CELLS << self.refinements
    }

    /// This rank's part of the discretization, unlocked with default solver options.
    pub fn discretization(&self, rank: usize, n_ranks: usize) -> ThermalblockDiscretization {
        let n_cells = self.n_cells();
        let space = self.parametric.then(|| {
            ParameterSpace::new(
                ParameterType::empty().with(DIFFUSION_COMPONENT, 1),
                PARAMETER_RANGE.0,
                PARAMETER_RANGE.1,
            )
        });
        ThermalblockDiscretization {
            n_cells,
            partition: RowPartition::new(n_cells - 1, n_ranks),
            rank,
            space,
            options: SolverOptions::default(),
            locked: false,
        }
    }
}

/// One rank's rows of the thermal-block stiffness system.
#[derive(Clone, Debug)]
pub struct ThermalblockDiscretization {
    n_cells: usize,
    partition: RowPartition,
    rank: usize,
    space: Option<ParameterSpace>,
    options: SolverOptions,
    locked: bool,
}

impl ThermalblockDiscretization {
    fn h(&self) -> f64 {
        1.0 / self.n_cells as f64
    }

    /// Diffusion of the right block; fixed at 1 for the non-parametric variant.
    fn right_diffusion(&self, mu: &Parameter) -> Result<f64, DispatchError> {
        if self.space.is_none() {
            return Ok(1.0);
        }
        mu.get(DIFFUSION_COMPONENT)
            .and_then(|v| v.first().copied())
            .ok_or_else(|| {
                DispatchError::InvalidArgument(format!(
                    "missing parameter component `{DIFFUSION_COMPONENT}`"
                ))
            })
    }

    fn cell_diffusion(&self, cell: usize, right: f64) -> f64 {
        if (cell as f64 + 0.5) * self.h() < 0.5 {
            1.0
        } else {
            right
        }
    }

    /// Coefficients `(left, diagonal, right)` of the stiffness row of dof `row`.
    fn stencil(&self, row: usize, right: f64) -> (f64, f64, f64) {
        let h = self.h();
        // dof `row` is vertex `row + 1`, between cells `row` and `row + 1`
        let k_left = self.cell_diffusion(row, right);
        let k_right = self.cell_diffusion(row + 1, right);
        (-k_left / h, (k_left + k_right) / h, -k_right / h)
    }

    fn diagonal(&self, right: f64) -> Vec<f64> {
        self.partition
            .owned(self.rank)
            .map(|row| self.stencil(row, right).1)
            .collect()
    }

    fn check_block(&self, u: &LocalVector) -> Result<(), DispatchError> {
        let own = self.partition.owned(self.rank);
        if u.offset() != own.start || u.len() != own.len() || u.dim_global() != self.dim_global() {
            return Err(DispatchError::InvalidArgument(format!(
                "vector block {}+{} does not match owned rows {own:?} on rank {}",
                u.offset(),
                u.len(),
                self.rank
            )));
        }
        Ok(())
    }

    fn apply_with(
        &self,
        comm: &dyn Collective,
        u: &LocalVector,
        right: f64,
    ) -> Result<LocalVector, DispatchError> {
        self.check_block(u)?;
        let values = u.values();
        let left_peer = self.partition.left_neighbor(self.rank);
        let right_peer = self.partition.right_neighbor(self.rank);
        let (halo_left, halo_right) = comm.exchange_halo(
            left_peer.zip(values.first().copied()),
            right_peer.zip(values.last().copied()),
        )?;
        let start = u.offset();
        let n = values.len();
        let out = (0..n)
            .map(|i| {
                let (a, d, c) = self.stencil(start + i, right);
                let before = if i > 0 { values[i - 1] } else { halo_left.unwrap_or(0.0) };
                let after = if i + 1 < n { values[i + 1] } else { halo_right.unwrap_or(0.0) };
                a * before + d * values[i] + c * after
            })
            .collect();
        LocalVector::new(start, self.dim_global(), out)
    }
}

impl StationaryDiscretization for ThermalblockDiscretization {
    fn name(&self) -> &str {
        "thermalblock"
    }

    fn parameter_space(&self) -> Option<&ParameterSpace> {
        self.space.as_ref()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn partition(&self) -> RowPartition {
        self.partition
    }

    fn solver_options(&self) -> &SolverOptions {
        &self.options
    }

    fn set_solver_options(&mut self, options: SolverOptions) -> Result<(), DispatchError> {
        if self.locked {
            return Err(DispatchError::StateViolation(
                "solver options cannot be changed while the discretization is locked".into(),
            ));
        }
        self.options = options;
        Ok(())
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn locked(&self) -> bool {
        self.locked
    }

    fn as_vector(&self, mu: &Parameter) -> Result<LocalVector, DispatchError> {
        self.check_parameter(mu)?;
        let own = self.partition.owned(self.rank);
        // load f = 1 tested against the hat function of each interior vertex
        LocalVector::new(own.start, self.dim_global(), vec![self.h(); own.len()])
    }

    fn apply(
        &self,
        comm: &dyn Collective,
        u: &LocalVector,
        mu: &Parameter,
    ) -> Result<LocalVector, DispatchError> {
        self.check_parameter(mu)?;
        self.apply_with(comm, u, self.right_diffusion(mu)?)
    }

    fn apply_inverse(
        &self,
        comm: &dyn Collective,
        rhs: &LocalVector,
        mu: &Parameter,
    ) -> Result<LocalVector, DispatchError> {
        self.check_parameter(mu)?;
        self.check_block(rhs)?;
        let right = self.right_diffusion(mu)?;
        let (x, report) = conjugate_gradient(
            comm,
            &self.options,
            &self.diagonal(right),
            rhs,
            |p| self.apply_with(comm, p, right),
        )?;
        log::debug!(
            "rank {}: {} converged in {} iteration(s)",
            self.rank,
            self.options.kind,
            report.iterations
        );
        Ok(x)
    }

    fn grid_points(&self) -> Vec<f64> {
        let h = self.h();
        (0..=self.n_cells).map(|i| i as f64 * h).collect()
    }

    fn dofs_to_vertex_values(&self, dofs: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(dofs.len() + 2);
        out.push(0.0);
        out.extend_from_slice(dofs);
        out.push(0.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::collective::CommCollective;
    use crate::algs::communicator::{Communicator, LocalComm, SerialComm};

    fn mu(v: f64) -> Parameter {
        Parameter::new(DIFFUSION_COMPONENT, [v])
    }

    #[test]
    fn grid_size_follows_refinements() {
        let ex = MpiCgExample::new(2).unwrap();
        assert_eq!(ex.n_cells(), 16);
        assert_eq!(ex.discretization(0, 1).dim_global(), 15);
        assert!(MpiCgExample::new(MAX_REFINEMENTS + 1).is_err());
    }

    #[test]
    fn default_config_is_parametric_with_two_refinements() {
        let ex = MpiCgExample::from_config(&Configuration::fallback()).unwrap();
        assert_eq!(ex.refinements(), 2);
        assert!(ex.discretization(0, 1).parametric());
    }

    #[test]
    fn homogeneous_diffusion_matches_exact_solution() {
        // with κ = 1 everywhere the P1 solution is exact at the vertices: x(1-x)/2
        let mut d = MpiCgExample::new(2).unwrap().discretization(0, 1);
        d.lock();
        let u = d.solve(&CommCollective(&SerialComm), &mu(1.0)).unwrap();
        let points = d.grid_points();
        for (i, ui) in u.values().iter().enumerate() {
            let x = points[i + 1];
            assert!((ui - x * (1.0 - x) / 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn solve_requires_lock_and_valid_parameter() {
        let mut d = MpiCgExample::new(1).unwrap().discretization(0, 1);
        let comm = CommCollective(&SerialComm);
        assert!(matches!(
            d.solve(&comm, &mu(0.1)),
            Err(DispatchError::StateViolation(_))
        ));
        d.lock();
        assert!(matches!(
            d.solve(&comm, &mu(5.0)),
            Err(DispatchError::InvalidArgument(_))
        ));
        assert!(matches!(
            d.set_solver_options(SolverOptions::default()),
            Err(DispatchError::StateViolation(_))
        ));
        d.unlock();
        assert!(d.set_solver_options(SolverOptions::default()).is_ok());
    }

    #[test]
    fn non_parametric_accepts_only_empty_parameter() {
        let mut d = MpiCgExample::new(1)
            .unwrap()
            .with_parametric(false)
            .discretization(0, 1);
        d.lock();
        let comm = CommCollective(&SerialComm);
        assert!(d.solve(&comm, &Parameter::empty()).is_ok());
        assert!(matches!(
            d.solve(&comm, &mu(0.1)),
            Err(DispatchError::InvalidArgument(_))
        ));
    }

    #[test]
    fn distributed_solve_matches_serial() {
        let ex = MpiCgExample::new(3).unwrap();
        let mut serial = ex.discretization(0, 1);
        serial.lock();
        let reference = serial
            .solve(&CommCollective(&SerialComm), &mu(0.1))
            .unwrap()
            .into_values();

        let world = LocalComm::world(3);
        let blocks: Vec<Vec<f64>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|c| {
                    let ex = ex.clone();
                    s.spawn(move || {
                        let mut d = ex.discretization(c.rank(), 3);
                        d.lock();
                        d.solve(&CommCollective(c), &mu(0.1)).unwrap().into_values()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let gathered: Vec<f64> = blocks.into_iter().flatten().collect();
        assert_eq!(gathered.len(), reference.len());
        for (a, b) in gathered.iter().zip(&reference) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }
}
