//! Per-rank discretizations driven through the dispatch bridge.
//!
//! [`StationaryDiscretization`] is the seam the distributed wrapper talks to; the
//! thermal-block problem in [`thermalblock`] is the implementation the example
//! driver builds.

pub mod parameter;
pub mod partition;
pub mod solver;
pub mod solver_options;
pub mod stationary;
pub mod thermalblock;
pub mod vector;
pub mod vtk;

pub use parameter::{Parameter, ParameterSpace, ParameterType};
pub use partition::RowPartition;
pub use solver::{CgReport, conjugate_gradient};
pub use solver_options::{SolverKind, SolverOptions};
pub use stationary::{StationaryDiscretization, vtu_path};
pub use thermalblock::{MpiCgExample, ThermalblockDiscretization};
pub use vector::LocalVector;
pub use vtk::VtuWriter;
