//! MPI-style distribution of the example: the operation set, coordinator-side
//! proxies, and the driver bootstrap.

pub mod bootstrap;
pub mod discretization;
pub mod operations;
pub mod vector_array;

pub use bootstrap::{DriverOutcome, DriverSettings, discretize, init_example, run_driver};
pub use discretization::{MpiDiscretization, WrapMode};
pub use operations::{DiscretizationBox, Operation, Reduction};
pub use vector_array::{CommPolicy, MpiVectorArray};
