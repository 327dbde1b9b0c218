//! The example driver: configuration → example → discretization → solve → output.

use std::path::{Path, PathBuf};

use crate::algs::communicator::Communicator;
use crate::discretization::Parameter;
use crate::dispatch::arena::HandleId;
use crate::dispatch::context::MpiContext;
use crate::dispatch_error::DispatchError;
use crate::parallel::discretization::{MpiDiscretization, WrapMode};
use crate::parallel::operations::Operation;
use crate::parallel::vector_array::{CommPolicy, MpiVectorArray};

/// Output name used by [`run_driver`] (`solution.vtu`).
pub const SOLUTION_FILENAME: &str = "solution";
/// Point data name used by [`run_driver`].
pub const SOLUTION_FIELD: &str = "CG_solution";

/// Build the example on every rank from `config_file` plus `extra_args` overrides.
pub fn init_example<C: Communicator>(
    ctx: &mut MpiContext<C, Operation>,
    config_file: impl AsRef<Path>,
    extra_args: &[String],
) -> Result<HandleId, DispatchError> {
    ctx.call_manage(Operation::InitExample {
        config_file: config_file.as_ref().display().to_string(),
        extra_args: extra_args.to_vec(),
    })
}

/// Discretize `example` on every rank with the solver options of `config_file`;
/// the result is locked.
pub fn discretize<C: Communicator>(
    ctx: &mut MpiContext<C, Operation>,
    example: HandleId,
    config_file: impl AsRef<Path>,
) -> Result<HandleId, DispatchError> {
    ctx.call_manage(Operation::Discretize {
        example,
        config_file: config_file.as_ref().display().to_string(),
    })
}

/// Knobs of one driver run.
#[derive(Clone, Debug)]
pub struct DriverSettings {
    pub config_file: PathBuf,
    pub extra_args: Vec<String>,
    pub policy: CommPolicy,
    pub mode: WrapMode,
    pub mu: Parameter,
    /// Without extension; `.vtu` is appended.
    pub output: String,
}

impl DriverSettings {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            extra_args: Vec::new(),
            policy: CommPolicy::NoComm,
            mode: WrapMode::PassThrough,
            mu: Parameter::new("mu", [0.1]),
            output: SOLUTION_FILENAME.to_string(),
        }
    }

    /// Settings from a full argv: `prog [config.ini] [-key value ...]`.
    ///
    /// The first argument names the configuration file unless it is an override;
    /// without one, `default_config` is used.
    pub fn from_args(args: &[String], default_config: impl Into<PathBuf>) -> Self {
        let program = args.first().cloned().unwrap_or_default();
        let rest = args.get(1..).unwrap_or_default();
        let (config_file, overrides) = match rest.split_first() {
            Some((first, tail)) if !first.starts_with('-') => (PathBuf::from(first), tail),
            _ => (default_config.into(), rest),
        };
        let mut settings = Self::new(config_file);
        settings.extra_args = std::iter::once(program)
            .chain(overrides.iter().cloned())
            .collect();
        settings
    }
}

/// What a driver run leaves behind on the coordinator.
#[derive(Debug)]
pub struct DriverOutcome {
    pub example: HandleId,
    pub discretization: MpiDiscretization,
    pub solution: MpiVectorArray,
    pub written: PathBuf,
}

/// The full example script.
pub fn run_driver<C: Communicator>(
    ctx: &mut MpiContext<C, Operation>,
    settings: &DriverSettings,
) -> Result<DriverOutcome, DispatchError> {
    let example = init_example(ctx, &settings.config_file, &settings.extra_args)?;
    let disc_id = discretize(ctx, example, &settings.config_file)?;
    let disc = MpiDiscretization::wrap(ctx, disc_id, settings.policy, settings.mode)?;
    let mu = if disc.parametric() {
        settings.mu.clone()
    } else {
        Parameter::empty()
    };
    let solution = disc.solve(ctx, &mu)?;
    let written = disc.visualize(ctx, &solution, &settings.output, SOLUTION_FIELD)?;
    Ok(DriverOutcome {
        example,
        discretization: disc,
        solution,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn leading_path_names_the_config() {
        let s = DriverSettings::from_args(&argv(&["drv", "run.ini", "-grids.refinements", "3"]), "mpi_cg.ini");
        assert_eq!(s.config_file, PathBuf::from("run.ini"));
        assert_eq!(s.extra_args, argv(&["drv", "-grids.refinements", "3"]));
    }

    #[test]
    fn leading_override_keeps_the_default_config() {
        let s = DriverSettings::from_args(&argv(&["drv", "-grids.refinements", "3"]), "mpi_cg.ini");
        assert_eq!(s.config_file, PathBuf::from("mpi_cg.ini"));
        assert_eq!(s.extra_args, argv(&["drv", "-grids.refinements", "3"]));
        let mut cfg = crate::config::Configuration::new();
        cfg.apply_args(&s.extra_args).unwrap();
        assert_eq!(cfg.get_usize("grids.refinements").unwrap(), 3);
    }

    #[test]
    fn bare_invocation_uses_defaults() {
        let s = DriverSettings::from_args(&argv(&["drv"]), "mpi_cg.ini");
        assert_eq!(s.config_file, PathBuf::from("mpi_cg.ini"));
        assert_eq!(s.extra_args, argv(&["drv"]));
        let empty = DriverSettings::from_args(&[], "mpi_cg.ini");
        assert_eq!(empty.extra_args, argv(&[""]));
    }
}
