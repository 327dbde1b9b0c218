#![allow(dead_code)]
use std::path::{Path, PathBuf};

use hdd_dispatch::parallel::bootstrap::{discretize, init_example};
use hdd_dispatch::prelude::*;

/// A path that never exists, so loading falls back to the default configuration.
pub const MISSING_CONFIG: &str = "/nonexistent/hdd-dispatch/mpi_cg.ini";

pub fn mu(value: f64) -> Parameter {
    Parameter::new("mu", [value])
}

/// argv-style overrides: program name first.
pub fn args(overrides: &[&str]) -> Vec<String> {
    std::iter::once("test")
        .chain(overrides.iter().copied())
        .map(String::from)
        .collect()
}

pub fn write_config(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("mpi_cg.ini");
    std::fs::write(&path, text).unwrap();
    path
}

/// `init_example` + `discretize` + wrap, from `config` with `overrides`.
pub fn wrapped<C: Communicator>(
    ctx: &mut MpiContext<C, Operation>,
    config: &Path,
    overrides: &[&str],
    policy: CommPolicy,
    mode: WrapMode,
) -> Result<MpiDiscretization, DispatchError> {
    let example = init_example(ctx, config, &args(overrides))?;
    let disc = discretize(ctx, example, config)?;
    MpiDiscretization::wrap(ctx, disc, policy, mode)
}

/// Solve once on a fresh `n_ranks` job and return the assembled vector.
pub fn solve_fresh(n_ranks: usize, overrides: &[&str], mode: WrapMode, value: f64) -> Vec<f64> {
    run_local::<Operation, _, _>(n_ranks, |ctx| {
        let disc = wrapped(ctx, Path::new(MISSING_CONFIG), overrides, CommPolicy::AutoComm, mode)?;
        let u = disc.solve(ctx, &mu(value))?;
        u.to_global(ctx)
    })
    .unwrap()
}
