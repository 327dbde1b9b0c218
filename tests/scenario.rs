//! End-to-end driver runs: configuration → example → discretization → solve → output.

mod util;

use std::fs;

use hdd_dispatch::prelude::*;
use serial_test::serial;
use util::{MISSING_CONFIG, write_config};

fn settings_in(dir: &tempfile::TempDir, config: impl Into<std::path::PathBuf>) -> DriverSettings {
    let mut settings = DriverSettings::new(config);
    settings.output = dir.path().join("solution").display().to_string();
    settings
}

fn release_all(
    ctx: &mut MpiContext<LocalComm, Operation>,
    outcome: hdd_dispatch::parallel::DriverOutcome,
) -> Result<(), DispatchError> {
    outcome.solution.release(ctx)?;
    outcome.discretization.release(ctx)?;
    ctx.release(outcome.example)?;
    assert!(ctx.arena().is_empty());
    Ok(())
}

#[test]
#[serial]
fn absent_config_falls_back_and_writes_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir, MISSING_CONFIG);
    let written = run_local::<Operation, _, _>(3, |ctx| {
        let outcome = run_driver(ctx, &settings)?;
        assert_eq!(outcome.discretization.dim(), 15);
        let written = outcome.written.clone();
        release_all(ctx, outcome)?;
        Ok(written)
    })
    .unwrap();

    assert_eq!(written, dir.path().join("solution.vtu"));
    let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);

    let xml = fs::read_to_string(&written).unwrap();
    assert!(xml.contains(r#"type="UnstructuredGrid""#));
    assert!(xml.contains(r#"Name="CG_solution""#));
    // 15 dofs plus both boundary vertices
    assert!(xml.contains(r#"NumberOfPoints="17""#));
    assert!(xml.contains(r#"NumberOfCells="16""#));
}

#[test]
#[serial]
fn present_config_sets_grid_and_solver() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "[grids]\nrefinements = 3\n\n[solver]\ntype = jacobi_cg\nmax_iter = 200\nprecision = 1e-12\n",
    );
    let settings = settings_in(&dir, &config);
    run_local::<Operation, _, _>(2, |ctx| {
        let outcome = run_driver(ctx, &settings)?;
        assert_eq!(outcome.discretization.dim(), 31);
        let options = outcome.discretization.solver_options(ctx)?;
        assert_eq!(options.max_iter, 200);
        assert_eq!(options.precision, 1e-12);
        assert_eq!(options.kind.to_string(), "jacobi_cg");
        assert!(outcome.written.exists());
        release_all(ctx, outcome)
    })
    .unwrap();
}

#[test]
#[serial]
fn overrides_beat_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[grids]\nrefinements = 3\n");
    let mut settings = settings_in(&dir, &config);
    settings.extra_args = util::args(&["-grids.refinements", "1"]);
    run_local::<Operation, _, _>(2, |ctx| {
        let outcome = run_driver(ctx, &settings)?;
        assert_eq!(outcome.discretization.dim(), 7);
        release_all(ctx, outcome)
    })
    .unwrap();
}

#[test]
#[serial]
fn malformed_config_fails_on_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "[grids\nrefinements = 3\n");
    let settings = settings_in(&dir, &config);
    let err = run_local::<Operation, _, _>(3, |ctx| {
        let err = run_driver(ctx, &settings).unwrap_err();
        assert!(ctx.arena().is_empty());
        Err::<(), _>(err)
    })
    .unwrap_err();
    assert_eq!(err.failed_ranks(), vec![0, 1, 2]);
    assert!(err.to_string().contains("line 1"));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
#[serial]
fn generic_auto_comm_driver_reports_a_norm() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings_in(&dir, MISSING_CONFIG);
    settings.policy = CommPolicy::AutoComm;
    settings.mode = WrapMode::Generic;
    settings.mu = Parameter::new("mu", [1.0]);
    run_local::<Operation, _, _>(4, |ctx| {
        let outcome = run_driver(ctx, &settings)?;
        assert_eq!(outcome.solution.policy(), CommPolicy::AutoComm);
        assert!(outcome.solution.l2_norm(ctx)? > 0.0);
        release_all(ctx, outcome)
    })
    .unwrap();
}

#[test]
#[serial]
fn single_rank_driver_runs_without_workers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(&dir, MISSING_CONFIG);
    let mut ctx = MpiContext::<SerialComm, Operation>::init(SerialComm);
    let outcome = run_driver(&mut ctx, &settings).unwrap();
    assert!(outcome.written.exists());
    ctx.teardown().unwrap();
}
