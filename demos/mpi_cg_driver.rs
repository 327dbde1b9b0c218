//! MPI CG example driver.
//!
//! Rank 0 runs the driver script; every other rank runs the worker event loop.
//!
//! ```text
//! cargo run --example mpi_cg_driver -- [config.ini] [-key value ...]
//! mpirun -n 4 target/debug/examples/mpi_cg_driver mpi_cg.ini   # --features mpi-support
//! ```
//!
//! Without MPI the job runs in-process with `HDD_RANKS` threads (default 2).
//! `HDD_POLICY=auto` switches vectors to the `AutoComm` policy, `HDD_MODE=generic`
//! uses the generic solve.

use hdd_dispatch::prelude::*;
use std::env;

fn settings_from_env() -> DriverSettings {
    let args: Vec<String> = env::args().collect();
    let mut settings = DriverSettings::from_args(&args, "mpi_cg.ini");
    if env::var("HDD_POLICY").is_ok_and(|p| p.eq_ignore_ascii_case("auto")) {
        settings.policy = CommPolicy::AutoComm;
    }
    if env::var("HDD_MODE").is_ok_and(|m| m.eq_ignore_ascii_case("generic")) {
        settings.mode = WrapMode::Generic;
    }
    settings
}

fn script<C: Communicator>(
    ctx: &mut MpiContext<C, Operation>,
    settings: &DriverSettings,
) -> Result<(), DispatchError> {
    let outcome = run_driver(ctx, settings)?;
    println!(
        "solved {} dofs on {} rank(s), wrote {}",
        outcome.discretization.dim(),
        ctx.size(),
        outcome.written.display()
    );
    if settings.policy == CommPolicy::AutoComm {
        println!("|u|_2 = {:e}", outcome.solution.l2_norm(ctx)?);
    }
    outcome.solution.release(ctx)?;
    outcome.discretization.release(ctx)?;
    ctx.release(outcome.example)
}

#[cfg(feature = "mpi-support")]
fn main() -> Result<(), DispatchError> {
    env_logger::init();
    let settings = settings_from_env();
    let mut ctx = MpiContext::<MpiComm, Operation>::init(MpiComm::new()?);
    if ctx.is_coordinator() {
        let result = script(&mut ctx, &settings);
        ctx.teardown()?;
        result
    } else {
        ctx.event_loop()
    }
}

#[cfg(not(feature = "mpi-support"))]
fn main() -> Result<(), DispatchError> {
    env_logger::init();
    let settings = settings_from_env();
    let ranks = env::var("HDD_RANKS")
        .ok()
        .and_then(|n| n.parse().ok())
        .unwrap_or(2);
    run_local::<Operation, _, _>(ranks, |ctx| script(ctx, &settings))
}
