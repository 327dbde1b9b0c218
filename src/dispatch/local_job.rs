//! In-process multi-rank jobs: one thread per rank over [`LocalComm`].
//!
//! Rank 0 runs the driver script; every other rank runs the worker event loop.
//! After the script returns (successfully or not) the coordinator tears the
//! context down so that workers leave their loops, and worker results are joined.

use crate::algs::communicator::{Communicator, LocalComm};
use crate::dispatch::context::MpiContext;
use crate::dispatch::op::RemoteOp;
use crate::dispatch_error::{DispatchError, RankFailure};

/// Closes a rank's mailbox when the rank's thread is done, so peers blocked on it
/// see a closed transport instead of hanging.
struct HangUpOnDrop(LocalComm);

impl Drop for HangUpOnDrop {
    fn drop(&mut self) {
        self.0.hang_up();
    }
}

/// Run `script` as the driver of an `n_ranks` job and return its result.
pub fn run_local<Op, F, R>(n_ranks: usize, script: F) -> Result<R, DispatchError>
where
    Op: RemoteOp,
    F: FnOnce(&mut MpiContext<LocalComm, Op>) -> Result<R, DispatchError>,
{
    if n_ranks == 0 {
        return Err(DispatchError::InvalidArgument(
            "a job needs at least one rank".into(),
        ));
    }
    let mut world = LocalComm::world(n_ranks).into_iter();
    let Some(root) = world.next() else {
        return Err(DispatchError::InvalidArgument(
            "a job needs at least one rank".into(),
        ));
    };
    log::info!("starting local job with {n_ranks} rank(s)");

    std::thread::scope(|s| {
        let workers: Vec<_> = world
            .map(|comm| {
                let rank = comm.rank();
                let handle = s.spawn(move || {
                    let _guard = HangUpOnDrop(comm.clone());
                    MpiContext::<LocalComm, Op>::init(comm).event_loop()
                });
                (rank, handle)
            })
            .collect();

        let outcome = {
            let _guard = HangUpOnDrop(root.clone());
            let mut ctx = MpiContext::<LocalComm, Op>::init(root);
            let result = script(&mut ctx);
            let closed = ctx.teardown();
            match (result, closed) {
                (Ok(value), Ok(())) => Ok(value),
                (Err(e), _) => Err(e),
                (Ok(_), Err(e)) => Err(e),
            }
        };

        let mut failures = Vec::new();
        for (rank, handle) in workers {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(RankFailure {
                    rank,
                    message: e.to_string(),
                }),
                Err(_) => failures.push(RankFailure {
                    rank,
                    message: "worker thread panicked".into(),
                }),
            }
        }
        match outcome {
            Err(e) => Err(e),
            Ok(_) if !failures.is_empty() => Err(DispatchError::RankFailures {
                operation: "event loop".into(),
                failures,
            }),
            Ok(value) => Ok(value),
        }
    })
}
