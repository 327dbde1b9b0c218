//! Explicit per-process dispatch context: the rank-0-driven remote call bridge and
//! the worker event loop.
//!
//! Protocol for one collective call with sequence number `seq`:
//!
//! 1. rank 0 validates the operation against its own arena,
//! 2. rank 0 sends `Envelope::Call { seq, op, manage }` to every worker,
//! 3. every rank (rank 0 included) executes the operation,
//! 4. every worker answers with an [`Ack`]; rank 0 waits for all of them, even if
//!    its own execution failed,
//! 5. failures of any rank are folded into one [`DispatchError::RankFailures`].
//!
//! Managed calls reserve the arena id *before* executing so that a failure on one
//! rank cannot shift the id sequence of the others.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use crate::algs::collective::{recv_frame, send_frame};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{KIND_ACK, KIND_ENVELOPE, decode_value, encode_value};
use crate::dispatch::arena::{HandleArena, HandleId};
use crate::dispatch::op::{RankEnv, RemoteOp, Reply};
use crate::dispatch_error::{DispatchError, RankFailure};

/// Coordinator → worker envelopes.
pub const DISPATCH_TAG: CommTag = CommTag(0xD100);
/// Worker → coordinator acknowledgements.
pub const ACK_TAG: CommTag = CommTag(0xD101);

const COORDINATOR: usize = 0;

#[derive(Debug, Serialize, Deserialize)]
enum Envelope<Op> {
    Call { seq: u64, op: Op, manage: bool },
    /// Drop a managed object. `strict` fails when the object is missing.
    Release { seq: u64, id: HandleId, strict: bool },
    Shutdown { seq: u64 },
}

/// Per-rank completion status of one envelope.
#[derive(Debug, Serialize, Deserialize)]
struct Ack {
    seq: u64,
    rank: usize,
    status: Result<Option<HandleId>, String>,
}

/// Explicit replacement for the ambient communicator/object table of a driver.
///
/// Create with [`MpiContext::init`] at process start; finish with
/// [`MpiContext::teardown`] on the coordinator. Workers spend their life in
/// [`MpiContext::event_loop`].
pub struct MpiContext<C: Communicator, Op: RemoteOp> {
    comm: C,
    arena: HandleArena,
    seq: u64,
    closed: bool,
    _ops: PhantomData<fn() -> Op>,
}

impl<C: Communicator, Op: RemoteOp> MpiContext<C, Op> {
    pub fn init(comm: C) -> Self {
        log::debug!(
            "rank {}/{}: dispatch context initialized",
            comm.rank(),
            comm.size()
        );
        Self {
            comm,
            arena: HandleArena::new(),
            seq: 0,
            closed: false,
            _ops: PhantomData,
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn is_coordinator(&self) -> bool {
        self.comm.rank() == COORDINATOR
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Read-only view of this rank's managed objects.
    pub fn arena(&self) -> &HandleArena {
        &self.arena
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Execute `op` on every rank; returns rank 0's reply.
    pub fn call(&mut self, op: Op) -> Result<Reply, DispatchError> {
        let (reply, _) = self.collective_call(op, false)?;
        Ok(reply)
    }

    /// Execute `op` on every rank and keep each rank's resulting object in its arena.
    ///
    /// The returned id resolves, on every rank, to that rank's own instance.
    pub fn call_manage(&mut self, op: Op) -> Result<HandleId, DispatchError> {
        let (_, id) = self.collective_call(op, true)?;
        id.ok_or_else(|| DispatchError::Wire("managed call produced no handle".into()))
    }

    /// Drop the object behind `id` on every rank.
    pub fn release(&mut self, id: HandleId) -> Result<(), DispatchError> {
        self.ensure_open_coordinator("release")?;
        if !self.arena.contains(id) {
            return Err(DispatchError::UnknownHandle(id));
        }
        let seq = self.next_seq();
        self.broadcast(&Envelope::<&Op>::Release {
            seq,
            id,
            strict: true,
        })?;
        let local = self.arena.remove(id).map(|_| None).map_err(|e| e.to_string());
        let (failures, _) = self.collect_acks(seq, local);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::RankFailures {
                operation: "release".into(),
                failures,
            })
        }
    }

    /// Worker side: execute envelopes from rank 0 until it sends `Shutdown`.
    pub fn event_loop(&mut self) -> Result<(), DispatchError> {
        if self.is_coordinator() {
            return Err(DispatchError::StateViolation(
                "the event loop runs on worker ranks only".into(),
            ));
        }
        if self.closed {
            return Err(DispatchError::ContextClosed);
        }
        log::debug!("rank {}: entering event loop", self.rank());
        loop {
            let bytes = recv_frame(&self.comm, COORDINATOR, DISPATCH_TAG, KIND_ENVELOPE)?;
            let envelope: Envelope<Op> = decode_value(&bytes)?;
            match envelope {
                Envelope::Call { seq, op, manage } => {
                    log::trace!("rank {}: call #{seq} {}", self.rank(), op.name());
                    let status = self.run_op(&op, manage).map(|(_, id)| id).map_err(|e| {
                        log::error!("rank {}: `{}` failed: {e}", self.rank(), op.name());
                        e.to_string()
                    });
                    self.ack(seq, status)?;
                }
                Envelope::Release { seq, id, strict } => {
                    let status = match self.arena.remove(id) {
                        Ok(_) => Ok(None),
                        Err(_) if !strict => Ok(None),
                        Err(e) => Err(e.to_string()),
                    };
                    self.ack(seq, status)?;
                }
                Envelope::Shutdown { seq } => {
                    self.arena.clear();
                    self.closed = true;
                    self.ack(seq, Ok(None))?;
                    log::debug!("rank {}: leaving event loop", self.rank());
                    return Ok(());
                }
            }
        }
    }

    /// Coordinator: stop every worker loop and drop all managed objects.
    /// Workers: drop all managed objects.
    pub fn teardown(mut self) -> Result<(), DispatchError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), DispatchError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.arena.clear();
        if !self.is_coordinator() || self.comm.is_serial() {
            return Ok(());
        }
        let seq = self.next_seq();
        self.broadcast(&Envelope::<&Op>::Shutdown { seq })?;
        let (failures, _) = self.collect_acks(seq, Ok(None));
        log::debug!("coordinator: {} worker(s) shut down", self.size() - 1);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::RankFailures {
                operation: "shutdown".into(),
                failures,
            })
        }
    }

    fn collective_call(
        &mut self,
        op: Op,
        manage: bool,
    ) -> Result<(Reply, Option<HandleId>), DispatchError> {
        self.ensure_open_coordinator(op.name())?;
        op.validate(&self.arena)?;
        let seq = self.next_seq();
        let name = op.name();
        log::debug!("coordinator: call #{seq} {name} (manage = {manage})");

        self.broadcast(&Envelope::Call {
            seq,
            op: &op,
            manage,
        })?;
        let local = self.run_op(&op, manage);
        let local_status = match &local {
            Ok((_, id)) => Ok(*id),
            Err(e) => Err(e.to_string()),
        };
        let (failures, worker_ids) = self.collect_acks(seq, local_status);

        if !failures.is_empty() {
            if manage {
                self.discard_partial(&local, &worker_ids);
            }
            return Err(DispatchError::RankFailures {
                operation: name.to_string(),
                failures,
            });
        }
        let (reply, id) = local?;
        if let Some(expected) = id {
            for (rank, got) in worker_ids {
                match got {
                    Some(got) if got == expected => {}
                    Some(got) => {
                        return Err(DispatchError::HandleDesync {
                            expected,
                            rank,
                            got,
                        });
                    }
                    None => {
                        return Err(DispatchError::Wire(format!(
                            "rank {rank} reported no handle for managed call `{name}`"
                        )));
                    }
                }
            }
        }
        Ok((reply, id))
    }

    /// Release whatever a partially failed managed call left behind.
    fn discard_partial(
        &mut self,
        local: &Result<(Reply, Option<HandleId>), DispatchError>,
        worker_ids: &[(usize, Option<HandleId>)],
    ) {
        let id = match local {
            Ok((_, Some(id))) => Some(*id),
            _ => worker_ids.iter().find_map(|(_, id)| *id),
        };
        let Some(id) = id else { return };
        let seq = self.next_seq();
        if self
            .broadcast(&Envelope::<&Op>::Release {
                seq,
                id,
                strict: false,
            })
            .is_err()
        {
            return;
        }
        let _ = self.arena.remove(id);
        let (failures, _) = self.collect_acks(seq, Ok(None));
        if !failures.is_empty() {
            log::warn!("coordinator: cleanup of {id} failed on ranks {failures:?}");
        }
    }

    fn run_op(&mut self, op: &Op, manage: bool) -> Result<(Reply, Option<HandleId>), DispatchError> {
        let reserved = manage.then(|| self.arena.reserve());
        let reply = {
            let mut env = RankEnv {
                comm: &self.comm,
                arena: &mut self.arena,
            };
            op.execute(&mut env)?
        };
        match (reserved, reply) {
            (None, reply) => Ok((reply, None)),
            (Some(id), Reply::Object(object)) => {
                self.arena.insert_at(id, object)?;
                Ok((Reply::Unit, Some(id)))
            }
            (Some(_), other) => Err(DispatchError::InvalidArgument(format!(
                "`{}` returned a {} reply, a managed call needs an object",
                op.name(),
                other.kind()
            ))),
        }
    }

    fn broadcast<T: Serialize>(&self, envelope: &T) -> Result<(), DispatchError> {
        let bytes = encode_value(envelope)?;
        for peer in 1..self.size() {
            send_frame(&self.comm, peer, DISPATCH_TAG, KIND_ENVELOPE, &bytes)?;
        }
        Ok(())
    }

    /// Gather one ack per worker; returns failures (rank 0's first) and the ids
    /// reported by successful workers.
    fn collect_acks(
        &self,
        seq: u64,
        local: Result<Option<HandleId>, String>,
    ) -> (Vec<RankFailure>, Vec<(usize, Option<HandleId>)>) {
        let mut failures = Vec::new();
        let mut ids = Vec::new();
        if let Err(message) = local {
            failures.push(RankFailure {
                rank: COORDINATOR,
                message,
            });
        }
        for peer in 1..self.size() {
            let ack = recv_frame(&self.comm, peer, ACK_TAG, KIND_ACK)
                .and_then(|bytes| decode_value::<Ack>(&bytes));
            match ack {
                Ok(ack) if ack.seq != seq || ack.rank != peer => failures.push(RankFailure {
                    rank: peer,
                    message: format!(
                        "acknowledged call #{} as rank {} while #{seq} was pending",
                        ack.seq, ack.rank
                    ),
                }),
                Ok(Ack {
                    status: Ok(id), ..
                }) => ids.push((peer, id)),
                Ok(Ack {
                    status: Err(message),
                    ..
                }) => failures.push(RankFailure {
                    rank: peer,
                    message,
                }),
                Err(e) => failures.push(RankFailure {
                    rank: peer,
                    message: e.to_string(),
                }),
            }
        }
        (failures, ids)
    }

    fn ack(&self, seq: u64, status: Result<Option<HandleId>, String>) -> Result<(), DispatchError> {
        let ack = Ack {
            seq,
            rank: self.rank(),
            status,
        };
        send_frame(&self.comm, COORDINATOR, ACK_TAG, KIND_ACK, &encode_value(&ack)?)
    }

    fn ensure_open_coordinator(&self, what: &'static str) -> Result<(), DispatchError> {
        if !self.is_coordinator() {
            return Err(DispatchError::NotCoordinator(what));
        }
        if self.closed {
            return Err(DispatchError::ContextClosed);
        }
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

impl<C: Communicator, Op: RemoteOp> Drop for MpiContext<C, Op> {
    fn drop(&mut self) {
        if !self.closed && self.is_coordinator() && !self.comm.is_serial() {
            log::warn!("coordinator: context dropped without teardown, shutting workers down");
            if let Err(e) = self.shutdown() {
                log::error!("coordinator: shutdown during drop failed: {e}");
            }
        }
    }
}
