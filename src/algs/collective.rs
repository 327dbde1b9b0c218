//! Framed messages and collectives on top of [`Communicator`].
//!
//! Every routine here is written so that it stays deadlock free when `isend` blocks
//! until matched and `irecv` blocks until data arrives (the MPI backend behaves
//! this way); the thread backend is strictly more permissive.
//!
//! Reductions are deterministic: contributions are combined on rank 0 in rank order
//! and the result is broadcast, so every rank sees bitwise identical values.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::mem::size_of;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{
    KIND_SCALARS, KIND_VALUE, WireHdr, cast_slice, decode_f64s, decode_value, encode_f64s,
    encode_value,
};
use crate::dispatch_error::DispatchError;

/// Tag space used by [`Collective`] for in-operation reductions.
pub const REDUCE_TAG: CommTag = CommTag(0xC100);
/// Tag space used for neighbour halo exchange.
pub const HALO_TAG: CommTag = CommTag(0xC200);
/// Tag space used for gathers to rank 0.
pub const GATHER_TAG: CommTag = CommTag(0xC300);
/// Tag space used by barriers.
pub const BARRIER_TAG: CommTag = CommTag(0xC400);

/// Send one framed message (header, then payload) to `peer`.
pub fn send_frame<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    kind: u16,
    payload: &[u8],
) -> Result<(), DispatchError> {
    let hdr = WireHdr::new(kind, payload.len())?;
    comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&hdr)))
        .wait();
    comm.isend(peer, tag.as_u16(), payload).wait();
    Ok(())
}

/// Receive one framed message of `kind` from `peer`.
pub fn recv_frame<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    kind: u16,
) -> Result<Vec<u8>, DispatchError> {
    let mut hdr_buf = [0u8; size_of::<WireHdr>()];
    let raw = comm
        .irecv(peer, tag.as_u16(), &mut hdr_buf)
        .wait()
        .ok_or_else(|| DispatchError::comm(peer, "connection closed while waiting for header"))?;
    let hdr = WireHdr::decode(&raw, kind)?;
    let mut body = vec![0u8; hdr.len()];
    let data = comm
        .irecv(peer, tag.as_u16(), &mut body)
        .wait()
        .ok_or_else(|| DispatchError::comm(peer, "connection closed while waiting for payload"))?;
    if data.len() != hdr.len() {
        return Err(DispatchError::comm(
            peer,
            format!("expected {} payload bytes, got {}", hdr.len(), data.len()),
        ));
    }
    Ok(data)
}

pub fn send_value<C: Communicator, T: Serialize + ?Sized>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    value: &T,
) -> Result<(), DispatchError> {
    send_frame(comm, peer, tag, KIND_VALUE, &encode_value(value)?)
}

pub fn recv_value<C: Communicator, T: DeserializeOwned>(
    comm: &C,
    peer: usize,
    tag: CommTag,
) -> Result<T, DispatchError> {
    decode_value(&recv_frame(comm, peer, tag, KIND_VALUE)?)
}

fn send_f64s<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: CommTag,
    values: &[f64],
) -> Result<(), DispatchError> {
    send_frame(comm, peer, tag, KIND_SCALARS, &encode_f64s(values))
}

fn recv_f64s<C: Communicator>(comm: &C, peer: usize, tag: CommTag) -> Result<Vec<f64>, DispatchError> {
    decode_f64s(&recv_frame(comm, peer, tag, KIND_SCALARS)?)
}

/// Gather one `f64` block per rank on `root`, ordered by rank. Non-root ranks get `None`.
pub fn gather_f64s<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    local: &[f64],
) -> Result<Option<Vec<Vec<f64>>>, DispatchError> {
    if comm.rank() != root {
        send_f64s(comm, root, tag, local)?;
        return Ok(None);
    }
    let mut blocks = Vec::with_capacity(comm.size());
    for peer in 0..comm.size() {
        if peer == root {
            blocks.push(local.to_vec());
        } else {
            blocks.push(recv_f64s(comm, peer, tag)?);
        }
    }
    Ok(Some(blocks))
}

/// Broadcast `values` from `root`; non-root ranks pass anything (ignored).
pub fn broadcast_f64s<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    values: &[f64],
) -> Result<Vec<f64>, DispatchError> {
    if comm.rank() == root {
        for peer in (0..comm.size()).filter(|&p| p != root) {
            send_f64s(comm, peer, tag, values)?;
        }
        Ok(values.to_vec())
    } else {
        recv_f64s(comm, root, tag)
    }
}

/// Combine one scalar per rank with `fold` (applied in rank order on rank 0) and
/// hand the result to every rank.
pub fn all_reduce_with<C: Communicator>(
    comm: &C,
    tag: CommTag,
    local: f64,
    fold: impl Fn(f64, f64) -> f64,
) -> Result<f64, DispatchError> {
    if comm.is_serial() {
        return Ok(local);
    }
    let reduced = match gather_f64s(comm, 0, tag, &[local])? {
        Some(blocks) => {
            let mut it = blocks.into_iter().flatten();
            let first = it.next().unwrap_or(0.0);
            vec![it.fold(first, &fold)]
        }
        None => Vec::new(),
    };
    let out = broadcast_f64s(comm, 0, tag.offset(1), &reduced)?;
    out.first()
        .copied()
        .ok_or_else(|| DispatchError::comm(0, "empty reduction result"))
}

/// Exchange boundary values with the left and right neighbour ranks.
///
/// `left`/`right` name the neighbour rank and the value to hand it. Returns what the
/// neighbours sent back. A rank talks to its left neighbour first (receive, then
/// send) and to its right neighbour second (send, then receive), which orders the
/// chain without cycles.
pub fn exchange_halo<C: Communicator>(
    comm: &C,
    tag: CommTag,
    left: Option<(usize, f64)>,
    right: Option<(usize, f64)>,
) -> Result<(Option<f64>, Option<f64>), DispatchError> {
    let from_left = match left {
        Some((peer, value)) => {
            let got = recv_f64s(comm, peer, tag)?;
            send_f64s(comm, peer, tag, &[value])?;
            Some(single(peer, got)?)
        }
        None => None,
    };
    let from_right = match right {
        Some((peer, value)) => {
            send_f64s(comm, peer, tag, &[value])?;
            let got = recv_f64s(comm, peer, tag)?;
            Some(single(peer, got)?)
        }
        None => None,
    };
    Ok((from_left, from_right))
}

fn single(peer: usize, got: Vec<f64>) -> Result<f64, DispatchError> {
    match got.as_slice() {
        [x] => Ok(*x),
        _ => Err(DispatchError::comm(
            peer,
            format!("expected one halo value, got {}", got.len()),
        )),
    }
}

/// Block until every rank has entered the barrier.
pub fn barrier<C: Communicator>(comm: &C, tag: CommTag) -> Result<(), DispatchError> {
    all_reduce_with(comm, tag, 0.0, |a, b| a + b).map(|_| ())
}

/// Object-safe view of the collectives a rank-local computation may use while it
/// runs inside a dispatched operation.
pub trait Collective {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Deterministic sum over all ranks.
    fn all_reduce_sum(&self, local: f64) -> Result<f64, DispatchError>;
    /// Maximum over all ranks.
    fn all_reduce_max(&self, local: f64) -> Result<f64, DispatchError>;
    /// Blocks of every rank on rank 0 (rank order), `None` elsewhere.
    fn gather_on_root(&self, local: &[f64]) -> Result<Option<Vec<Vec<f64>>>, DispatchError>;
    fn exchange_halo(
        &self,
        left: Option<(usize, f64)>,
        right: Option<(usize, f64)>,
    ) -> Result<(Option<f64>, Option<f64>), DispatchError>;
    fn barrier(&self) -> Result<(), DispatchError>;
}

/// [`Collective`] implementation over any [`Communicator`].
pub struct CommCollective<'a, C: Communicator>(pub &'a C);

impl<C: Communicator> Collective for CommCollective<'_, C> {
    fn rank(&self) -> usize {
        self.0.rank()
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn all_reduce_sum(&self, local: f64) -> Result<f64, DispatchError> {
        all_reduce_with(self.0, REDUCE_TAG, local, |a, b| a + b)
    }
    fn all_reduce_max(&self, local: f64) -> Result<f64, DispatchError> {
        all_reduce_with(self.0, REDUCE_TAG, local, f64::max)
    }
    fn gather_on_root(&self, local: &[f64]) -> Result<Option<Vec<Vec<f64>>>, DispatchError> {
        gather_f64s(self.0, 0, GATHER_TAG, local)
    }
    fn exchange_halo(
        &self,
        left: Option<(usize, f64)>,
        right: Option<(usize, f64)>,
    ) -> Result<(Option<f64>, Option<f64>), DispatchError> {
        exchange_halo(self.0, HALO_TAG, left, right)
    }
    fn barrier(&self) -> Result<(), DispatchError> {
        barrier(self.0, BARRIER_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, SerialComm};

    fn on_every_rank<T: Send>(
        size: usize,
        f: impl Fn(&CommCollective<'_, LocalComm>) -> T + Sync,
    ) -> Vec<T> {
        let world = LocalComm::world(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|c| s.spawn(|| f(&CommCollective(c))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn sum_is_identical_on_every_rank() {
        let sums = on_every_rank(4, |c| {
            c.all_reduce_sum(0.1 * (c.rank() as f64 + 1.0)).unwrap()
        });
        let expected: f64 = (2..=4).fold(0.1, |acc, r| acc + 0.1 * r as f64);
        for s in sums {
            assert_eq!(s.to_bits(), expected.to_bits());
        }
    }

    #[test]
    fn max_over_ranks() {
        let maxes = on_every_rank(3, |c| c.all_reduce_max(-(c.rank() as f64)).unwrap());
        assert_eq!(maxes, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn gather_orders_blocks_by_rank() {
        let gathered = on_every_rank(3, |c| {
            let r = c.rank();
            c.gather_on_root(&vec![r as f64; r + 1]).unwrap()
        });
        assert_eq!(
            gathered[0],
            Some(vec![vec![0.0], vec![1.0, 1.0], vec![2.0, 2.0, 2.0]])
        );
        assert!(gathered[1].is_none() && gathered[2].is_none());
    }

    #[test]
    fn halo_chain_swaps_boundary_values() {
        let halos = on_every_rank(3, |c| {
            let r = c.rank();
            let left = (r > 0).then(|| (r - 1, 10.0 * r as f64));
            let right = (r < 2).then(|| (r + 1, 10.0 * r as f64 + 1.0));
            c.exchange_halo(left, right).unwrap()
        });
        assert_eq!(halos[0], (None, Some(10.0)));
        assert_eq!(halos[1], (Some(1.0), Some(20.0)));
        assert_eq!(halos[2], (Some(11.0), None));
    }

    #[test]
    fn value_frames_round_trip() {
        let world = LocalComm::world(2);
        send_value(&world[0], 1, CommTag(9), &("mu", vec![0.1f64])).unwrap();
        let got: (String, Vec<f64>) = recv_value(&world[1], 0, CommTag(9)).unwrap();
        assert_eq!(got, ("mu".to_string(), vec![0.1]));
    }

    #[test]
    fn serial_collectives_are_local() {
        let comm = CommCollective(&SerialComm);
        assert_eq!(comm.all_reduce_sum(2.5).unwrap(), 2.5);
        assert_eq!(comm.gather_on_root(&[1.0]).unwrap(), Some(vec![vec![1.0]]));
        comm.barrier().unwrap();
    }

    #[test]
    fn closed_transport_is_a_comm_error() {
        let world = LocalComm::world(2);
        world[0].hang_up();
        let err = recv_frame(&world[1], 0, CommTag(1), KIND_VALUE).unwrap_err();
        assert!(matches!(err, DispatchError::CommError { neighbor: 0, .. }));
    }
}
