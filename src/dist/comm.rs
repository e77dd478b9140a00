//! Rank-to-rank collectives.
//!
//! The distributed builder is written against [`Communicator`], whose one
//! required primitive is a byte-blob allgather; broadcast, exscan, gather,
//! and the sum/max/max-loc reductions derive from it. [`LocalComm`] backs a rank group with a
//! mesh of unbounded channels, one per ordered rank pair, which makes an
//! SPMD job runnable as plain threads in one process. Collectives block on
//! channel receives, so every rank must issue the same collective sequence.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Collective operations over a fixed group of ranks.
pub trait Communicator: Send {
    /// This rank's index in `0..size`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Exchange byte blobs: every rank contributes one, every rank receives
    /// all of them in rank order.
    fn allgather(&self, mine: Vec<u8>) -> Vec<Vec<u8>>;

    /// Synchronize all ranks.
    fn barrier(&self) {
        self.allgather(Vec::new());
    }

    /// Every rank receives `root`'s blob.
    fn broadcast(&self, root: usize, buf: Vec<u8>) -> Vec<u8> {
        let mut all = self.allgather(if self.rank() == root { buf } else { Vec::new() });
        all.swap_remove(root)
    }

    /// Collect every rank's blob at `root`; other ranks get `None`.
    fn gather(&self, root: usize, mine: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        let all = self.allgather(mine);
        (self.rank() == root).then_some(all)
    }

    /// Exclusive prefix sum over one value per rank.
    fn exscan_sum(&self, value: u64) -> u64 {
        let all = self.allgather(value.to_le_bytes().to_vec());
        all[..self.rank()].iter().map(|b| decode_u64(b)).sum()
    }

    /// Sum one value per rank across the group.
    fn sum_u64(&self, value: u64) -> u64 {
        let all = self.allgather(value.to_le_bytes().to_vec());
        all.iter().map(|b| decode_u64(b)).sum()
    }

    /// Maximum of one value per rank across the group.
    fn max_f64(&self, value: f64) -> f64 {
        let all = self.allgather(value.to_le_bytes().to_vec());
        all.iter().map(|b| decode_f64(b)).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Located maximum: every rank contributes a value and a location tag;
    /// all ranks receive the greatest value with its tag. Ties go to the
    /// lowest contributing rank (each rank resolves ties among its own
    /// candidates before calling).
    fn max_loc(&self, value: f64, loc: u64) -> (f64, u64) {
        let mut mine = Vec::with_capacity(16);
        mine.extend_from_slice(&value.to_le_bytes());
        mine.extend_from_slice(&loc.to_le_bytes());
        let all = self.allgather(mine);

        let mut best = (f64::NEG_INFINITY, u64::MAX);
        for blob in &all {
            let v = decode_f64(&blob[..8]);
            if v > best.0 {
                best = (v, decode_u64(&blob[8..16]));
            }
        }
        best
    }
}

fn decode_u64(buf: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(raw)
}

fn decode_f64(buf: &[u8]) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[..8]);
    f64::from_le_bytes(raw)
}

/// One rank of an in-process group wired with a channel mesh.
pub struct LocalComm {
    rank: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
}

/// Create a group of `size` connected ranks. Each returned handle is moved
/// onto its own thread.
pub fn local_group(size: usize) -> Vec<LocalComm> {
    assert!(size > 0, "rank group must not be empty");

    let mut send_rows: Vec<Vec<Sender<Vec<u8>>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();
    let mut recv_rows: Vec<Vec<Receiver<Vec<u8>>>> =
        (0..size).map(|_| Vec::with_capacity(size)).collect();

    for from in 0..size {
        for to in 0..size {
            let (s, r) = unbounded();
            send_rows[from].push(s);
            recv_rows[to].push(r);
        }
    }

    send_rows
        .into_iter()
        .zip(recv_rows)
        .enumerate()
        .map(|(rank, (senders, receivers))| LocalComm {
            rank,
            senders,
            receivers,
        })
        .collect()
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn allgather(&self, mine: Vec<u8>) -> Vec<Vec<u8>> {
        for to in 0..self.size() {
            self.senders[to]
                .send(mine.clone())
                .expect("peer rank hung up");
        }
        self.receivers
            .iter()
            .map(|r| r.recv().expect("peer rank hung up"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_ranks<F>(size: usize, f: F) -> Vec<Vec<u8>>
    where
        F: Fn(&LocalComm) -> Vec<u8> + Sync,
    {
        let comms = local_group(size);
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(&comm))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn allgather_orders_by_rank() {
        let results = on_ranks(3, |comm| {
            let all = comm.allgather(vec![comm.rank() as u8]);
            all.into_iter().flatten().collect()
        });
        for r in results {
            assert_eq!(r, vec![0, 1, 2]);
        }
    }

    #[test]
    fn exscan_is_exclusive() {
        let results = on_ranks(4, |comm| {
            let prefix = comm.exscan_sum(10 + comm.rank() as u64);
            vec![prefix as u8]
        });
        assert_eq!(results, vec![vec![0], vec![10], vec![21], vec![33]]);
    }

    #[test]
    fn broadcast_delivers_root_blob() {
        let results = on_ranks(3, |comm| {
            let buf = if comm.rank() == 1 { vec![42] } else { Vec::new() };
            comm.broadcast(1, buf)
        });
        for r in results {
            assert_eq!(r, vec![42]);
        }
    }

    #[test]
    fn max_loc_returns_the_winning_tag() {
        let results = on_ranks(3, |comm| {
            let value = if comm.rank() == 1 { 9.0 } else { 4.0 };
            let (best, loc) = comm.max_loc(value, 10 + comm.rank() as u64);
            vec![best as u8, loc as u8]
        });
        for r in results {
            assert_eq!(r, vec![9, 11]);
        }
    }

    #[test]
    fn max_loc_ties_go_to_the_lowest_rank() {
        let results = on_ranks(4, |comm| {
            let (_, loc) = comm.max_loc(1.0, comm.rank() as u64);
            vec![loc as u8]
        });
        for r in results {
            assert_eq!(r, vec![0]);
        }
    }

    #[test]
    fn sum_and_max_reduce_across_ranks() {
        let results = on_ranks(3, |comm| {
            let s = comm.sum_u64(comm.rank() as u64 + 1);
            let m = comm.max_f64(comm.rank() as f64);
            vec![s as u8, m as u8]
        });
        for r in results {
            assert_eq!(r, vec![6, 2]);
        }
    }
}
