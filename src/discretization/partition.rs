//! Contiguous block distribution of global rows over ranks.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Rows `0..dim_global` split into `n_ranks` contiguous blocks; the first
/// `dim_global % n_ranks` ranks own one extra row.
///
/// Empty blocks can only occur at the end (more ranks than rows), so every
/// non-empty block's neighbours are the adjacent ranks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPartition {
    dim_global: usize,
    n_ranks: usize,
}

impl RowPartition {
    pub fn new(dim_global: usize, n_ranks: usize) -> Self {
        Self {
            dim_global,
            n_ranks: n_ranks.max(1),
        }
    }

    pub fn dim_global(&self) -> usize {
        self.dim_global
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    /// Global rows owned by `rank`.
    pub fn owned(&self, rank: usize) -> Range<usize> {
        if rank >= self.n_ranks {
            return self.dim_global..self.dim_global;
        }
        let base = self.dim_global / self.n_ranks;
        let extra = self.dim_global % self.n_ranks;
        let start = rank * base + rank.min(extra);
        let len = base + usize::from(rank < extra);
        start..start + len
    }

    pub fn owner_of(&self, row: usize) -> Option<usize> {
        if row >= self.dim_global {
            return None;
        }
        let base = self.dim_global / self.n_ranks;
        let extra = self.dim_global % self.n_ranks;
        let big = (base + 1) * extra;
        Some(if row < big {
            row / (base + 1)
        } else {
            extra + (row - big) / base
        })
    }

    /// Rank owning the row just before `rank`'s first row.
    pub fn left_neighbor(&self, rank: usize) -> Option<usize> {
        (rank > 0 && !self.owned(rank).is_empty()).then(|| rank - 1)
    }

    /// Rank owning the row just after `rank`'s last row.
    pub fn right_neighbor(&self, rank: usize) -> Option<usize> {
        let next = rank + 1;
        (!self.owned(rank).is_empty() && !self.owned(next).is_empty()).then_some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remainder_goes_to_first_ranks() {
        let p = RowPartition::new(10, 3);
        assert_eq!(p.owned(0), 0..4);
        assert_eq!(p.owned(1), 4..7);
        assert_eq!(p.owned(2), 7..10);
        assert_eq!(p.left_neighbor(0), None);
        assert_eq!(p.right_neighbor(2), None);
        assert_eq!(p.right_neighbor(0), Some(1));
    }

    #[test]
    fn more_ranks_than_rows() {
        let p = RowPartition::new(2, 4);
        assert_eq!(p.owned(1), 1..2);
        assert!(p.owned(2).is_empty());
        assert_eq!(p.right_neighbor(1), None);
        assert_eq!(p.left_neighbor(3), None);
    }

    proptest! {
        #[test]
        fn blocks_tile_the_rows(dim in 0usize..200, ranks in 1usize..9) {
            let p = RowPartition::new(dim, ranks);
            let mut next = 0;
            for r in 0..ranks {
                let own = p.owned(r);
                prop_assert_eq!(own.start, next);
                for row in own.clone() {
                    prop_assert_eq!(p.owner_of(row), Some(r));
                }
                next = own.end;
            }
            prop_assert_eq!(next, dim);
            prop_assert_eq!(p.owner_of(dim), None);
        }
    }
}
