use std::collections::BTreeMap;

use super::{EdgeId, Ploidy};

/// Divergence value of a row that has not matched its predecessor on any
/// column seen so far. Larger than every edge index, so the first equivalence
/// class is always representable.
pub const DIVERGENCE_SENTINEL: EdgeId = u64::MAX;

/// Positional Burrows–Wheeler transform over binary columns.
///
/// `permutation[i]` is the chromosome copy at rank `i` of the reverse-prefix
/// ordering; `divergence[i]` is one past the last column on which that copy
/// and its predecessor in the permutation differed, i.e. the two agree on all
/// columns `>= divergence[i]`. `divergence_counts` mirrors the divergence
/// array as an ordered multiset so the number of equivalence classes to the
/// right of a column can be read off by a suffix sum.
#[derive(Debug, Clone)]
pub struct PbwtContext {
    pub permutation: Vec<Ploidy>,
    pub divergence: Vec<EdgeId>,
    pub divergence_counts: BTreeMap<EdgeId, Ploidy>,
    perm_scratch: Vec<Ploidy>,
    div_scratch: Vec<EdgeId>,
    ones_perm: Vec<Ploidy>,
    ones_div: Vec<EdgeId>,
}

impl PbwtContext {
    pub fn new(copy_count: Ploidy) -> Self {
        let permutation: Vec<Ploidy> = (0..copy_count).collect();
        let mut divergence = vec![0; copy_count as usize];
        let mut divergence_counts = BTreeMap::new();
        if copy_count > 0 {
            divergence[0] = DIVERGENCE_SENTINEL;
            divergence_counts.insert(DIVERGENCE_SENTINEL, 1);
            if copy_count > 1 {
                divergence_counts.insert(0, copy_count - 1);
            }
        }
        Self {
            permutation,
            divergence,
            divergence_counts,
            perm_scratch: Vec::with_capacity(copy_count as usize),
            div_scratch: Vec::with_capacity(copy_count as usize),
            ones_perm: Vec::with_capacity(copy_count as usize),
            ones_div: Vec::with_capacity(copy_count as usize),
        }
    }

    /// Number of path equivalence classes over the block of columns starting
    /// at index `column_bound`: rows whose divergence exceeds the bound each
    /// open a class. Zero when no column at or after the bound has been
    /// observed yet.
    pub fn class_count_after(&self, column_bound: EdgeId) -> Ploidy {
        self.divergence_counts
            .range(column_bound + 1..)
            .map(|(_, &count)| count)
            .sum()
    }

    /// Observe one binary column given as a word slice (bit `i` = membership
    /// of chromosome copy `i`). Stable-partitions the permutation by the bit
    /// value, zeros before ones; the first surviving entry of each group
    /// diverges at `column_index + 1`, the rest carry their values forward.
    pub fn step(&mut self, column: &[u64], column_index: EdgeId) {
        let boundary = column_index + 1;
        self.perm_scratch.clear();
        self.div_scratch.clear();
        self.ones_perm.clear();
        self.ones_div.clear();

        let mut zero_first = true;
        let mut one_first = true;
        for (&copy, &div) in self.permutation.iter().zip(&self.divergence) {
            let bit = column[copy as usize / 64] >> (copy % 64) & 1 == 1;
            let (first, perm_out, div_out) = if bit {
                (&mut one_first, &mut self.ones_perm, &mut self.ones_div)
            } else {
                (&mut zero_first, &mut self.perm_scratch, &mut self.div_scratch)
            };
            let new_div = if *first {
                *first = false;
                boundary
            } else {
                div
            };
            if new_div != div {
                decrement(&mut self.divergence_counts, div);
                *self.divergence_counts.entry(new_div).or_insert(0) += 1;
            }
            perm_out.push(copy);
            div_out.push(new_div);
        }

        self.perm_scratch.append(&mut self.ones_perm);
        self.div_scratch.append(&mut self.ones_div);
        std::mem::swap(&mut self.permutation, &mut self.perm_scratch);
        std::mem::swap(&mut self.divergence, &mut self.div_scratch);
    }
}

fn decrement(counts: &mut BTreeMap<EdgeId, Ploidy>, value: EdgeId) {
    match counts.get_mut(&value) {
        Some(count) if *count > 1 => *count -= 1,
        Some(_) => {
            counts.remove(&value);
        }
        None => panic!("divergence multiset out of sync"),
    }
}
