use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use super::{CutPositionList, EdgeId, PLOIDY_MAX, PbwtContext, Ploidy, VariantGraph};

/// Founder assignment: one row per block (pair of adjacent cut positions),
/// one column per founder slot. Entries are chromosome-copy indices acting as
/// equivalence-class representatives, `PLOIDY_MAX` when a slot stays empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FounderAssignment {
    founder_count: Ploidy,
    data: Vec<Ploidy>,
}

impl FounderAssignment {
    fn new(block_count: usize, founder_count: Ploidy) -> Self {
        Self {
            founder_count,
            data: vec![PLOIDY_MAX; block_count * founder_count as usize],
        }
    }

    pub fn block_count(&self) -> usize {
        if self.founder_count == 0 {
            0
        } else {
            self.data.len() / self.founder_count as usize
        }
    }

    pub fn founder_count(&self) -> Ploidy {
        self.founder_count
    }

    pub fn block(&self, block: usize) -> &[Ploidy] {
        let width = self.founder_count as usize;
        &self.data[block * width..(block + 1) * width]
    }

    /// Per-block representatives of one founder slot.
    pub fn founder_column(&self, founder: Ploidy) -> Vec<Ploidy> {
        (0..self.block_count())
            .map(|block| self.block(block)[founder as usize])
            .collect()
    }

    fn set(&mut self, block: usize, founder: Ploidy, value: Ploidy) {
        self.data[block * self.founder_count as usize + founder as usize] = value;
    }
}

/// A joined path equivalence class over two adjacent blocks, identified by
/// its class representatives on each side of the shared cut.
#[derive(Debug, Clone, Copy)]
struct JoinedClass {
    lhs: Ploidy,
    rhs: Ploidy,
    size: Ploidy,
}

/// Multimap from equivalence-class representative to founder slots currently
/// holding that class, with deterministic pop order.
#[derive(Debug, Default)]
struct AssignmentPool {
    map: BTreeMap<Ploidy, VecDeque<Ploidy>>,
}

impl AssignmentPool {
    fn insert(&mut self, class_rep: Ploidy, founder: Ploidy) {
        self.map.entry(class_rep).or_default().push_back(founder);
    }

    /// Take one founder assigned to `class_rep`.
    fn take(&mut self, class_rep: Ploidy) -> Option<Ploidy> {
        let slots = self.map.get_mut(&class_rep)?;
        let founder = slots.pop_front();
        if slots.is_empty() {
            self.map.remove(&class_rep);
        }
        founder
    }

    /// Take any founder, smallest class representative first.
    fn take_first(&mut self) -> Option<Ploidy> {
        let (&class_rep, _) = self.map.first_key_value()?;
        self.take(class_rep)
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

/// Assign equivalence-class representatives to founder slots block by block.
///
/// A second pBWT pass recovers the class representatives at every cut. For
/// each pair of adjacent blocks the joined classes are processed largest
/// first: founders whose current class matches a joined class's left side are
/// carried over to its right side, each distinct right representative gets a
/// reserved slot, and surplus founders are distributed arbitrarily.
pub fn find_matchings(
    graph: &VariantGraph,
    cuts: &CutPositionList,
    founder_count: Ploidy,
    keep_ref_edges: bool,
) -> Option<FounderAssignment> {
    if cuts.positions.len() < 2 || founder_count == 0 {
        return None;
    }
    let total_copies = graph.total_copies();
    if total_copies == 0 {
        return None;
    }
    assert_eq!(cuts.positions[0], 0, "cut positions must start at node 0");

    let mut assigned = FounderAssignment::new(cuts.positions.len() - 1, founder_count);
    let mut pool = AssignmentPool::default();
    let mut reserved = vec![false; total_copies as usize];
    let mut arbitrary_rhs: Vec<Ploidy> = Vec::new();

    let mut pbwt = PbwtContext::new(total_copies);
    let mut edge_idx: EdgeId = 0;
    let mut prev_cut_edge: EdgeId = 0;
    let mut cut_pair_edge: EdgeId = 0;

    let mut lhs_classes = vec![PLOIDY_MAX; total_copies as usize];
    let mut rhs_classes = vec![PLOIDY_MAX; total_copies as usize];
    let mut lhs_distinct: Ploidy = 0;
    let mut rhs_distinct: Ploidy = 0;
    let mut joined: Vec<JoinedClass> = Vec::new();
    let mut lhs_first_path_is_ref = true;
    let mut rhs_first_path_is_ref = true;
    let mut lhs_first_class: Ploidy = 0;
    let mut rhs_first_class: Ploidy = 0;

    let mut next_cut = 1usize;
    let mut block_idx = 0usize;

    for node in 0..graph.node_count() {
        if next_cut < cuts.positions.len() && node == cuts.positions[next_cut] {
            std::mem::swap(&mut lhs_classes, &mut rhs_classes);
            rhs_classes.fill(PLOIDY_MAX);
            lhs_distinct = rhs_distinct;
            lhs_first_class = rhs_first_class;
            rhs_distinct = 0;
            rhs_first_class = pbwt.permutation.first().copied().unwrap_or(PLOIDY_MAX);

            // Representatives on the right of the previous cut, and the
            // joined classes across the block pair. A class representative is
            // only meaningful within its own block.
            joined.clear();
            let mut rep = PLOIDY_MAX;
            for (&copy, &div) in pbwt.permutation.iter().zip(&pbwt.divergence) {
                if div > prev_cut_edge {
                    rep = copy;
                    rhs_distinct += 1;
                }
                rhs_classes[copy as usize] = rep;
                if block_idx > 0 {
                    if div > cut_pair_edge {
                        joined.push(JoinedClass {
                            lhs: lhs_classes[copy as usize],
                            rhs: rep,
                            size: 0,
                        });
                    }
                    if let Some(class) = joined.last_mut() {
                        class.size += 1;
                    }
                }
            }

            if block_idx > 0 {
                joined.sort_unstable_by(|a, b| {
                    b.size.cmp(&a.size).then(a.lhs.cmp(&b.lhs)).then(a.rhs.cmp(&b.rhs))
                });

                // Matchings joining two all-REF sides carry no variation.
                if !keep_ref_edges && lhs_first_path_is_ref && rhs_first_path_is_ref {
                    joined
                        .retain(|class| !(class.lhs == lhs_first_class && class.rhs == rhs_first_class));
                }

                if block_idx == 1 {
                    initial_assignment(
                        &joined,
                        founder_count,
                        lhs_distinct,
                        &mut reserved,
                        &mut pool,
                        &mut assigned,
                    );
                }

                subsequent_assignment(
                    &joined,
                    founder_count,
                    rhs_distinct,
                    block_idx,
                    &mut reserved,
                    &mut arbitrary_rhs,
                    &mut pool,
                    &mut assigned,
                );
            }

            block_idx += 1;
            next_cut += 1;
            cut_pair_edge = prev_cut_edge;
            prev_cut_edge = edge_idx;
            lhs_first_path_is_ref = rhs_first_path_is_ref;
            rhs_first_path_is_ref = true;
        }

        for _ in graph.edges_out_of(node) {
            pbwt.step(graph.copy_edge_paths.column(edge_idx), edge_idx);
            if let Some(&front) = pbwt.permutation.first() {
                rhs_first_path_is_ref &= !graph.copy_edge_paths.get(u64::from(front), edge_idx);
            }
            edge_idx += 1;
        }
    }

    debug!(blocks = assigned.block_count(), founders = founder_count, "founder matching done");
    Some(assigned)
}

/// First block: one founder per distinct left representative, then extra
/// slots for the largest joined classes.
fn initial_assignment(
    joined: &[JoinedClass],
    founder_count: Ploidy,
    lhs_distinct: Ploidy,
    reserved: &mut [bool],
    pool: &mut AssignmentPool,
    assigned: &mut FounderAssignment,
) {
    let mut remaining_founders = founder_count;
    let mut remaining_reserved = remaining_founders.min(lhs_distinct);
    remaining_founders -= remaining_reserved;
    let mut founder_idx: Ploidy = 0;

    let mut assign = |pool: &mut AssignmentPool,
                      assigned: &mut FounderAssignment,
                      founder_idx: &mut Ploidy,
                      lhs: Ploidy| {
        pool.insert(lhs, *founder_idx);
        assigned.set(0, *founder_idx, lhs);
        *founder_idx += 1;
    };

    for class in joined {
        if reserved[class.lhs as usize] {
            // The reserved slot is used; place a copy when slots remain.
            if remaining_founders > 0 {
                remaining_founders -= 1;
                assign(pool, assigned, &mut founder_idx, class.lhs);
            }
        } else if remaining_reserved > 0 {
            remaining_reserved -= 1;
            reserved[class.lhs as usize] = true;
            assign(pool, assigned, &mut founder_idx, class.lhs);
        }
    }

    // Every founder slot gets an assigned class.
    'fill: while remaining_founders > 0 && !joined.is_empty() {
        for class in joined {
            if remaining_founders == 0 {
                break 'fill;
            }
            remaining_founders -= 1;
            assign(pool, assigned, &mut founder_idx, class.lhs);
        }
    }
}

/// Subsequent blocks: match right representatives to founders holding their
/// left representative, reserve one slot per distinct right representative,
/// then distribute the surplus.
#[allow(clippy::too_many_arguments)]
fn subsequent_assignment(
    joined: &[JoinedClass],
    founder_count: Ploidy,
    rhs_distinct: Ploidy,
    block_idx: usize,
    reserved: &mut [bool],
    arbitrary_rhs: &mut Vec<Ploidy>,
    pool: &mut AssignmentPool,
    assigned: &mut FounderAssignment,
) {
    reserved.fill(false);
    arbitrary_rhs.clear();

    let mut remaining_founders = founder_count;
    let mut remaining_reserved = remaining_founders.min(rhs_distinct);
    remaining_founders -= remaining_reserved;

    // Pass 1: carry founders across the cut while assignments are being made,
    // reserved right representatives first.
    let mut is_first = true;
    'matching: loop {
        let mut did_assign = false;
        for class in joined {
            if reserved[class.rhs as usize] {
                if remaining_founders > 0 {
                    if let Some(founder) = pool.take(class.lhs) {
                        assigned.set(block_idx, founder, class.rhs);
                        did_assign = true;
                        remaining_founders -= 1;
                    }
                } else if !is_first {
                    break 'matching;
                }
            } else if remaining_reserved > 0 {
                remaining_reserved -= 1;
                if let Some(founder) = pool.take(class.lhs) {
                    assigned.set(block_idx, founder, class.rhs);
                    reserved[class.rhs as usize] = true;
                } else {
                    arbitrary_rhs.push(class.rhs);
                }
            }
        }
        if remaining_founders == 0 {
            break;
        }
        if is_first {
            is_first = false;
            continue;
        }
        if !did_assign {
            break;
        }
    }

    // Pass 2: unassigned reserved representatives consume arbitrary founders.
    for &rhs in arbitrary_rhs.iter() {
        if !reserved[rhs as usize] {
            if let Some(founder) = pool.take_first() {
                assigned.set(block_idx, founder, rhs);
            }
            reserved[rhs as usize] = true;
        }
    }

    // Pass 3: surplus founders are spread over the right representatives.
    'surplus: while !pool.is_empty() && !joined.is_empty() {
        for class in joined {
            let Some(founder) = pool.take_first() else {
                break 'surplus;
            };
            assigned.set(block_idx, founder, class.rhs);
        }
    }

    // Re-key the pool from the assignments just made so the next block's
    // pass 1 sees fresh left representatives.
    pool.clear();
    for (founder, &class_rep) in assigned.block(block_idx).iter().enumerate() {
        pool.insert(class_rep, founder as Ploidy);
    }
}
