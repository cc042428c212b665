use tracing::debug;

use super::{EDGE_MAX, EdgeId, NodeId, PbwtContext, Ploidy, Position, VariantGraph};

/// A chosen set of cut positions together with the parameters that produced
/// it. `positions` holds node indices, first node 0, last the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutPositionList {
    pub positions: Vec<NodeId>,
    pub min_distance: Position,
    pub score: Ploidy,
}

/// Dynamic-program entry for one candidate cut node. Candidates are keyed by
/// their edge prefix so divergence values can be matched by binary search.
#[derive(Debug, Clone, Copy)]
struct CutCandidate {
    edge: EdgeId,
    prev_edge: EdgeId,
    node: NodeId,
    score: Ploidy,
}

fn update_if_needed(cuts: &mut [CutCandidate], current: usize, prev: usize, class_count: Ploidy) {
    let candidate = class_count.max(cuts[prev].score);
    if candidate < cuts[current].score {
        cuts[current].score = candidate;
        cuts[current].prev_edge = cuts[prev].edge;
    }
}

/// Choose cut positions minimizing the maximum number of path equivalence
/// classes per block, subject to a minimum aligned length per block.
///
/// The graph is scanned once; every ALT edge is streamed through a binary
/// pBWT. A node is a candidate cut iff no ALT edge straddles it. At each
/// candidate the divergence values are walked from the largest down: each
/// value bounds the edge prefix of a compatible earlier cut, and the class
/// count grows monotonically as the values shrink, so every earlier candidate
/// needs to be examined at most once. The cut immediately left of the search
/// bound is also tested, which covers blocks extending past the smallest
/// divergence value.
pub fn find_cut_positions(graph: &VariantGraph, min_distance: Position) -> Option<CutPositionList> {
    if graph.node_count() == 0 {
        return None;
    }

    let path_count = graph.total_copies();
    let mut pbwt = PbwtContext::new(path_count);
    let mut cuts = vec![CutCandidate { edge: 0, prev_edge: EDGE_MAX, node: 0, score: 0 }];

    let mut rightmost_alt_target: NodeId = 0;
    let mut edge_idx: EdgeId = 0;
    let mut prev_cut_edge: EdgeId = EDGE_MAX;

    for node in 0..graph.node_count() {
        if rightmost_alt_target <= node && prev_cut_edge != edge_idx {
            prev_cut_edge = edge_idx;
            cuts.push(CutCandidate {
                edge: edge_idx,
                prev_edge: EDGE_MAX,
                node,
                score: path_count,
            });
            let current = cuts.len() - 1;
            let mut search_end = cuts.len();

            // The largest divergence value is the always-present first class;
            // the remaining values are walked largest first, accumulating the
            // class count.
            let mut counts = pbwt.divergence_counts.iter().rev();
            let mut class_count: Ploidy = counts.next().map_or(0, |(_, &count)| count);
            for (&div_value, &count) in counts {
                let found = cuts[..search_end].partition_point(|c| c.edge < div_value);
                if found < search_end {
                    search_end = found;
                    if graph.aligned_length(cuts[found].node, node) >= min_distance {
                        update_if_needed(&mut cuts, current, found, class_count);
                    }
                }
                class_count += count;
            }
            if search_end > 0 {
                update_if_needed(&mut cuts, current, search_end - 1, class_count);
            }
        }

        for &target in graph.alt_targets(node) {
            pbwt.step(graph.copy_edge_paths.column(edge_idx), edge_idx);
            rightmost_alt_target = rightmost_alt_target.max(target);
            edge_idx += 1;
        }
    }

    if cuts.len() <= 1 {
        return None;
    }

    // Backtrace from the final candidate.
    let mut positions = Vec::new();
    let mut index = cuts.len() - 1;
    let score = cuts[index].score;
    loop {
        positions.push(cuts[index].node);
        let prev_edge = cuts[index].prev_edge;
        if prev_edge == EDGE_MAX {
            break;
        }
        index = cuts[..index].partition_point(|c| c.edge < prev_edge);
    }
    positions.reverse();

    // The sink commonly has no incoming ALT edge and thus no own candidate;
    // snap the final cut onto it.
    if let Some(last) = positions.last_mut() {
        *last = graph.node_count() - 1;
    }

    debug!(cuts = positions.len(), score, "optimized cut positions");
    Some(CutPositionList { positions, min_distance, score })
}
