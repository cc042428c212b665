mod bitmatrix;
mod builder;
mod cuts;
mod founders;
mod pbwt;

use std::ops::Range;

use bstr::BString;

pub use bitmatrix::*;
pub use builder::*;
pub use cuts::*;
pub use founders::*;
pub use pbwt::*;

pub type Position = u64;
pub type NodeId = u64;
pub type EdgeId = u64;
pub type SampleId = u32;
pub type Ploidy = u32;

pub const POSITION_MAX: Position = u64::MAX;
pub const NODE_MAX: NodeId = u64::MAX;
pub const EDGE_MAX: EdgeId = u64::MAX;
pub const PLOIDY_MAX: Ploidy = u32::MAX;

/// The variant graph: nodes are reference positions, the implicit REF edge
/// connects consecutive nodes, and ALT edges carry alternate allele labels.
/// Stored struct-of-arrays so the whole graph serializes as a flat tuple.
#[derive(Debug, Clone, Default)]
pub struct VariantGraph {
    /// Reference position by node, non-decreasing.
    pub ref_positions: Vec<Position>,
    /// Position in the induced multiple alignment by node, non-decreasing.
    pub aligned_positions: Vec<Position>,
    /// ALT edge target node by edge.
    pub alt_edge_targets: Vec<NodeId>,
    /// Cumulative ALT edge count; `csum[n]..csum[n + 1]` are the edges out of
    /// node `n`. Has `node_count() + 1` entries.
    pub alt_edge_csum: Vec<EdgeId>,
    /// ALT edge label by edge; empty for deletions.
    pub alt_edge_labels: Vec<BString>,
    /// Chromosome copies on rows, edges in columns. `column(e)` yields every
    /// copy's membership of edge `e` in `O(copies / 64)` words.
    pub copy_edge_paths: BitMatrix,
    /// Transposed view: edges on rows, chromosome copies in columns.
    pub edge_copy_paths: BitMatrix,
    /// Sample names by output sample index.
    pub sample_names: Vec<BString>,
    /// Cumulative included ploidy by sample; `sample_count() + 1` entries.
    pub ploidy_csum: Vec<Ploidy>,
}

impl VariantGraph {
    pub fn new() -> Self {
        Self {
            alt_edge_csum: vec![0],
            ..Self::default()
        }
    }

    pub fn node_count(&self) -> u64 {
        self.ref_positions.len() as u64
    }

    pub fn edge_count(&self) -> u64 {
        self.alt_edge_targets.len() as u64
    }

    pub fn sample_count(&self) -> usize {
        self.sample_names.len()
    }

    /// The half-open ALT edge range leaving `node`.
    pub fn edges_out_of(&self, node: NodeId) -> Range<EdgeId> {
        self.alt_edge_csum[node as usize]..self.alt_edge_csum[node as usize + 1]
    }

    /// Targets of the ALT edges leaving `node`.
    pub fn alt_targets(&self, node: NodeId) -> &[NodeId] {
        let range = self.edges_out_of(node);
        &self.alt_edge_targets[range.start as usize..range.end as usize]
    }

    pub fn aligned_length(&self, lhs: NodeId, rhs: NodeId) -> Position {
        self.aligned_positions[rhs as usize] - self.aligned_positions[lhs as usize]
    }

    pub fn sample_ploidy(&self, sample: SampleId) -> Ploidy {
        self.ploidy_csum[sample as usize + 1] - self.ploidy_csum[sample as usize]
    }

    pub fn total_copies(&self) -> Ploidy {
        self.ploidy_csum.last().copied().unwrap_or(0)
    }

    /// Linear chromosome-copy index of `(sample, copy)`.
    pub fn copy_index(&self, sample: SampleId, copy: Ploidy) -> Ploidy {
        assert!(copy < self.sample_ploidy(sample), "chromosome copy out of range");
        self.ploidy_csum[sample as usize] + copy
    }

    /// Append a node. Positions must be non-decreasing.
    pub fn add_node(&mut self, ref_pos: Position, aligned_pos: Position) -> NodeId {
        if let Some(&last) = self.ref_positions.last() {
            assert!(last <= ref_pos, "reference positions must be non-decreasing");
        }
        if let Some(&last) = self.aligned_positions.last() {
            assert!(last <= aligned_pos, "aligned positions must be non-decreasing");
        }
        self.ref_positions.push(ref_pos);
        self.aligned_positions.push(aligned_pos);
        let edge_count = *self.alt_edge_csum.last().unwrap_or(&0);
        self.alt_edge_csum.push(edge_count);
        self.node_count() - 1
    }

    /// Append a node, or raise the aligned position of the last node when it
    /// already sits at `ref_pos`.
    pub fn add_or_update_node(&mut self, ref_pos: Position, aligned_pos: Position) -> NodeId {
        match self.ref_positions.last().copied() {
            Some(last_ref) if last_ref == ref_pos => {
                let last = self
                    .aligned_positions
                    .last_mut()
                    .expect("node without aligned position");
                *last = (*last).max(aligned_pos);
                self.node_count() - 1
            }
            _ => self.add_node(ref_pos, aligned_pos),
        }
    }

    /// Append an ALT edge out of `src`, which must be the most recent node.
    /// The target is filled in once the destination node is materialized.
    pub fn add_edge(&mut self, src: NodeId, label: BString) -> EdgeId {
        assert_eq!(src + 1, self.node_count(), "ALT edges leave the most recent node");
        *self.alt_edge_csum.last_mut().expect("graph without nodes") += 1;
        self.alt_edge_targets.push(NODE_MAX);
        self.alt_edge_labels.push(label);
        self.edge_count() - 1
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        let graph = VariantGraph::new();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.total_copies(), 0);
        assert_eq!(graph.alt_edge_csum, vec![0]);
    }

    #[test]
    fn test_add_node_tracks_csum() {
        let mut graph = VariantGraph::new();
        assert_eq!(graph.add_node(0, 0), 0);
        assert_eq!(graph.add_node(5, 5), 1);
        assert_eq!(graph.alt_edge_csum, vec![0, 0, 0]);
        assert_eq!(graph.edges_out_of(0), 0..0);
    }

    #[test]
    fn test_add_or_update_node_raises_aligned_position() {
        let mut graph = VariantGraph::new();
        graph.add_node(0, 0);
        let node = graph.add_or_update_node(0, 7);
        assert_eq!(node, 0);
        assert_eq!(graph.aligned_positions, vec![7]);
        let node = graph.add_or_update_node(3, 9);
        assert_eq!(node, 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_add_edge_increments_last_node() {
        let mut graph = VariantGraph::new();
        graph.add_node(0, 0);
        let edge = graph.add_edge(0, "G".into());
        assert_eq!(edge, 0);
        assert_eq!(graph.alt_edge_csum, vec![0, 1]);
        assert_eq!(graph.alt_edge_targets, vec![NODE_MAX]);
        graph.add_node(4, 4);
        assert_eq!(graph.edges_out_of(0), 0..1);
        assert_eq!(graph.edges_out_of(1), 1..1);
    }

    #[test]
    fn test_copy_index_mapping() {
        let mut graph = VariantGraph::new();
        graph.sample_names = vec!["a".into(), "b".into()];
        graph.ploidy_csum = vec![0, 2, 3];
        assert_eq!(graph.sample_ploidy(0), 2);
        assert_eq!(graph.sample_ploidy(1), 1);
        assert_eq!(graph.total_copies(), 3);
        assert_eq!(graph.copy_index(0, 1), 1);
        assert_eq!(graph.copy_index(1, 0), 2);
    }

    #[test]
    fn test_alt_targets_slice() {
        let mut graph = VariantGraph::new();
        graph.add_node(0, 0);
        graph.add_edge(0, "G".into());
        graph.add_edge(0, "T".into());
        graph.add_node(4, 4);
        graph.alt_edge_targets[0] = 1;
        graph.alt_edge_targets[1] = 1;
        assert_eq!(graph.alt_targets(0), &[1, 1]);
        assert_eq!(graph.alt_targets(1), &[] as &[NodeId]);
    }
}
