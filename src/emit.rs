mod sink;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bon::Builder;
use tracing::{debug, info};

pub use sink::*;

use crate::graph::{
    CutPositionList, FounderAssignment, NodeId, PLOIDY_MAX, Ploidy, VariantGraph,
};

pub const GAP: u8 = b'-';

/// Per-sequence edge selection state. `handle_node` is called for every node
/// the walk lands on, before anything is written for it; `chromosome_copy`
/// names the copy whose path bits pick the edge to follow, `PLOIDY_MAX`
/// meaning "reference only".
trait SequenceTrack {
    fn handle_node(&mut self, node: NodeId);
    fn chromosome_copy(&self) -> Ploidy;
}

/// The reference track never follows an ALT edge.
struct ReferenceTrack;

impl SequenceTrack for ReferenceTrack {
    fn handle_node(&mut self, _node: NodeId) {}

    fn chromosome_copy(&self) -> Ploidy {
        PLOIDY_MAX
    }
}

/// One chromosome copy, fixed over the whole walk.
struct HaplotypeTrack {
    copy: Ploidy,
}

impl SequenceTrack for HaplotypeTrack {
    fn handle_node(&mut self, _node: NodeId) {}

    fn chromosome_copy(&self) -> Ploidy {
        self.copy
    }
}

/// A founder slot: the tracked copy switches to the assigned block
/// representative at every cut position.
struct FounderTrack<'a> {
    assigned_blocks: Vec<Ploidy>,
    cut_positions: &'a [NodeId],
    cut_index: usize,
    copy: Ploidy,
}

impl<'a> FounderTrack<'a> {
    fn new(assigned_blocks: Vec<Ploidy>, cut_positions: &'a [NodeId]) -> Self {
        assert!(!cut_positions.is_empty() && cut_positions[0] == 0);
        Self { assigned_blocks, cut_positions, cut_index: 0, copy: PLOIDY_MAX }
    }
}

impl SequenceTrack for FounderTrack<'_> {
    fn handle_node(&mut self, node: NodeId) {
        if self.cut_index < self.cut_positions.len() && node == self.cut_positions[self.cut_index] {
            self.copy = self
                .assigned_blocks
                .get(self.cut_index)
                .copied()
                .unwrap_or(PLOIDY_MAX);
            self.cut_index += 1;
        }
    }

    fn chromosome_copy(&self) -> Ploidy {
        self.copy
    }
}

fn write_gaps<W: Write>(writer: &mut W, count: u64) -> std::io::Result<()> {
    const GAPS: [u8; 64] = [GAP; 64];
    let mut remaining = count as usize;
    while remaining > 0 {
        let chunk = remaining.min(GAPS.len());
        writer.write_all(&GAPS[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

/// Walk the graph once and write one sequence. At each node the lowest-index
/// ALT edge whose path bit is set for the tracked copy is followed, the REF
/// edge otherwise. In aligned mode the bytes written across a node range
/// always equal its aligned length, gap padding making up the difference.
fn write_sequence<W: Write>(
    writer: &mut W,
    reference: &[u8],
    graph: &VariantGraph,
    track: &mut dyn SequenceTrack,
    unaligned: bool,
) -> Result<()> {
    if graph.node_count() == 0 {
        return Ok(());
    }
    let last = graph.node_count() - 1;
    let mut node: NodeId = 0;
    while node < last {
        track.handle_node(node);
        let copy = track.chromosome_copy();

        let mut chosen = None;
        if copy != PLOIDY_MAX {
            for edge in graph.edges_out_of(node) {
                if graph.copy_edge_paths.get(u64::from(copy), edge) {
                    chosen = Some(edge);
                    break;
                }
            }
        }

        match chosen {
            Some(edge) => {
                let target = graph.alt_edge_targets[edge as usize];
                let label = &graph.alt_edge_labels[edge as usize];
                writer.write_all(label)?;
                if !unaligned {
                    let aligned = graph.aligned_length(node, target);
                    write_gaps(writer, aligned - label.len() as u64)?;
                }
                node = target;
            }
            None => {
                let ref_lhs = graph.ref_positions[node as usize] as usize;
                let ref_rhs = graph.ref_positions[node as usize + 1] as usize;
                writer.write_all(&reference[ref_lhs..ref_rhs])?;
                if !unaligned {
                    let aligned = graph.aligned_length(node, node + 1);
                    write_gaps(writer, aligned - (ref_rhs - ref_lhs) as u64)?;
                }
                node += 1;
            }
        }
    }
    track.handle_node(last);
    Ok(())
}

/// What to emit: every chromosome copy, or one sequence per founder slot.
pub enum EmitterMode<'a> {
    Haplotypes,
    Founders { assignment: &'a FounderAssignment, cuts: &'a CutPositionList },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeparateFormat {
    #[default]
    A2m,
    Fasta,
}

#[derive(Builder)]
pub struct Emitter<'a> {
    pub reference: &'a [u8],
    pub graph: &'a VariantGraph,
    pub dst_chromosome: Option<&'a str>,
    #[builder(default = true)]
    pub include_reference: bool,
    #[builder(default)]
    pub unaligned: bool,
}

impl<'a> Emitter<'a> {
    /// Sequence identifiers in emission order: the reference track when
    /// requested, then `{sample}-{1 + copy}` per chromosome copy or
    /// `{1 + founder}` per founder slot.
    fn sequence_ids(&self, mode: &EmitterMode<'_>) -> Vec<(String, TrackKind)> {
        let mut ids = Vec::new();
        if self.include_reference {
            ids.push(("REF".to_string(), TrackKind::Reference));
        }
        match mode {
            EmitterMode::Haplotypes => {
                for sample in 0..self.graph.sample_count() {
                    let name = &self.graph.sample_names[sample];
                    for copy in 0..self.graph.sample_ploidy(sample as u32) {
                        ids.push((
                            format!("{}-{}", name, copy + 1),
                            TrackKind::Haplotype(self.graph.copy_index(sample as u32, copy)),
                        ));
                    }
                }
            }
            EmitterMode::Founders { assignment, .. } => {
                for founder in 0..assignment.founder_count() {
                    ids.push((format!("{}", founder + 1), TrackKind::Founder(founder)));
                }
            }
        }
        ids
    }

    fn write_one<W: Write>(
        &self,
        writer: &mut W,
        kind: &TrackKind,
        mode: &EmitterMode<'_>,
    ) -> Result<()> {
        match (kind, mode) {
            (TrackKind::Reference, _) => {
                let mut track = ReferenceTrack;
                write_sequence(writer, self.reference, self.graph, &mut track, self.unaligned)
            }
            (TrackKind::Haplotype(copy), _) => {
                let mut track = HaplotypeTrack { copy: *copy };
                write_sequence(writer, self.reference, self.graph, &mut track, self.unaligned)
            }
            (TrackKind::Founder(founder), EmitterMode::Founders { assignment, cuts }) => {
                let mut track =
                    FounderTrack::new(assignment.founder_column(*founder), &cuts.positions);
                write_sequence(writer, self.reference, self.graph, &mut track, self.unaligned)
            }
            (TrackKind::Founder(_), EmitterMode::Haplotypes) => {
                unreachable!("founder track in haplotype mode")
            }
        }
    }

    /// All sequences into one A2M stream: `>` header then the (gap-padded)
    /// byte stream per record.
    pub fn output_a2m<W: Write>(&self, writer: &mut W, mode: &EmitterMode<'_>) -> Result<()> {
        let ids = self.sequence_ids(mode);
        let total = ids.len();
        for (index, (id, kind)) in ids.iter().enumerate() {
            match self.dst_chromosome {
                Some(chromosome) => writeln!(writer, ">{chromosome}\t{id}")?,
                None => writeln!(writer, ">{id}")?,
            }
            self.write_one(writer, kind, mode)?;
            writeln!(writer)?;
            if (index + 1) % 10 == 0 {
                info!("handled {}/{} sequences", index + 1, total);
            }
        }
        Ok(())
    }

    pub fn output_a2m_file(&self, path: &Path, mode: &EmitterMode<'_>) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.output_a2m(&mut writer, mode)?;
        writer.flush()?;
        Ok(())
    }

    /// One output per sequence through `sink`. Format `A2m` adds the FASTA
    /// header and the `.a2m` suffix; `Fasta` writes the raw byte stream.
    pub fn output_separate(
        &self,
        sink: &SequenceSink,
        format: SeparateFormat,
        mode: &EmitterMode<'_>,
    ) -> Result<()> {
        for (id, kind) in self.sequence_ids(mode) {
            let stem = match self.dst_chromosome {
                Some(chromosome) => format!("{chromosome}.{id}"),
                None => id.clone(),
            };
            let name = match format {
                SeparateFormat::A2m => format!("{stem}.a2m"),
                SeparateFormat::Fasta => stem,
            };
            debug!("writing sequence {name}");
            let mut writer = sink.open(&name)?;
            if format == SeparateFormat::A2m {
                match self.dst_chromosome {
                    Some(chromosome) => writeln!(writer, ">{chromosome}\t{id}")?,
                    None => writeln!(writer, ">{id}")?,
                }
            }
            self.write_one(&mut writer, &kind, mode)?;
            writer.finish().with_context(|| format!("sequence {id}"))?;
        }
        Ok(())
    }
}

enum TrackKind {
    Reference,
    Haplotype(Ploidy),
    Founder(Ploidy),
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use super::*;
    use crate::graph::{StrictBuildDelegate, build_variant_graph};

    const HEADER_1: &str = "##fileformat=VCFv4.3\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

    fn build(reference: &[u8], text: &str) -> VariantGraph {
        let mut reader =
            vcf::VCFReader::new(BufReader::new(Cursor::new(text.as_bytes().to_vec())))
                .expect("VCF header");
        let mut delegate = StrictBuildDelegate;
        build_variant_graph(reference, &mut reader, "chr1", &mut delegate)
            .expect("build")
            .0
    }

    fn haplotype(reference: &[u8], graph: &VariantGraph, copy: Ploidy, unaligned: bool) -> String {
        let mut bytes = Vec::new();
        let mut track = HaplotypeTrack { copy };
        write_sequence(&mut bytes, reference, graph, &mut track, unaligned).expect("write");
        String::from_utf8(bytes).expect("utf8")
    }

    fn reference_track(reference: &[u8], graph: &VariantGraph) -> String {
        let mut bytes = Vec::new();
        let mut track = ReferenceTrack;
        write_sequence(&mut bytes, reference, graph, &mut track, false).expect("write");
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn test_identity_reference_track() {
        let graph = build(b"ACGTACGT", HEADER_1);
        assert_eq!(reference_track(b"ACGTACGT", &graph), "ACGTACGT");
    }

    #[test]
    fn test_snp_haplotypes() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGTACGT", &text);
        assert_eq!(haplotype(b"ACGTACGT", &graph, 0, false), "ACGTACGT");
        assert_eq!(haplotype(b"ACGTACGT", &graph, 1, false), "ACGTGCGT");
    }

    #[test]
    fn test_insertion_pads_reference_side() {
        let text = format!("{HEADER_1}chr1\t2\t.\tC\tCAA\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGT", &text);
        assert_eq!(haplotype(b"ACGT", &graph, 0, false), "AC--GT");
        assert_eq!(haplotype(b"ACGT", &graph, 1, false), "ACAAGT");
        assert_eq!(haplotype(b"ACGT", &graph, 0, true), "ACGT");
        assert_eq!(haplotype(b"ACGT", &graph, 1, true), "ACAAGT");
    }

    #[test]
    fn test_deletion_pads_alt_side() {
        let text = format!("{HEADER_1}chr1\t1\t.\tACG\tA\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGT", &text);
        assert_eq!(haplotype(b"ACGT", &graph, 0, false), "ACGT");
        assert_eq!(haplotype(b"ACGT", &graph, 1, false), "A--T");
        assert_eq!(haplotype(b"ACGT", &graph, 1, true), "AT");
    }

    #[test]
    fn test_overlapping_variants_follow_lowest_edge() {
        let text = format!(
            "{HEADER_1}chr1\t1\t.\tAC\tA\t.\t.\t.\tGT\t1\nchr1\t2\t.\tCG\tC\t.\t.\t.\tGT\t1\n"
        );
        let graph = build(b"ACGT", &text);
        // Both edge bits are set for copy 0; the walk takes the first edge,
        // jumps past the second variant's source node, and never emits two
        // ALT labels for the same region.
        assert_eq!(haplotype(b"ACGT", &graph, 0, false), "A-GT");
    }

    #[test]
    fn test_stripping_gaps_equals_unaligned() {
        let text = format!(
            "{HEADER_1}chr1\t2\t.\tC\tCAA\t.\t.\t.\tGT\t0|1\nchr1\t4\t.\tT\tA\t.\t.\t.\tGT\t1|0\n"
        );
        let graph = build(b"ACGT", &text);
        for copy in 0..2 {
            let aligned = haplotype(b"ACGT", &graph, copy, false);
            let unaligned = haplotype(b"ACGT", &graph, copy, true);
            assert_eq!(aligned.replace('-', ""), unaligned);
        }
    }

    #[test]
    fn test_aligned_lengths_agree_across_tracks() {
        let text = format!("{HEADER_1}chr1\t2\t.\tC\tCAA\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGT", &text);
        let expected = *graph.aligned_positions.last().expect("nodes") as usize;
        assert_eq!(reference_track(b"ACGT", &graph).len(), expected);
        assert_eq!(haplotype(b"ACGT", &graph, 0, false).len(), expected);
        assert_eq!(haplotype(b"ACGT", &graph, 1, false).len(), expected);
    }

    #[test]
    fn test_a2m_output_shape() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGTACGT", &text);
        let emitter = Emitter::builder()
            .reference(b"ACGTACGT".as_slice())
            .graph(&graph)
            .dst_chromosome("chr1")
            .build();
        let mut bytes = Vec::new();
        emitter.output_a2m(&mut bytes, &EmitterMode::Haplotypes).expect("a2m");
        let text = String::from_utf8(bytes).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                ">chr1\tREF",
                "ACGTACGT",
                ">chr1\tS1-1",
                "ACGTACGT",
                ">chr1\tS1-2",
                "ACGTGCGT",
            ]
        );
    }

    #[test]
    fn test_omit_reference() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\n");
        let graph = build(b"ACGTACGT", &text);
        let emitter = Emitter::builder()
            .reference(b"ACGTACGT".as_slice())
            .graph(&graph)
            .include_reference(false)
            .build();
        let mut bytes = Vec::new();
        emitter.output_a2m(&mut bytes, &EmitterMode::Haplotypes).expect("a2m");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(!text.contains("REF"));
        assert_eq!(text.lines().count(), 4);
    }
}
