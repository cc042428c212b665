use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{Context, Result, bail, ensure};
use bstr::{BString, ByteSlice};
use tracing::{debug, info, warn};
use vcf::{VCFReader, VCFRecord};

use super::{BitMatrix, EDGE_MAX, EdgeId, Ploidy, Position, VariantGraph};
use crate::io::vcf::parse_genotype;

/// Rows of the path matrix are rounded up to this divisor so the blocked
/// transpose applies.
const PATH_MATRIX_DIVISOR: u64 = 64;
const PATH_COLUMN_ALLOCATION: u64 = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStats {
    pub handled_variants: u64,
    pub chr_id_mismatches: u64,
}

/// An overlapping alternative allele on one chromosome copy. Reported, not
/// fatal: the later variant is still recorded in the graph.
#[derive(Debug)]
pub struct OverlapReport<'a> {
    pub lineno: u64,
    pub ref_pos: Position,
    pub variant_ids: &'a [Vec<u8>],
    pub sample_name: &'a [u8],
    pub chrom_copy: Ploidy,
    pub genotype: u32,
}

impl OverlapReport<'_> {
    /// The VCF ID column, comma-joined, `.` when absent.
    pub fn joined_ids(&self) -> BString {
        if self.variant_ids.is_empty() {
            return ".".into();
        }
        let mut out = BString::from("");
        for (idx, id) in self.variant_ids.iter().enumerate() {
            if idx > 0 {
                out.push(b',');
            }
            out.extend_from_slice(id);
        }
        out
    }
}

/// A REF column that disagrees with the reference sequence.
#[derive(Debug)]
pub struct RefMismatch<'a> {
    pub variant_index: u64,
    pub lineno: u64,
    pub chromosome: &'a [u8],
    pub ref_pos: Position,
    pub record_ref: &'a [u8],
    pub expected: &'a [u8],
}

/// Callbacks of the graph builder: sample inclusion, overlap reports, and the
/// continue-or-abort decision on REF mismatches.
pub trait BuildGraphDelegate {
    fn should_include(&self, sample_name: &[u8], chrom_copy: Ploidy) -> bool {
        let _ = (sample_name, chrom_copy);
        true
    }

    fn report_overlapping_alternative(&mut self, report: &OverlapReport<'_>);

    /// Return `true` to keep going despite the mismatch, `false` to abort.
    fn ref_mismatch(&mut self, mismatch: &RefMismatch<'_>) -> bool;
}

/// Delegate accepting everything; mismatches abort. Useful for tests and for
/// graph-only invocations without a filter list.
#[derive(Debug, Default)]
pub struct StrictBuildDelegate;

impl BuildGraphDelegate for StrictBuildDelegate {
    fn report_overlapping_alternative(&mut self, report: &OverlapReport<'_>) {
        warn!(
            "overlapping alternative alleles at line {} position {} sample {} copy {}",
            report.lineno,
            report.ref_pos,
            report.sample_name.as_bstr(),
            report.chrom_copy
        );
    }

    fn ref_mismatch(&mut self, _mismatch: &RefMismatch<'_>) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingTarget {
    edge: EdgeId,
    aligned_floor: Position,
}

/// Output chromosome-copy bookkeeping for one included `(sample, copy)` pair.
#[derive(Debug, Clone, Copy)]
struct CopyMapping {
    sample_in: u32,
    sample_out: u32,
    copy_in: Ploidy,
    copy_out: Ploidy,
}

enum AltKind {
    Substitution,
    Deletion,
    Unhandled,
}

fn classify_alt(alt: &[u8]) -> AltKind {
    if !alt.is_empty() && alt.iter().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T' | b'N')) {
        return AltKind::Substitution;
    }
    if alt == b"<DEL>" || (alt.starts_with(b"<DEL:") && alt.ends_with(b">")) {
        return AltKind::Deletion;
    }
    AltKind::Unhandled
}

/// Materialize every pending ALT edge target with `ref_pos <= up_to`,
/// advancing the aligned position by at least the reference distance.
fn flush_pending_targets(
    graph: &mut VariantGraph,
    pending: &mut BTreeMap<Position, Vec<PendingTarget>>,
    aln_pos: &mut Position,
    prev_ref_pos: &mut Position,
    up_to: Position,
) {
    while pending.first_key_value().is_some_and(|(&pos, _)| pos <= up_to) {
        let Some((pos, targets)) = pending.pop_first() else {
            break;
        };
        for target in targets {
            let dist = pos - *prev_ref_pos;
            *aln_pos = (*aln_pos + dist).max(target.aligned_floor);
            let node = graph.add_or_update_node(pos, *aln_pos);
            graph.alt_edge_targets[target.edge as usize] = node;
            *prev_ref_pos = pos;
        }
    }
}

/// Stream VCF records for `chromosome` and build the variant graph over
/// `reference`. Records must be non-decreasing by position; the input order
/// fixes node and edge numbering.
pub fn build_variant_graph<R: BufRead>(
    reference: &[u8],
    reader: &mut VCFReader<R>,
    chromosome: &str,
    delegate: &mut dyn BuildGraphDelegate,
) -> Result<(VariantGraph, BuildStats)> {
    let mut graph = VariantGraph::new();
    graph.sample_names = reader
        .header()
        .samples()
        .iter()
        .map(|name| BString::from(name.as_slice()))
        .collect();
    // Replaced on the first kept record; a record-free input keeps every
    // sample at ploidy zero.
    graph.ploidy_csum = vec![0; graph.sample_names.len() + 1];
    graph.add_node(0, 0);

    // Line number of the first record: header lines plus the #CHROM line.
    let header_lines = reader.header().items().len() as u64 + 1;
    let mut record = VCFRecord::new(reader.header().clone());
    let mut stats = BuildStats::default();

    let mut var_idx: u64 = 0;
    let mut aln_pos: Position = 0;
    let mut prev_ref_pos: Position = 0;
    let mut is_first = true;
    let mut included: Vec<CopyMapping> = Vec::new();
    let mut pending: BTreeMap<Position, Vec<PendingTarget>> = BTreeMap::new();
    let mut last_end_ref: Vec<Position> = Vec::new();
    let mut edges_by_alt: Vec<EdgeId> = Vec::new();
    let mut current_edge_targets: Vec<Position> = Vec::new();

    while reader
        .next_record(&mut record)
        .with_context(|| format!("failed to parse the VCF record on line {}", header_lines + var_idx + 1))?
    {
        var_idx += 1;
        let lineno = header_lines + var_idx;

        if record.chromosome != chromosome.as_bytes() {
            stats.chr_id_mismatches += 1;
            continue;
        }

        if is_first {
            is_first = false;
            initialize_samples(&mut graph, &record, delegate, &mut included)
                .with_context(|| format!("variant {var_idx}"))?;
            last_end_ref = vec![0; graph.total_copies() as usize];
        }

        stats.handled_variants += 1;
        ensure!(record.position > 0, "variant {var_idx} has position 0");
        let ref_pos = record.position - 1;
        ensure!(
            prev_ref_pos <= ref_pos,
            "variant {var_idx} has non-increasing position ({prev_ref_pos} then {ref_pos})"
        );
        ensure!(
            ref_pos < reference.len() as u64,
            "variant {var_idx} at position {ref_pos} lies past the reference end"
        );
        let ref_end = ref_pos + record.reference.len() as u64;
        ensure!(
            ref_end <= reference.len() as u64,
            "REF of variant {var_idx} at position {ref_pos} runs past the reference end"
        );

        flush_pending_targets(&mut graph, &mut pending, &mut aln_pos, &mut prev_ref_pos, ref_pos);

        // Anchor the record's source node.
        aln_pos += ref_pos - prev_ref_pos;
        let src_node = graph.add_or_update_node(ref_pos, aln_pos);

        // Validate the REF column against the reference.
        let expected = &reference[ref_pos as usize..ref_end as usize];
        if !record.reference.eq_ignore_ascii_case(expected) {
            let mismatch = RefMismatch {
                variant_index: var_idx,
                lineno,
                chromosome: &record.chromosome,
                ref_pos,
                record_ref: &record.reference,
                expected,
            };
            if !delegate.ref_mismatch(&mismatch) {
                bail!(
                    "REF column mismatch at variant {var_idx} (line {lineno}): got {} expected {}",
                    record.reference.as_bstr(),
                    expected.as_bstr()
                );
            }
        }

        // Emit an edge per handleable ALT allele, even when no path uses it.
        edges_by_alt.clear();
        edges_by_alt.resize(record.alternative.len(), EDGE_MAX);
        current_edge_targets.clear();
        let mut min_edge = EDGE_MAX;
        let mut max_edge = 0;
        for (alt_idx, alt) in record.alternative.iter().enumerate() {
            let (edge, target_ref_pos, aligned_floor) = match classify_alt(alt) {
                AltKind::Substitution => {
                    let edge = graph.add_edge(src_node, BString::from(alt.as_slice()));
                    (edge, ref_end, aln_pos + alt.len() as u64)
                }
                AltKind::Deletion => {
                    let target = symbolic_deletion_end(&record, ref_pos, ref_end)
                        .with_context(|| format!("variant {var_idx}"))?;
                    ensure!(
                        target <= reference.len() as u64,
                        "deletion of variant {var_idx} runs past the reference end"
                    );
                    let edge = graph.add_edge(src_node, BString::default());
                    (edge, target, aln_pos)
                }
                AltKind::Unhandled => {
                    warn!(
                        "variant {} (line {}): skipping unhandled ALT allele {}",
                        var_idx,
                        lineno,
                        alt.as_bstr()
                    );
                    continue;
                }
            };
            pending
                .entry(target_ref_pos)
                .or_default()
                .push(PendingTarget { edge, aligned_floor });
            edges_by_alt[alt_idx] = edge;
            current_edge_targets.push(target_ref_pos);
            if min_edge == EDGE_MAX {
                min_edge = edge;
            }
            max_edge = edge;
        }

        // Grow the path matrix column capacity when needed.
        if min_edge != EDGE_MAX {
            while graph.copy_edge_paths.ncols() <= max_edge {
                let ncols = graph.copy_edge_paths.ncols();
                let multiplier = 4 + ncols / PATH_COLUMN_ALLOCATION;
                graph.copy_edge_paths.resize_columns(multiplier * PATH_COLUMN_ALLOCATION);
            }
        }

        // Project the genotypes onto the edges.
        let mut cached_sample = u32::MAX;
        let mut genotype: Vec<Option<u32>> = Vec::new();
        for mapping in &included {
            if mapping.sample_in != cached_sample {
                cached_sample = mapping.sample_in;
                let name = &record.header().samples()[mapping.sample_in as usize];
                genotype = parse_genotype(record.genotype(name, b"GT"))
                    .with_context(|| format!("variant {var_idx} sample {}", name.as_bstr()))?
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "variant {var_idx} does not have a genotype for sample {}",
                            name.as_bstr()
                        )
                    })?;
            }
            let Some(allele) = genotype.get(mapping.copy_in as usize).copied().flatten() else {
                continue;
            };
            if allele == 0 {
                continue;
            }
            let Some(&edge) = edges_by_alt.get(allele as usize - 1) else {
                bail!("variant {var_idx}: genotype references ALT {allele} which does not exist");
            };
            if edge == EDGE_MAX {
                continue;
            }

            let row = graph.ploidy_csum[mapping.sample_out as usize] + mapping.copy_out;
            if ref_pos < last_end_ref[row as usize] {
                let report = OverlapReport {
                    lineno,
                    ref_pos,
                    variant_ids: &record.id,
                    sample_name: &record.header().samples()[mapping.sample_in as usize],
                    chrom_copy: mapping.copy_in,
                    genotype: allele,
                };
                delegate.report_overlapping_alternative(&report);
            }
            last_end_ref[row as usize] = current_edge_targets[(edge - min_edge) as usize];
            graph.copy_edge_paths.set(row as u64, edge);
        }

        prev_ref_pos = ref_pos;
        if var_idx % 1_000_000 == 0 {
            info!("handled {var_idx} variants");
        }
    }

    // Flush the remaining targets and append the sink node.
    let ref_len = reference.len() as u64;
    flush_pending_targets(&mut graph, &mut pending, &mut aln_pos, &mut prev_ref_pos, ref_len);
    graph.add_or_update_node(ref_len, aln_pos + (ref_len - prev_ref_pos));

    // Trim the column capacity to the next multiple of the divisor and build
    // the transposed view.
    graph
        .copy_edge_paths
        .resize_columns(graph.edge_count().next_multiple_of(PATH_MATRIX_DIVISOR));
    graph.edge_copy_paths = graph.copy_edge_paths.transposed();

    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        copies = graph.total_copies(),
        "variant graph built"
    );
    Ok((graph, stats))
}

/// First-record bookkeeping: decide per-copy inclusion, lay out the output
/// chromosome-copy indices, and size the path matrix.
fn initialize_samples(
    graph: &mut VariantGraph,
    record: &VCFRecord,
    delegate: &mut dyn BuildGraphDelegate,
    included: &mut Vec<CopyMapping>,
) -> Result<()> {
    let sample_names = record.header().samples();
    let mut kept_names = Vec::new();
    let mut ploidy_csum: Vec<Ploidy> = vec![0];

    for (sample_in, name) in sample_names.iter().enumerate() {
        let genotype = parse_genotype(record.genotype(name, b"GT"))
            .with_context(|| format!("sample {}", name.as_bstr()))?
            .ok_or_else(|| {
                anyhow::anyhow!("first record does not have a genotype for sample {}", name.as_bstr())
            })?;
        let mut included_count: Ploidy = 0;
        for copy_in in 0..genotype.len() as Ploidy {
            if delegate.should_include(name, copy_in) {
                included.push(CopyMapping {
                    sample_in: sample_in as u32,
                    sample_out: kept_names.len() as u32,
                    copy_in,
                    copy_out: included_count,
                });
                included_count += 1;
            }
        }
        if included_count > 0 {
            let base = *ploidy_csum.last().unwrap_or(&0);
            ploidy_csum.push(base + included_count);
            kept_names.push(BString::from(name.as_slice()));
        }
    }

    graph.sample_names = kept_names;
    graph.ploidy_csum = ploidy_csum;
    let rows = u64::from(graph.total_copies()).next_multiple_of(PATH_MATRIX_DIVISOR);
    graph.copy_edge_paths = BitMatrix::new(rows, PATH_COLUMN_ALLOCATION);
    Ok(())
}

/// Target reference position of a symbolic deletion: the INFO END value when
/// present (1-based inclusive, so it equals the zero-based exclusive end),
/// otherwise the end of the REF column.
fn symbolic_deletion_end(record: &VCFRecord, ref_pos: Position, ref_end: Position) -> Result<Position> {
    let Some(values) = record.info(b"END") else {
        return Ok(ref_end);
    };
    let Some(raw) = values.first() else {
        return Ok(ref_end);
    };
    let end: u64 = raw
        .to_str_lossy()
        .parse()
        .with_context(|| format!("invalid INFO END value {}", raw.as_bstr()))?;
    ensure!(end > ref_pos, "INFO END {end} does not lie past the variant position {ref_pos}");
    Ok(end)
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use super::*;

    const HEADER_1: &str = "##fileformat=VCFv4.3\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

    fn reader_for(text: &str) -> VCFReader<BufReader<Cursor<Vec<u8>>>> {
        VCFReader::new(BufReader::new(Cursor::new(text.as_bytes().to_vec()))).expect("VCF header")
    }

    fn build(reference: &[u8], text: &str) -> (VariantGraph, BuildStats) {
        let mut reader = reader_for(text);
        let mut delegate = StrictBuildDelegate;
        build_variant_graph(reference, &mut reader, "chr1", &mut delegate).expect("build")
    }

    #[test]
    fn test_identity_graph() {
        let (graph, stats) = build(b"ACGTACGT", HEADER_1);
        assert_eq!(stats.handled_variants, 0);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.ref_positions, vec![0, 8]);
        assert_eq!(graph.aligned_positions, vec![0, 8]);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_single_snp() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\n");
        let (graph, stats) = build(b"ACGTACGT", &text);
        assert_eq!(stats.handled_variants, 1);
        assert_eq!(graph.ref_positions, vec![0, 4, 5, 8]);
        assert_eq!(graph.aligned_positions, vec![0, 4, 5, 8]);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.alt_edge_targets, vec![2]);
        assert_eq!(graph.alt_edge_labels[0], "G");
        assert_eq!(graph.total_copies(), 2);
        // Copy 1 uses the edge, copy 0 does not.
        assert!(!graph.copy_edge_paths.get(0, 0));
        assert!(graph.copy_edge_paths.get(1, 0));
    }

    #[test]
    fn test_insertion_raises_aligned_positions() {
        let text = format!("{HEADER_1}chr1\t2\t.\tC\tCAA\t.\t.\t.\tGT\t0|1\n");
        let (graph, _) = build(b"ACGT", &text);
        assert_eq!(graph.ref_positions, vec![0, 1, 2, 4]);
        assert_eq!(graph.aligned_positions, vec![0, 1, 4, 6]);
        assert_eq!(graph.alt_edge_labels[0], "CAA");
        assert_eq!(graph.alt_edge_targets, vec![2]);
    }

    const HEADER_WITH_END: &str = "##fileformat=VCFv4.3\n\
        ##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position\">\n\
        ##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
        #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n";

    #[test]
    fn test_symbolic_deletion_with_end() {
        let text = format!("{HEADER_WITH_END}chr1\t2\t.\tC\t<DEL>\t.\t.\tEND=4\tGT\t0|1\n");
        let (graph, _) = build(b"ACGTACGT", &text);
        assert_eq!(graph.alt_edge_labels[0], "");
        // Deletion spans through the 1-based inclusive END.
        assert_eq!(graph.ref_positions, vec![0, 1, 4, 8]);
        assert_eq!(graph.alt_edge_targets, vec![2]);
    }

    #[test]
    fn test_chromosome_mismatch_counted() {
        let text = format!("{HEADER_1}chr2\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\n");
        let (graph, stats) = build(b"ACGTACGT", &text);
        assert_eq!(stats.chr_id_mismatches, 1);
        assert_eq!(stats.handled_variants, 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_non_monotone_position_is_fatal() {
        let text = format!(
            "{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t0|1\nchr1\t2\t.\tC\tG\t.\t.\t.\tGT\t0|1\n"
        );
        let mut reader = reader_for(&text);
        let mut delegate = StrictBuildDelegate;
        let result = build_variant_graph(b"ACGTACGT", &mut reader, "chr1", &mut delegate);
        assert!(result.is_err());
    }

    #[test]
    fn test_ref_mismatch_aborts_by_default() {
        let text = format!("{HEADER_1}chr1\t5\t.\tT\tG\t.\t.\t.\tGT\t0|1\n");
        let mut reader = reader_for(&text);
        let mut delegate = StrictBuildDelegate;
        let result = build_variant_graph(b"ACGTACGT", &mut reader, "chr1", &mut delegate);
        assert!(result.is_err());
    }

    #[test]
    fn test_unhandled_alt_is_skipped() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\t<INS>\t.\t.\t.\tGT\t0|1\n");
        let (graph, stats) = build(b"ACGTACGT", &text);
        assert_eq!(stats.handled_variants, 1);
        assert_eq!(graph.edge_count(), 0);
    }

    struct CollectingDelegate {
        overlaps: Vec<(u64, Position, Ploidy, u32)>,
    }

    impl BuildGraphDelegate for CollectingDelegate {
        fn report_overlapping_alternative(&mut self, report: &OverlapReport<'_>) {
            self.overlaps
                .push((report.lineno, report.ref_pos, report.chrom_copy, report.genotype));
        }

        fn ref_mismatch(&mut self, _mismatch: &RefMismatch<'_>) -> bool {
            true
        }
    }

    #[test]
    fn test_overlap_reported_and_still_recorded() {
        let text = format!(
            "{HEADER_1}chr1\t1\t.\tAC\tA\t.\t.\t.\tGT\t1\nchr1\t2\t.\tCG\tC\t.\t.\t.\tGT\t1\n"
        );
        let mut reader = reader_for(&text);
        let mut delegate = CollectingDelegate { overlaps: Vec::new() };
        let (graph, _) =
            build_variant_graph(b"ACGT", &mut reader, "chr1", &mut delegate).expect("build");
        assert_eq!(delegate.overlaps.len(), 1);
        let (_, ref_pos, chrom_copy, genotype) = delegate.overlaps[0];
        assert_eq!(ref_pos, 1);
        assert_eq!(chrom_copy, 0);
        assert_eq!(genotype, 1);
        // Both edges exist and both bits are set; the walker decides later.
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.copy_edge_paths.get(0, 0));
        assert!(graph.copy_edge_paths.get(0, 1));
    }

    #[test]
    fn test_sample_filtering_drops_copies() {
        struct ExcludeSecondCopy;
        impl BuildGraphDelegate for ExcludeSecondCopy {
            fn should_include(&self, _sample_name: &[u8], chrom_copy: Ploidy) -> bool {
                chrom_copy == 0
            }
            fn report_overlapping_alternative(&mut self, _report: &OverlapReport<'_>) {}
            fn ref_mismatch(&mut self, _mismatch: &RefMismatch<'_>) -> bool {
                false
            }
        }
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG\t.\t.\t.\tGT\t1|1\n");
        let mut reader = reader_for(&text);
        let mut delegate = ExcludeSecondCopy;
        let (graph, _) =
            build_variant_graph(b"ACGTACGT", &mut reader, "chr1", &mut delegate).expect("build");
        assert_eq!(graph.total_copies(), 1);
        assert!(graph.copy_edge_paths.get(0, 0));
    }

    #[test]
    fn test_path_matrix_views_mirror_each_other() {
        let text = format!("{HEADER_1}chr1\t5\t.\tA\tG,C\t.\t.\t.\tGT\t1|2\n");
        let (graph, _) = build(b"ACGTACGT", &text);
        for copy in 0..graph.copy_edge_paths.nrows() {
            for edge in 0..graph.copy_edge_paths.ncols() {
                assert_eq!(
                    graph.copy_edge_paths.get(copy, edge),
                    graph.edge_copy_paths.get(edge, copy)
                );
            }
        }
    }
}
