mod graphviz;
mod samples;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};
use clap_complete::aot::Shell;
use tracing::{debug, info};

pub use graphviz::*;
pub use samples::*;

use crate::emit::{Emitter, EmitterMode, SeparateFormat, SequenceSink};
use crate::graph::{
    CutPositionList, VariantGraph, build_variant_graph, find_cut_positions, find_matchings,
};
use crate::io::{archive, fasta, vcf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RefMismatchHandling {
    /// Abort on a REF column that disagrees with the reference.
    Error,
    /// Log the disagreement and keep going.
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeparateOutputFormat {
    #[value(name = "A2M")]
    A2m,
    #[value(name = "FASTA")]
    Fasta,
}

impl From<SeparateOutputFormat> for SeparateFormat {
    fn from(format: SeparateOutputFormat) -> Self {
        match format {
            SeparateOutputFormat::A2m => SeparateFormat::A2m,
            SeparateOutputFormat::Fasta => SeparateFormat::Fasta,
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Build a variant graph from a phased VCF and emit haplotype or founder sequences"
)]
pub struct Cli {
    /// If provided, outputs the completion file for given shell
    #[arg(long = "generate", value_enum)]
    pub generator: Option<Shell>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Reference FASTA
    #[arg(long, value_name = "PATH")]
    pub input_reference: Option<PathBuf>,

    /// Identifier of the reference sequence inside the FASTA; first when omitted
    #[arg(long, value_name = "ID")]
    pub reference_sequence: Option<String>,

    /// Phased VCF to build the graph from
    #[arg(long, value_name = "PATH", conflicts_with = "input_graph", requires = "chromosome")]
    pub input_variants: Option<PathBuf>,

    /// Load a serialized variant graph instead of building one
    #[arg(long, value_name = "PATH")]
    pub input_graph: Option<PathBuf>,

    /// Chromosome to read from the VCF
    #[arg(long, value_name = "ID")]
    pub chromosome: Option<String>,

    /// Chromosome identifier used in output sequence names
    #[arg(long, value_name = "ID")]
    pub dst_chromosome: Option<String>,

    /// TSV of chrom\tsample\tcopy_idx pairs to include
    #[arg(long, value_name = "PATH", conflicts_with = "exclude_samples")]
    pub include_samples: Option<PathBuf>,

    /// TSV of chrom\tsample\tcopy_idx pairs to exclude
    #[arg(long, value_name = "PATH")]
    pub exclude_samples: Option<PathBuf>,

    /// Write overlapping alternative alleles to this TSV
    #[arg(long, value_name = "PATH")]
    pub output_overlaps: Option<PathBuf>,

    /// Serialize the variant graph
    #[arg(long, value_name = "PATH")]
    pub output_graph: Option<PathBuf>,

    /// Print node, edge, and ploidy counts to stdout
    #[arg(long)]
    pub output_graph_statistics: bool,

    /// Render the variant graph in Graphviz format
    #[arg(long, value_name = "PATH")]
    pub output_graphviz: Option<PathBuf>,

    /// Emit one sequence per chromosome copy
    #[arg(long, conflicts_with = "founder_sequences")]
    pub haplotypes: bool,

    /// Emit this many founder sequences instead of haplotypes
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub founder_sequences: Option<u32>,

    /// Minimum aligned distance between cut positions
    #[arg(long, value_name = "N", conflicts_with = "input_cut_positions")]
    pub minimum_distance: Option<u64>,

    /// Load cut positions instead of optimizing them
    #[arg(long, value_name = "PATH")]
    pub input_cut_positions: Option<PathBuf>,

    /// Serialize the optimized cut positions
    #[arg(long, value_name = "PATH")]
    pub output_cut_positions: Option<PathBuf>,

    /// Keep matchings whose both sides consist of REF edges only
    #[arg(long)]
    pub keep_ref_edges: bool,

    /// Write every sequence into one A2M file
    #[arg(long, value_name = "PATH")]
    pub output_sequences_a2m: Option<PathBuf>,

    /// Write one file per sequence into this directory
    #[arg(long, value_name = "DIR")]
    pub output_sequences_separate: Option<PathBuf>,

    /// Naming and header convention for separate outputs
    #[arg(long, value_enum, default_value = "A2M")]
    pub separate_output_format: SeparateOutputFormat,

    /// Pipe each sequence through this executable (one argument: sequence id)
    #[arg(long, value_name = "PATH")]
    pub pipe: Option<PathBuf>,

    /// Suppress gap characters in the output
    #[arg(long)]
    pub unaligned: bool,

    /// Do not emit the reference track
    #[arg(long)]
    pub omit_reference: bool,

    /// Behavior when the VCF REF column disagrees with the FASTA
    #[arg(long, value_enum, default_value = "warn")]
    pub ref_mismatch_handling: RefMismatchHandling,
}

pub fn run(cli: &Cli) -> Result<()> {
    ensure!(
        cli.input_variants.is_some() || cli.input_graph.is_some(),
        "one of --input-variants and --input-graph must be specified"
    );
    let Some(input_reference) = &cli.input_reference else {
        anyhow::bail!("--input-reference is required");
    };

    match cli.reference_sequence.as_deref() {
        Some(id) => info!("reading reference sequence {id}"),
        None => info!("reading the first reference sequence from the input FASTA"),
    }
    let reference = fasta::read_reference(input_reference, cli.reference_sequence.as_deref())?;
    info!("reference length is {}", reference.len());

    let graph = match &cli.input_graph {
        Some(path) => {
            info!("loading the variant graph from {}", path.display());
            let file =
                File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
            archive::read_graph(&mut BufReader::new(file))
                .with_context(|| format!("unable to load the graph from {}", path.display()))?
        }
        None => build_graph(cli, &reference)?,
    };

    if let Some(path) = &cli.output_graph {
        info!("serializing the variant graph to {}", path.display());
        let file =
            File::create(path).with_context(|| format!("unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        archive::write_graph(&mut writer, &graph)?;
        writer.flush()?;
    }

    if cli.output_graph_statistics {
        println!("Nodes:        {}", graph.node_count());
        println!("ALT edges:    {}", graph.edge_count());
        println!("Total ploidy: {}", graph.total_copies());
    }

    if let Some(path) = &cli.output_graphviz {
        info!("rendering the variant graph to {}", path.display());
        let file =
            File::create(path).with_context(|| format!("unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write_graphviz(&mut writer, &reference, &graph)?;
        writer.flush()?;
    }

    let emitter = Emitter::builder()
        .reference(reference.as_slice())
        .graph(&graph)
        .maybe_dst_chromosome(cli.dst_chromosome.as_deref())
        .include_reference(!cli.omit_reference)
        .unaligned(cli.unaligned)
        .build();

    if cli.haplotypes {
        emit_sequences(cli, &emitter, &EmitterMode::Haplotypes)?;
    } else if let Some(founder_count) = cli.founder_sequences {
        let cuts = cut_positions(cli, &graph)?;
        println!("Maximum segmentation height: {}", cuts.score + 1);
        debug!("cut positions: {:?}", cuts.positions);

        if let Some(path) = &cli.output_cut_positions {
            let file = File::create(path)
                .with_context(|| format!("unable to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            archive::write_cut_positions(&mut writer, &cuts)?;
            writer.flush()?;
        }

        info!("finding matchings in the variant graph");
        let assignment = find_matchings(&graph, &cuts, founder_count, cli.keep_ref_edges)
            .context("unable to find matchings")?;
        for founder in 0..assignment.founder_count() {
            debug!("founder {founder}: {:?}", assignment.founder_column(founder));
        }
        emit_sequences(cli, &emitter, &EmitterMode::Founders { assignment: &assignment, cuts: &cuts })?;
    }

    Ok(())
}

fn build_graph(cli: &Cli, reference: &[u8]) -> Result<VariantGraph> {
    let variants = cli.input_variants.as_ref().expect("validated above");
    let chromosome = cli.chromosome.as_ref().expect("enforced by clap");

    let mut delegate =
        CliBuildDelegate::new(cli.ref_mismatch_handling == RefMismatchHandling::Error);
    if let Some(path) = &cli.output_overlaps {
        delegate.write_overlaps_to(path)?;
    }
    if let Some(path) = &cli.include_samples {
        info!("reading the included sample list");
        delegate.include_samples(read_sample_filter(path, chromosome)?);
    } else if let Some(path) = &cli.exclude_samples {
        info!("reading the excluded sample list");
        delegate.exclude_samples(read_sample_filter(path, chromosome)?);
    }

    info!("building the variant graph");
    let mut reader = vcf::open_variants(variants)?;
    let (graph, stats) = build_variant_graph(reference, &mut reader, chromosome, &mut delegate)?;
    delegate.finish()?;
    info!(
        "done; handled variants: {} chromosome ID mismatches: {}",
        stats.handled_variants, stats.chr_id_mismatches
    );
    Ok(graph)
}

fn cut_positions(cli: &Cli, graph: &VariantGraph) -> Result<CutPositionList> {
    match &cli.input_cut_positions {
        Some(path) => {
            info!("loading cut positions from {}", path.display());
            let file =
                File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
            Ok(archive::read_cut_positions(&mut BufReader::new(file))?)
        }
        None => {
            info!("optimizing cut positions");
            find_cut_positions(graph, cli.minimum_distance.unwrap_or(0))
                .context("unable to optimize cut positions")
        }
    }
}

fn emit_sequences(cli: &Cli, emitter: &Emitter<'_>, mode: &EmitterMode<'_>) -> Result<()> {
    if let Some(path) = &cli.output_sequences_a2m {
        info!("writing sequences as A2M to {}", path.display());
        emitter.output_a2m_file(path, mode)?;
    }

    let separate_requested = cli.output_sequences_separate.is_some() || cli.pipe.is_some();
    if separate_requested {
        let sink = match &cli.pipe {
            Some(executable) => SequenceSink::Pipe { executable: executable.clone() },
            None => {
                let directory = cli
                    .output_sequences_separate
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("."));
                std::fs::create_dir_all(&directory)
                    .with_context(|| format!("unable to create {}", directory.display()))?;
                SequenceSink::Files { directory }
            }
        };
        info!("writing sequences one by one");
        emitter.output_separate(&sink, cli.separate_output_format.into(), mode)?;
    }
    Ok(())
}
