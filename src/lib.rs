//! # vcf2msa
//!
//! Transform a reference sequence plus a phased VCF into aligned or unaligned
//! sequences: one per chromosome copy, or a bounded number of founder
//! sequences that together cover the observed variation.
//!
//! The central artifact is the [`graph::VariantGraph`], a directed acyclic
//! graph whose nodes are reference positions and whose edges carry reference
//! substrings or alternate allele labels, with per-chromosome-copy bitmaps
//! marking edge membership. Founder sequences are produced by optimizing cut
//! positions over a positional BWT ([`graph::find_cut_positions`]) and
//! greedily matching path equivalence classes to founder slots
//! ([`graph::find_matchings`]); [`emit`] walks the frozen graph and writes
//! the sequences.
pub mod cli;
pub mod emit;
pub mod graph;
pub mod io;
