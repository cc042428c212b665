//! Portable binary archives for the variant graph and the cut-position list.
//!
//! Little-endian, magic + version framed. Vectors and strings are `u64`
//! length-prefixed; bit matrices are written as `(nrows, ncols, words)`.

use std::io::{self, Read, Write};

use bstr::BString;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::graph::{BitMatrix, CutPositionList, VariantGraph};

const GRAPH_MAGIC: &[u8; 4] = b"VGRA";
const GRAPH_VERSION: u32 = 1;
const CUTS_MAGIC: &[u8; 4] = b"VCUT";
const CUTS_VERSION: u32 = 1;

// Backstop against absurd length prefixes in corrupt input.
const MAX_ELEMENT_COUNT: u64 = 1 << 36;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("not a valid archive: bad magic number")]
    BadMagic,

    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid data format: {0}")]
    InvalidFormat(String),
}

type Result<T> = std::result::Result<T, ArchiveError>;

fn checked_len<R: Read>(reader: &mut R) -> Result<usize> {
    let len = reader.read_u64::<LittleEndian>()?;
    if len > MAX_ELEMENT_COUNT {
        return Err(ArchiveError::InvalidFormat(format!("length prefix {len} too large")));
    }
    Ok(len as usize)
}

fn write_u64_vec<W: Write>(writer: &mut W, values: &[u64]) -> Result<()> {
    writer.write_u64::<LittleEndian>(values.len() as u64)?;
    for &value in values {
        writer.write_u64::<LittleEndian>(value)?;
    }
    Ok(())
}

fn read_u64_vec<R: Read>(reader: &mut R) -> Result<Vec<u64>> {
    let len = checked_len(reader)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(reader.read_u64::<LittleEndian>()?);
    }
    Ok(values)
}

fn write_u32_vec<W: Write>(writer: &mut W, values: &[u32]) -> Result<()> {
    writer.write_u64::<LittleEndian>(values.len() as u64)?;
    for &value in values {
        writer.write_u32::<LittleEndian>(value)?;
    }
    Ok(())
}

fn read_u32_vec<R: Read>(reader: &mut R) -> Result<Vec<u32>> {
    let len = checked_len(reader)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(values)
}

fn write_string_vec<W: Write>(writer: &mut W, values: &[BString]) -> Result<()> {
    writer.write_u64::<LittleEndian>(values.len() as u64)?;
    for value in values {
        writer.write_u64::<LittleEndian>(value.len() as u64)?;
        writer.write_all(value)?;
    }
    Ok(())
}

fn read_string_vec<R: Read>(reader: &mut R) -> Result<Vec<BString>> {
    let len = checked_len(reader)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        let bytes_len = checked_len(reader)?;
        let mut bytes = vec![0u8; bytes_len];
        reader.read_exact(&mut bytes)?;
        values.push(BString::from(bytes));
    }
    Ok(values)
}

fn write_bit_matrix<W: Write>(writer: &mut W, matrix: &BitMatrix) -> Result<()> {
    writer.write_u64::<LittleEndian>(matrix.nrows())?;
    writer.write_u64::<LittleEndian>(matrix.ncols())?;
    writer.write_u64::<LittleEndian>(matrix.words().len() as u64)?;
    for &word in matrix.words() {
        writer.write_u64::<LittleEndian>(word)?;
    }
    Ok(())
}

fn read_bit_matrix<R: Read>(reader: &mut R) -> Result<BitMatrix> {
    let nrows = reader.read_u64::<LittleEndian>()?;
    let ncols = reader.read_u64::<LittleEndian>()?;
    let words_len = checked_len(reader)?;
    let mut words = Vec::with_capacity(words_len);
    for _ in 0..words_len {
        words.push(reader.read_u64::<LittleEndian>()?);
    }
    BitMatrix::from_parts(nrows, ncols, words).ok_or_else(|| {
        ArchiveError::InvalidFormat(format!("bit matrix {nrows}×{ncols} with wrong word count"))
    })
}

fn check_header<R: Read>(reader: &mut R, magic: &[u8; 4], version: u32) -> Result<()> {
    let mut found = [0u8; 4];
    reader.read_exact(&mut found)?;
    if &found != magic {
        return Err(ArchiveError::BadMagic);
    }
    let found_version = reader.read_u32::<LittleEndian>()?;
    if found_version != version {
        return Err(ArchiveError::UnsupportedVersion(found_version));
    }
    Ok(())
}

pub fn write_graph<W: Write>(writer: &mut W, graph: &VariantGraph) -> Result<()> {
    writer.write_all(GRAPH_MAGIC)?;
    writer.write_u32::<LittleEndian>(GRAPH_VERSION)?;
    write_u64_vec(writer, &graph.ref_positions)?;
    write_u64_vec(writer, &graph.aligned_positions)?;
    write_u64_vec(writer, &graph.alt_edge_targets)?;
    write_u64_vec(writer, &graph.alt_edge_csum)?;
    write_string_vec(writer, &graph.alt_edge_labels)?;
    write_bit_matrix(writer, &graph.edge_copy_paths)?;
    write_bit_matrix(writer, &graph.copy_edge_paths)?;
    write_string_vec(writer, &graph.sample_names)?;
    write_u32_vec(writer, &graph.ploidy_csum)?;
    Ok(())
}

pub fn read_graph<R: Read>(reader: &mut R) -> Result<VariantGraph> {
    check_header(reader, GRAPH_MAGIC, GRAPH_VERSION)?;
    let graph = VariantGraph {
        ref_positions: read_u64_vec(reader)?,
        aligned_positions: read_u64_vec(reader)?,
        alt_edge_targets: read_u64_vec(reader)?,
        alt_edge_csum: read_u64_vec(reader)?,
        alt_edge_labels: read_string_vec(reader)?,
        edge_copy_paths: read_bit_matrix(reader)?,
        copy_edge_paths: read_bit_matrix(reader)?,
        sample_names: read_string_vec(reader)?,
        ploidy_csum: read_u32_vec(reader)?,
    };
    validate_graph(&graph)?;
    Ok(graph)
}

fn validate_graph(graph: &VariantGraph) -> Result<()> {
    if graph.alt_edge_csum.len() != graph.ref_positions.len() + 1 {
        return Err(ArchiveError::InvalidFormat(
            "edge prefix sum does not match the node count".into(),
        ));
    }
    if graph.ref_positions.len() != graph.aligned_positions.len() {
        return Err(ArchiveError::InvalidFormat("positional arrays differ in length".into()));
    }
    if graph.alt_edge_targets.len() != graph.alt_edge_labels.len() {
        return Err(ArchiveError::InvalidFormat("edge arrays differ in length".into()));
    }
    if graph.alt_edge_csum.last().copied().unwrap_or(0) != graph.edge_count() {
        return Err(ArchiveError::InvalidFormat("edge prefix sum does not end at the edge count".into()));
    }
    if graph.ref_positions.windows(2).any(|pair| pair[0] > pair[1])
        || graph.aligned_positions.windows(2).any(|pair| pair[0] > pair[1])
    {
        return Err(ArchiveError::InvalidFormat("positional arrays are not non-decreasing".into()));
    }
    Ok(())
}

pub fn write_cut_positions<W: Write>(writer: &mut W, cuts: &CutPositionList) -> Result<()> {
    writer.write_all(CUTS_MAGIC)?;
    writer.write_u32::<LittleEndian>(CUTS_VERSION)?;
    write_u64_vec(writer, &cuts.positions)?;
    writer.write_u64::<LittleEndian>(cuts.min_distance)?;
    writer.write_u32::<LittleEndian>(cuts.score)?;
    Ok(())
}

pub fn read_cut_positions<R: Read>(reader: &mut R) -> Result<CutPositionList> {
    check_header(reader, CUTS_MAGIC, CUTS_VERSION)?;
    let positions = read_u64_vec(reader)?;
    let min_distance = reader.read_u64::<LittleEndian>()?;
    let score = reader.read_u32::<LittleEndian>()?;
    if positions.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ArchiveError::InvalidFormat("cut positions are not strictly increasing".into()));
    }
    Ok(CutPositionList { positions, min_distance, score })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::graph::NODE_MAX;

    fn sample_graph() -> VariantGraph {
        let mut graph = VariantGraph::new();
        graph.add_node(0, 0);
        graph.add_node(3, 3);
        graph.add_edge(1, "G".into());
        graph.add_node(4, 4);
        graph.add_node(8, 8);
        graph.alt_edge_targets[0] = 2;
        graph.sample_names = vec!["HG001".into()];
        graph.ploidy_csum = vec![0, 2];
        let mut paths = BitMatrix::new(64, 64);
        paths.set(1, 0);
        graph.copy_edge_paths = paths;
        graph.edge_copy_paths = graph.copy_edge_paths.transposed();
        graph
    }

    #[test]
    fn test_graph_round_trip() {
        let graph = sample_graph();
        let mut buffer = Vec::new();
        write_graph(&mut buffer, &graph).expect("write");
        let loaded = read_graph(&mut Cursor::new(&buffer)).expect("read");
        assert_eq!(loaded.ref_positions, graph.ref_positions);
        assert_eq!(loaded.aligned_positions, graph.aligned_positions);
        assert_eq!(loaded.alt_edge_targets, graph.alt_edge_targets);
        assert_eq!(loaded.alt_edge_csum, graph.alt_edge_csum);
        assert_eq!(loaded.alt_edge_labels, graph.alt_edge_labels);
        assert_eq!(loaded.copy_edge_paths, graph.copy_edge_paths);
        assert_eq!(loaded.edge_copy_paths, graph.edge_copy_paths);
        assert_eq!(loaded.sample_names, graph.sample_names);
        assert_eq!(loaded.ploidy_csum, graph.ploidy_csum);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let graph = sample_graph();
        let mut first = Vec::new();
        let mut second = Vec::new();
        write_graph(&mut first, &graph).expect("write");
        write_graph(&mut second, &graph).expect("write");
        assert_eq!(first, second);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let result = read_graph(&mut Cursor::new(b"NOPE\x01\x00\x00\x00"));
        assert!(matches!(result, Err(ArchiveError::BadMagic)));
    }

    #[test]
    fn test_inconsistent_graph_is_rejected() {
        let mut graph = sample_graph();
        graph.alt_edge_targets.push(NODE_MAX);
        let mut buffer = Vec::new();
        write_graph(&mut buffer, &graph).expect("write");
        let result = read_graph(&mut Cursor::new(&buffer));
        assert!(matches!(result, Err(ArchiveError::InvalidFormat(_))));
    }

    #[test]
    fn test_cut_positions_round_trip() {
        let cuts = CutPositionList { positions: vec![0, 3, 7], min_distance: 15, score: 4 };
        let mut buffer = Vec::new();
        write_cut_positions(&mut buffer, &cuts).expect("write");
        let loaded = read_cut_positions(&mut Cursor::new(&buffer)).expect("read");
        assert_eq!(loaded, cuts);
    }

    #[test]
    fn test_unsorted_cut_positions_are_rejected() {
        let cuts = CutPositionList { positions: vec![0, 7, 3], min_distance: 0, score: 0 };
        let mut buffer = Vec::new();
        write_cut_positions(&mut buffer, &cuts).expect("write");
        assert!(read_cut_positions(&mut Cursor::new(&buffer)).is_err());
    }
}
