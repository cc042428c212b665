use std::path::Path;

use anyhow::{Context, Result, bail};
use bstr::ByteSlice;
use noodles::fasta;

/// Load one reference sequence, uppercased: the record named `name`, or the
/// first record when no name is given. The sequence is held whole in memory.
pub fn read_reference<P: AsRef<Path>>(path: P, name: Option<&str>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut reader = fasta::io::reader::Builder::default()
        .build_from_path(path)
        .with_context(|| format!("unable to open {}", path.display()))?;

    for result in reader.records() {
        let record =
            result.with_context(|| format!("malformed FASTA record in {}", path.display()))?;
        if name.is_none_or(|n| record.name() == n.as_bytes().as_bstr()) {
            let mut sequence = record.sequence().as_ref().to_vec();
            sequence.make_ascii_uppercase();
            return Ok(sequence);
        }
    }

    match name {
        Some(name) => bail!("no sequence named {name} in {}", path.display()),
        None => bail!("no sequences in {}", path.display()),
    }
}
