use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use bstr::ByteSlice;
use flate2::read::MultiGzDecoder;
use vcf::VCFReader;

pub type VcfInput = VCFReader<BufReader<Box<dyn Read>>>;

fn is_gzipped(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("gz") | Some("bgz")
    )
}

/// Open a VCF file, transparently decompressing `.gz`/`.bgz` input.
pub fn open_variants(path: &Path) -> Result<VcfInput> {
    let file =
        File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let reader: Box<dyn Read> = if is_gzipped(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    VCFReader::new(BufReader::new(reader))
        .with_context(|| format!("unable to parse the VCF header of {}", path.display()))
}

/// Parse a GT value into allele indices per chromosome copy. `None` when the
/// record has no GT field; a `None` element marks a null allele (`.`).
pub fn parse_genotype(values: Option<&Vec<Vec<u8>>>) -> Result<Option<Vec<Option<u32>>>> {
    let Some(values) = values else {
        return Ok(None);
    };
    let Some(raw) = values.first() else {
        return Ok(None);
    };
    let mut alleles = Vec::new();
    for part in raw.split(|&b| b == b'|' || b == b'/') {
        if part == b"." {
            alleles.push(None);
            continue;
        }
        let allele: u32 = part
            .to_str_lossy()
            .parse()
            .with_context(|| format!("invalid GT value {}", raw.as_bstr()))?;
        alleles.push(Some(allele));
    }
    if alleles.is_empty() {
        bail!("empty GT value");
    }
    Ok(Some(alleles))
}
