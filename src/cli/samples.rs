use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use bstr::{BString, ByteSlice};
use tracing::{debug, error, info, warn};

use crate::graph::{BuildGraphDelegate, OverlapReport, Ploidy, RefMismatch};

/// Read a `chrom\tsample\tcopy_idx` filter list, keeping the rows matching
/// `chromosome`. The result is sorted for binary search.
pub fn read_sample_filter(path: &Path, chromosome: &str) -> Result<Vec<(BString, Ploidy)>> {
    let file = File::open(path).with_context(|| format!("unable to open {}", path.display()))?;
    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(chrom), Some(sample), Some(copy)) =
            (fields.next(), fields.next(), fields.next())
        else {
            bail!("{}:{}: expected chrom\\tsample\\tcopy_idx", path.display(), lineno + 1);
        };
        if chrom != chromosome {
            continue;
        }
        let copy: Ploidy = copy
            .parse()
            .with_context(|| format!("{}:{}: invalid copy index", path.display(), lineno + 1))?;
        entries.push((BString::from(sample), copy));
    }
    entries.sort();
    debug!("read {} filter entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Build delegate of the command line driver: sample filtering against an
/// include or exclude list, overlap reports to a TSV file or the log, and
/// configurable REF mismatch severity.
pub struct CliBuildDelegate {
    filter: Vec<(BString, Ploidy)>,
    exclude_listed: bool,
    ref_mismatch_fatal: bool,
    overlaps: Option<BufWriter<File>>,
    overlap_count: u64,
}

impl CliBuildDelegate {
    pub fn new(ref_mismatch_fatal: bool) -> Self {
        Self {
            filter: Vec::new(),
            exclude_listed: true,
            ref_mismatch_fatal,
            overlaps: None,
            overlap_count: 0,
        }
    }

    pub fn include_samples(&mut self, filter: Vec<(BString, Ploidy)>) {
        self.filter = filter;
        self.exclude_listed = false;
    }

    pub fn exclude_samples(&mut self, filter: Vec<(BString, Ploidy)>) {
        self.filter = filter;
        self.exclude_listed = true;
    }

    pub fn write_overlaps_to(&mut self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "LINENO\tPOS\tID\tSAMPLE\tCHROM_COPY\tGT")?;
        self.overlaps = Some(writer);
        Ok(())
    }

    pub fn overlap_count(&self) -> u64 {
        self.overlap_count
    }

    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.overlaps.as_mut() {
            writer.flush().context("unable to flush the overlap report")?;
        }
        if self.overlap_count > 0 {
            info!("reported {} overlapping alternative alleles", self.overlap_count);
        }
        Ok(())
    }
}

impl BuildGraphDelegate for CliBuildDelegate {
    fn should_include(&self, sample_name: &[u8], chrom_copy: Ploidy) -> bool {
        let listed = self
            .filter
            .binary_search_by(|(name, copy)| {
                name.as_bytes().cmp(sample_name).then(copy.cmp(&chrom_copy))
            })
            .is_ok();
        self.exclude_listed ^ listed
    }

    fn report_overlapping_alternative(&mut self, report: &OverlapReport<'_>) {
        self.overlap_count += 1;
        match self.overlaps.as_mut() {
            Some(writer) => {
                let result = writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    report.lineno,
                    report.ref_pos,
                    report.joined_ids(),
                    report.sample_name.as_bstr(),
                    report.chrom_copy,
                    report.genotype
                );
                if let Err(err) = result {
                    error!("unable to write the overlap report: {err}");
                }
            }
            None => {
                info!(
                    "overlapping alternative alleles: line {} position {} ids {} sample {} copy {} genotype {}",
                    report.lineno,
                    report.ref_pos,
                    report.joined_ids(),
                    report.sample_name.as_bstr(),
                    report.chrom_copy,
                    report.genotype
                );
            }
        }
    }

    fn ref_mismatch(&mut self, mismatch: &RefMismatch<'_>) -> bool {
        if self.ref_mismatch_fatal {
            error!(
                "REF column does not match the reference at variant {} (line {}) CHROM {} POS {}: got {} expected {}",
                mismatch.variant_index,
                mismatch.lineno,
                mismatch.chromosome.as_bstr(),
                mismatch.ref_pos,
                mismatch.record_ref.as_bstr(),
                mismatch.expected.as_bstr()
            );
            false
        } else {
            warn!(
                "REF column does not match the reference at variant {} (line {}) CHROM {} POS {}: got {} expected {}",
                mismatch.variant_index,
                mismatch.lineno,
                mismatch.chromosome.as_bstr(),
                mismatch.ref_pos,
                mismatch.record_ref.as_bstr(),
                mismatch.expected.as_bstr()
            );
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_file(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write as _;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn test_filter_keeps_matching_chromosome() {
        let file = filter_file("chr1\tHG001\t0\nchr2\tHG001\t1\nchr1\tHG002\t1\n");
        let entries = read_sample_filter(file.path(), "chr1").expect("read");
        assert_eq!(entries, vec![(BString::from("HG001"), 0), (BString::from("HG002"), 1)]);
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let file = filter_file("chr1\tHG001\n");
        assert!(read_sample_filter(file.path(), "chr1").is_err());
    }

    #[test]
    fn test_include_list_semantics() {
        let mut delegate = CliBuildDelegate::new(false);
        delegate.include_samples(vec![(BString::from("HG001"), 1)]);
        assert!(delegate.should_include(b"HG001", 1));
        assert!(!delegate.should_include(b"HG001", 0));
        assert!(!delegate.should_include(b"HG002", 1));
    }

    #[test]
    fn test_exclude_list_semantics() {
        let mut delegate = CliBuildDelegate::new(false);
        delegate.exclude_samples(vec![(BString::from("HG001"), 1)]);
        assert!(!delegate.should_include(b"HG001", 1));
        assert!(delegate.should_include(b"HG001", 0));
        assert!(delegate.should_include(b"HG002", 1));
    }

    #[test]
    fn test_no_list_includes_everything() {
        let delegate = CliBuildDelegate::new(false);
        assert!(delegate.should_include(b"HG001", 0));
    }

    #[test]
    fn test_overlap_tsv_shape() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("overlaps.tsv");
        let mut delegate = CliBuildDelegate::new(false);
        delegate.write_overlaps_to(&path).expect("open");
        delegate.report_overlapping_alternative(&OverlapReport {
            lineno: 12,
            ref_pos: 1,
            variant_ids: &[b"rs1".to_vec()],
            sample_name: b"HG001",
            chrom_copy: 0,
            genotype: 1,
        });
        delegate.finish().expect("finish");
        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content, "LINENO\tPOS\tID\tSAMPLE\tCHROM_COPY\tGT\n12\t1\trs1\tHG001\t0\t1\n");
        assert_eq!(delegate.overlap_count(), 1);
    }
}
