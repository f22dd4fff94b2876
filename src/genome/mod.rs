pub mod blacklist;
pub mod reference;

use std::path::Path;

use anyhow::Context;
use rust_htslib::bam;
use rust_htslib::bam::Read;

use blacklist::Blacklist;

/// Name and length of one reference contig, taken from a BAM header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromSize {
    pub name: String,
    pub len: u64,
}

/// Half-open interval [start, end) on a named contig; the unit of parallel
/// work. Immutable value object, consumed by exactly one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicChunk {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}
impl GenomicChunk {
    pub fn width(&self) -> u64 {
        self.end - self.start
    }

    /// Worker-side boundary fix: drop the inter-chunk gap from the end so
    /// adjacent chunks never sample the same window, but never let the chunk
    /// collapse below one base.
    pub fn trimmed(&self, bin_size: u64, gap: u64) -> GenomicChunk {
        let mut end = self.end;
        if self.width() > bin_size && self.width() > gap {
            end -= gap;
        }
        if end <= self.start {
            end = self.start + 1;
        }
        GenomicChunk {
            chrom: self.chrom.clone(),
            start: self.start,
            end,
        }
    }
}
impl std::fmt::Display for GenomicChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

/// Contig names and lengths from an alignment file header
pub fn contig_sizes(path: &Path) -> anyhow::Result<Vec<ChromSize>> {
    let reader = bam::Reader::from_path(path)
        .with_context(|| format!("could not open alignment file {}", path.display()))?;
    let header = reader.header();
    let mut out = Vec::with_capacity(header.target_count() as usize);
    for tid in 0..header.target_count() {
        let name = String::from_utf8_lossy(header.tid2name(tid)).to_string();
        let len = header
            .target_len(tid)
            .with_context(|| format!("missing length for contig {} in {}", name, path.display()))?;
        out.push(ChromSize { name, len });
    }
    Ok(out)
}

/// Cover every contig with chunks of at most `chunk_len` bases. Blacklisted
/// intervals are subtracted, so no emitted chunk intersects the blacklist.
pub fn partition_genome(
    chroms: &[ChromSize],
    chunk_len: u64,
    blacklist: Option<&Blacklist>,
) -> Vec<GenomicChunk> {
    assert!(chunk_len > 0);
    let mut out = Vec::new();
    for c in chroms {
        let mut start = 0;
        while start < c.len {
            let end = (start + chunk_len).min(c.len);
            let chunk = GenomicChunk {
                chrom: c.name.clone(),
                start,
                end,
            };
            match blacklist {
                Some(bl) => out.extend(bl.subtract(&chunk)),
                None => out.push(chunk),
            }
            start = end;
        }
    }
    out
}
