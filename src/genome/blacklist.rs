use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use bio::data_structures::interval_tree::IntervalTree;
use rustc_hash::FxHashMap;

use super::GenomicChunk;

/// Genomic intervals excluded from analysis, indexed per contig for overlap
/// queries. Built once before dispatch and shared read-only with workers
/// (the tree is immutable, so no per-worker copy is needed).
#[derive(Debug, Default)]
pub struct Blacklist {
    trees: FxHashMap<String, IntervalTree<u64, ()>>,
}
impl Blacklist {
    /// Load one or more BED files (first three columns used, comment and
    /// track lines skipped)
    pub fn from_files(paths: &[PathBuf]) -> anyhow::Result<Blacklist> {
        let mut entries = Vec::new();
        for path in paths {
            let f = File::open(path)
                .with_context(|| format!("could not open blacklist file {}", path.display()))?;
            for (lineno, line) in BufReader::new(f).lines().enumerate() {
                let line = line?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with("track") {
                    continue;
                }
                let mut fields = line.split('\t');
                let parsed = (|| {
                    let chrom = fields.next()?;
                    let start: u64 = fields.next()?.parse().ok()?;
                    let end: u64 = fields.next()?.parse().ok()?;
                    Some((chrom.to_string(), start, end))
                })();
                let (chrom, start, end) = parsed.with_context(|| {
                    format!(
                        "malformed BED line {} in {}: \"{}\"",
                        lineno + 1,
                        path.display(),
                        line
                    )
                })?;
                anyhow::ensure!(
                    end > start,
                    "empty interval on line {} of {}",
                    lineno + 1,
                    path.display()
                );
                entries.push((chrom, start, end));
            }
        }
        Ok(Blacklist::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<(String, u64, u64)>) -> Blacklist {
        let mut trees: FxHashMap<String, IntervalTree<u64, ()>> = FxHashMap::default();
        for (chrom, start, end) in entries {
            trees.entry(chrom).or_default().insert(start..end, ());
        }
        Blacklist { trees }
    }

    /// Does [start, end) intersect any blacklisted interval on this contig?
    pub fn overlaps(&self, chrom: &str, start: u64, end: u64) -> bool {
        if end <= start {
            return false;
        }
        self.trees
            .get(chrom)
            .map_or(false, |t| t.find(start..end).next().is_some())
    }

    /// Remove blacklisted intervals from a chunk, returning the (possibly
    /// empty) list of surviving sub-chunks. Never emits an empty chunk.
    pub fn subtract(&self, chunk: &GenomicChunk) -> Vec<GenomicChunk> {
        let Some(tree) = self.trees.get(&chunk.chrom) else {
            return vec![chunk.clone()];
        };
        let mut hits: Vec<(u64, u64)> = tree
            .find(chunk.start..chunk.end)
            .map(|e| (e.interval().start, e.interval().end))
            .collect();
        if hits.is_empty() {
            return vec![chunk.clone()];
        }
        hits.sort_unstable();

        let mut out = Vec::new();
        let mut cursor = chunk.start;
        for (s, e) in hits {
            if s > cursor {
                out.push(GenomicChunk {
                    chrom: chunk.chrom.clone(),
                    start: cursor,
                    end: s.min(chunk.end),
                });
            }
            cursor = cursor.max(e);
            if cursor >= chunk.end {
                break;
            }
        }
        if cursor < chunk.end {
            out.push(GenomicChunk {
                chrom: chunk.chrom.clone(),
                start: cursor,
                end: chunk.end,
            });
        }
        out
    }
}
