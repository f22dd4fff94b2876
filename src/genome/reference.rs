use std::fs::File;
use std::path::Path;

use anyhow::Context;
use bio::io::fasta;
use rustc_hash::FxHashMap;

/// Random-access reference sequence (FASTA + .fai). The reader seeks, so
/// every chunk worker opens its own instance; never shared across threads.
pub struct ReferenceGenome {
    reader: fasta::IndexedReader<File>,
    lengths: FxHashMap<String, u64>,
}
impl ReferenceGenome {
    pub fn open(path: &Path) -> anyhow::Result<ReferenceGenome> {
        let reader = fasta::IndexedReader::from_file(&path)
            .with_context(|| format!("could not open indexed FASTA {}", path.display()))?;
        let lengths = reader
            .index
            .sequences()
            .iter()
            .map(|s| (s.name.clone(), s.len))
            .collect();
        Ok(ReferenceGenome { reader, lengths })
    }

    pub fn contig_len(&self, chrom: &str) -> Option<u64> {
        self.lengths.get(chrom).copied()
    }

    /// Sequence of [start, stop) on a contig
    pub fn fetch(&mut self, chrom: &str, start: u64, stop: u64) -> anyhow::Result<Vec<u8>> {
        self.reader
            .fetch(chrom, start, stop)
            .with_context(|| format!("could not fetch {}:{}-{} from reference", chrom, start, stop))?;
        let mut seq = Vec::with_capacity((stop - start) as usize);
        self.reader.read(&mut seq)?;
        Ok(seq)
    }
}
