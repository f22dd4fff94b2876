use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ndarray::Array2;
use rust_htslib::bam;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::Read;

use super::{determine_thread_count, FilterArgs};
use crate::counts::report::write_filter_report;
use crate::counts::{BarcodeWhitelist, ChunkCounts, NUM_COUNTERS};
use crate::filter::{DuplicateTracker, ReadFilter};
use crate::genome;
use crate::genome::blacklist::Blacklist;
use crate::genome::reference::ReferenceGenome;
use crate::genome::GenomicChunk;
use crate::threading::map_chunks;

pub const DEFAULT_BIN_SIZE: u64 = 1_000_000;
pub const DEFAULT_DISTANCE_BETWEEN_BINS: u64 = 10_000;

#[derive(Args)]
pub struct FilterStatsCMD {
    /// Indexed BAM files, one per sample
    #[arg(short = 'b', long = "bamfiles", required = true, num_args = 1..)]
    pub bamfiles: Vec<PathBuf>,

    /// Single-column file with the cell barcode whitelist
    #[arg(long = "barcodes")]
    pub barcodes: PathBuf,

    /// Write the table here instead of stdout
    #[arg(short = 'o', long = "out-file")]
    pub out_file: Option<PathBuf>,

    /// Sample labels; must match the number of BAM files
    #[arg(short = 'l', long = "labels", num_args = 1..)]
    pub labels: Option<Vec<String>>,

    /// Derive labels from file names, dropping path and extension
    #[arg(long = "smart-labels")]
    pub smart_labels: bool,

    /// Length in bases of the windows sampled from the genome
    #[arg(long = "bin-size", default_value_t = DEFAULT_BIN_SIZE)]
    pub bin_size: u64,

    /// Gap between sampled windows; larger values sample less of the genome
    #[arg(long = "distance-between-bins", default_value_t = DEFAULT_DISTANCE_BETWEEN_BINS)]
    pub distance_between_bins: u64,

    #[arg(short = 'p', long = "threads")]
    pub num_threads: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}
impl FilterStatsCMD {
    /// Run the commandline option
    pub fn try_execute(&mut self) -> Result<()> {
        let num_threads = determine_thread_count(self.num_threads)?;

        if let Some(labels) = &self.labels {
            anyhow::ensure!(
                labels.len() == self.bamfiles.len(),
                "the number of labels ({}) does not match the number of bam files ({})",
                labels.len(),
                self.bamfiles.len()
            );
        }
        let labels = match &self.labels {
            Some(l) => l.clone(),
            None if self.smart_labels => crate::utils::smart_labels(&self.bamfiles),
            None => crate::utils::default_labels(&self.bamfiles),
        };

        let filter = self.filter.build()?;
        let barcodes = BarcodeWhitelist::from_file(&self.barcodes)?;
        let blacklist = if self.filter.blacklist.is_empty() {
            None
        } else {
            Some(Blacklist::from_files(&self.filter.blacklist)?)
        };

        FilterStats {
            bamfiles: self.bamfiles.clone(),
            labels,
            barcodes,
            filter,
            genome: self.filter.genome.clone(),
            blacklist,
            tag_name: self.filter.tag_name.clone(),
            bin_size: self.bin_size,
            distance_between_bins: self.distance_between_bins,
            num_threads,
            out_file: self.out_file.clone(),
        }
        .run()?;

        log::info!("filterstats has finished successfully");
        Ok(())
    }
}

pub struct FilterStats {
    pub bamfiles: Vec<PathBuf>,
    pub labels: Vec<String>,
    pub barcodes: BarcodeWhitelist,
    pub filter: ReadFilter,
    pub genome: Option<PathBuf>,
    pub blacklist: Option<Blacklist>,
    pub tag_name: String,
    pub bin_size: u64,
    pub distance_between_bins: u64,
    pub num_threads: usize,
    pub out_file: Option<PathBuf>,
}
impl FilterStats {
    /// Partition the genome, stream every chunk through the filter
    /// evaluator on a worker pool, sum the per-chunk counter matrices and
    /// write the percentage table.
    pub fn run(self) -> Result<()> {
        let chroms = genome::contig_sizes(&self.bamfiles[0])?;
        let chunk_len = self.bin_size + self.distance_between_bins;
        let chunks = genome::partition_genome(&chroms, chunk_len, self.blacklist.as_ref());
        log::info!(
            "sampling {} chunks over {} contigs with {} threads",
            chunks.len(),
            chroms.len(),
            self.num_threads
        );

        let num_threads = self.num_threads;
        let num_samples = self.bamfiles.len();
        let num_barcodes = self.barcodes.len();

        let cfg = Arc::new(self);
        let worker_cfg = Arc::clone(&cfg);
        let results = map_chunks(chunks, num_threads, move |chunk| {
            process_chunk(&chunk, &worker_cfg)
        })?;

        let totals = reduce(results, num_samples, num_barcodes);

        let out: Box<dyn Write> = match &cfg.out_file {
            Some(p) => Box::new(File::create(p).with_context(|| {
                format!("could not create output file {}", p.display())
            })?),
            None => Box::new(std::io::stdout()),
        };
        write_filter_report(out, &cfg.labels, &cfg.barcodes, &totals)?;
        Ok(())
    }
}

/// Element-wise sum of the per-chunk matrices, one accumulator per sample.
/// Addition commutes, so the completion order of chunks is irrelevant.
fn reduce(
    results: Vec<Vec<Array2<u64>>>,
    num_samples: usize,
    num_barcodes: usize,
) -> Vec<Array2<u64>> {
    let mut totals: Vec<Array2<u64>> = (0..num_samples)
        .map(|_| Array2::zeros((num_barcodes, NUM_COUNTERS)))
        .collect();
    for per_chunk in results {
        for (total, m) in totals.iter_mut().zip(per_chunk) {
            *total += &m;
        }
    }
    totals
}

/// Process one genomic chunk: open per-chunk resources, stream the records
/// of every sample through the predicate evaluator, return one counter
/// matrix per sample.
fn process_chunk(chunk: &GenomicChunk, cfg: &FilterStats) -> Result<Vec<Array2<u64>>> {
    let chunk = chunk.trimmed(cfg.bin_size, cfg.distance_between_bins);

    // the FASTA reader seeks, so each worker owns its own handle
    let mut genome = match &cfg.genome {
        Some(p) => Some(ReferenceGenome::open(p)?),
        None => None,
    };

    let mut out = Vec::with_capacity(cfg.bamfiles.len());
    for path in &cfg.bamfiles {
        let mut bam = bam::IndexedReader::from_path(path)
            .with_context(|| format!("could not open indexed BAM {}", path.display()))?;
        bam.fetch((chunk.chrom.as_str(), chunk.start as i64, chunk.end as i64))
            .with_context(|| format!("could not fetch {} from {}", chunk, path.display()))?;

        let mut counts = ChunkCounts::new(cfg.barcodes.len());
        let mut dups = DuplicateTracker::new();
        let mut missing_tag = 0u64;

        let mut record = bam::Record::new();
        while let Some(r) = bam.read(&mut record) {
            r?;
            let bc = match record.aux(cfg.tag_name.as_bytes()) {
                Ok(Aux::String(bc)) => bc,
                _ => {
                    // untagged records are skipped and tallied, not fatal
                    missing_tag += 1;
                    continue;
                }
            };
            let Some(bc_idx) = cfg.barcodes.get(bc) else {
                continue;
            };
            if record.pos() < chunk.start as i64 {
                // never double count across adjacent chunks
                continue;
            }
            if record.is_unmapped() {
                continue;
            }
            let verdict = cfg.filter.evaluate(
                &record,
                &chunk.chrom,
                bc,
                cfg.blacklist.as_ref(),
                genome.as_mut(),
                &mut dups,
            )?;
            counts.observe(bc_idx, &verdict);
        }
        if missing_tag > 0 {
            log::debug!(
                "{}: skipped {} records without the {} tag in {}",
                path.display(),
                missing_tag,
                cfg.tag_name,
                chunk
            );
        }
        out.push(counts.into_matrix());
    }
    Ok(out)
}
