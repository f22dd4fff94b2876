use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use itertools::iproduct;
use ndarray::Array2;
use rust_htslib::bam;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::Read;

use super::{determine_thread_count, FilterArgs};
use crate::counts::BarcodeWhitelist;
use crate::enrichment::synthetic_jsd;
use crate::filter::{DuplicateTracker, ReadFilter};
use crate::genome;
use crate::genome::blacklist::Blacklist;
use crate::genome::reference::ReferenceGenome;
use crate::genome::{ChromSize, GenomicChunk};
use crate::threading::map_chunks;

pub const DEFAULT_BIN_SIZE: u64 = 500;
pub const DEFAULT_NUMBER_OF_SAMPLES: u64 = 500_000;

/// Sampled bins handled by one worker task
const BINS_PER_TASK: usize = 512;

#[derive(Args)]
pub struct JsdCMD {
    /// Indexed BAM files, one per sample
    #[arg(short = 'b', long = "bamfiles", required = true, num_args = 1..)]
    pub bamfiles: Vec<PathBuf>,

    /// Single-column file with the cell barcode whitelist
    #[arg(long = "barcodes")]
    pub barcodes: PathBuf,

    /// File to write the per-cell JSD table to
    #[arg(short = 'o', long = "out-file")]
    pub out_file: PathBuf,

    /// Sample labels; must match the number of BAM files
    #[arg(short = 'l', long = "labels", num_args = 1..)]
    pub labels: Option<Vec<String>>,

    /// Derive labels from file names, dropping path and extension
    #[arg(long = "smart-labels")]
    pub smart_labels: bool,

    /// Window size in bases used to sample the genome
    #[arg(long = "bin-size", default_value_t = DEFAULT_BIN_SIZE)]
    pub bin_size: u64,

    /// Number of bins sampled from the genome
    #[arg(long = "number-of-samples", default_value_t = DEFAULT_NUMBER_OF_SAMPLES)]
    pub number_of_samples: u64,

    /// Drop bins with zero coverage in every cell before the computation
    #[arg(long = "skip-zeros")]
    pub skip_zeros: bool,

    #[arg(short = 'p', long = "threads")]
    pub num_threads: Option<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}
impl JsdCMD {
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

        Jsd {
            bamfiles: self.bamfiles.clone(),
            labels,
            barcodes,
            filter,
            genome: self.filter.genome.clone(),
            blacklist,
            tag_name: self.filter.tag_name.clone(),
            bin_size: self.bin_size,
            number_of_samples: self.number_of_samples,
            skip_zeros: self.skip_zeros,
            num_threads,
            out_file: self.out_file.clone(),
        }
        .run()?;

        log::info!("jsd has finished successfully");
        Ok(())
    }
}

pub struct Jsd {
    pub bamfiles: Vec<PathBuf>,
    pub labels: Vec<String>,
    pub barcodes: BarcodeWhitelist,
    pub filter: ReadFilter,
    pub genome: Option<PathBuf>,
    pub blacklist: Option<Blacklist>,
    pub tag_name: String,
    pub bin_size: u64,
    pub number_of_samples: u64,
    pub skip_zeros: bool,
    pub num_threads: usize,
    pub out_file: PathBuf,
}
impl Jsd {
    /// Sample bins across the genome, count reads per cell per bin, then
    /// score each cell's coverage against a synthetic Poisson cell.
    pub fn run(self) -> Result<()> {
        let chroms = genome::contig_sizes(&self.bamfiles[0])?;
        let bins = sampling_bins(
            &chroms,
            self.bin_size,
            self.number_of_samples,
            self.blacklist.as_ref(),
        );
        anyhow::ensure!(!bins.is_empty(), "no sampling bins left after blacklisting");
        log::info!(
            "sampling {} bins of {} bases with {} threads",
            bins.len(),
            self.bin_size,
            self.num_threads
        );

        let tasks: Vec<Vec<GenomicChunk>> = bins
            .chunks(BINS_PER_TASK)
            .map(|batch| batch.to_vec())
            .collect();

        let num_threads = self.num_threads;
        let num_samples = self.bamfiles.len();
        let num_barcodes = self.barcodes.len();

        let cfg = Arc::new(self);
        let worker_cfg = Arc::clone(&cfg);
        let results = map_chunks(tasks, num_threads, move |batch| {
            count_bins(&batch, &worker_cfg)
        })?;

        // stitch the per-task blocks together; tasks arrive in completion
        // order but rows stay aligned across samples within a task
        let mut flat: Vec<Vec<u64>> = vec![Vec::new(); num_samples];
        for task_result in results {
            for (sample_flat, task_flat) in flat.iter_mut().zip(task_result) {
                sample_flat.extend(task_flat);
            }
        }
        let num_bins = flat[0].len() / num_barcodes;
        let matrices: Vec<Array2<u64>> = flat
            .into_iter()
            .map(|f| Array2::from_shape_vec((num_bins, num_barcodes), f))
            .collect::<Result<_, _>>()
            .context("per-task count blocks do not stack into a bins x cells matrix")?;

        let grand_total: u64 = matrices.iter().map(|m| m.sum()).sum();
        anyhow::ensure!(
            grand_total > 0,
            "no reads were found in {} sampled bins; check the mapping-quality threshold, \
             the barcode tag and whitelist, and the chromosome naming across bam files",
            num_bins
        );

        let keep: Vec<bool> = if cfg.skip_zeros {
            covered_bins(&matrices)
        } else {
            vec![true; num_bins]
        };

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(File::create(&cfg.out_file).with_context(|| {
                format!("could not create output file {}", cfg.out_file.display())
            })?);
        wtr.write_record(["cell", "jsd"])?;
        for ((si, label), (bi, bc)) in iproduct!(
            cfg.labels.iter().enumerate(),
            cfg.barcodes.iter().enumerate()
        ) {
            let counts: Vec<u64> = matrices[si]
                .column(bi)
                .iter()
                .zip(&keep)
                .filter(|(_, &k)| k)
                .map(|(&v, _)| v)
                .collect();
            let jsd = synthetic_jsd(&counts);
            wtr.write_record([format!("{}_{}", label, bc), format!("{:.6}", jsd)])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Equally spaced bins of `bin_size` bases, at most roughly
/// `number_of_samples` of them across the whole genome; bins touching the
/// blacklist are not sampled at all.
fn sampling_bins(
    chroms: &[ChromSize],
    bin_size: u64,
    number_of_samples: u64,
    blacklist: Option<&Blacklist>,
) -> Vec<GenomicChunk> {
    let genome_size: u64 = chroms.iter().map(|c| c.len).sum();
    let stride = (genome_size / number_of_samples.max(1)).max(bin_size).max(1);

    let mut bins = Vec::new();
    for c in chroms {
        let mut start = 0;
        while start < c.len {
            let end = (start + bin_size).min(c.len);
            let excluded = blacklist.map_or(false, |bl| bl.overlaps(&c.name, start, end));
            if !excluded {
                bins.push(GenomicChunk {
                    chrom: c.name.clone(),
                    start,
                    end,
                });
            }
            start += stride;
        }
    }
    bins
}

/// Bins with coverage in at least one cell of at least one sample; the
/// `--skip-zeros` mask drops everything else.
fn covered_bins(matrices: &[Array2<u64>]) -> Vec<bool> {
    let num_bins = matrices.first().map_or(0, |m| m.nrows());
    (0..num_bins)
        .map(|i| matrices.iter().any(|m| m.row(i).iter().any(|&v| v > 0)))
        .collect()
}

/// Count the whitelisted reads per barcode in every bin of one task, per
/// sample. Reads failing any enabled filter predicate are not counted.
/// Returns one row-major (bins × barcodes) block per sample.
fn count_bins(bins: &[GenomicChunk], cfg: &Jsd) -> Result<Vec<Vec<u64>>> {
    let num_barcodes = cfg.barcodes.len();

    let mut genome = match &cfg.genome {
        Some(p) => Some(ReferenceGenome::open(p)?),
        None => None,
    };

    let mut out = Vec::with_capacity(cfg.bamfiles.len());
    for path in &cfg.bamfiles {
        let mut bam = bam::IndexedReader::from_path(path)
            .with_context(|| format!("could not open indexed BAM {}", path.display()))?;

        let mut flat = Vec::with_capacity(bins.len() * num_barcodes);
        let mut missing_tag = 0u64;
        for bin in bins {
            let mut row = vec![0u64; num_barcodes];
            let mut dups = DuplicateTracker::new();
            bam.fetch((bin.chrom.as_str(), bin.start as i64, bin.end as i64))
                .with_context(|| format!("could not fetch {} from {}", bin, path.display()))?;

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
                if record.pos() < bin.start as i64 {
                    continue;
                }
                if record.is_unmapped() {
                    continue;
                }
                let verdict = cfg.filter.evaluate(
                    &record,
                    &bin.chrom,
                    bc,
                    cfg.blacklist.as_ref(),
                    genome.as_mut(),
                    &mut dups,
                )?;
                if !verdict.any() {
                    row[bc_idx] += 1;
                }
            }
            flat.extend(row);
        }
        if missing_tag > 0 {
            log::debug!(
                "{}: skipped {} records without the {} tag",
                path.display(),
                missing_tag,
                cfg.tag_name
            );
        }
        out.push(flat);
    }
    Ok(out)
}
