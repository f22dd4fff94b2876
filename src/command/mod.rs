pub mod filterstats;
pub mod jsd;

pub use filterstats::{FilterStats, FilterStatsCMD};
pub use jsd::{Jsd, JsdCMD};

use std::path::PathBuf;

use clap::Args;

use crate::filter::{DuplicateFilter, MotifFilter, ReadFilter, StrandSelection};

pub fn determine_thread_count(requested: Option<usize>) -> anyhow::Result<usize> {
    if let Some(n) = requested {
        anyhow::ensure!(n > 0, "thread count must be at least 1");
        return Ok(n);
    }
    match std::thread::available_parallelism() {
        Ok(n) => Ok(n.get()),
        Err(_) => {
            log::warn!("could not autodetect the number of threads available, defaulting to 1");
            Ok(1)
        }
    }
}

/// Read-level filter options shared by every subcommand that samples reads
#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Only count reads with at least this mapping quality
    #[arg(long = "min-mapping-quality")]
    pub min_mapping_quality: Option<u8>,

    /// Only count reads where all of these SAM flag bits are set
    #[arg(long = "sam-flag-include")]
    pub sam_flag_include: Option<u16>,

    /// Drop reads where any of these SAM flag bits is set
    #[arg(long = "sam-flag-exclude")]
    pub sam_flag_exclude: Option<u16>,

    /// Keep only reads aligned to the given strand
    #[arg(long = "filter-rna-strand", value_enum)]
    pub filter_rna_strand: Option<StrandSelection>,

    /// Minimum fraction of read bases that must align to the reference
    #[arg(long = "min-aligned-fraction")]
    pub min_aligned_fraction: Option<f64>,

    /// Keep only reads with GC fraction inside "LOW,HIGH" (closed interval)
    #[arg(long = "gc-content-filter", value_name = "LOW,HIGH")]
    pub gc_content_filter: Option<String>,

    /// Motif pair "READ,REF"; repeatable, a read passes if any listed pair
    /// matches (more motifs means a more permissive filter)
    #[arg(long = "motif-filter", value_name = "READ,REF", value_parser = MotifFilter::parse)]
    pub motif_filter: Vec<MotifFilter>,

    /// Indexed FASTA used for motif context lookups
    #[arg(long = "genome")]
    pub genome: Option<PathBuf>,

    /// BED file(s) with regions excluded from all analyses
    #[arg(long = "blacklist", value_name = "BED")]
    pub blacklist: Vec<PathBuf>,

    /// Detect duplicates internally with the given read signature
    #[arg(long = "duplicate-filter", value_enum)]
    pub duplicate_filter: Option<DuplicateFilter>,

    /// BAM tag holding the cell barcode
    #[arg(long = "tag-name", default_value = "BC")]
    pub tag_name: String,

    /// BAM tag holding the UMI, for the umi duplicate modes
    #[arg(long = "umi-tag", default_value = "RX")]
    pub umi_tag: String,
}
impl FilterArgs {
    /// Validate eagerly and build the immutable filter configuration
    pub fn build(&self) -> anyhow::Result<ReadFilter> {
        if !self.motif_filter.is_empty() && self.genome.is_none() {
            anyhow::bail!("--motif-filter requires --genome (indexed FASTA)");
        }
        let gc_content = match &self.gc_content_filter {
            Some(s) => Some(parse_gc_bounds(s)?),
            None => None,
        };
        Ok(ReadFilter {
            min_mapping_quality: self.min_mapping_quality,
            sam_flag_include: self.sam_flag_include,
            sam_flag_exclude: self.sam_flag_exclude,
            min_aligned_fraction: self.min_aligned_fraction,
            gc_content,
            motifs: self.motif_filter.clone(),
            strand: self.filter_rna_strand,
            duplicate_filter: self.duplicate_filter,
            umi_tag: self.umi_tag.clone(),
        })
    }
}

fn parse_gc_bounds(s: &str) -> anyhow::Result<(f64, f64)> {
    let parts: Vec<&str> = s.trim().split(',').collect();
    anyhow::ensure!(
        parts.len() == 2,
        "expected GC bounds like \"0.2,0.8\", got \"{}\"",
        s
    );
    let low: f64 = parts[0].trim().parse()?;
    let high: f64 = parts[1].trim().parse()?;
    anyhow::ensure!(
        (0.0..=1.0).contains(&low) && (0.0..=1.0).contains(&high) && low <= high,
        "GC bounds must satisfy 0 <= LOW <= HIGH <= 1, got \"{}\"",
        s
    );
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_args() -> FilterArgs {
        FilterArgs {
            min_mapping_quality: None,
            sam_flag_include: None,
            sam_flag_exclude: None,
            filter_rna_strand: None,
            min_aligned_fraction: None,
            gc_content_filter: None,
            motif_filter: Vec::new(),
            genome: None,
            blacklist: Vec::new(),
            duplicate_filter: None,
            tag_name: "BC".to_string(),
            umi_tag: "RX".to_string(),
        }
    }

    #[test]
    fn gc_bounds_parse_and_validate() {
        assert_eq!(parse_gc_bounds("0.2,0.8").unwrap(), (0.2, 0.8));
        assert_eq!(parse_gc_bounds(" 0.5 , 0.5 ").unwrap(), (0.5, 0.5));
        assert!(parse_gc_bounds("0.8,0.2").is_err());
        assert!(parse_gc_bounds("0.2").is_err());
        assert!(parse_gc_bounds("-0.1,0.5").is_err());
    }

    #[test]
    fn motif_filter_without_genome_is_a_config_error() {
        let mut args = bare_args();
        args.motif_filter = vec![MotifFilter::parse("TA,TA").unwrap()];
        assert!(args.build().is_err());
        args.genome = Some(PathBuf::from("ref.fa"));
        assert!(args.build().is_ok());
    }

    #[test]
    fn thread_count_rejects_zero() {
        assert!(determine_thread_count(Some(0)).is_err());
        assert_eq!(determine_thread_count(Some(8)).unwrap(), 8);
        assert!(determine_thread_count(None).unwrap() >= 1);
    }
}
