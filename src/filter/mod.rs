pub mod dedup;
pub mod motif;

pub use dedup::{DupSignature, DuplicateFilter, DuplicateTracker};
pub use motif::MotifFilter;

use anyhow::Context;
use rust_htslib::bam::record::{Cigar, Record as BamRecord};

use crate::genome::blacklist::Blacklist;
use crate::genome::reference::ReferenceGenome;

/// Which strand orientation to keep, in the dUTP-based library sense
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrandSelection {
    Forward,
    Reverse,
}

/// Outcome of evaluating one record. One flag per predicate; flags are
/// independent, a record can trip several at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterVerdict {
    pub low_mapq: bool,
    pub missing_flags: bool,
    pub excluded_flags: bool,
    pub low_aligned_fraction: bool,
    pub blacklisted: bool,
    pub internal_duplicate: bool,
    pub marked_duplicate: bool,
    pub singleton: bool,
    pub unwanted_gc: bool,
    pub wrong_motif: bool,
    pub wrong_strand: bool,
}
impl FilterVerdict {
    /// True if any predicate fired; the aggregate Filtered counter follows this
    pub fn any(&self) -> bool {
        self.low_mapq
            || self.missing_flags
            || self.excluded_flags
            || self.low_aligned_fraction
            || self.blacklisted
            || self.internal_duplicate
            || self.marked_duplicate
            || self.singleton
            || self.unwanted_gc
            || self.wrong_motif
            || self.wrong_strand
    }
}

/// Immutable filter configuration, built once before dispatch and shared
/// read-only with every chunk worker.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub min_mapping_quality: Option<u8>,
    pub sam_flag_include: Option<u16>,
    pub sam_flag_exclude: Option<u16>,
    pub min_aligned_fraction: Option<f64>,
    pub gc_content: Option<(f64, f64)>,
    pub motifs: Vec<MotifFilter>,
    pub strand: Option<StrandSelection>,
    pub duplicate_filter: Option<DuplicateFilter>,
    pub umi_tag: String,
}
impl ReadFilter {
    /// Evaluate every enabled predicate against one mapped record. The caller
    /// has already applied the skip rules (unmapped, position before chunk
    /// start, barcode not whitelisted), so everything reaching this point
    /// counts towards the barcode's total.
    ///
    /// The duplicate tracker is per-chunk, per-sample mutable state; records
    /// must arrive in coordinate-sorted order for its clearing rule to hold.
    pub fn evaluate(
        &self,
        record: &BamRecord,
        chrom: &str,
        barcode: &str,
        blacklist: Option<&Blacklist>,
        mut genome: Option<&mut ReferenceGenome>,
        dups: &mut DuplicateTracker,
    ) -> anyhow::Result<FilterVerdict> {
        let flag = record.flags();
        let mut verdict = FilterVerdict::default();

        if let Some(min_mapq) = self.min_mapping_quality {
            if record.mapq() < min_mapq {
                verdict.low_mapq = true;
            }
        }
        if let Some(include) = self.sam_flag_include {
            if flag & include != include {
                verdict.missing_flags = true;
            }
        }
        if let Some(exclude) = self.sam_flag_exclude {
            if flag & exclude != 0 {
                verdict.excluded_flags = true;
            }
        }
        if let Some(min_frac) = self.min_aligned_fraction {
            if aligned_fraction(&record.cigar()) < min_frac {
                verdict.low_aligned_fraction = true;
            }
        }
        if let Some(bl) = blacklist {
            let start = record.pos();
            let end = start + query_length(record) - 1;
            if end > start && bl.overlaps(chrom, start as u64, end as u64) {
                verdict.blacklisted = true;
            }
        }
        if let Some(mode) = self.duplicate_filter {
            let sig = DupSignature::from_record(record, barcode, mode, &self.umi_tag)?;
            if dups.observe(record.pos(), sig) {
                verdict.internal_duplicate = true;
            }
        }
        if record.is_duplicate() {
            verdict.marked_duplicate = true;
        }
        if record.is_paired() && record.is_mate_unmapped() {
            verdict.singleton = true;
        }
        if let Some((low, high)) = self.gc_content {
            if !gc_in_bounds(&record.seq().as_bytes(), low, high) {
                verdict.unwanted_gc = true;
            }
        }
        if !self.motifs.is_empty() {
            // config validation guarantees a genome when motifs are requested
            let genome = genome
                .take()
                .context("motif filter requires a reference genome")?;
            // OR across the listed pairs: one matching pair keeps the read
            let mut any_match = false;
            for m in &self.motifs {
                if m.matches(record, chrom, genome)? {
                    any_match = true;
                    break;
                }
            }
            if !any_match {
                verdict.wrong_motif = true;
            }
        }
        if let Some(sel) = self.strand {
            if !strand_ok(flag, sel) {
                verdict.wrong_strand = true;
            }
        }

        Ok(verdict)
    }
}

/// Strand test reproduced bit-for-bit from the established convention:
/// paired reads are judged on the mate-aware 144/96 masks, unpaired reads on
/// the plain reverse bit (with "forward" keeping the reverse-flagged read).
pub fn strand_ok(flag: u16, sel: StrandSelection) -> bool {
    let paired = flag & 0x1 != 0;
    match (paired, sel) {
        (true, StrandSelection::Forward) => flag & 144 == 128 || flag & 96 == 64,
        (true, StrandSelection::Reverse) => flag & 144 == 144 || flag & 96 == 96,
        (false, StrandSelection::Forward) => flag & 16 == 16,
        (false, StrandSelection::Reverse) => flag & 16 == 0,
    }
}

/// Fraction of query-consuming bases that aligned (M/=/X over M/I/S/=/X).
/// An empty CIGAR counts as fully unaligned.
pub fn aligned_fraction(cigar: &[Cigar]) -> f64 {
    let mut total = 0u64;
    let mut matching = 0u64;
    for op in cigar {
        match op {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                total += *l as u64;
                matching += *l as u64;
            }
            Cigar::Ins(l) | Cigar::SoftClip(l) => {
                total += *l as u64;
            }
            _ => {}
        }
    }
    if total == 0 {
        return 0.0;
    }
    matching as f64 / total as f64
}

/// GC fraction inside the closed interval [low, high]
pub fn gc_in_bounds(seq: &[u8], low: f64, high: f64) -> bool {
    if seq.is_empty() {
        return false;
    }
    let gc = seq
        .iter()
        .filter(|b| matches!(b, b'G' | b'C' | b'g' | b'c'))
        .count();
    let frac = gc as f64 / seq.len() as f64;
    frac >= low && frac <= high
}

/// Query length from the CIGAR (soft clips included, hard clips not), falling
/// back to the stored sequence length for records without a CIGAR
pub fn query_length(record: &BamRecord) -> i64 {
    let from_cigar: u64 = record
        .cigar()
        .iter()
        .map(|op| match op {
            Cigar::Match(l) | Cigar::Ins(l) | Cigar::SoftClip(l) | Cigar::Equal(l)
            | Cigar::Diff(l) => *l as u64,
            _ => 0,
        })
        .sum();
    if from_cigar > 0 {
        from_cigar as i64
    } else {
        record.seq_len() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::CigarString;

    fn record_with(flag: u16, mapq: u8, pos: i64, seq: &[u8]) -> BamRecord {
        let mut r = BamRecord::new();
        let cigar = CigarString(vec![Cigar::Match(seq.len() as u32)]);
        let qual = vec![30u8; seq.len()];
        r.set(b"read1", Some(&cigar), seq, &qual);
        r.set_flags(flag);
        r.set_mapq(mapq);
        r.set_pos(pos);
        r.set_tid(0);
        r
    }

    #[test]
    fn paired_forward_keeps_second_mate_forward() {
        // flag 163: paired, proper pair, mate reverse, second in pair
        // 163 & 144 == 128, so the read is kept
        assert!(strand_ok(163, StrandSelection::Forward));
    }

    #[test]
    fn paired_forward_rejects_other_combinations() {
        // flag 83 (paired, reverse, first in pair): 83 & 96 == 64, kept
        assert!(strand_ok(83, StrandSelection::Forward));
        // flag 99 (paired, mate reverse, first in pair): 99 & 144 == 0 and
        // 99 & 96 == 96, so forward selection rejects it
        assert!(!strand_ok(99, StrandSelection::Forward));
        assert!(strand_ok(99, StrandSelection::Reverse));
        // flag 147 (paired, reverse, second in pair): 147 & 144 == 144,
        // rejected for forward, kept for reverse
        assert!(!strand_ok(147, StrandSelection::Forward));
        assert!(strand_ok(147, StrandSelection::Reverse));
    }

    #[test]
    fn unpaired_forward_keeps_reverse_flagged_reads() {
        assert!(strand_ok(16, StrandSelection::Forward));
        assert!(!strand_ok(0, StrandSelection::Forward));
        assert!(strand_ok(0, StrandSelection::Reverse));
        assert!(!strand_ok(16, StrandSelection::Reverse));
    }

    #[test]
    fn gc_bounds_are_closed() {
        // 2 GC out of 4 bases
        let seq = b"ACGT";
        assert!(gc_in_bounds(seq, 0.5, 0.5));
        assert!(gc_in_bounds(seq, 0.5, 1.0));
        assert!(gc_in_bounds(seq, 0.0, 0.5));
        assert!(!gc_in_bounds(seq, 0.51, 1.0));
        assert!(!gc_in_bounds(seq, 0.0, 0.49));
    }

    #[test]
    fn aligned_fraction_counts_query_consuming_ops() {
        let cigar = [Cigar::SoftClip(25), Cigar::Match(75)];
        assert_eq!(aligned_fraction(&cigar), 0.75);
        let all_matched = [Cigar::Match(50)];
        assert_eq!(aligned_fraction(&all_matched), 1.0);
        // deletions consume the reference, not the query
        let with_del = [Cigar::Match(50), Cigar::Del(10), Cigar::Match(50)];
        assert_eq!(aligned_fraction(&with_del), 1.0);
        assert_eq!(aligned_fraction(&[]), 0.0);
    }

    #[test]
    fn low_mapq_fires_and_sets_aggregate() {
        let filter = ReadFilter {
            min_mapping_quality: Some(20),
            ..ReadFilter::default()
        };
        let record = record_with(0, 10, 100, b"ACGTACGT");
        let mut dups = DuplicateTracker::new();
        let verdict = filter
            .evaluate(&record, "chr1", "AAAC", None, None, &mut dups)
            .unwrap();
        assert!(verdict.low_mapq);
        assert!(verdict.any());
    }

    #[test]
    fn multiple_predicates_fire_independently() {
        let filter = ReadFilter {
            min_mapping_quality: Some(20),
            sam_flag_exclude: Some(1024),
            gc_content: Some((0.9, 1.0)),
            ..ReadFilter::default()
        };
        // flag 1024 = marked duplicate; GC of ACGTACGT is 0.5
        let record = record_with(1024, 5, 100, b"ACGTACGT");
        let mut dups = DuplicateTracker::new();
        let verdict = filter
            .evaluate(&record, "chr1", "AAAC", None, None, &mut dups)
            .unwrap();
        assert!(verdict.low_mapq);
        assert!(verdict.excluded_flags);
        assert!(verdict.marked_duplicate);
        assert!(verdict.unwanted_gc);
        assert!(!verdict.singleton);
    }

    #[test]
    fn clean_record_passes_everything() {
        let filter = ReadFilter {
            min_mapping_quality: Some(20),
            sam_flag_include: Some(0x1),
            ..ReadFilter::default()
        };
        // paired, mapped, mate mapped
        let record = record_with(0x1 | 0x2, 60, 100, b"GCGCGCGC");
        let mut dups = DuplicateTracker::new();
        let verdict = filter
            .evaluate(&record, "chr1", "AAAC", None, None, &mut dups)
            .unwrap();
        assert_eq!(verdict, FilterVerdict::default());
        assert!(!verdict.any());
    }

    fn write_motif_genome() -> std::path::PathBuf {
        use std::io::Write as _;
        let dir = std::env::temp_dir().join(format!("scstats-motif-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let seq = "AAAACCCCGGGGTTTTACGT";
        let fa = dir.join("ref.fa");
        std::fs::File::create(&fa)
            .and_then(|mut f| write!(f, ">chr1\n{}\n", seq))
            .unwrap();
        std::fs::File::create(dir.join("ref.fa.fai"))
            .and_then(|mut f| write!(f, "chr1\t{}\t6\t{}\t{}\n", seq.len(), seq.len(), seq.len() + 1))
            .unwrap();
        fa
    }

    #[test]
    fn multiple_motifs_relax_not_restrict() {
        // listed motif pairs are OR-combined: a read matching only one of
        // them still passes, so adding motifs widens what is kept
        let fa = write_motif_genome();
        let mut genome = ReferenceGenome::open(&fa).unwrap();
        // forward read at pos 16 over "ACGT"; upstream reference context "TA"
        let record = record_with(0, 60, 16, b"ACGT");

        let matching = MotifFilter::parse("AC,TA").unwrap();
        let other = MotifFilter::parse("AC,GG").unwrap();

        let strict = ReadFilter {
            motifs: vec![other.clone()],
            ..ReadFilter::default()
        };
        let mut dups = DuplicateTracker::new();
        let verdict = strict
            .evaluate(&record, "chr1", "AAAC", None, Some(&mut genome), &mut dups)
            .unwrap();
        assert!(verdict.wrong_motif);

        let relaxed = ReadFilter {
            motifs: vec![other, matching],
            ..ReadFilter::default()
        };
        let verdict = relaxed
            .evaluate(&record, "chr1", "AAAC", None, Some(&mut genome), &mut dups)
            .unwrap();
        assert!(!verdict.wrong_motif);
    }

    #[test]
    fn singleton_is_paired_with_unmapped_mate() {
        let filter = ReadFilter::default();
        // paired + mate unmapped
        let record = record_with(0x1 | 0x8, 60, 100, b"ACGT");
        let mut dups = DuplicateTracker::new();
        let verdict = filter
            .evaluate(&record, "chr1", "AAAC", None, None, &mut dups)
            .unwrap();
        assert!(verdict.singleton);
    }
}
