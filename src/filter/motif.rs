use bio::alphabets::dna;
use rust_htslib::bam::record::Record as BamRecord;

use crate::genome::reference::ReferenceGenome;

/// One `READ,REF` motif pair: the read's forward-orientation prefix must
/// equal `read_motif`, and the reference context flanking the alignment must
/// equal `ref_motif`. Case-insensitive on both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotifFilter {
    pub read_motif: Vec<u8>,
    pub ref_motif: Vec<u8>,
}
impl MotifFilter {
    /// clap value parser for `--motif-filter READ,REF`
    pub fn parse(s: &str) -> Result<MotifFilter, String> {
        let mut parts = s.trim().split(',');
        let read_motif = parts.next().unwrap_or("").trim();
        let ref_motif = parts.next().unwrap_or("").trim();
        if read_motif.is_empty() || ref_motif.is_empty() || parts.next().is_some() {
            return Err(format!(
                "expected a motif pair like \"TA,TA\" (read motif, reference motif), got \"{}\"",
                s
            ));
        }
        Ok(MotifFilter {
            read_motif: read_motif.as_bytes().to_ascii_uppercase(),
            ref_motif: ref_motif.as_bytes().to_ascii_uppercase(),
        })
    }

    /// Reference window holding the context motif. Forward reads look
    /// upstream of the alignment start (window ends on the first aligned
    /// base); reverse reads look downstream of the alignment end. Windows
    /// are clamped to the contig, which makes a truncated context a
    /// non-match, same as the established behavior.
    pub fn ref_context_range(
        &self,
        reverse: bool,
        align_start: i64,
        align_end: i64,
        contig_len: u64,
    ) -> (u64, u64) {
        let flank = self.ref_motif.len() as i64 - 1;
        if reverse {
            let mut stop = align_end + flank;
            if stop as u64 > contig_len {
                stop = align_end;
            }
            ((align_end - 1).max(0) as u64, stop.max(0) as u64)
        } else {
            let mut start = align_start - flank;
            if start < 0 {
                start = align_start;
            }
            (start as u64, (align_start + 1) as u64)
        }
    }

    /// True if both the read prefix and the reference context match this pair
    pub fn matches(
        &self,
        record: &BamRecord,
        chrom: &str,
        genome: &mut ReferenceGenome,
    ) -> anyhow::Result<bool> {
        let seq = record.seq().as_bytes();
        if seq.len() < self.read_motif.len() {
            return Ok(false);
        }
        // prefix in sequencing orientation
        let forward = if record.is_reverse() {
            dna::revcomp(&seq)
        } else {
            seq
        };
        if forward[..self.read_motif.len()].to_ascii_uppercase() != self.read_motif {
            return Ok(false);
        }

        let contig_len = genome.contig_len(chrom).unwrap_or(0);
        let (start, stop) = self.ref_context_range(
            record.is_reverse(),
            record.pos(),
            record.cigar().end_pos(),
            contig_len,
        );
        let context = genome.fetch(chrom, start, stop)?;
        Ok(context.to_ascii_uppercase() == self.ref_motif)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_pair() {
        let m = MotifFilter::parse("ta, TA").unwrap();
        assert_eq!(m.read_motif, b"TA");
        assert_eq!(m.ref_motif, b"TA");
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(MotifFilter::parse("TA").is_err());
        assert!(MotifFilter::parse("TA,").is_err());
        assert!(MotifFilter::parse(",TA").is_err());
        assert!(MotifFilter::parse("TA,TA,TA").is_err());
    }

    #[test]
    fn forward_context_ends_on_alignment_start() {
        let m = MotifFilter::parse("AC,GT").unwrap();
        // 2-base motif: one flanking base plus the first aligned base
        assert_eq!(m.ref_context_range(false, 100, 150, 1000), (99, 101));
        // clamped at the contig start: window collapses onto the start base
        assert_eq!(m.ref_context_range(false, 0, 50, 1000), (0, 1));
    }

    #[test]
    fn reverse_context_starts_on_alignment_end() {
        let m = MotifFilter::parse("AC,GT").unwrap();
        assert_eq!(m.ref_context_range(true, 100, 150, 1000), (149, 151));
        // clamped at the contig end: window collapses and cannot match
        assert_eq!(m.ref_context_range(true, 100, 1000, 1000), (999, 1000));
    }
}
