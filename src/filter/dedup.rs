use anyhow::bail;
use rust_htslib::bam::record::{Aux, Record as BamRecord};
use rustc_hash::FxHashSet;

/// What makes two reads duplicates of each other. `start` modes compare the
/// fragment start only; `end` modes add the TLEN-derived fragment end; `umi`
/// modes add the UMI tag on top of the cell barcode.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateFilter {
    #[value(name = "start_bc")]
    StartBc,
    #[value(name = "start_bc_umi")]
    StartBcUmi,
    #[value(name = "start_end_bc")]
    StartEndBc,
    #[value(name = "start_end_bc_umi")]
    StartEndBcUmi,
}
impl DuplicateFilter {
    pub fn uses_end(self) -> bool {
        matches!(self, DuplicateFilter::StartEndBc | DuplicateFilter::StartEndBcUmi)
    }
    pub fn uses_umi(self) -> bool {
        matches!(self, DuplicateFilter::StartBcUmi | DuplicateFilter::StartEndBcUmi)
    }
}

/// Duplicate-defining key for one read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DupSignature {
    pub barcode: String,
    pub umi: Option<Vec<u8>>,
    pub start: i64,
    pub end: Option<i64>,
    pub mate_tid: i32,
    pub reverse: bool,
}
impl DupSignature {
    pub fn from_record(
        record: &BamRecord,
        barcode: &str,
        mode: DuplicateFilter,
        umi_tag: &str,
    ) -> anyhow::Result<DupSignature> {
        let (start, end) = if mode.uses_end() {
            let tlen = record.insert_size();
            let (s, e) = if tlen >= 0 {
                (record.pos(), record.pos() + tlen)
            } else {
                (record.mpos(), record.mpos() - tlen)
            };
            // mates on different contigs have no meaningful TLEN
            let e = if record.tid() != record.mtid() {
                record.mpos()
            } else {
                e
            };
            (s, Some(e))
        } else {
            (record.pos(), None)
        };

        let umi = if mode.uses_umi() {
            match record.aux(umi_tag.as_bytes()) {
                Ok(Aux::String(u)) => Some(u.as_bytes().to_vec()),
                _ => bail!(
                    "record {} is missing the {} UMI tag required by the duplicate filter",
                    String::from_utf8_lossy(record.qname()),
                    umi_tag
                ),
            }
        } else {
            None
        };

        Ok(DupSignature {
            barcode: barcode.to_string(),
            umi,
            start,
            end,
            mate_tid: record.mtid(),
            reverse: record.is_reverse(),
        })
    }
}

/// Tracks signatures among reads sharing the current leftmost position.
/// Scoped to one chunk of one sample; relies on coordinate-sorted input.
/// Duplicate pairs straddling a chunk boundary are missed by design.
#[derive(Debug, Default)]
pub struct DuplicateTracker {
    last_pos: Option<i64>,
    seen: FxHashSet<DupSignature>,
}
impl DuplicateTracker {
    pub fn new() -> DuplicateTracker {
        DuplicateTracker::default()
    }

    /// Register one read; returns true if it duplicates a read already seen
    /// at the same leftmost position
    pub fn observe(&mut self, pos: i64, sig: DupSignature) -> bool {
        let dup = self.last_pos == Some(pos) && self.seen.contains(&sig);
        if self.last_pos != Some(pos) {
            self.seen.clear();
        }
        self.last_pos = Some(pos);
        self.seen.insert(sig);
        dup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(barcode: &str, start: i64) -> DupSignature {
        DupSignature {
            barcode: barcode.to_string(),
            umi: None,
            start,
            end: None,
            mate_tid: 0,
            reverse: false,
        }
    }

    #[test]
    fn repeat_signature_at_same_position_is_duplicate() {
        let mut tracker = DuplicateTracker::new();
        assert!(!tracker.observe(100, sig("AAAC", 100)));
        assert!(tracker.observe(100, sig("AAAC", 100)));
    }

    #[test]
    fn different_barcode_is_not_duplicate() {
        let mut tracker = DuplicateTracker::new();
        assert!(!tracker.observe(100, sig("AAAC", 100)));
        assert!(!tracker.observe(100, sig("GGGT", 100)));
        // but repeating either from here on is
        assert!(tracker.observe(100, sig("AAAC", 100)));
    }

    #[test]
    fn position_change_clears_the_window() {
        let mut tracker = DuplicateTracker::new();
        assert!(!tracker.observe(100, sig("AAAC", 100)));
        assert!(!tracker.observe(150, sig("AAAC", 100)));
        // the signature from pos 100 was forgotten when the position moved
        assert!(tracker.observe(150, sig("AAAC", 100)));
    }

    #[test]
    fn umi_distinguishes_signatures() {
        let mut tracker = DuplicateTracker::new();
        let mut a = sig("AAAC", 100);
        a.umi = Some(b"ACGT".to_vec());
        let mut b = sig("AAAC", 100);
        b.umi = Some(b"TTTT".to_vec());
        assert!(!tracker.observe(100, a.clone()));
        assert!(!tracker.observe(100, b));
        assert!(tracker.observe(100, a));
    }

    #[test]
    fn mode_flags() {
        assert!(!DuplicateFilter::StartBc.uses_end());
        assert!(!DuplicateFilter::StartBc.uses_umi());
        assert!(DuplicateFilter::StartEndBcUmi.uses_end());
        assert!(DuplicateFilter::StartEndBcUmi.uses_umi());
        assert!(DuplicateFilter::StartBcUmi.uses_umi());
        assert!(DuplicateFilter::StartEndBc.uses_end());
    }
}
