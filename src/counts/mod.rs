pub mod report;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use ndarray::Array2;
use rustc_hash::FxHashMap;

use crate::filter::FilterVerdict;

/// Column order of the per-barcode counter vector. The report prints these
/// names verbatim, so the order here is load-bearing.
pub const COUNTER_NAMES: [&str; NUM_COUNTERS] = [
    "Total_sampled",
    "Filtered",
    "Blacklisted",
    "Low_MAPQ",
    "Missing_Flags",
    "Excluded_Flags",
    "Internal_Duplicates",
    "Marked_Duplicates",
    "Singletons",
    "Wrong_strand",
    "Wrong_motif",
    "Unwanted_GC_content",
    "Low_aligned_fraction",
];

pub const NUM_COUNTERS: usize = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    TotalSampled = 0,
    Filtered = 1,
    Blacklisted = 2,
    LowMapq = 3,
    MissingFlags = 4,
    ExcludedFlags = 5,
    InternalDuplicates = 6,
    MarkedDuplicates = 7,
    Singletons = 8,
    WrongStrand = 9,
    WrongMotif = 10,
    UnwantedGc = 11,
    LowAlignedFraction = 12,
}

///////////////////////////////
/// Barcode whitelist. Keeps the file order (report rows follow it) next to
/// a hash index for per-read lookup. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct BarcodeWhitelist {
    order: Vec<String>,
    index: FxHashMap<String, usize>,
}
impl BarcodeWhitelist {
    pub fn from_file(path: &Path) -> anyhow::Result<BarcodeWhitelist> {
        let f = File::open(path)
            .with_context(|| format!("could not open barcode whitelist {}", path.display()))?;
        let mut order = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            let bc = line.trim();
            if !bc.is_empty() {
                order.push(bc.to_string());
            }
        }
        anyhow::ensure!(!order.is_empty(), "barcode whitelist {} is empty", path.display());
        Ok(BarcodeWhitelist::from_list(order))
    }

    pub fn from_list(order: Vec<String>) -> BarcodeWhitelist {
        let index = order
            .iter()
            .enumerate()
            .map(|(i, bc)| (bc.clone(), i))
            .collect();
        BarcodeWhitelist { order, index }
    }

    /// Row index for a barcode, or None if it is not whitelisted
    pub fn get(&self, bc: &str) -> Option<usize> {
        self.index.get(bc).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.order.iter()
    }
}

///////////////////////////////
/// Per-chunk counter matrix, one row per whitelisted barcode, one column per
/// counter. Exclusively owned by one chunk-worker invocation.
pub struct ChunkCounts {
    counts: Array2<u64>,
}
impl ChunkCounts {
    pub fn new(num_barcodes: usize) -> ChunkCounts {
        ChunkCounts {
            counts: Array2::zeros((num_barcodes, NUM_COUNTERS)),
        }
    }

    /// Fold one evaluated record into the counters. Total always increments;
    /// each fired predicate increments its own column; Filtered increments by
    /// exactly one when any predicate fired.
    pub fn observe(&mut self, barcode_idx: usize, verdict: &FilterVerdict) {
        self.bump(barcode_idx, Counter::TotalSampled);
        if verdict.low_mapq {
            self.bump(barcode_idx, Counter::LowMapq);
        }
        if verdict.missing_flags {
            self.bump(barcode_idx, Counter::MissingFlags);
        }
        if verdict.excluded_flags {
            self.bump(barcode_idx, Counter::ExcludedFlags);
        }
        if verdict.low_aligned_fraction {
            self.bump(barcode_idx, Counter::LowAlignedFraction);
        }
        if verdict.blacklisted {
            self.bump(barcode_idx, Counter::Blacklisted);
        }
        if verdict.internal_duplicate {
            self.bump(barcode_idx, Counter::InternalDuplicates);
        }
        if verdict.marked_duplicate {
            self.bump(barcode_idx, Counter::MarkedDuplicates);
        }
        if verdict.singleton {
            self.bump(barcode_idx, Counter::Singletons);
        }
        if verdict.unwanted_gc {
            self.bump(barcode_idx, Counter::UnwantedGc);
        }
        if verdict.wrong_motif {
            self.bump(barcode_idx, Counter::WrongMotif);
        }
        if verdict.wrong_strand {
            self.bump(barcode_idx, Counter::WrongStrand);
        }
        if verdict.any() {
            self.bump(barcode_idx, Counter::Filtered);
        }
    }

    fn bump(&mut self, barcode_idx: usize, c: Counter) {
        self.counts[[barcode_idx, c as usize]] += 1;
    }

    pub fn into_matrix(self) -> Array2<u64> {
        self.counts
    }
}
