//! Synthetic-cell enrichment diagnostic. A cell whose reads pile into few
//! bins diverges from a Poisson cell of the same mean coverage; a cell with
//! homogeneous coverage does not. The distance reported is the square root
//! of the Jensen-Shannon divergence (base-2 logs), bounded in [0, 1].

/// Poisson probabilities for k = 0..len, via the stable recurrence
/// pmf(k) = pmf(k-1) * lambda / k
pub fn poisson_pmf(lambda: f64, len: usize) -> Vec<f64> {
    let mut pmf = vec![0.0; len];
    if len == 0 {
        return pmf;
    }
    pmf[0] = (-lambda).exp();
    for k in 1..len {
        pmf[k] = pmf[k - 1] * lambda / k as f64;
    }
    pmf
}

/// Square root of the Jensen-Shannon divergence between two equal-length
/// probability vectors, with 0*log(0) taken as 0
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> f64 {
    debug_assert_eq!(p.len(), q.len());
    let mut div = 0.0;
    for (&pi, &qi) in p.iter().zip(q) {
        let m = 0.5 * (pi + qi);
        if pi > 0.0 {
            div += 0.5 * pi * (pi / m).log2();
        }
        if qi > 0.0 {
            div += 0.5 * qi * (qi / m).log2();
        }
    }
    // rounding can push an identical pair a hair below zero
    div.max(0.0).sqrt()
}

/// Signal-weighted distribution over coverage depth: the share of all reads
/// that sit in bins of coverage v. None when the histogram holds no signal.
fn signal_distribution(hist: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = hist.iter().enumerate().map(|(v, h)| v as f64 * h).sum();
    if total <= 0.0 {
        return None;
    }
    Some(
        hist.iter()
            .enumerate()
            .map(|(v, h)| v as f64 * h / total)
            .collect(),
    )
}

/// Distance between one cell's per-bin coverage and a synthetic Poisson cell
/// with the same mean. Zero for empty input or a cell with no reads.
pub fn synthetic_jsd(counts: &[u64]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let n_bins = counts.len() as f64;
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let lambda = total as f64 / n_bins;
    let max_depth = *counts.iter().max().unwrap() as usize;

    let mut hist = vec![0.0; max_depth + 1];
    for &c in counts {
        hist[c as usize] += 1.0;
    }
    let expected: Vec<f64> = poisson_pmf(lambda, max_depth + 1)
        .into_iter()
        .map(|p| p * n_bins)
        .collect();

    match (signal_distribution(&hist), signal_distribution(&expected)) {
        (Some(p), Some(q)) => jensen_shannon_distance(&p, &q),
        _ => 0.0,
    }
}
