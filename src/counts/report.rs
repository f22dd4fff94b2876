use std::io::Write;

use ndarray::Array2;

use super::{BarcodeWhitelist, COUNTER_NAMES, NUM_COUNTERS};

/// Write the final reduction as a tab-separated table: one row per
/// sample×barcode, a raw Total_sampled column, every other counter as a
/// percentage of that row's total. A row with total 0 renders all
/// percentages as 0 rather than dividing by zero.
pub fn write_filter_report<W: Write>(
    out: W,
    labels: &[String],
    barcodes: &BarcodeWhitelist,
    per_sample: &[Array2<u64>],
) -> anyhow::Result<()> {
    assert_eq!(labels.len(), per_sample.len());

    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_writer(out);

    let mut header = vec!["".to_string()];
    header.extend(COUNTER_NAMES.iter().map(|s| s.to_string()));
    wtr.write_record(&header)?;

    for (label, matrix) in labels.iter().zip(per_sample) {
        for (bi, bc) in barcodes.iter().enumerate() {
            let total = matrix[[bi, 0]];
            let mut row = Vec::with_capacity(NUM_COUNTERS + 1);
            row.push(format!("{}_{}", label, bc));
            row.push(total.to_string());
            for ci in 1..NUM_COUNTERS {
                let pct = if total == 0 {
                    0.0
                } else {
                    matrix[[bi, ci]] as f64 / total as f64 * 100.0
                };
                row.push(format!("{:.6}", pct));
            }
            wtr.write_record(&row)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counts::Counter;

    fn render(labels: &[&str], barcodes: Vec<String>, per_sample: &[Array2<u64>]) -> String {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        let wl = BarcodeWhitelist::from_list(barcodes);
        let mut buf = Vec::new();
        write_filter_report(&mut buf, &labels, &wl, per_sample).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn rows_are_sample_barcode_and_percentages_of_total() {
        let mut m = Array2::<u64>::zeros((2, NUM_COUNTERS));
        m[[0, Counter::TotalSampled as usize]] = 13;
        m[[0, Counter::Filtered as usize]] = 3;
        m[[1, Counter::TotalSampled as usize]] = 12;
        m[[1, Counter::Filtered as usize]] = 1;
        let text = render(&["s1"], vec!["A".to_string(), "B".to_string()], &[m]);
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("\tTotal_sampled\tFiltered\tBlacklisted"));
        let row_a = lines.next().unwrap();
        let fields: Vec<&str> = row_a.split('\t').collect();
        assert_eq!(fields[0], "s1_A");
        assert_eq!(fields[1], "13");
        assert_eq!(fields[2], "23.076923");
        let row_b = lines.next().unwrap();
        assert!(row_b.starts_with("s1_B\t12\t8.333333"));
    }

    #[test]
    fn zero_total_row_renders_zero_percentages() {
        let m = Array2::<u64>::zeros((1, NUM_COUNTERS));
        let text = render(&["s1"], vec!["A".to_string()], &[m]);
        let row = text.lines().nth(1).unwrap();
        let fields: Vec<&str> = row.split('\t').collect();
        assert_eq!(fields[1], "0");
        for f in &fields[2..] {
            assert_eq!(*f, "0.000000");
        }
    }

    #[test]
    fn one_row_block_per_sample_in_label_order() {
        let m1 = Array2::<u64>::zeros((1, NUM_COUNTERS));
        let m2 = Array2::<u64>::zeros((1, NUM_COUNTERS));
        let text = render(&["s1", "s2"], vec!["A".to_string()], &[m1, m2]);
        let names: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(names, vec!["s1_A", "s2_A"]);
    }
}
