use std::collections::HashMap;

/// Arithmetic mean of `values` over the given cells.
pub fn mean(values: &[f64], cells: &[usize]) -> f64 {
    let sum: f64 = cells.iter().map(|&c| values[c]).sum();
    sum / cells.len() as f64
}

/// Most frequent value over the given cells. Ties go to the value whose first
/// occurrence comes earliest in cell order.
pub fn mode(values: &[f64], cells: &[usize]) -> f64 {
    let mut slots: HashMap<u64, usize> = HashMap::new();
    let mut tally: Vec<(f64, usize)> = Vec::new();
    for &c in cells {
        // +0.0 folds -0.0 into 0.0
        let v = values[c] + 0.0;
        let slot = *slots.entry(v.to_bits()).or_insert_with(|| {
            tally.push((v, 0));
            tally.len() - 1
        });
        tally[slot].1 += 1;
    }

    let mut best = (f64::NAN, 0usize);
    for &(v, n) in &tally {
        if n > best.1 {
            best = (v, n);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_over_subset() {
        let v = [1.0, 2.0, 3.0, 10.0];
        assert!((mean(&v, &[0, 1, 2]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn mode_picks_strict_majority() {
        let v = [4.0, 2.0, 2.0, 4.0, 2.0];
        assert_eq!(mode(&v, &[0, 1, 2, 3, 4]), 2.0);
    }

    #[test]
    fn mode_tie_goes_to_first_seen_not_smallest() {
        let v = [9.0, 1.0, 1.0, 9.0];
        assert_eq!(mode(&v, &[0, 1, 2, 3]), 9.0);
        assert_eq!(mode(&v, &[1, 0, 3, 2]), 1.0);
    }
}
