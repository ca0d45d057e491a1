use std::collections::BTreeMap;

/// Shannon entropy in bits over the character distribution of `s`.
///
/// Counts are kept in a `BTreeMap` so the summation order, and with it the
/// exact floating point result, is stable across calls.
pub fn shannon_entropy(s: &str) -> f64 {
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    let mut total = 0usize;
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let n = total as f64;
    let mut entropy = 0.0;
    for &count in counts.values() {
        let p = count as f64 / n;
        entropy -= p * p.log2();
    }
    entropy
}
