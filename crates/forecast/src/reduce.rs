//! Reductions applied to one bucket of samples.

use std::collections::BTreeMap;

/// Arithmetic mean; `None` when there is nothing to average.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().sum();
    Some(sum / values.len() as f64)
}

/// Largest value, ignoring NaN.
pub fn max(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
}

/// Majority vote for an integral category, falling back to the median.
///
/// A value occurring at least twice, and more often than any other, wins.
/// A tie for the highest count, or no repeated value at all, falls back to
/// the median, truncated toward zero (the mean of the two middle values for
/// an even count).
pub fn majority_or_median(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_default() += 1;
    }

    let top = counts.values().copied().max().unwrap_or(0);
    let mut leaders = counts.iter().filter(|&(_, &count)| count == top);
    if let (Some((&value, _)), None) = (leaders.next(), leaders.next()) {
        if top >= 2 {
            return Some(value);
        }
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let median = (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0;
        Some(median.trunc() as i64)
    }
}

/// Most frequent text value; ties go to the lexicographically smallest.
pub fn mode<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&'a str, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn majority_wins_when_repeated() {
        assert_eq!(majority_or_median(&[1, 1, 2]), Some(1));
        assert_eq!(majority_or_median(&[4, 4, 4, 1, 1, 5]), Some(4));
    }

    #[test]
    fn tied_vote_falls_back_to_the_median() {
        assert_eq!(majority_or_median(&[5, 2, 5, 2, 3]), Some(3));
        assert_eq!(majority_or_median(&[1, 1, 5, 5]), Some(3));
        assert_eq!(majority_or_median(&[2, 4, 4, 2]), Some(3));
    }

    #[test]
    fn median_when_no_value_repeats() {
        assert_eq!(majority_or_median(&[1, 2, 3]), Some(2));
        assert_eq!(majority_or_median(&[3, 1]), Some(2));
        assert_eq!(majority_or_median(&[1, 4]), Some(2));
        assert_eq!(majority_or_median(&[7]), Some(7));
        assert_eq!(majority_or_median(&[]), None);
    }

    #[test]
    fn mean_and_max_of_empty_are_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(max(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
        assert_eq!(max(&[1.0, f64::NAN, 6.5, 2.0]), Some(6.5));
    }

    #[test]
    fn mode_prefers_frequency_then_name() {
        assert_eq!(mode(["Rain", "Clouds", "Rain"]), Some("Rain".to_string()));
        assert_eq!(mode(["Rain", "Clouds"]), Some("Clouds".to_string()));
        assert_eq!(mode(std::iter::empty()), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the vote never leaves the observed range.
        #[test]
        fn majority_or_median_stays_within_bounds(
            values in prop::collection::vec(1i64..=5, 1..40)
        ) {
            let result = majority_or_median(&values).unwrap();
            let lo = *values.iter().min().unwrap();
            let hi = *values.iter().max().unwrap();
            prop_assert!(result >= lo && result <= hi);
        }

        /// Property: the vote does not depend on sample order.
        #[test]
        fn majority_or_median_is_order_independent(
            mut values in prop::collection::vec(-10i64..10, 1..30)
        ) {
            let forward = majority_or_median(&values);
            values.reverse();
            prop_assert_eq!(forward, majority_or_median(&values));
        }

        /// Property: two values sharing the top count never win outright.
        #[test]
        fn tied_top_count_uses_the_median(
            a in 1i64..=5,
            gap in 1i64..=4,
            repeats in 2usize..6,
        ) {
            let b = a + gap;
            let mut values = vec![a; repeats];
            values.extend(std::iter::repeat_n(b, repeats));
            // Even count split evenly: median is the mean of a and b.
            prop_assert_eq!(majority_or_median(&values), Some((a + b) / 2));
        }
    }
}
