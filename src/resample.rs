//! Stratified resampling of invalid categorical values
//!
//! Invalid (sentinel) values are replaced by draws from the weighted
//! distribution of valid values observed in the same stratum. Distributions
//! are built once per column and the draws happen as a batch, in record order,
//! from the caller's generator.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{PopSynError, Result};

/// Per-stratum weighted distributions over category values
pub struct StratifiedDistribution<K, V> {
    strata: BTreeMap<K, (Vec<V>, Vec<f64>, WeightedIndex<f64>)>,
}

impl<K: Ord, V: Ord + Clone> StratifiedDistribution<K, V> {
    /// Build from `(stratum, value, weight)` observations. Observations with a
    /// non-positive weight carry no mass and are ignored.
    pub fn from_observations<I>(observations: I) -> Self
    where
        I: IntoIterator<Item = (K, V, f64)>,
    {
        let mut totals: BTreeMap<K, BTreeMap<V, f64>> = BTreeMap::new();
        for (key, value, weight) in observations {
            if weight > 0.0 {
                *totals.entry(key).or_default().entry(value).or_insert(0.0) += weight;
            }
        }

        let strata = totals
            .into_iter()
            .filter_map(|(key, by_value)| {
                let (values, weights): (Vec<V>, Vec<f64>) = by_value.into_iter().unzip();
                let dist = WeightedIndex::new(&weights).ok()?;
                Some((key, (values, weights, dist)))
            })
            .collect();

        Self { strata }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.strata.contains_key(key)
    }

    /// Normalised shares of each value within a stratum
    pub fn shares(&self, key: &K) -> Option<Vec<(V, f64)>> {
        let (values, weights, _) = self.strata.get(key)?;
        let total: f64 = weights.iter().sum();
        Some(
            values
                .iter()
                .cloned()
                .zip(weights.iter().map(|w| w / total))
                .collect(),
        )
    }

    /// Draw one value for a stratum
    pub fn sample<R: Rng + ?Sized>(&self, key: &K, rng: &mut R) -> Option<V> {
        let (values, _, dist) = self.strata.get(key)?;
        Some(values[dist.sample(rng)].clone())
    }

    pub fn len(&self) -> usize {
        self.strata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strata.is_empty()
    }
}

/// Named accessor pair for one categorical column of a record type
pub struct CategoryColumn<R, V> {
    pub name: &'static str,
    pub get: fn(&R) -> V,
    pub set: fn(&mut R, V),
}

/// What a resampling pass changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResampleOutcome {
    pub column: &'static str,
    pub replaced: usize,
    pub strata: usize,
}

/// Replace every `sentinel` occurrence of `column` with a weighted draw from
/// the valid values of the record's stratum.
///
/// `strata[i]` is the stratum key of `records[i]`. Every stratum holding an
/// invalid record is checked before anything is overwritten, so on error the
/// records are left untouched.
pub fn resample_category<T, K, V, R>(
    records: &mut [T],
    strata: &[K],
    column: &CategoryColumn<T, V>,
    sentinel: &V,
    weight: fn(&T) -> f64,
    rng: &mut R,
) -> Result<ResampleOutcome>
where
    K: Ord + Display,
    V: Ord + Clone,
    R: Rng + ?Sized,
{
    if records.len() != strata.len() {
        return Err(PopSynError::config(format!(
            "resampling `{}`: {} records but {} stratum keys",
            column.name,
            records.len(),
            strata.len()
        )));
    }

    let mut invalid = Vec::new();
    let mut valid = Vec::with_capacity(records.len());
    for (idx, (record, key)) in records.iter().zip(strata).enumerate() {
        let value = (column.get)(record);
        if &value == sentinel {
            invalid.push(idx);
        } else {
            valid.push((key, value, weight(record)));
        }
    }

    let distribution = StratifiedDistribution::from_observations(valid);

    if let Some(&idx) = invalid.iter().find(|&&idx| !distribution.contains(&&strata[idx])) {
        return Err(PopSynError::InsufficientData {
            column: column.name.to_string(),
            stratum: strata[idx].to_string(),
        });
    }

    for &idx in &invalid {
        if let Some(value) = distribution.sample(&&strata[idx], rng) {
            (column.set)(&mut records[idx], value);
        }
    }

    Ok(ResampleOutcome {
        column: column.name,
        replaced: invalid.len(),
        strata: distribution.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{BTreeSet, HashMap};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        group: u32,
        class: u8,
        weight: f64,
    }

    const CLASS: CategoryColumn<Row, u8> = CategoryColumn {
        name: "class",
        get: |r| r.class,
        set: |r, v| r.class = v,
    };

    fn row(group: u32, class: u8, weight: f64) -> Row {
        Row {
            group,
            class,
            weight,
        }
    }

    fn strata(rows: &[Row]) -> Vec<u32> {
        rows.iter().map(|r| r.group).collect()
    }

    #[test]
    fn test_shares_are_weight_normalised() {
        let dist = StratifiedDistribution::from_observations(vec![
            (1u32, 'a', 30.0),
            (1, 'b', 10.0),
            (1, 'a', 10.0),
            (2, 'c', 5.0),
        ]);
        let shares = dist.shares(&1).unwrap();
        assert_eq!(shares, vec![('a', 0.8), ('b', 0.2)]);
        assert_eq!(dist.shares(&2).unwrap(), vec![('c', 1.0)]);
        assert!(dist.shares(&3).is_none());
    }

    #[test]
    fn test_no_sentinel_remains_and_domain_preserved() {
        let mut rows = vec![
            row(1, 1, 10.0),
            row(1, 2, 10.0),
            row(1, 7, 5.0),
            row(2, 3, 4.0),
            row(2, 7, 1.0),
            row(2, 7, 2.0),
        ];
        let keys = strata(&rows);
        let mut rng = StdRng::seed_from_u64(7);

        let outcome =
            resample_category(&mut rows, &keys, &CLASS, &7, |r| r.weight, &mut rng).unwrap();

        assert_eq!(outcome.replaced, 3);
        assert_eq!(outcome.strata, 2);
        assert!(rows.iter().all(|r| r.class != 7));
        // group 1 draws from {1, 2}; group 2 only ever sees class 3
        assert!(matches!(rows[2].class, 1 | 2));
        assert_eq!(rows[4].class, 3);
        assert_eq!(rows[5].class, 3);
        let domain: BTreeSet<u8> = rows.iter().map(|r| r.class).collect();
        assert!(domain.is_subset(&BTreeSet::from([1, 2, 3])));
    }

    #[test]
    fn test_weights_and_valid_rows_untouched() {
        let mut rows = vec![row(1, 4, 2.5), row(1, 9, 1.5), row(1, 5, 6.0)];
        let before = rows.clone();
        let keys = strata(&rows);
        let mut rng = StdRng::seed_from_u64(1);

        resample_category(&mut rows, &keys, &CLASS, &9, |r| r.weight, &mut rng).unwrap();

        let total_before: f64 = before.iter().map(|r| r.weight).sum();
        let total_after: f64 = rows.iter().map(|r| r.weight).sum();
        assert_eq!(total_before, total_after);
        assert_eq!(rows[0], before[0]);
        assert_eq!(rows[2], before[2]);
        assert_eq!(rows[1].weight, 1.5);
    }

    #[test]
    fn test_empty_stratum_is_insufficient_data() {
        let mut rows = vec![row(1, 1, 1.0), row(2, 7, 1.0)];
        let before = rows.clone();
        let keys = strata(&rows);
        let mut rng = StdRng::seed_from_u64(3);

        let err = resample_category(&mut rows, &keys, &CLASS, &7, |r| r.weight, &mut rng)
            .unwrap_err();
        match err {
            PopSynError::InsufficientData { column, stratum } => {
                assert_eq!(column, "class");
                assert_eq!(stratum, "2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(rows, before);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let base: Vec<Row> = (0..200)
            .map(|i| row(i % 3, if i % 4 == 0 { 7 } else { (i % 6) as u8 + 1 }, 1.0 + i as f64))
            .collect();
        let keys = strata(&base);

        let mut a = base.clone();
        let mut b = base.clone();
        resample_category(&mut a, &keys, &CLASS, &7, |r| r.weight, &mut StdRng::seed_from_u64(99))
            .unwrap();
        resample_category(&mut b, &keys, &CLASS, &7, |r| r.weight, &mut StdRng::seed_from_u64(99))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_draws_follow_weights() {
        // one heavy valid value and one light one; many invalid rows
        let mut rows = vec![row(1, 1, 90.0), row(1, 2, 10.0)];
        rows.extend((0..5000).map(|_| row(1, 7, 1.0)));
        let keys = strata(&rows);
        let mut rng = StdRng::seed_from_u64(42);

        resample_category(&mut rows, &keys, &CLASS, &7, |r| r.weight, &mut rng).unwrap();

        let mut counts: HashMap<u8, usize> = HashMap::new();
        for r in &rows[2..] {
            *counts.entry(r.class).or_insert(0) += 1;
        }
        let heavy = *counts.get(&1).unwrap_or(&0);
        let light = *counts.get(&2).unwrap_or(&0);
        assert!(heavy > light * 4, "weighting not applied: 1={heavy}, 2={light}");
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut rows = vec![row(1, 7, 1.0)];
        let mut rng = StdRng::seed_from_u64(0);
        let keys: &[u32] = &[];
        assert!(resample_category(&mut rows, keys, &CLASS, &7, |r| r.weight, &mut rng).is_err());
    }
}
