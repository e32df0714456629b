//! Derived metrics. Everything here is a pure function of the records passed
//! in and is recomputed on every call.

use crate::collection::Entity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount<K> {
    pub category: K,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryShare<K> {
    pub category: K,
    pub count: usize,
    pub percentage: f64,
}

/// Per-parent totals of a foreign-key join. `parent_id` is `None` for the
/// bucket collecting children whose key is empty or dangling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinBucket {
    pub parent_id: Option<String>,
    pub label: String,
    pub count: usize,
    pub total: f64,
}

impl JoinBucket {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

/// Groups records by category; records without a category are skipped and
/// empty categories are omitted.
pub fn count_by<'a, T: 'a, K: Ord>(
    records: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> Option<K>,
) -> BTreeMap<K, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        if let Some(category) = key(record) {
            *counts.entry(category).or_insert(0) += 1;
        }
    }
    counts
}

/// Like [`count_by`] but every `expected` category is present, in the given
/// order, even with a zero count. Unexpected categories follow in key order.
pub fn count_by_categories<'a, T: 'a, K: Ord + Clone>(
    records: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> Option<K>,
    expected: &[K],
) -> Vec<CategoryCount<K>> {
    let mut counts = count_by(records, key);
    let mut result: Vec<CategoryCount<K>> = expected
        .iter()
        .map(|category| CategoryCount {
            category: category.clone(),
            count: counts.remove(category).unwrap_or(0),
        })
        .collect();
    result.extend(
        counts
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count }),
    );
    result
}

/// Counts a multi-valued field (tags, interests). A record contributes at most
/// once to each distinct value.
pub fn count_by_many<'a, T: 'a, K: Ord>(
    records: impl IntoIterator<Item = &'a T>,
    keys: impl Fn(&'a T) -> Vec<K>,
) -> BTreeMap<K, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let mut values = keys(record);
        values.sort();
        values.dedup();
        for value in values {
            *counts.entry(value).or_insert(0) += 1;
        }
    }
    counts
}

/// Arithmetic mean; `0.0` for no values.
pub fn average(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f64, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// `part / whole * 100` rounded to one decimal; `0.0` when `whole` is zero.
pub fn percent_of(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        return 0.0;
    }
    round_to(part / whole * 100.0, 1)
}

pub fn percentage(count: usize, total: usize) -> f64 {
    percent_of(count as f64, total as f64)
}

pub fn percentage_breakdown<K: Ord + Clone>(counts: &BTreeMap<K, usize>) -> Vec<CategoryShare<K>> {
    let total: usize = counts.values().sum();
    counts
        .iter()
        .map(|(category, count)| CategoryShare {
            category: category.clone(),
            count: *count,
            percentage: percentage(*count, total),
        })
        .collect()
}

/// Mean of `value` per category; records without a value or category are
/// ignored.
pub fn group_average<'a, T: 'a, K: Ord>(
    records: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> Option<K>,
    value: impl Fn(&'a T) -> Option<f64>,
) -> BTreeMap<K, f64> {
    let mut sums: BTreeMap<K, (f64, usize)> = BTreeMap::new();
    for record in records {
        let (Some(category), Some(value)) = (key(record), value(record)) else {
            continue;
        };
        let entry = sums.entry(category).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(category, (sum, count))| (category, sum / count as f64))
        .collect()
}

/// Id lookup over a parent collection. Missing targets resolve to `None`,
/// never a panic.
pub struct JoinIndex<'a, P> {
    by_id: HashMap<&'a str, &'a P>,
}

impl<'a, P: Entity> JoinIndex<'a, P> {
    pub fn new(parents: &'a [P]) -> Self {
        Self {
            by_id: parents.iter().map(|parent| (parent.id(), parent)).collect(),
        }
    }

    pub fn get(&self, id: Option<&str>) -> Option<&'a P> {
        id.and_then(|id| self.by_id.get(id).copied())
    }

    pub fn label(&self, id: Option<&str>, label: impl Fn(&P) -> String, placeholder: &str) -> String {
        self.get(id)
            .map(label)
            .unwrap_or_else(|| placeholder.to_string())
    }
}

/// Count and sum of `value` per parent, in parent order. Parents with no
/// children are included; children whose key is empty or points at a missing
/// parent land in a trailing `unknown_label` bucket, present only when
/// non-empty.
pub fn join_totals<'a, C: 'a, P: Entity>(
    children: impl IntoIterator<Item = &'a C>,
    foreign_key: impl Fn(&'a C) -> Option<&'a str>,
    value: impl Fn(&'a C) -> f64,
    parents: &[P],
    label: impl Fn(&P) -> String,
    unknown_label: &str,
) -> Vec<JoinBucket> {
    let mut buckets: Vec<JoinBucket> = parents
        .iter()
        .map(|parent| JoinBucket {
            parent_id: Some(parent.id().to_string()),
            label: label(parent),
            count: 0,
            total: 0.0,
        })
        .collect();
    let positions: HashMap<&str, usize> = parents
        .iter()
        .enumerate()
        .map(|(index, parent)| (parent.id(), index))
        .collect();
    let mut unknown = JoinBucket {
        parent_id: None,
        label: unknown_label.to_string(),
        count: 0,
        total: 0.0,
    };

    for child in children {
        let bucket = match foreign_key(child).and_then(|id| positions.get(id)) {
            Some(index) => &mut buckets[*index],
            None => &mut unknown,
        };
        bucket.count += 1;
        bucket.total += value(child);
    }

    if unknown.count > 0 {
        buckets.push(unknown);
    }
    buckets
}
