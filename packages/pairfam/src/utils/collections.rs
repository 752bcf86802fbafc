use indexmap::IndexMap;
use std::hash::Hash;

/// Groups items by a key, preserving first-occurrence order of keys and the
/// input order within each group.
pub fn group_by_value<T, K: Eq + Hash, F: Fn(&T) -> K>(items: impl IntoIterator<Item = T>, keyfunc: F) -> Vec<(K, Vec<T>)> {
  let mut groups = IndexMap::<K, Vec<T>>::new();
  for item in items {
    groups.entry(keyfunc(&item)).or_default().push(item);
  }
  groups.into_iter().collect()
}

pub fn mean_of(values: impl IntoIterator<Item = f64>) -> f64 {
  let (mut sum, mut n) = (0.0, 0_usize);
  for val in values {
    sum += val;
    n += 1;
  }
  if n == 0 { 0.0 } else { sum / n as f64 }
}

pub fn median_of(values: impl IntoIterator<Item = f64>) -> f64 {
  let mut vals: Vec<f64> = values.into_iter().collect();
  if vals.is_empty() {
    return 0.0;
  }
  vals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  let mid = vals.len() / 2;
  if vals.len() % 2 == 1 {
    vals[mid]
  } else {
    (vals[mid - 1] + vals[mid]) / 2.0
  }
}
