use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

pub type Cluster = Vec<String>;

/// Disjoint cover of a uid universe by clusters.
pub type Partition = Vec<Cluster>;

/// A partition together with its history and an optional seed uid. The "best"
/// partition is the one downstream steps operate on.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterPath {
  pub partitions: Vec<Partition>,
  pub i_best: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub seed_unique_id: Option<String>,
}

impl ClusterPath {
  pub fn from_partition(partition: Partition) -> Self {
    Self {
      partitions: vec![partition],
      i_best: 0,
      seed_unique_id: None,
    }
  }

  pub fn with_seed(partition: Partition, seed_unique_id: Option<String>) -> Self {
    Self {
      partitions: vec![partition],
      i_best: 0,
      seed_unique_id,
    }
  }

  pub fn best(&self) -> &Partition {
    &self.partitions[self.i_best]
  }

  pub fn add_partition(&mut self, partition: Partition) {
    self.partitions.push(partition);
    self.i_best = self.partitions.len() - 1;
  }

  pub fn n_seqs(&self) -> usize {
    self.best().iter().map(Vec::len).sum()
  }
}

/// All uids of a partition, in cluster-then-member order.
pub fn partition_uids(partition: &Partition) -> IndexSet<String> {
  partition.iter().flatten().cloned().collect()
}

pub fn is_clean_partition(partition: &Partition) -> bool {
  let mut seen = IndexSet::new();
  for cluster in partition {
    for uid in cluster {
      if !seen.insert(uid) {
        return false;
      }
    }
  }
  true
}

/// Fails with [`PairfamError::DuplicateUid`] naming the offending uid.
pub fn check_disjoint(partition: &Partition) -> Result<(), Report> {
  let mut seen = IndexSet::new();
  for cluster in partition {
    for uid in cluster {
      if !seen.insert(uid) {
        return Err(PairfamError::DuplicateUid(format!("uid '{uid}' appears in more than one cluster")).into());
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn cluster(uids: &[&str]) -> Cluster {
    uids.iter().map(|u| (*u).to_owned()).collect()
  }

  #[test]
  fn disjointness_check_names_the_uid() {
    let partition = vec![cluster(&["a", "b"]), cluster(&["b"])];
    assert!(!is_clean_partition(&partition));
    let err = check_disjoint(&partition).expect_err("expected duplicate");
    assert!(err.to_string().contains('b'));
  }

  #[test]
  fn best_tracks_added_partitions() {
    let mut cpath = ClusterPath::from_partition(vec![cluster(&["a"])]);
    cpath.add_partition(vec![cluster(&["a", "b"])]);
    assert_eq!(cpath.i_best, 1);
    assert_eq!(cpath.best().len(), 1);
  }
}
