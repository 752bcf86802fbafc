use crate::annotation::partition::{partition_uids, Partition};
use crate::annotation::store::AnnotationStore;
use crate::seq::locus::{Locus, PairedLoci};
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;
use log::info;
use std::collections::HashMap;
use std::str::FromStr;
use strum_macros::Display;

/// Mutually exclusive per-sequence pairing outcomes against the truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PairCategory {
  Correct,
  Mispaired,
  Unpaired,
  Multiple,
}

/// Simulation uids follow the `<base>-<locus>` convention; two sequences are
/// true partners when they share the base.
pub fn uid_base(uid: &str) -> &str {
  match uid.rsplit_once('-') {
    Some((base, suffix)) if Locus::from_str(suffix).is_ok() => base,
    _ => uid,
  }
}

pub fn is_correctly_paired(uid: &str, pid: &str) -> bool {
  uid != pid && uid_base(uid) == uid_base(pid)
}

/// Per-seq correct cluster fractions. For each sequence with true cluster T
/// and inferred cluster I, purity credits `|T n I| / |I|` and completeness
/// `|T n I| / |T|`; both are averaged over sequences.
pub fn per_seq_ccf(inferred: &Partition, truth: &Partition) -> Result<(f64, f64), Report> {
  let mut inferred_of: HashMap<&String, usize> = HashMap::new();
  for (iclust, cluster) in inferred.iter().enumerate() {
    for uid in cluster {
      if inferred_of.insert(uid, iclust).is_some() {
        return Err(PairfamError::DuplicateUid(format!("uid '{uid}' appears twice in inferred partition")).into());
      }
    }
  }
  let mut true_of: HashMap<&String, usize> = HashMap::new();
  for (iclust, cluster) in truth.iter().enumerate() {
    for uid in cluster {
      if true_of.insert(uid, iclust).is_some() {
        return Err(PairfamError::DuplicateUid(format!("uid '{uid}' appears twice in true partition")).into());
      }
    }
  }

  let (mut purity_sum, mut completeness_sum, mut n_seqs) = (0.0, 0.0, 0_usize);
  for cluster in truth {
    for uid in cluster {
      let Some(&iinf) = inferred_of.get(uid) else { continue };
      let itru = true_of[uid];
      let n_common = truth[itru].iter().filter(|other| inferred_of.get(*other) == Some(&iinf)).count();
      purity_sum += n_common as f64 / inferred[iinf].len() as f64;
      completeness_sum += n_common as f64 / truth[itru].len() as f64;
      n_seqs += 1;
    }
  }
  if n_seqs == 0 {
    return Err(PairfamError::InputMalformed("no common uids between inferred and true partitions".to_owned()).into());
  }
  Ok((purity_sum / n_seqs as f64, completeness_sum / n_seqs as f64))
}

/// Restriction of `reference` to the uids present in `restrict_to`, dropping
/// clusters that become empty. Used before CCF comparison so missing queries
/// don't count against completeness.
pub fn remove_missing_uids_from_partition(reference: &Partition, restrict_to: &Partition) -> Partition {
  let keep = partition_uids(restrict_to);
  reference
    .iter()
    .map(|cluster| cluster.iter().filter(|uid| keep.contains(*uid)).cloned().collect())
    .filter(|cluster: &Vec<String>| !cluster.is_empty())
    .collect()
}

/// Pair-cleaning performance: per-sequence category counts, overall and keyed
/// by true-family size (the matrices the original writes out as csv/plots).
#[derive(Clone, Debug, Default)]
pub struct PairCleanEvaluation {
  pub totals: IndexMap<String, usize>,
  /// category -> true family size -> count; `correct-family` is not
  /// exclusive with the rest.
  pub by_family_size: IndexMap<String, IndexMap<usize, usize>>,
  pub n_seqs: usize,
}

/// Classifies every sequence's cleaned pair info against the truth implied by
/// the uid naming convention.
pub fn evaluate_pair_cleaning(store: &AnnotationStore, true_partitions: &IndexMap<Locus, Partition>) -> PairCleanEvaluation {
  let mut true_fam_size: HashMap<&String, usize> = HashMap::new();
  let mut true_fam_of: HashMap<&String, (Locus, usize)> = HashMap::new();
  for (&locus, partition) in true_partitions {
    for (iclust, cluster) in partition.iter().enumerate() {
      for uid in cluster {
        true_fam_size.insert(uid, cluster.len());
        true_fam_of.insert(uid, (locus, iclust));
      }
    }
  }

  let mut evaluation = PairCleanEvaluation::default();
  for locus in store.loci() {
    for family in store.families(locus) {
      for (iseq, uid) in family.unique_ids.iter().enumerate() {
        let pids = &family.paired_uids[iseq];
        let category = match pids.as_slice() {
          [] => PairCategory::Unpaired,
          [pid] if is_correctly_paired(uid, pid) => PairCategory::Correct,
          [_] => PairCategory::Mispaired,
          _ => PairCategory::Multiple,
        };
        let fsize = true_fam_size.get(uid).copied().unwrap_or(1);
        evaluation.n_seqs += 1;
        *evaluation.totals.entry(category.to_string()).or_insert(0) += 1;
        *evaluation
          .by_family_size
          .entry(category.to_string())
          .or_default()
          .entry(fsize)
          .or_insert(0) += 1;

        // correct family: the partner is in the same true family as the true
        // partner, i.e. we only got the wrong family member
        if let [pid] = pids.as_slice() {
          let correct_family = is_correctly_paired(uid, pid)
            || true_fam_of.get(pid).is_some_and(|&(plocus, piclust)| {
              true_partitions[&plocus][piclust].iter().any(|member| is_correctly_paired(uid, member))
            });
          if correct_family {
            *evaluation.totals.entry("correct-family".to_owned()).or_insert(0) += 1;
            *evaluation
              .by_family_size
              .entry("correct-family".to_owned())
              .or_default()
              .entry(fsize)
              .or_insert(0) += 1;
          }
        }
      }
    }
  }
  evaluation
}

/// CCF comparison of the single-chain and joint partitions against the
/// truth, per locus.
#[derive(Clone, Debug, Default)]
pub struct CcfComparison {
  pub single: (f64, f64),
  pub joint: (f64, f64),
}

pub fn evaluate_joint_partitions(
  ploci: PairedLoci,
  true_partitions: &IndexMap<Locus, Partition>,
  init_partitions: &IndexMap<Locus, Partition>,
  joint_partitions: &IndexMap<Locus, Partition>,
) -> Result<IndexMap<Locus, CcfComparison>, Report> {
  let mut comparisons = IndexMap::new();
  for (_, locus) in ploci.chains() {
    let truth = true_partitions
      .get(&locus)
      .ok_or_else(|| PairfamError::InputMalformed(format!("no true partition for locus {locus}")))?;
    let single = init_partitions
      .get(&locus)
      .ok_or_else(|| PairfamError::InputMalformed(format!("no single-chain partition for locus {locus}")))?;
    let joint = joint_partitions
      .get(&locus)
      .ok_or_else(|| PairfamError::InputMalformed(format!("no joint partition for locus {locus}")))?;
    let mut comparison = CcfComparison::default();
    for (which, inferred) in [("single", single), ("joint", joint)] {
      let restricted = remove_missing_uids_from_partition(truth, inferred);
      let ccfs = per_seq_ccf(inferred, &restricted)?;
      match which {
        "single" => comparison.single = ccfs,
        _ => comparison.joint = ccfs,
      }
    }
    info!(
      "{locus} ccfs (purity, completeness): single ({:.3}, {:.3})  joint ({:.3}, {:.3})",
      comparison.single.0, comparison.single.1, comparison.joint.0, comparison.joint.1
    );
    comparisons.insert(locus, comparison);
  }
  Ok(comparisons)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn partition(clusters: &[&[&str]]) -> Partition {
    clusters
      .iter()
      .map(|cluster| cluster.iter().map(|uid| (*uid).to_owned()).collect())
      .collect()
  }

  #[test]
  fn uid_base_strips_locus_suffix() {
    assert_eq!(uid_base("12345-igh"), "12345");
    assert_eq!(uid_base("12345-igk"), "12345");
    assert_eq!(uid_base("plain"), "plain");
    assert!(is_correctly_paired("x-igh", "x-igk"));
    assert!(!is_correctly_paired("x-igh", "y-igk"));
  }

  #[test]
  fn perfect_partition_has_unit_ccfs() -> Result<(), Report> {
    let truth = partition(&[&["a", "b"], &["c"]]);
    let (purity, completeness) = per_seq_ccf(&truth.clone(), &truth)?;
    assert_eq!((purity, completeness), (1.0, 1.0));
    Ok(())
  }

  #[test]
  fn oversplit_partition_loses_completeness_not_purity() -> Result<(), Report> {
    let truth = partition(&[&["a", "b", "c", "d"]]);
    let inferred = partition(&[&["a", "b"], &["c", "d"]]);
    let (purity, completeness) = per_seq_ccf(&inferred, &truth)?;
    assert_eq!(purity, 1.0);
    assert_eq!(completeness, 0.5);
    Ok(())
  }

  #[test]
  fn overmerged_partition_loses_purity_not_completeness() -> Result<(), Report> {
    let truth = partition(&[&["a", "b"], &["c", "d"]]);
    let inferred = partition(&[&["a", "b", "c", "d"]]);
    let (purity, completeness) = per_seq_ccf(&inferred, &truth)?;
    assert_eq!(purity, 0.5);
    assert_eq!(completeness, 1.0);
    Ok(())
  }

  #[test]
  fn reference_restriction_drops_missing_uids() {
    let truth = partition(&[&["a", "b", "x"], &["y"]]);
    let inferred = partition(&[&["a"], &["b"]]);
    let restricted = remove_missing_uids_from_partition(&truth, &inferred);
    assert_eq!(restricted, partition(&[&["a", "b"]]));
  }
}
