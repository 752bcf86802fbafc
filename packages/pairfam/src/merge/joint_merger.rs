use crate::annotation::annotation::Annotation;
use crate::annotation::partition::{check_disjoint, partition_uids, Cluster, Partition};
use crate::annotation::store::AnnotationStore;
use crate::pairing::bad_pair_filter::{FilteredPartitions, UnpairedMap};
use crate::seq::hamming::hamming_frac_nuc;
use crate::seq::locus::{Chain, Locus, PairedLoci};
use crate::utils::collections::{group_by_value, mean_of};
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// Which naive-Hamming threshold family to use when deciding whether two
/// opposite-chain clusters must be kept split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum HBoundType {
  Likelihood,
  NaiveHamming,
}

/// `(lo, hi)` naive-Hamming-fraction bounds, linear in the overall mean
/// mutation frequency. Two clusters with naive hfrac above `hi` can never be
/// merged.
pub fn naive_hamming_bounds(bound_type: HBoundType, mean_mut_freq: f64) -> (f64, f64) {
  match bound_type {
    HBoundType::Likelihood => (0.015 + 0.015 * mean_mut_freq, 0.045 + 0.045 * mean_mut_freq),
    HBoundType::NaiveHamming => {
      let bound = 0.035 + 0.02 * mean_mut_freq;
      (bound, bound)
    }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct MergeConfig {
  pub naive_hamming_bound_type: HBoundType,

  /// Skip all naive-Hamming splitting (correct only when everything should
  /// end up in one final cluster).
  pub overmerge: bool,

  /// Verify partition disjointness after each incorporation step.
  pub check_partitions: bool,
}

impl Default for MergeConfig {
  fn default() -> Self {
    Self {
      naive_hamming_bound_type: HBoundType::Likelihood,
      overmerge: false,
      check_partitions: false,
    }
  }
}

/// The reconciled heavy+light partition: per-locus uid lists whose i-th
/// clusters are the heavy and light halves of the same joint family.
#[derive(Clone, Debug, Default)]
pub struct JointPartitions {
  pub by_locus: IndexMap<Locus, Partition>,
  pub cluster_pairs: Vec<(Cluster, Cluster)>,
}

/// Reconciles the heavy and light partitions into one joint partition and
/// re-inserts the previously removed unpaired sequences.
///
/// The light uids are renamed to their heavy partners' uids for the duration
/// of the reconciliation and renamed back on output, so cluster identity can
/// be tracked across chains with plain set operations.
pub fn merge_chains(ploci: PairedLoci, filtered: &FilteredPartitions, cfg: &MergeConfig) -> Result<JointPartitions, Report> {
  info!("merging {}+{} partitions", ploci.h, ploci.l);

  let mut init_partitions: IndexMap<Chain, Partition> = IndexMap::new();
  init_partitions.insert(Chain::Heavy, filtered.cpaths[&ploci.h].best().clone());
  init_partitions.insert(Chain::Light, filtered.cpaths[&ploci.l].best().clone());

  let l_translations = translate_paired_uids(ploci, &mut init_partitions, filtered)?;

  let h_uids = partition_uids(&init_partitions[&Chain::Heavy]);
  let l_uids = partition_uids(&init_partitions[&Chain::Light]);
  let n_common = h_uids.intersection(&l_uids).count();
  if n_common == 0 {
    if !h_uids.is_empty() || !l_uids.is_empty() {
      warn!(
        "no uids in common between heavy ({} uids) and light ({} uids) partitions",
        h_uids.len(),
        l_uids.len()
      );
    }
    let mut joint = JointPartitions::default();
    joint.by_locus.insert(ploci.h, vec![]);
    joint.by_locus.insert(ploci.l, vec![]);
    return Ok(joint);
  }
  if h_uids.len() != n_common || l_uids.len() != n_common {
    warn!(
      "heavy and light partitions only partially overlap: {} heavy, {} light, {} common",
      h_uids.len(),
      l_uids.len(),
      n_common
    );
  }

  let mut final_partition: Vec<Cluster> = vec![];
  let mut fclust_sets: Vec<IndexSet<String>> = vec![];
  let mut fclust_indices: HashMap<String, usize> = HashMap::new();
  let initp_sets: IndexMap<Chain, Vec<IndexSet<String>>> = init_partitions
    .iter()
    .map(|(&chain, partition)| (chain, partition.iter().map(|c| c.iter().cloned().collect()).collect()))
    .collect();

  // for each single cluster of each chain, find the opposite-chain clusters
  // sharing uids, decide which of their boundaries to apply, and fold the
  // result into the final partition
  for (single_chain, list_chain) in [(Chain::Heavy, Chain::Light), (Chain::Light, Chain::Heavy)] {
    for single_cluster in &init_partitions[&single_chain] {
      let single_cset: IndexSet<&String> = single_cluster.iter().collect();
      let cluster_list: Vec<(&Cluster, &Annotation)> = initp_sets[&list_chain]
        .iter()
        .enumerate()
        .filter(|(_, cset)| cset.iter().any(|uid| single_cset.contains(uid)))
        .map(|(iclust, _)| {
          (
            &init_partitions[&list_chain][iclust],
            &filtered.antn_lists[&ploci.locus(list_chain)][iclust],
          )
        })
        .collect();

      let resolved = resolve_discordant_clusters(single_cluster, &cluster_list, cfg);
      if cfg.check_partitions {
        check_disjoint(&resolved)?;
      }
      incorporate_rclusts(&mut final_partition, &mut fclust_sets, &mut fclust_indices, resolved);
    }
  }

  final_partition.retain(|cluster| !cluster.is_empty());
  check_disjoint(&final_partition)?;
  let final_uids = partition_uids(&final_partition);
  for uid in h_uids.union(&l_uids) {
    if !final_uids.contains(uid) {
      return crate::make_internal_error!("uid '{uid}' missing from joint partition");
    }
  }

  let mut joint = untranslate_pids(ploci, filtered, &l_translations, &final_partition);
  re_add_unpaired(ploci, &mut joint, &filtered.unpaired);

  joint.cluster_pairs = joint.by_locus[&ploci.h]
    .iter()
    .zip(joint.by_locus[&ploci.l].iter())
    .map(|(h_clust, l_clust)| (h_clust.clone(), l_clust.clone()))
    .collect();

  info!(
    "joint partition: {} clusters ({} heavy seqs, {} light seqs)",
    joint.by_locus[&ploci.h].len(),
    joint.by_locus[&ploci.h].iter().map(Vec::len).sum::<usize>(),
    joint.by_locus[&ploci.l].iter().map(Vec::len).sum::<usize>(),
  );
  Ok(joint)
}

/// Renames every light uid to its heavy partner's uid in the light partition;
/// returns the reverse map (heavy name -> original light uid).
fn translate_paired_uids(
  ploci: PairedLoci,
  init_partitions: &mut IndexMap<Chain, Partition>,
  filtered: &FilteredPartitions,
) -> Result<IndexMap<String, String>, Report> {
  let mut h_partner: HashMap<&str, &str> = HashMap::new();
  for family in &filtered.antn_lists[&ploci.h] {
    for (iseq, h_id) in family.unique_ids.iter().enumerate() {
      match family.paired_uids[iseq].as_slice() {
        [pid] => {
          h_partner.insert(pid, h_id);
        }
        [] => {
          return Err(PairfamError::InconsistentPairing(format!("no paired uids for '{h_id}'")).into());
        }
        pids => {
          return Err(
            PairfamError::InconsistentPairing(format!("multiple paired uids {} for {} sequence '{h_id}'", pids.join(" "), ploci.h))
              .into(),
          );
        }
      }
    }
  }

  let mut l_translations = IndexMap::new();
  let light_partition = init_partitions.get_mut(&Chain::Light).expect("light partition present");
  for cluster in light_partition {
    for uid in cluster {
      let &h_id = h_partner
        .get(uid.as_str())
        .ok_or_else(|| PairfamError::InconsistentPairing(format!("light uid '{uid}' has no reciprocal heavy partner")))?;
      l_translations.insert(h_id.to_owned(), std::mem::replace(uid, h_id.to_owned()));
    }
  }
  Ok(l_translations)
}

/// Starting with `single_cluster` (one chain) and the opposite-chain clusters
/// overlapping it, reapportion all their uids: split first by CDR3 length,
/// then by naive-sequence Hamming fraction against a mean-SHM-dependent
/// threshold, merging greedily whatever is not provably distinct.
fn resolve_discordant_clusters(
  single_cluster: &Cluster,
  cluster_list: &[(&Cluster, &Annotation)],
  cfg: &MergeConfig,
) -> Vec<Cluster> {
  if cluster_list.len() < 2 {
    return vec![single_cluster.clone()];
  }

  let hi_hbound = if cfg.overmerge {
    1.0
  } else {
    let mean_mut_freq = mean_of(cluster_list.iter().flat_map(|(_, ann)| ann.mut_freqs.iter().copied()));
    naive_hamming_bounds(cfg.naive_hamming_bound_type, mean_mut_freq).1
  };

  let cdr3_groups = group_by_value(cluster_list.iter().copied(), |(_, ann)| ann.cdr3_length);

  let mut return_clusts: Vec<Cluster> = vec![];
  for (_, cdr_group) in cdr3_groups {
    // who must be split from whom within this CDR3 class
    let mut clusters_to_split: Vec<Vec<usize>> = vec![vec![]; cdr_group.len()];
    for (iclust, jclust) in (0..cdr_group.len()).tuple_combinations() {
      let (naive1, naive2) = (&cdr_group[iclust].1.naive_seq, &cdr_group[jclust].1.naive_seq);
      let must_split = if naive1.len() == naive2.len() {
        hamming_frac_nuc(naive1, naive2).map_or(true, |(hfrac, _)| hfrac > hi_hbound)
      } else {
        true
      };
      if must_split {
        clusters_to_split[iclust].push(jclust);
        clusters_to_split[jclust].push(iclust);
      }
    }

    // greedy merge: each cluster joins the first return cluster containing
    // nothing it must be split from
    let mut tmpclusts: Vec<Cluster> = vec![];
    for (iclust, (cclust, _)) in cdr_group.iter().enumerate() {
      let split_uids: IndexSet<&String> = clusters_to_split[iclust]
        .iter()
        .flat_map(|&jclust| cdr_group[jclust].0.iter())
        .collect();
      let target = tmpclusts
        .iter_mut()
        .find(|rclust| !rclust.iter().any(|uid| split_uids.contains(uid)));
      match target {
        Some(rclust) => rclust.extend(cclust.iter().cloned()),
        None => tmpclusts.push((*cclust).clone()),
      }
    }
    return_clusts.extend(tmpclusts);
  }
  return_clusts
}

/// Folds newly resolved clusters into the final partition. Overlap with an
/// already-committed cluster is removed from the larger of the two (the
/// larger one is assumed to be lumping); second and later overlaps of the
/// same final cluster are removed from both sides and pushed as their own
/// cluster, so distinct resolved clusters never merge through a shared final
/// cluster.
fn incorporate_rclusts(
  final_partition: &mut Vec<Cluster>,
  fclust_sets: &mut Vec<IndexSet<String>>,
  fclust_indices: &mut HashMap<String, usize>,
  mut resolved: Vec<Cluster>,
) {
  let mut rc_sets: Vec<IndexSet<String>> = resolved.iter().map(|c| c.iter().cloned().collect()).collect();
  let rc_ids: IndexSet<String> = resolved.iter().flatten().cloned().collect();

  let ifovrlps: Vec<usize> = rc_ids
    .iter()
    .filter_map(|uid| fclust_indices.get(uid).copied())
    .collect::<IndexSet<usize>>()
    .into_iter()
    .sorted()
    .collect();

  for ifclust in ifovrlps {
    let old_fset = fclust_sets[ifclust].clone();
    let irclusts: Vec<usize> = (0..rc_sets.len())
      .filter(|&irclust| rc_sets[irclust].iter().any(|uid| old_fset.contains(uid)))
      .collect();
    let mut new_fset: IndexSet<String> = final_partition[ifclust].iter().cloned().collect();
    for (pos, &irclust) in irclusts.iter().enumerate() {
      let mut rset = rc_sets[irclust].clone();
      let common: IndexSet<String> = new_fset.iter().filter(|uid| rset.contains(*uid)).cloned().collect();
      if pos == 0 {
        // remove the common ids from the larger side, effectively splitting
        // according to the splittier of the two
        if new_fset.len() > rset.len() {
          new_fset.retain(|uid| !common.contains(uid));
        } else {
          rset.retain(|uid| !common.contains(uid));
        }
      } else {
        new_fset.retain(|uid| !common.contains(uid));
        rset.retain(|uid| !common.contains(uid));
        resolved.push(common.iter().cloned().collect());
        rc_sets.push(common);
      }
      resolved[irclust] = rset.iter().cloned().collect();
      rc_sets[irclust] = rset;
    }
    final_partition[ifclust] = new_fset.iter().cloned().collect();
    for uid in &final_partition[ifclust] {
      fclust_indices.insert(uid.clone(), ifclust);
    }
    fclust_sets[ifclust] = new_fset;
  }

  let n_before = final_partition.len();
  for (iclust, cluster) in resolved.into_iter().enumerate() {
    for uid in &cluster {
      fclust_indices.insert(uid.clone(), n_before + iclust);
    }
    fclust_sets.push(cluster.iter().cloned().collect());
    final_partition.push(cluster);
  }
}

/// Renames light uids back and materializes the per-locus joint partitions
/// (each chain keeps only the uids of its own locus).
fn untranslate_pids(
  ploci: PairedLoci,
  filtered: &FilteredPartitions,
  l_translations: &IndexMap<String, String>,
  final_partition: &[Cluster],
) -> JointPartitions {
  let heavy_uids: IndexSet<&String> = filtered.antn_lists[&ploci.h]
    .iter()
    .flat_map(|family| family.unique_ids.iter())
    .collect();

  let mut joint = JointPartitions::default();
  let h_partition: Partition = final_partition
    .iter()
    .map(|cluster| cluster.iter().filter(|uid| heavy_uids.contains(uid)).cloned().collect())
    .collect();
  let l_partition: Partition = final_partition
    .iter()
    .map(|cluster| {
      cluster
        .iter()
        .filter_map(|uid| l_translations.get(uid).cloned())
        .collect()
    })
    .collect();
  joint.by_locus.insert(ploci.h, h_partition);
  joint.by_locus.insert(ploci.l, l_partition);
  joint
}

/// Re-inserts the sequences removed by the bad-pair filter into the joint
/// partition: next to their nearest paired neighbour when one exists,
/// otherwise accreting with the rest of their original single-chain family,
/// otherwise as new singletons.
fn re_add_unpaired(ploci: PairedLoci, joint: &mut JointPartitions, unpaired: &UnpairedMap) {
  let mut n_added: IndexMap<Locus, usize> = IndexMap::new();
  for (_, locus) in ploci.chains() {
    let partition = joint.by_locus.get_mut(&locus).expect("locus partition present");
    let mut jp_indices: HashMap<String, usize> = partition
      .iter()
      .enumerate()
      .flat_map(|(iclust, cluster)| cluster.iter().map(move |uid| (uid.clone(), iclust)))
      .collect();
    let Some(locus_unpaired) = unpaired.get(&locus) else { continue };
    for (upid, nearfo) in locus_unpaired {
      *n_added.entry(locus).or_insert(0) += 1;
      if !nearfo.had_paired_family_members {
        // it was effectively a singleton, keep it one
        partition.push(vec![upid.clone()]);
        jp_indices.insert(upid.clone(), partition.len() - 1);
        continue;
      }
      let nearids: Vec<&String> = nearfo.nearest_paired.as_ref().map_or_else(
        || nearfo.single_chain_family.iter().flatten().collect(),
        |nearest| vec![nearest],
      );
      let ijclusts: Vec<usize> = nearids
        .iter()
        .filter_map(|uid| jp_indices.get(*uid).copied())
        .collect::<IndexSet<usize>>()
        .into_iter()
        .sorted()
        .collect();
      match ijclusts.as_slice() {
        [] => {
          // none of its family members have been re-added yet; they will
          // accrete to this cluster on later iterations
          partition.push(vec![upid.clone()]);
          jp_indices.insert(upid.clone(), partition.len() - 1);
        }
        [first, rest @ ..] => {
          if !rest.is_empty() {
            warn!("multiple joint clusters for unpaired seq '{upid}', attaching to the first");
          }
          partition[*first].push(upid.clone());
          jp_indices.insert(upid.clone(), *first);
        }
      }
    }
  }
  if n_added.values().sum::<usize>() > 0 {
    info!(
      "re-added unpaired seqs: {}",
      n_added.iter().map(|(locus, n)| format!("{locus} {n}")).join("  ")
    );
  }
}

/// After merging: give every still-unpaired member of a joint cluster pair
/// the partner of its nearest paired neighbour, so downstream consumers see a
/// fully paired family. Cluster pairs with no reciprocally paired members are
/// skipped.
pub fn pair_unpaired_with_family(
  ploci: PairedLoci,
  store: &mut AnnotationStore,
  joint: &JointPartitions,
  unpaired: &UnpairedMap,
) -> Result<usize, Report> {
  let mut n_skipped = 0;
  let mut n_paired = 0;
  for (h_clust, l_clust) in &joint.cluster_pairs {
    let clusters = [(ploci.h, h_clust, l_clust), (ploci.l, l_clust, h_clust)];

    let n_recip: Vec<usize> = clusters
      .iter()
      .map(|(_, cluster, opposite)| {
        cluster
          .iter()
          .filter(|uid| {
            store
              .pids_of(uid)
              .is_some_and(|pids| pids.len() == 1 && opposite.contains(&pids[0]))
          })
          .count()
      })
      .collect();
    if n_recip[0] != n_recip[1] {
      warn!("cluster pair with unequal reciprocal counts ({} vs {}), skipping", n_recip[0], n_recip[1]);
      n_skipped += 1;
      continue;
    }
    if n_recip[0] == 0 {
      n_skipped += 1;
      continue;
    }

    for (locus, cluster, _) in clusters {
      let unpaired_uids: Vec<String> = cluster
        .iter()
        .filter(|uid| store.pids_of(uid).is_some_and(<[String]>::is_empty))
        .cloned()
        .collect();
      for unid in unpaired_uids {
        let Some(nearest) = unpaired
          .get(&locus)
          .and_then(|m| m.get(&unid))
          .and_then(|nearfo| nearfo.nearest_paired.clone())
        else {
          continue;
        };
        let Some(partner) = store.pids_of(&nearest).and_then(|pids| pids.first().cloned()) else {
          continue;
        };
        store.set_pids(&unid, vec![partner])?;
        n_paired += 1;
      }
    }
  }
  if n_skipped > 0 {
    info!("skipped {n_skipped} family pairs with no reciprocally paired seqs");
  }
  Ok(n_paired)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use crate::annotation::partition::ClusterPath;
  use crate::pairing::bad_pair_filter::UnpairedSeq;
  use pretty_assertions::assert_eq;

  fn family(locus: Locus, uids: &[&str], seqs: &[&str], naive_seq: &str, cdr3_length: usize, pids: &[&str]) -> Annotation {
    let mut annotation = simple_annotation(locus, uids, seqs, naive_seq);
    annotation.cdr3_length = cdr3_length;
    annotation.paired_uids = pids.iter().map(|pid| vec![(*pid).to_owned()]).collect();
    annotation
  }

  fn filtered_from(antn_lists: IndexMap<Locus, Vec<Annotation>>) -> FilteredPartitions {
    let cpaths = antn_lists
      .iter()
      .map(|(&locus, families)| {
        let partition = families.iter().map(|fam| fam.unique_ids.clone()).collect();
        (locus, ClusterPath::from_partition(partition))
      })
      .collect();
    FilteredPartitions {
      cpaths,
      antn_lists,
      unpaired: UnpairedMap::default(),
    }
  }

  fn ploci() -> PairedLoci {
    PairedLoci::new(Locus::Igk)
  }

  #[test]
  fn hamming_bound_constants() {
    let (lo, hi) = naive_hamming_bounds(HBoundType::Likelihood, 0.1);
    assert!((lo - 0.0165).abs() < 1e-12);
    assert!((hi - 0.0495).abs() < 1e-12);
    let (lo, hi) = naive_hamming_bounds(HBoundType::NaiveHamming, 0.1);
    assert!((lo - hi).abs() < 1e-12);
    assert!((lo - 0.037).abs() < 1e-12);
  }

  /// Scenario: reciprocal pair already correct; the joint partition is the
  /// single joint family, with the light uid restored on output.
  #[test]
  fn reciprocal_pair_gives_single_joint_cluster() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(Locus::Igh, vec![family(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG", 6, &["l1"])]);
    antn_lists.insert(Locus::Igk, vec![family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 6, &["h1"])]);
    let filtered = filtered_from(antn_lists);
    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    assert_eq!(joint.by_locus[&Locus::Igh], vec![vec!["h1".to_owned()]]);
    assert_eq!(joint.by_locus[&Locus::Igk], vec![vec!["l1".to_owned()]]);
    assert_eq!(joint.cluster_pairs.len(), 1);
    Ok(())
  }

  /// Scenario: CDR3 discordance. The heavy cluster {h1,h2} must be split
  /// because its light partners have different CDR3 lengths.
  #[test]
  fn cdr3_discordance_splits_heavy_cluster() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(
      Locus::Igh,
      vec![family(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG", 45, &["l1", "l2"])],
    );
    antn_lists.insert(
      Locus::Igk,
      vec![
        family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 45, &["h1"]),
        family(Locus::Igk, &["l2"], &["TGCTGA"], "TGCTGA", 48, &["h2"]),
      ],
    );
    let filtered = filtered_from(antn_lists);
    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    let mut h_clusters = joint.by_locus[&Locus::Igh].clone();
    h_clusters.sort();
    assert_eq!(h_clusters, vec![vec!["h1".to_owned()], vec!["h2".to_owned()]]);
    for (h_clust, l_clust) in &joint.cluster_pairs {
      match h_clust.as_slice() {
        [h] if h == "h1" => assert_eq!(l_clust, &vec!["l1".to_owned()]),
        [h] if h == "h2" => assert_eq!(l_clust, &vec!["l2".to_owned()]),
        other => panic!("unexpected heavy cluster {other:?}"),
      }
    }
    Ok(())
  }

  /// Same CDR3 but very different light naive seqs: still split.
  #[test]
  fn naive_hamming_discordance_splits_heavy_cluster() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(
      Locus::Igh,
      vec![family(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG", 45, &["l1", "l2"])],
    );
    antn_lists.insert(
      Locus::Igk,
      vec![
        family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 45, &["h1"]),
        family(Locus::Igk, &["l2"], &["AAAAAA"], "AAAAAA", 45, &["h2"]),
      ],
    );
    let filtered = filtered_from(antn_lists);
    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    let mut h_clusters = joint.by_locus[&Locus::Igh].clone();
    h_clusters.sort();
    assert_eq!(h_clusters, vec![vec!["h1".to_owned()], vec!["h2".to_owned()]]);
    Ok(())
  }

  /// Every uid from both chains appears exactly once in the joint partition.
  #[test]
  fn joint_partition_is_disjoint_and_complete() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(
      Locus::Igh,
      vec![
        family(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG", 45, &["l1", "l2"]),
        family(Locus::Igh, &["h3"], &["TTTTTT"], "TTTTTT", 39, &["l3"]),
      ],
    );
    antn_lists.insert(
      Locus::Igk,
      vec![
        family(Locus::Igk, &["l1", "l3"], &["TGCTGC", "TGCTGA"], "TGCTGC", 45, &["h1", "h3"]),
        family(Locus::Igk, &["l2"], &["GGGGGG"], "GGGGGG", 48, &["h2"]),
      ],
    );
    let filtered = filtered_from(antn_lists);
    let cfg = MergeConfig {
      check_partitions: true,
      ..MergeConfig::default()
    };
    let joint = merge_chains(ploci(), &filtered, &cfg)?;
    for locus in [Locus::Igh, Locus::Igk] {
      check_disjoint(&joint.by_locus[&locus])?;
      let uids = partition_uids(&joint.by_locus[&locus]);
      let expected = partition_uids(filtered.cpaths[&locus].best());
      assert_eq!(uids, expected, "uid universe for {locus}");
    }
    Ok(())
  }

  /// Scenario: unpaired re-insertion. h3 was removed as unpaired and must be
  /// appended to the joint cluster containing its nearest paired neighbour.
  #[test]
  fn unpaired_seq_rejoins_nearest_neighbours_cluster() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(
      Locus::Igh,
      vec![family(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG", 45, &["l1", "l2"])],
    );
    antn_lists.insert(
      Locus::Igk,
      vec![
        family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 45, &["h1"]),
        family(Locus::Igk, &["l2"], &["TGCTGA"], "TGCTGA", 48, &["h2"]),
      ],
    );
    let mut filtered = filtered_from(antn_lists);
    filtered.unpaired.insert(Locus::Igk, IndexMap::new());
    let mut igh_unpaired = IndexMap::new();
    igh_unpaired.insert(
      "h3".to_owned(),
      UnpairedSeq {
        had_paired_family_members: true,
        nearest_paired: Some("h2".to_owned()),
        single_chain_family: None,
      },
    );
    filtered.unpaired.insert(Locus::Igh, igh_unpaired);

    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    let h3_cluster = joint.by_locus[&Locus::Igh]
      .iter()
      .find(|cluster| cluster.contains(&"h3".to_owned()))
      .expect("h3 re-added");
    assert!(h3_cluster.contains(&"h2".to_owned()));
    Ok(())
  }

  /// An unpaired singleton (no paired members in its family) stays a
  /// singleton joint cluster.
  #[test]
  fn unpaired_singleton_stays_singleton() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(Locus::Igh, vec![family(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG", 45, &["l1"])]);
    antn_lists.insert(Locus::Igk, vec![family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 45, &["h1"])]);
    let mut filtered = filtered_from(antn_lists);
    filtered.unpaired.insert(Locus::Igk, IndexMap::new());
    let mut igh_unpaired = IndexMap::new();
    igh_unpaired.insert("h9".to_owned(), UnpairedSeq::default());
    filtered.unpaired.insert(Locus::Igh, igh_unpaired);
    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    assert!(joint.by_locus[&Locus::Igh].contains(&vec!["h9".to_owned()]));
    Ok(())
  }

  /// Unpaired members of an all-unpaired family accrete onto the first one
  /// re-added, via the remembered single-chain family membership.
  #[test]
  fn unpaired_family_members_accrete_together() -> Result<(), Report> {
    let mut antn_lists = IndexMap::new();
    antn_lists.insert(Locus::Igh, vec![family(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG", 45, &["l1"])]);
    antn_lists.insert(Locus::Igk, vec![family(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC", 45, &["h1"])]);
    let mut filtered = filtered_from(antn_lists);
    filtered.unpaired.insert(Locus::Igk, IndexMap::new());
    let mut igh_unpaired = IndexMap::new();
    for uid in ["h5", "h6"] {
      igh_unpaired.insert(
        uid.to_owned(),
        UnpairedSeq {
          had_paired_family_members: true,
          nearest_paired: None,
          single_chain_family: Some(vec!["h5".to_owned(), "h6".to_owned()]),
        },
      );
    }
    filtered.unpaired.insert(Locus::Igh, igh_unpaired);
    let joint = merge_chains(ploci(), &filtered, &MergeConfig::default())?;
    assert!(joint.by_locus[&Locus::Igh].contains(&vec!["h5".to_owned(), "h6".to_owned()]));
    Ok(())
  }

  #[test]
  fn incorporate_removes_overlap_from_larger_cluster() {
    let mut final_partition = vec![vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]];
    let mut fclust_sets: Vec<IndexSet<String>> = vec![final_partition[0].iter().cloned().collect()];
    let mut fclust_indices: HashMap<String, usize> =
      final_partition[0].iter().map(|uid| (uid.clone(), 0)).collect();
    incorporate_rclusts(
      &mut final_partition,
      &mut fclust_sets,
      &mut fclust_indices,
      vec![vec!["a".to_owned()]],
    );
    assert_eq!(final_partition, vec![vec!["b".to_owned(), "c".to_owned()], vec!["a".to_owned()]]);
  }
}
