use crate::annotation::partition::ClusterPath;
use crate::annotation::store::AnnotationStore;
use crate::seq::hamming::{ambig_frac, hamming_dist_nuc, AMBIGUOUS_NUC};
use crate::seq::locus::Locus;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{info, warn};
use std::collections::HashMap;

/// Policy knobs for pair-info cleaning.
#[derive(Clone, Debug)]
pub struct PairCleanConfig {
  /// Real data (as opposed to simulation); enables the droplet-id sanity
  /// check and unproductive-sequence removal.
  pub is_data: bool,

  /// Collapse nearly identical same-locus sequences within a droplet,
  /// keeping the one with the lower ambiguous-base fraction.
  pub collapse_similar_paired_seqs: bool,

  /// Drop non-functional (stop codon / out-of-frame) sequences from
  /// overfull droplets. Only applied on real data.
  pub remove_unproductive: bool,

  /// Hamming threshold for the similar-sequence collapse.
  pub max_hdist: usize,

  /// Separator between droplet id and contig id in 10x-style uids.
  pub droplet_id_separator: char,
}

impl Default for PairCleanConfig {
  fn default() -> Self {
    Self {
      is_data: false,
      collapse_similar_paired_seqs: false,
      remove_unproductive: false,
      max_hdist: 4,
      droplet_id_separator: '_',
    }
  }
}

/// Counters reported after cleaning; recoverable conditions only.
#[derive(Clone, Debug, Default)]
pub struct PairCleanStats {
  /// Pids referenced in pair info but absent from the partitions.
  pub n_missing: usize,
  /// Pid groups after construction (including singletons split off later).
  pub n_groups: usize,
  /// Uids removed from overfull droplets by the similar-seq collapse or the
  /// unproductive filter.
  pub n_removed_from_groups: usize,
  /// One-sided pairs fixed by the reciprocity synchronisation, keyed by the
  /// locus of the fixed (previously empty) side.
  pub n_sync_fixed: IndexMap<Locus, usize>,
  /// Droplet-id groups that did not match any pid group (data only).
  pub n_droplet_mismatches: usize,
}

/// Repairs the pairing relation so that every sequence ends up with at most
/// one reciprocally-paired partner of the opposite chain.
///
/// Modifies `paired_uids` in place across all loci of the store.
pub fn clean_pair_info(
  store: &mut AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
  cfg: &PairCleanConfig,
) -> Result<PairCleanStats, Report> {
  let mut stats = PairCleanStats::default();
  let loci = sorted_loci(cpaths);

  let all_uids: IndexSet<String> = loci
    .iter()
    .flat_map(|locus| cpaths[locus].best().iter().flatten().cloned())
    .collect();
  info!("cleaning pair info for {} seqs", all_uids.len());

  let fam_of_cluster = cluster_family_index(store, cpaths, &loci)?;

  let (mut pid_groups, mut pid_ids) = build_pid_groups(store, cpaths, &loci, &fam_of_cluster, &all_uids, &mut stats)?;

  if cfg.is_data {
    check_droplet_id_groups(&pid_groups, &all_uids, cfg, &mut stats);
  }

  prune_pid_groups(store, &mut pid_groups, &mut pid_ids, cfg, &mut stats);
  stats.n_groups = pid_groups.len();

  prune_pids_against_groups(store, cpaths, &loci, &fam_of_cluster, &pid_groups, &pid_ids)?;

  // partition-informed arbitration, largest cluster first
  for &locus in &loci {
    let clusters_by_size = cpaths[&locus]
      .best()
      .iter()
      .sorted_by(|c1, c2| c2.len().cmp(&c1.len()))
      .collect_vec();
    for cluster in clusters_by_size {
      let ifam = fam_of_cluster[&(locus, cluster_key(cluster))];
      ptn_clean(store, locus, ifam, &pid_groups, &pid_ids)?;
    }
  }

  synchronize_reciprocal_pids(store, cpaths, &loci, &fam_of_cluster, &mut stats)?;

  if stats.n_missing > 0 {
    warn!(
      "{}/{} missing uids when cleaning pair info",
      stats.n_missing,
      all_uids.len()
    );
  }
  Ok(stats)
}

fn sorted_loci(cpaths: &IndexMap<Locus, ClusterPath>) -> Vec<Locus> {
  cpaths.keys().copied().sorted().collect()
}

fn cluster_key(cluster: &[String]) -> String {
  cluster.join(":")
}

/// Maps every partition cluster to the index of its annotation, per locus.
fn cluster_family_index(
  store: &AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
  loci: &[Locus],
) -> Result<HashMap<(Locus, String), usize>, Report> {
  let mut fam_of_cluster = HashMap::new();
  for &locus in loci {
    let key_index = store.family_key_index(locus);
    for cluster in cpaths[&locus].best() {
      let key = cluster_key(cluster);
      let &ifam = key_index
        .get(&key)
        .ok_or_else(|| PairfamError::InputMalformed(format!("no {locus} annotation for cluster {key}")))?;
      fam_of_cluster.insert((locus, key), ifam);
    }
  }
  Ok(fam_of_cluster)
}

type PidGroups = (Vec<IndexSet<String>>, HashMap<String, usize>);

/// Unions every uid with everything in its `paired_uids` lists; connected
/// components are the droplet ("pid") groups. Unknown referenced uids are
/// dropped and counted.
fn build_pid_groups(
  store: &AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
  loci: &[Locus],
  fam_of_cluster: &HashMap<(Locus, String), usize>,
  all_uids: &IndexSet<String>,
  stats: &mut PairCleanStats,
) -> Result<PidGroups, Report> {
  let mut pid_groups: Vec<IndexSet<String>> = vec![];
  let mut pid_ids: HashMap<String, usize> = HashMap::new();
  for &locus in loci {
    for cluster in cpaths[&locus].best() {
      let ifam = fam_of_cluster[&(locus, cluster_key(cluster))];
      let family = store.family(locus, ifam);
      for (iseq, uid) in family.unique_ids.iter().enumerate() {
        let pids = &family.paired_uids[iseq];
        let missing = pids.iter().filter(|pid| !all_uids.contains(*pid)).count();
        stats.n_missing += missing;
        let mut pset: IndexSet<String> = IndexSet::new();
        pset.insert(uid.clone());
        pset.extend(pids.iter().filter(|pid| all_uids.contains(*pid)).cloned());
        let ipg = match pids.iter().find_map(|pid| pid_ids.get(pid).copied()) {
          Some(ipg) => {
            pid_groups[ipg].extend(pset.iter().cloned());
            ipg
          }
          None => {
            pid_groups.push(pset.clone());
            pid_groups.len() - 1
          }
        };
        for pid in &pset {
          pid_ids.insert(pid.clone(), ipg);
        }
      }
    }
  }
  Ok((pid_groups, pid_ids))
}

/// Real-data sanity check: droplet ids parsed from the uids themselves should
/// reproduce the pid groups.
fn check_droplet_id_groups(
  pid_groups: &[IndexSet<String>],
  all_uids: &IndexSet<String>,
  cfg: &PairCleanConfig,
  stats: &mut PairCleanStats,
) {
  if pid_groups.iter().map(IndexSet::len).all(|len| len <= 1) {
    warn!("all pid groups have size 1 in droplet id check. Maybe you're missing pairing info?");
    return;
  }
  let pgroup_strs: IndexSet<String> = pid_groups
    .iter()
    .map(|group| group.iter().sorted().join(":"))
    .collect();
  let mut droplet_groups: IndexMap<&str, Vec<&str>> = IndexMap::new();
  for uid in all_uids {
    let droplet_id = uid.split(cfg.droplet_id_separator).next().unwrap_or(uid);
    droplet_groups.entry(droplet_id).or_default().push(uid);
  }
  let mut n_not_found = 0;
  for members in droplet_groups.values() {
    let key = members.iter().sorted().join(":");
    if !pgroup_strs.contains(&key) {
      n_not_found += 1;
    }
  }
  if n_not_found > 0 {
    warn!(
      "droplet id group check failed for {}/{} groups, i.e. droplet ids parsed from uids don't match pair info",
      n_not_found,
      droplet_groups.len()
    );
  }
  stats.n_droplet_mismatches = n_not_found;
}

/// Within each overfull group, knock the membership down towards one heavy
/// and one light uid; everything removed becomes its own singleton group.
fn prune_pid_groups(
  store: &AnnotationStore,
  pid_groups: &mut Vec<IndexSet<String>>,
  pid_ids: &mut HashMap<String, usize>,
  cfg: &PairCleanConfig,
  stats: &mut PairCleanStats,
) {
  let mut ipg = 0;
  while ipg < pid_groups.len() {
    let mut pgroup: IndexSet<String> = pid_groups[ipg]
      .iter()
      .filter(|uid| store.addr(uid).is_some())
      .cloned()
      .collect();
    let mut hids: Vec<String> = pgroup
      .iter()
      .filter(|uid| store.locus_of(uid).is_some_and(Locus::is_heavy))
      .cloned()
      .collect();
    let mut lids: Vec<String> = pgroup.iter().filter(|uid| !hids.contains(uid)).cloned().collect();
    if hids.len() < 2 && lids.len() < 2 {
      pid_groups[ipg] = pgroup;
      ipg += 1;
      continue;
    }
    for idlist in [&mut hids, &mut lids] {
      if idlist.len() < 2 {
        continue;
      }
      let ids_to_remove = choose_seqs_to_remove(idlist, store, cfg);
      for rid in &ids_to_remove {
        pgroup.shift_remove(rid);
        idlist.retain(|uid| uid != rid);
        pid_groups.push(std::iter::once(rid.clone()).collect());
        pid_ids.insert(rid.clone(), pid_groups.len() - 1);
        stats.n_removed_from_groups += 1;
      }
    }
    pid_groups[ipg] = pgroup;
    ipg += 1;
  }
}

/// Chooses which of several same-chain uids in one droplet to eliminate,
/// based on similar-sequence collapse and (on data) productivity.
fn choose_seqs_to_remove(chain_ids: &[String], store: &AnnotationStore, cfg: &PairCleanConfig) -> IndexSet<String> {
  let mut ids_to_remove: IndexSet<String> = chain_ids
    .iter()
    .filter(|uid| store.addr(uid).is_none())
    .cloned()
    .collect();

  // among [almost] identical same-locus pairs, keep the one with the lower
  // ambiguous-base fraction
  if cfg.collapse_similar_paired_seqs {
    for pair in chain_ids.iter().combinations(2) {
      let (uid1, uid2) = (pair[0], pair[1]);
      if store.locus_of(uid1) != store.locus_of(uid2) {
        continue;
      }
      let (Some(seq1), Some(seq2)) = (store.seq_of(uid1), store.seq_of(uid2)) else {
        continue;
      };
      if seq1.len() != seq2.len() {
        continue;
      }
      let Ok(hdist) = hamming_dist_nuc(seq1, seq2) else { continue };
      if hdist <= cfg.max_hdist {
        let frac1 = ambig_frac(seq1, AMBIGUOUS_NUC);
        let frac2 = ambig_frac(seq2, AMBIGUOUS_NUC);
        let worse = if frac1 <= frac2 { uid2 } else { uid1 };
        ids_to_remove.insert(worse.clone());
      }
    }
  }

  if cfg.is_data && cfg.remove_unproductive {
    for uid in chain_ids {
      if !store.is_functional(uid) {
        ids_to_remove.insert(uid.clone());
      }
    }
  }

  ids_to_remove
}

/// Drops from every sequence's `paired_uids` anything the group cleaning
/// invalidated: unknown uids, the uid itself, and uids that were split off
/// into their own singleton group (those become unpaired, including their own
/// pair info).
fn prune_pids_against_groups(
  store: &mut AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
  loci: &[Locus],
  fam_of_cluster: &HashMap<(Locus, String), usize>,
  pid_groups: &[IndexSet<String>],
  pid_ids: &HashMap<String, usize>,
) -> Result<(), Report> {
  for &locus in loci {
    for cluster in cpaths[&locus].best() {
      let ifam = fam_of_cluster[&(locus, cluster_key(cluster))];
      let uids = store.family(locus, ifam).unique_ids.clone();
      for (iseq, uid) in uids.iter().enumerate() {
        let &ipg = pid_ids
          .get(uid)
          .ok_or_else(|| PairfamError::InconsistentPairing(format!("uid '{uid}' has no pid group")))?;
        if !pid_groups[ipg].contains(uid) {
          return Err(PairfamError::InconsistentPairing(format!("uid '{uid}' not in its own pid group")).into());
        }
        // membership, not the pid's own group index: a pid whose only link
        // was one-sided sits in a singleton group of its own but is still a
        // member here, and the reciprocity sync step needs to see it
        let pids = store.family(locus, ifam).paired_uids[iseq]
          .iter()
          .filter(|pid| *pid != uid && pid_groups[ipg].contains(*pid))
          .cloned()
          .collect_vec();
        store.set_pids(uid, pids)?;
      }
    }
  }
  Ok(())
}

/// Uses family-level information to decide which of several candidate paired
/// uids is the correct one.
///
/// For each uid of the cluster (in order): its candidates are ranked by how
/// many uids of this cluster vote for the candidate's family. The top
/// candidate is kept when it strictly outvotes the runner-up or the runner-up
/// belongs to the same family. A kept candidate can still be lost to another
/// uid of the cluster that prefers the same candidate with a shorter (more
/// certain) candidate list; the loser's pair info is cleared. Settled pairs
/// are subtracted from everybody else's candidate lists, so decisions
/// propagate within and across clusters.
fn ptn_clean(
  store: &mut AnnotationStore,
  locus: Locus,
  ifam: usize,
  pid_groups: &[IndexSet<String>],
  pid_ids: &HashMap<String, usize>,
) -> Result<(), Report> {
  let uids = store.family(locus, ifam).unique_ids.clone();

  // how many uids of this cluster point into each candidate opposite family
  let mut pfam_votes: IndexMap<String, usize> = IndexMap::new();
  let initial_pids = store.family(locus, ifam).paired_uids.clone();
  for pids in &initial_pids {
    for pid in pids {
      let fkey = store
        .family_key_of(pid)
        .ok_or_else(|| PairfamError::InconsistentPairing(format!("no annotation for paired uid '{pid}'")))?;
      *pfam_votes.entry(fkey).or_insert(0) += 1;
    }
  }

  let candidates_of = |store: &AnnotationStore, member: &str, finished: &IndexSet<String>| -> Vec<String> {
    store.pids_of(member).map_or_else(Vec::new, |pids| {
      pids
        .iter()
        .filter(|pid| {
          !finished.contains(*pid)
            && store
              .locus_of(pid)
              .is_some_and(|pid_locus| !pid_locus.same_chain(locus))
        })
        .cloned()
        .collect()
    })
  };
  let top_candidate = |store: &AnnotationStore, candidates: &[String]| -> Option<(String, String, usize)> {
    let mut pid_votes = candidates
      .iter()
      .map(|pid| {
        let fkey = store.family_key_of(pid).expect("candidate pid has an annotation");
        let votes = pfam_votes.get(&fkey).copied().unwrap_or(0);
        (pid.clone(), fkey, votes)
      })
      .collect_vec();
    pid_votes.sort_by(|(_, _, votes1), (_, _, votes2)| votes2.cmp(votes1)); // stable: ties keep list order
    let dominant =
      pid_votes.len() == 1 || (pid_votes.len() > 1 && (pid_votes[0].2 > pid_votes[1].2 || pid_votes[0].1 == pid_votes[1].1));
    if dominant { pid_votes.into_iter().next() } else { None }
  };

  let mut finished: IndexSet<String> = IndexSet::new();
  for uid in &uids {
    if finished.contains(uid) {
      continue;
    }
    let cur_pids = candidates_of(store, uid, &finished);
    store.set_pids(uid, cur_pids.clone())?;
    if cur_pids.is_empty() {
      continue;
    }

    let Some((pid_to_keep, _, _)) = top_candidate(store, &cur_pids) else {
      // no candidate dominates: defer the decision, the uid becomes unpaired
      store.set_pids(uid, vec![])?;
      continue;
    };

    // another uid of this cluster preferring the same candidate with a
    // shorter candidate list is more certain and wins the claim
    let contested = uids.iter().any(|other| {
      if other == uid || finished.contains(other) {
        return false;
      }
      let other_cands = candidates_of(store, other, &finished);
      other_cands.len() < cur_pids.len()
        && top_candidate(store, &other_cands).is_some_and(|(top, _, _)| top == pid_to_keep)
    });
    if contested {
      store.set_pids(uid, vec![])?;
      continue;
    }

    for (cid, oid) in [(uid.clone(), pid_to_keep.clone()), (pid_to_keep.clone(), uid.clone())] {
      if store.pids_of(&cid).is_some_and(|pids| pids.len() == 1 && pids[0] == oid) {
        continue;
      }
      store.set_pids(&cid, vec![oid])?;
    }
    finished.insert(uid.clone());
    finished.insert(pid_to_keep);
  }

  // everybody else's candidate lists shrink by what we just settled
  for fid in &finished {
    let Some(&ipg) = pid_ids.get(fid) else { continue };
    let members = pid_groups[ipg].iter().filter(|m| !finished.contains(*m)).cloned().collect_vec();
    for member in members {
      let Some(pids) = store.pids_of(&member) else { continue };
      let filtered = pids.iter().filter(|pid| !finished.contains(*pid)).cloned().collect_vec();
      if filtered.len() != pids.len() {
        store.set_pids(&member, filtered)?;
      }
    }
  }
  Ok(())
}

/// For any uid with a single partner whose own pair info is empty, set the
/// partner to point back.
fn synchronize_reciprocal_pids(
  store: &mut AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
  loci: &[Locus],
  fam_of_cluster: &HashMap<(Locus, String), usize>,
  stats: &mut PairCleanStats,
) -> Result<(), Report> {
  for &locus in loci {
    for cluster in cpaths[&locus].best() {
      let ifam = fam_of_cluster[&(locus, cluster_key(cluster))];
      let uids = store.family(locus, ifam).unique_ids.clone();
      for (iseq, uid) in uids.iter().enumerate() {
        let pids = store.family(locus, ifam).paired_uids[iseq].clone();
        if pids.len() != 1 {
          continue;
        }
        let partner = &pids[0];
        if store.pids_of(partner).is_some_and(|partner_pids| partner_pids.is_empty()) {
          store.set_pids(partner, vec![uid.clone()])?;
          let partner_locus = store.locus_of(partner).expect("partner has an annotation");
          *stats.n_sync_fixed.entry(partner_locus).or_insert(0) += 1;
        }
      }
    }
  }
  if !stats.n_sync_fixed.is_empty() {
    info!(
      "synchronized/fixed {} pairs where one side had no pair info after cleaning",
      stats.n_sync_fixed.values().sum::<usize>()
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use crate::annotation::annotation::Annotation;
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  fn with_pids(mut annotation: Annotation, pids: &[&[&str]]) -> Annotation {
    annotation.paired_uids = pids
      .iter()
      .map(|seq_pids| seq_pids.iter().map(|p| (*p).to_owned()).collect())
      .collect();
    annotation
  }

  fn cpaths_from_store(store: &AnnotationStore) -> IndexMap<Locus, ClusterPath> {
    store
      .loci()
      .map(|locus| {
        let partition = store
          .families(locus)
          .iter()
          .map(|family| family.unique_ids.clone())
          .collect();
        (locus, ClusterPath::from_partition(partition))
      })
      .collect()
  }

  fn pids(store: &AnnotationStore, uid: &str) -> Vec<String> {
    store.pids_of(uid).unwrap().to_vec()
  }

  #[test]
  fn reciprocal_pair_stays_untouched() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"), &[&["l1"]])],
      Locus::Igk => vec![with_pids(simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"), &[&["h1"]])],
    })?;
    let cpaths = cpaths_from_store(&store);
    clean_pair_info(&mut store, &cpaths, &PairCleanConfig::default())?;
    assert_eq!(pids(&store, "h1"), vec!["l1"]);
    assert_eq!(pids(&store, "l1"), vec!["h1"]);
    Ok(())
  }

  /// The more certain claimant (fewer candidates) wins a contested partner;
  /// the loser's pair info is cleared rather than falling back.
  #[test]
  fn contested_partner_goes_to_the_more_certain_uid() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG"),
        &[&["l1", "l2"], &["l2"]],
      )],
      Locus::Igk => vec![
        with_pids(simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"), &[&[]]),
        with_pids(simple_annotation(Locus::Igk, &["l2"], &["TGCTGA"], "TGCTGA"), &[&[]]),
      ],
    })?;
    let cpaths = cpaths_from_store(&store);
    clean_pair_info(&mut store, &cpaths, &PairCleanConfig::default())?;
    assert_eq!(pids(&store, "h1"), Vec::<String>::new());
    assert_eq!(pids(&store, "h2"), vec!["l2"]);
    assert_eq!(pids(&store, "l2"), vec!["h2"]);
    assert_eq!(pids(&store, "l1"), Vec::<String>::new());
    Ok(())
  }

  /// A tie between two candidates from the same family keeps the first one:
  /// for clustering purposes the family is what matters.
  #[test]
  fn same_family_tie_keeps_first_candidate() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"),
        &[&["l1", "l2"]],
      )],
      Locus::Igk => vec![with_pids(
        simple_annotation(Locus::Igk, &["l1", "l2"], &["TGCTGC", "TGCTGA"], "TGCTGC"),
        &[&[], &[]],
      )],
    })?;
    let cpaths = cpaths_from_store(&store);
    clean_pair_info(&mut store, &cpaths, &PairCleanConfig::default())?;
    assert_eq!(pids(&store, "h1"), vec!["l1"]);
    assert_eq!(pids(&store, "l1"), vec!["h1"]);
    Ok(())
  }

  /// A pid referencing a uid absent from the universe is dropped and counted,
  /// not fatal.
  #[test]
  fn unknown_pids_are_dropped_and_counted() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"),
        &[&["l1", "ghost"]],
      )],
      Locus::Igk => vec![with_pids(simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"), &[&["h1"]])],
    })?;
    let cpaths = cpaths_from_store(&store);
    let stats = clean_pair_info(&mut store, &cpaths, &PairCleanConfig::default())?;
    assert_eq!(stats.n_missing, 1);
    assert_eq!(pids(&store, "h1"), vec!["l1"]);
    Ok(())
  }

  /// Overfull droplet: two nearly identical heavy seqs collapse, and the one
  /// with more ambiguous bases is split off as unpaired.
  #[test]
  fn similar_seq_collapse_removes_more_ambiguous_copy() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGANN"], "ACGACG"),
        &[&["l1"], &["l1"]],
      )],
      Locus::Igk => vec![with_pids(
        simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"),
        &[&["h1", "h2"]],
      )],
    })?;
    let cpaths = cpaths_from_store(&store);
    let cfg = PairCleanConfig {
      collapse_similar_paired_seqs: true,
      ..PairCleanConfig::default()
    };
    let stats = clean_pair_info(&mut store, &cpaths, &cfg)?;
    assert_eq!(stats.n_removed_from_groups, 1);
    assert_eq!(pids(&store, "h2"), Vec::<String>::new());
    assert_eq!(pids(&store, "h1"), vec!["l1"]);
    assert_eq!(pids(&store, "l1"), vec!["h1"]);
    Ok(())
  }

  /// The full pipeline already repairs a one-sided pair: the empty side ends
  /// up pointing back (here via arbitration claiming the only candidate).
  #[test]
  fn one_sided_pairs_end_up_reciprocal() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"), &[&["l1"]])],
      Locus::Igk => vec![with_pids(simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"), &[&[]])],
    })?;
    let cpaths = cpaths_from_store(&store);
    clean_pair_info(&mut store, &cpaths, &PairCleanConfig::default())?;
    assert_eq!(pids(&store, "h1"), vec!["l1"]);
    assert_eq!(pids(&store, "l1"), vec!["h1"]);
    Ok(())
  }

  /// The synchronisation pass itself: a uid with one partner whose pair info
  /// is empty gets the partner set to point back.
  #[test]
  fn reciprocity_sync_fixes_one_sided_pairs() -> Result<(), Report> {
    let mut store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"), &[&["l1"]])],
      Locus::Igk => vec![with_pids(simple_annotation(Locus::Igk, &["l1"], &["TGCTGC"], "TGCTGC"), &[&[]])],
    })?;
    let cpaths = cpaths_from_store(&store);
    let loci = sorted_loci(&cpaths);
    let fam_of_cluster = cluster_family_index(&store, &cpaths, &loci)?;
    let mut stats = PairCleanStats::default();
    synchronize_reciprocal_pids(&mut store, &cpaths, &loci, &fam_of_cluster, &mut stats)?;
    assert_eq!(pids(&store, "l1"), vec!["h1"]);
    assert_eq!(stats.n_sync_fixed.get(&Locus::Igk), Some(&1));
    Ok(())
  }
}
