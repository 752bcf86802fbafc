use crate::annotation::annotation::Annotation;
use crate::annotation::partition::ClusterPath;
use crate::annotation::store::AnnotationStore;
use crate::seq::locus::{Chain, Locus, PairedLoci};
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;
use log::info;
use std::collections::HashMap;

/// What we remember about a removed (unpaired or non-reciprocal) sequence so
/// it can be re-inserted into the right joint family after merging.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnpairedSeq {
  /// Set when the sequence's single-chain family contained any paired
  /// members at all; a lone unpaired singleton stays alone.
  pub had_paired_family_members: bool,

  /// Nearest kept sequence of the original family, by the approximate aa
  /// Hamming distance over mutated-position sets.
  pub nearest_paired: Option<String>,

  /// The original single-chain family membership, recorded when no kept
  /// neighbour exists so the family's unpaired members can accrete together.
  pub single_chain_family: Option<Vec<String>>,
}

pub type UnpairedMap = IndexMap<Locus, IndexMap<String, UnpairedSeq>>;

/// Partitions and annotations after bad-pair removal, plus the map of removed
/// sequences for later re-insertion.
#[derive(Clone, Debug, Default)]
pub struct FilteredPartitions {
  pub cpaths: IndexMap<Locus, ClusterPath>,
  pub antn_lists: IndexMap<Locus, Vec<Annotation>>,
  pub unpaired: UnpairedMap,
}

/// Per-sequence classification counters, for diagnostics.
#[derive(Clone, Debug, Default)]
pub struct BadPairStats {
  pub n_no_info: usize,
  pub n_other_light: usize,
  pub n_non_reciprocal: usize,
}

/// Removes sequences that are unpaired, paired with the wrong light chain, or
/// non-reciprocally paired. Removed unpaired/non-reciprocal sequences are
/// remembered (with a nearest kept neighbour) so the merger can re-insert
/// them; wrong-light-chain sequences are true contamination and dropped.
///
/// Pre-condition: pair cleaning ran, so every sequence has at most one pid.
/// Multiple pids fail with [`PairfamError::InconsistentPairing`].
pub fn remove_badly_paired_seqs(
  ploci: PairedLoci,
  store: &AnnotationStore,
  cpaths: &IndexMap<Locus, ClusterPath>,
) -> Result<(FilteredPartitions, BadPairStats), Report> {
  // uid -> its single pid, across all loci; used for the reciprocity check
  let mut all_pids: HashMap<String, String> = HashMap::new();
  for locus in store.loci() {
    for family in store.families(locus) {
      for (iseq, uid) in family.unique_ids.iter().enumerate() {
        if let [pid] = family.paired_uids[iseq].as_slice() {
          all_pids.insert(uid.clone(), pid.clone());
        }
      }
    }
  }

  let mut stats = BadPairStats::default();
  let mut result = FilteredPartitions::default();
  for locus in [ploci.h, ploci.l] {
    result.unpaired.insert(locus, IndexMap::new());
  }

  for (chain, locus) in ploci.chains() {
    let key_index = store.family_key_index(locus);
    let cpath = cpaths
      .get(&locus)
      .ok_or_else(|| PairfamError::InputMalformed(format!("no partition for locus {locus}")))?;
    let mut new_partition = vec![];
    let mut new_antn_list = vec![];
    for cluster in cpath.best() {
      let &ifam = key_index
        .get(&cluster.join(":"))
        .ok_or_else(|| PairfamError::InputMalformed(format!("no {locus} annotation for cluster {}", cluster.join(":"))))?;
      let family = store.family(locus, ifam);
      let unpaired = result.unpaired.get_mut(&locus).expect("locus entry present");
      let paired_iseqs: Vec<usize> = (0..family.n_seqs())
        .filter(|&iseq| !family.paired_uids[iseq].is_empty())
        .collect();

      let mut iseqs_to_remove = vec![];
      for (iseq, uid) in family.unique_ids.iter().enumerate() {
        let pids = &family.paired_uids[iseq];
        match pids.as_slice() {
          [] => {
            iseqs_to_remove.push(iseq);
            unpaired.insert(
              uid.clone(),
              UnpairedSeq {
                had_paired_family_members: !paired_iseqs.is_empty(),
                ..UnpairedSeq::default()
              },
            );
            stats.n_no_info += 1;
          }
          [pid] => {
            let pid_locus = store
              .locus_of(pid)
              .ok_or_else(|| PairfamError::InconsistentPairing(format!("paired uid '{pid}' has no annotation")))?;
            if chain == Chain::Heavy && pid_locus != ploci.l {
              // paired with the other light chain: true contamination
              iseqs_to_remove.push(iseq);
              stats.n_other_light += 1;
            } else if all_pids.get(pid) != Some(uid) {
              iseqs_to_remove.push(iseq);
              unpaired.insert(
                uid.clone(),
                UnpairedSeq {
                  had_paired_family_members: !paired_iseqs.is_empty(),
                  ..UnpairedSeq::default()
                },
              );
              stats.n_non_reciprocal += 1;
            }
          }
          pids => {
            return Err(
              PairfamError::InconsistentPairing(format!(
                "multiple paired uids for '{uid}' after cleaning: {}",
                pids.join(" ")
              ))
              .into(),
            );
          }
        }
      }

      let iseqs_to_keep: Vec<usize> = (0..family.n_seqs()).filter(|iseq| !iseqs_to_remove.contains(iseq)).collect();
      set_nearest_neighbours(family, &iseqs_to_keep, unpaired);
      if !iseqs_to_keep.is_empty() {
        new_partition.push(iseqs_to_keep.iter().map(|&iseq| family.unique_ids[iseq].clone()).collect());
        new_antn_list.push(family.restricted_to(&iseqs_to_keep));
      }
    }
    result
      .cpaths
      .insert(locus, ClusterPath::with_seed(new_partition, cpath.seed_unique_id.clone()));
    result.antn_lists.insert(locus, new_antn_list);
  }

  let n_unpaired: usize = result.unpaired.values().map(IndexMap::len).sum();
  info!(
    "removed badly paired seqs ({} no info, {} other light, {} non-reciprocal), {} total unpaired",
    stats.n_no_info, stats.n_other_light, stats.n_non_reciprocal, n_unpaired
  );
  Ok((result, stats))
}

/// For every sequence of this family that was just removed as unpaired, find
/// the nearest kept sequence. Full Hamming over every pair is too slow on big
/// families, so distance is approximated by the symmetric difference of
/// mutated-position sets against the family naive sequence.
fn set_nearest_neighbours(family: &Annotation, iseqs_to_keep: &[usize], unpaired: &mut IndexMap<String, UnpairedSeq>) {
  let mut mut_positions: Option<Vec<Vec<usize>>> = None;
  for (iun, uid) in family.unique_ids.iter().enumerate() {
    let Some(entry) = unpaired.get_mut(uid) else { continue };
    if !entry.had_paired_family_members {
      continue;
    }
    let positions = mut_positions.get_or_insert_with(|| family.mut_positions());
    let nearest = iseqs_to_keep
      .iter()
      .map(|&ikeep| {
        let n_common = positions[ikeep].iter().filter(|pos| positions[iun].contains(*pos)).count();
        let approx_dist = positions[ikeep].len() + positions[iun].len() - 2 * n_common;
        (approx_dist, ikeep)
      })
      // first minimum wins, so ties resolve to family order
      .fold(None::<(usize, usize)>, |best, (approx_dist, ikeep)| match best {
        Some((best_dist, _)) if best_dist <= approx_dist => best,
        _ => Some((approx_dist, ikeep)),
      })
      .map(|(_, ikeep)| family.unique_ids[ikeep].clone());
    entry.nearest_paired = nearest;
    if entry.nearest_paired.is_none() {
      entry.single_chain_family = Some(family.unique_ids.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
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

  /// A heavy sequence paired with the non-chosen light locus disappears
  /// entirely (true contamination), without an unpaired-map entry.
  #[test]
  fn other_light_chain_contamination_is_dropped() -> Result<(), Report> {
    let store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1", "h2"], &["ACGACG", "ACGACT"], "ACGACG"),
        &[&["lam1"], &["k1"]],
      )],
      Locus::Igk => vec![with_pids(simple_annotation(Locus::Igk, &["k1"], &["TGCTGC"], "TGCTGC"), &[&["h2"]])],
      Locus::Igl => vec![with_pids(simple_annotation(Locus::Igl, &["lam1"], &["GGCGGC"], "GGCGGC"), &[&["h1"]])],
    })?;
    let cpaths = cpaths_from_store(&store);
    let (filtered, stats) = remove_badly_paired_seqs(PairedLoci::new(Locus::Igk), &store, &cpaths)?;
    assert_eq!(stats.n_other_light, 1);
    assert_eq!(filtered.cpaths[&Locus::Igh].best(), &vec![vec!["h2".to_owned()]]);
    assert!(!filtered.unpaired[&Locus::Igh].contains_key("h1"));
    Ok(())
  }

  /// Unpaired members are removed but remember their nearest paired
  /// neighbour by the mutated-position approximation.
  #[test]
  fn unpaired_seqs_remember_nearest_kept_neighbour() -> Result<(), Report> {
    let store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(
          Locus::Igh,
          &["h1", "h2", "h3"],
          &["ACGACG", "ACGACT", "ACGAGT"],
          "ACGACG",
        ),
        &[&["k1"], &["k2"], &[]],
      )],
      Locus::Igk => vec![with_pids(
        simple_annotation(Locus::Igk, &["k1", "k2"], &["TGCTGC", "TGCTGA"], "TGCTGC"),
        &[&["h1"], &["h2"]],
      )],
    })?;
    let cpaths = cpaths_from_store(&store);
    let (filtered, stats) = remove_badly_paired_seqs(PairedLoci::new(Locus::Igk), &store, &cpaths)?;
    assert_eq!(stats.n_no_info, 1);
    // h3 differs from h2 at one mutated position and from h1 at two
    let entry = &filtered.unpaired[&Locus::Igh]["h3"];
    assert_eq!(entry.nearest_paired.as_deref(), Some("h2"));
    assert!(entry.had_paired_family_members);
    assert_eq!(filtered.cpaths[&Locus::Igh].best(), &vec![vec!["h1".to_owned(), "h2".to_owned()]]);
    Ok(())
  }

  /// More than one surviving pid is a violated pre-condition.
  #[test]
  fn multiple_partners_fail() -> Result<(), Report> {
    let store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![with_pids(
        simple_annotation(Locus::Igh, &["h1"], &["ACGACG"], "ACGACG"),
        &[&["k1", "k2"]],
      )],
      Locus::Igk => vec![with_pids(
        simple_annotation(Locus::Igk, &["k1", "k2"], &["TGCTGC", "TGCTGA"], "TGCTGC"),
        &[&["h1"], &[]],
      )],
    })?;
    let cpaths = cpaths_from_store(&store);
    let result = remove_badly_paired_seqs(PairedLoci::new(Locus::Igk), &store, &cpaths);
    assert!(result.is_err());
    Ok(())
  }
}
