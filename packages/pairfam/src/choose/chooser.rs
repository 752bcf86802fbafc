use crate::annotation::annotation::Annotation;
use crate::choose::cfg::{AbChoiceCfg, NPerFamily, SortDir};
use crate::metrics::cons_dist::cons_dists_aa;
use crate::seq::hamming::{local_hamming_dist_aa, AMBIGUOUS_AA};
use crate::utils::collections::median_of;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::{IndexMap, IndexSet};
use log::{info, warn};
use serde::Serialize;

/// One joint family as the chooser sees it: the heavy and light annotations
/// plus the index pairs of reciprocally paired members and any per-uid
/// selection-metric values.
#[derive(Clone, Debug)]
pub struct FamilyPair {
  pub h: Annotation,
  pub l: Annotation,
  /// `(h_iseq, l_iseq)` of each reciprocally paired member.
  pub pairs: Vec<(usize, usize)>,
  /// metric name -> uid -> value, covering uids of both chains.
  pub metrics: IndexMap<String, IndexMap<String, f64>>,
}

impl FamilyPair {
  /// Builds the pair list from the (cleaned) pair info.
  pub fn new(h: Annotation, l: Annotation, metrics: IndexMap<String, IndexMap<String, f64>>) -> Result<Self, Report> {
    let mut pairs = vec![];
    for (h_iseq, h_uid) in h.unique_ids.iter().enumerate() {
      if let [pid] = h.paired_uids[h_iseq].as_slice() {
        if let Some(l_iseq) = l.iseq(pid) {
          if l.paired_uids[l_iseq].as_slice() == [h_uid.clone()] {
            pairs.push((h_iseq, l_iseq));
          }
        }
      }
    }
    Ok(Self { h, l, pairs, metrics })
  }

  fn sumv(&self, ipair: usize, var: &str) -> Result<f64, Report> {
    let (h_iseq, l_iseq) = self.pairs[ipair];
    let chains = [(&self.h, h_iseq), (&self.l, l_iseq)];
    let mut total = 0.0;
    for (annotation, iseq) in chains {
      let uid = &annotation.unique_ids[iseq];
      let value = if let Some(values) = self.metrics.get(var) {
        values.get(uid).copied()
      } else {
        None
      };
      let value = match value {
        Some(value) => value,
        None => annotation_column_value(annotation, iseq, var)?,
      };
      total += value;
    }
    Ok(total)
  }

  fn seq_mtps(&self, ipair: usize) -> u64 {
    let (h_iseq, l_iseq) = self.pairs[ipair];
    u64::from(self.h.multiplicity(h_iseq)) + u64::from(self.l.multiplicity(l_iseq))
  }
}

/// Per-seq numeric annotation columns usable as sort vars when no computed
/// metric of that name is available.
fn annotation_column_value(annotation: &Annotation, iseq: usize, var: &str) -> Result<f64, Report> {
  match var {
    "n_mutations" | "shm" => Ok(annotation.n_mutations[iseq] as f64),
    "mut_freq" | "shm-frac" => Ok(annotation.mut_freqs[iseq]),
    "multiplicity" | "seq_mtps" => Ok(f64::from(annotation.multiplicity(iseq))),
    "umis" => annotation
      .umis
      .as_ref()
      .map(|umis| umis[iseq] as f64)
      .ok_or_else(|| PairfamError::UnsupportedMetric("sort var 'umis' but no umi info in annotation".to_owned()).into()),
    _ => Err(PairfamError::UnsupportedMetric(format!("unknown sort var '{var}'")).into()),
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqType {
  Observed,
  Cons,
  Naive,
}

/// One chosen antibody: an observed pair, or an unobserved consensus/naive
/// pseudo-sequence pair.
#[derive(Clone, Debug, Serialize)]
pub struct ChosenAb {
  pub iclust: usize,
  pub seqtype: SeqType,
  pub h_uid: Option<String>,
  pub l_uid: Option<String>,
  pub h_seq_aa: String,
  pub l_seq_aa: String,
  pub h_seq_nuc: String,
  pub l_seq_nuc: String,
}

fn droplet_id(uid: &str) -> &str {
  uid.split('_').next().unwrap_or(uid)
}

fn n_ambig_aa(seq_aa: &str) -> usize {
  seq_aa.bytes().filter(|&chr| chr == AMBIGUOUS_AA).count()
}

/// Applies the declarative config to every joint family (largest first) and
/// returns the selected antibodies, in selection order.
pub fn choose_abs(families: &mut [FamilyPair], cfg: &AbChoiceCfg) -> Result<Vec<ChosenAb>, Report> {
  // precompute aa seqs and aa consensus distances
  for family in families.iter_mut() {
    family.h.ensure_input_seqs_aa();
    family.l.ensure_input_seqs_aa();
  }
  let mut order: Vec<usize> = (0..families.len()).collect();
  order.sort_by(|&ifam, &jfam| families[jfam].pairs.len().cmp(&families[ifam].pairs.len()));

  let mut chosen = vec![];
  let mut all_chosen_seqs: IndexSet<(String, String)> = IndexSet::new();
  for (iclust, &ifam) in order.iter().enumerate() {
    if iclust >= cfg.n_families {
      break;
    }
    let family = &mut families[ifam];
    let family_chosen = choose_from_family(family, iclust, cfg, &mut all_chosen_seqs)?;
    info!("iclust {iclust}: chose {} abs from family with {} pairs", family_chosen.len(), family.pairs.len());
    chosen.extend(family_chosen);
  }
  Ok(chosen)
}

fn observed_ab(family: &FamilyPair, iclust: usize, ipair: usize) -> ChosenAb {
  let (h_iseq, l_iseq) = family.pairs[ipair];
  ChosenAb {
    iclust,
    seqtype: SeqType::Observed,
    h_uid: Some(family.h.unique_ids[h_iseq].clone()),
    l_uid: Some(family.l.unique_ids[l_iseq].clone()),
    h_seq_aa: family.h.input_seqs_aa.as_ref().unwrap()[h_iseq].clone(),
    l_seq_aa: family.l.input_seqs_aa.as_ref().unwrap()[l_iseq].clone(),
    h_seq_nuc: family.h.input_seqs[h_iseq].clone(),
    l_seq_nuc: family.l.input_seqs[l_iseq].clone(),
  }
}

fn ab_seq_pair(ab: &ChosenAb) -> (String, String) {
  (ab.h_seq_aa.clone(), ab.l_seq_aa.clone())
}

fn too_close_to_chosen(all_chosen_seqs: &IndexSet<(String, String)>, ab: &ChosenAb, min_hdist: usize) -> bool {
  all_chosen_seqs.iter().any(|(h_seq, l_seq)| {
    local_hamming_dist_aa(h_seq, &ab.h_seq_aa) + local_hamming_dist_aa(l_seq, &ab.l_seq_aa) < min_hdist
  })
}

fn pair_ambig_count(family: &FamilyPair, ipair: usize) -> usize {
  let (h_iseq, l_iseq) = family.pairs[ipair];
  n_ambig_aa(&family.h.input_seqs_aa.as_ref().unwrap()[h_iseq]) + n_ambig_aa(&family.l.input_seqs_aa.as_ref().unwrap()[l_iseq])
}

fn choose_from_family(
  family: &mut FamilyPair,
  iclust: usize,
  cfg: &AbChoiceCfg,
  all_chosen_seqs: &mut IndexSet<(String, String)>,
) -> Result<Vec<ChosenAb>, Report> {
  let mut family_chosen: Vec<ChosenAb> = vec![];
  let mut eligible: Vec<usize> = (0..family.pairs.len()).collect();

  let finished = |family_chosen: &[ChosenAb]| cfg.n_per_family.is_some_and(|cap| family_chosen.len() >= cap);

  // forced droplet-id inclusions come first, before any filtering
  for &ipair in &eligible {
    let (h_iseq, _) = family.pairs[ipair];
    if cfg.droplet_ids.iter().any(|did| did == droplet_id(&family.h.unique_ids[h_iseq])) {
      let ab = observed_ab(family, iclust, ipair);
      all_chosen_seqs.insert(ab_seq_pair(&ab));
      family_chosen.push(ab);
    }
  }

  if let (Some(allowed), Some(cell_types)) = (cfg.cell_types.as_ref(), family.h.cell_types.as_ref()) {
    let l_cell_types = family.l.cell_types.clone().unwrap_or_default();
    eligible.retain(|&ipair| {
      let (h_iseq, l_iseq) = family.pairs[ipair];
      allowed.contains(&cell_types[h_iseq]) && l_cell_types.get(l_iseq).is_none_or(|ct| allowed.contains(ct))
    });
  } else if cfg.cell_types.is_some() {
    warn!("'cell-types' in cfg but no cell type info in annotation");
  }

  if let Some(min_umis) = cfg.min_umis {
    if family.h.umis.is_some() || family.l.umis.is_some() {
      let sums: Vec<u64> = (0..family.pairs.len())
        .map(|ipair| {
          let (h_iseq, l_iseq) = family.pairs[ipair];
          family.h.umis.as_ref().map_or(0, |umis| umis[h_iseq]) + family.l.umis.as_ref().map_or(0, |umis| umis[l_iseq])
        })
        .collect();
      eligible.retain(|&ipair| sums[ipair] > min_umis);
    } else {
      warn!("'min-umis' in cfg but no umi info in annotation");
    }
  }

  if let Some(min_shm) = cfg.min_median_nuc_shm_pct {
    let shm_pcts: Vec<f64> = (0..family.pairs.len())
      .map(|ipair| {
        let (h_iseq, l_iseq) = family.pairs[ipair];
        100.0 * (family.h.mut_freqs[h_iseq] + family.l.mut_freqs[l_iseq])
      })
      .collect();
    if median_of(shm_pcts) < min_shm {
      info!("skipping entire family {iclust}: median h+l nuc shm below {min_shm:.2}%");
      return Ok(family_chosen);
    }
  }

  if let Some(max_ambig) = cfg.max_ambig_positions {
    eligible.retain(|&ipair| pair_ambig_count(family, ipair) <= max_ambig);
  }

  // neighbour fill around specific droplet ids
  for (refid, n_take) in &cfg.similar_to_droplet_ids {
    let Some(&ref_pair) = eligible.iter().find(|&&ipair| {
      let (h_iseq, _) = family.pairs[ipair];
      droplet_id(&family.h.unique_ids[h_iseq]) == refid
    }) else {
      continue;
    };
    let ref_ab = observed_ab(family, iclust, ref_pair);
    let mut by_distance = eligible.clone();
    by_distance.sort_by_key(|&ipair| {
      let ab = observed_ab(family, iclust, ipair);
      local_hamming_dist_aa(&ab.h_seq_aa, &ref_ab.h_seq_aa) + local_hamming_dist_aa(&ab.l_seq_aa, &ref_ab.l_seq_aa)
    });
    let mut n_chosen = 0;
    for ipair in by_distance {
      if n_chosen >= *n_take {
        break;
      }
      let ab = observed_ab(family, iclust, ipair);
      let distance =
        local_hamming_dist_aa(&ab.h_seq_aa, &ref_ab.h_seq_aa) + local_hamming_dist_aa(&ab.l_seq_aa, &ref_ab.l_seq_aa);
      if distance > 0 && !all_chosen_seqs.contains(&ab_seq_pair(&ab)) {
        all_chosen_seqs.insert(ab_seq_pair(&ab));
        family_chosen.push(ab);
        n_chosen += 1;
      }
    }
  }

  if eligible.is_empty() || finished(&family_chosen) {
    return Ok(family_chosen);
  }

  // maybe inject the unobserved consensus and/or naive pseudo-sequence
  for seqtype in [SeqType::Cons, SeqType::Naive] {
    let include = match seqtype {
      SeqType::Cons => cfg.include_unobs_cons_seqs.get(iclust),
      _ => cfg.include_unobs_naive_seqs.get(iclust),
    };
    if include {
      add_unobs_seq(family, iclust, seqtype, &eligible, cfg, all_chosen_seqs, &mut family_chosen)?;
    }
    if finished(&family_chosen) {
      return Ok(family_chosen);
    }
  }

  // the actual top-N selection, one sort var at a time
  let chosen_pairs: IndexSet<(usize, usize)> = family_chosen
    .iter()
    .filter_map(|ab| {
      ab.h_uid
        .as_ref()
        .and_then(|h_uid| family.h.iseq(h_uid))
        .zip(ab.l_uid.as_ref().and_then(|l_uid| family.l.iseq(l_uid)))
    })
    .collect();
  let mut chosen_pairs = chosen_pairs;
  for (var, var_cfg) in &cfg.vars {
    let n_for_var = var_cfg.n.as_ref().map(|n| NPerFamily::get(n, iclust));
    let mut sorted_pairs = eligible.clone();
    sorted_pairs.sort_by(|&ipair, &jpair| family.seq_mtps(jpair).cmp(&family.seq_mtps(ipair)));
    let sums: Result<Vec<f64>, Report> = (0..family.pairs.len()).map(|ipair| family.sumv(ipair, var)).collect();
    let sums = sums?;
    sorted_pairs.sort_by(|&ipair, &jpair| {
      let ordering = sums[ipair].partial_cmp(&sums[jpair]).unwrap_or(std::cmp::Ordering::Equal);
      match var_cfg.sort {
        SortDir::High => ordering.reverse(),
        SortDir::Low => ordering,
      }
    });

    let mut n_this_var = 0;
    for ipair in sorted_pairs {
      if finished(&family_chosen) || n_for_var.is_some_and(|cap| n_this_var >= cap) {
        break;
      }
      if chosen_pairs.contains(&family.pairs[ipair]) {
        continue;
      }
      let ab = observed_ab(family, iclust, ipair);
      if all_chosen_seqs.contains(&ab_seq_pair(&ab)) {
        continue;
      }
      if let Some(min_hdist) = cfg.min_hdist_to_already_chosen {
        if too_close_to_chosen(all_chosen_seqs, &ab, min_hdist) {
          continue;
        }
      }
      let (h_iseq, l_iseq) = family.pairs[ipair];
      if family.h.has_shm_indels.get(h_iseq).copied().unwrap_or(false)
        || family.l.has_shm_indels.get(l_iseq).copied().unwrap_or(false)
      {
        warn!(
          "choosing ab with shm indel: {} {}",
          family.h.unique_ids[h_iseq], family.l.unique_ids[l_iseq]
        );
      }
      chosen_pairs.insert(family.pairs[ipair]);
      all_chosen_seqs.insert(ab_seq_pair(&ab));
      family_chosen.push(ab);
      n_this_var += 1;
    }
  }

  Ok(family_chosen)
}

/// Adds the consensus or naive sequence of the family: an observed pair at
/// zero distance when one exists (preferring higher multiplicity), otherwise
/// the inferred pseudo-sequence, subject to the ambiguity and distance
/// criteria.
fn add_unobs_seq(
  family: &mut FamilyPair,
  iclust: usize,
  seqtype: SeqType,
  eligible: &[usize],
  cfg: &AbChoiceCfg,
  all_chosen_seqs: &mut IndexSet<(String, String)>,
  family_chosen: &mut Vec<ChosenAb>,
) -> Result<(), Report> {
  let h_cons_dists = cons_dists_aa(&mut family.h)?;
  let l_cons_dists = cons_dists_aa(&mut family.l)?;

  let zero_dist = |family: &FamilyPair, ipair: usize| -> bool {
    let (h_iseq, l_iseq) = family.pairs[ipair];
    match seqtype {
      SeqType::Cons => h_cons_dists[h_iseq] + l_cons_dists[l_iseq] == 0,
      _ => family.h.n_mutations[h_iseq] + family.l.n_mutations[l_iseq] == 0,
    }
  };

  let mut observed: Vec<usize> = eligible.iter().copied().filter(|&ipair| zero_dist(family, ipair)).collect();
  if let Some(max_ambig) = cfg.max_ambig_positions {
    observed.retain(|&ipair| pair_ambig_count(family, ipair) <= max_ambig);
  }
  observed.sort_by(|&ipair, &jpair| family.seq_mtps(jpair).cmp(&family.seq_mtps(ipair)));

  let ab = if let Some(&ipair) = observed.first() {
    observed_ab(family, iclust, ipair)
  } else {
    info!("{seqtype:?} seq not observed in family {iclust}, injecting the inferred sequence");
    let (h_seq_nuc, h_seq_aa, l_seq_nuc, l_seq_aa) = match seqtype {
      SeqType::Cons => {
        family.h.ensure_consensus_seq()?;
        family.h.ensure_consensus_seq_aa()?;
        family.l.ensure_consensus_seq()?;
        family.l.ensure_consensus_seq_aa()?;
        (
          family.h.consensus_seq.clone().unwrap(),
          family.h.consensus_seq_aa.clone().unwrap(),
          family.l.consensus_seq.clone().unwrap(),
          family.l.consensus_seq_aa.clone().unwrap(),
        )
      }
      _ => {
        family.h.ensure_naive_seq_aa();
        family.l.ensure_naive_seq_aa();
        (
          family.h.naive_seq.clone(),
          family.h.naive_seq_aa.clone().unwrap(),
          family.l.naive_seq.clone(),
          family.l.naive_seq_aa.clone().unwrap(),
        )
      }
    };
    let ab = ChosenAb {
      iclust,
      seqtype,
      h_uid: None,
      l_uid: None,
      h_seq_aa,
      l_seq_aa,
      h_seq_nuc,
      l_seq_nuc,
    };
    let n_ambig = n_ambig_aa(&ab.h_seq_aa) + n_ambig_aa(&ab.l_seq_aa);
    if cfg.max_ambig_positions.is_some_and(|max_ambig| n_ambig > max_ambig) {
      info!("{seqtype:?} seq: too many ambiguous positions ({n_ambig})");
      return Ok(());
    }
    ab
  };

  if all_chosen_seqs.contains(&ab_seq_pair(&ab)) {
    info!("{seqtype:?} seq identical to a previously chosen seq");
    return Ok(());
  }
  if let Some(min_hdist) = cfg.min_hdist_to_already_chosen {
    if too_close_to_chosen(all_chosen_seqs, &ab, min_hdist) {
      info!("{seqtype:?} seq too close to a previously chosen seq");
      return Ok(());
    }
  }
  all_chosen_seqs.insert(ab_seq_pair(&ab));
  family_chosen.push(ab);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use crate::choose::cfg::AbChoiceCfg;
  use crate::seq::locus::Locus;
  use eyre::Report;
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  fn paired_family(h_uids: &[&str], l_uids: &[&str], h_seqs: &[&str], l_seqs: &[&str]) -> FamilyPair {
    let mut h = simple_annotation(Locus::Igh, h_uids, h_seqs, h_seqs[0]);
    let mut l = simple_annotation(Locus::Igk, l_uids, l_seqs, l_seqs[0]);
    h.paired_uids = l_uids.iter().map(|uid| vec![(*uid).to_owned()]).collect();
    l.paired_uids = h_uids.iter().map(|uid| vec![(*uid).to_owned()]).collect();
    FamilyPair::new(h, l, IndexMap::new()).unwrap()
  }

  #[test]
  fn takes_top_n_by_sort_var() -> Result<(), Report> {
    let mut family = paired_family(
      &["h1_c1", "h2_c1", "h3_c1"],
      &["l1_c1", "l2_c1", "l3_c1"],
      &["ATGGCA", "ATGGCC", "ATGGCG"],
      &["TGCTGC", "TGCTGT", "TGCTGA"],
    );
    let metric: IndexMap<String, f64> = indexmap! {
      "h1_c1".to_owned() => 0.1, "h2_c1".to_owned() => 0.9, "h3_c1".to_owned() => 0.5,
      "l1_c1".to_owned() => 0.0, "l2_c1".to_owned() => 0.0, "l3_c1".to_owned() => 0.0,
    };
    family.metrics.insert("aa-lbi".to_owned(), metric);
    let cfg = AbChoiceCfg::from_yaml("n-families: 1\nvars:\n  aa-lbi:\n    sort: high\n    n: 2\n")?;
    let chosen = choose_abs(&mut [family], &cfg)?;
    assert_eq!(chosen.len(), 2);
    assert_eq!(chosen[0].h_uid.as_deref(), Some("h2_c1"));
    assert_eq!(chosen[1].h_uid.as_deref(), Some("h3_c1"));
    Ok(())
  }

  #[test]
  fn near_duplicates_are_not_chosen_twice() -> Result<(), Report> {
    // identical aa seqs for h1/h2: second candidate is skipped
    let mut family = paired_family(
      &["h1_c1", "h2_c1", "h3_c1"],
      &["l1_c1", "l2_c1", "l3_c1"],
      &["ATGGCA", "ATGGCC", "ATGCAT"],
      &["TGCTGC", "TGCTGT", "TGCTGA"],
    );
    let metric: IndexMap<String, f64> = indexmap! {
      "h1_c1".to_owned() => 0.9, "h2_c1".to_owned() => 0.8, "h3_c1".to_owned() => 0.1,
      "l1_c1".to_owned() => 0.0, "l2_c1".to_owned() => 0.0, "l3_c1".to_owned() => 0.0,
    };
    family.metrics.insert("lbi".to_owned(), metric);
    let cfg = AbChoiceCfg::from_yaml("n-families: 1\nvars:\n  lbi:\n    sort: high\n    n: 2\n")?;
    let chosen = choose_abs(&mut [family], &cfg)?;
    assert_eq!(chosen.len(), 2);
    assert_eq!(chosen[0].h_uid.as_deref(), Some("h1_c1"));
    // h2 has the same aa seqs as h1, so h3 is taken instead
    assert_eq!(chosen[1].h_uid.as_deref(), Some("h3_c1"));
    Ok(())
  }

  #[test]
  fn unobserved_naive_seq_is_injected() -> Result<(), Report> {
    let mut family = paired_family(
      &["h1_c1", "h2_c1"],
      &["l1_c1", "l2_c1"],
      &["ATGGCA", "ATGGCC"],
      &["TGCTGT", "TGCTGC"],
    );
    // make both seqs mutated so the naive seq is unobserved
    family.h.naive_seq = "ATGCAT".to_owned();
    family.h.n_mutations = vec![2, 3];
    family.l.naive_seq = "TGCAAA".to_owned();
    family.l.n_mutations = vec![2, 2];
    let cfg = AbChoiceCfg::from_yaml(
      "n-families: 1\ninclude-unobs-naive-seqs: true\nvars:\n  n_mutations:\n    sort: low\n    n: 1\n",
    )?;
    let chosen = choose_abs(&mut [family], &cfg)?;
    assert_eq!(chosen.len(), 2);
    assert_eq!(chosen[0].seqtype, SeqType::Naive);
    assert!(chosen[0].h_uid.is_none());
    assert_eq!(chosen[0].h_seq_nuc, "ATGCAT");
    assert_eq!(chosen[1].seqtype, SeqType::Observed);
    Ok(())
  }

  #[test]
  fn forced_droplet_ids_are_always_included() -> Result<(), Report> {
    let mut family = paired_family(
      &["h1_c1", "h2_c1"],
      &["l1_c1", "l2_c1"],
      &["ATGGCA", "ATGGCC"],
      &["TGCTGT", "TGCTGC"],
    );
    family.metrics.insert(
      "lbi".to_owned(),
      indexmap! {
        "h1_c1".to_owned() => 0.9, "h2_c1".to_owned() => 0.1,
        "l1_c1".to_owned() => 0.0, "l2_c1".to_owned() => 0.0,
      },
    );
    let cfg =
      AbChoiceCfg::from_yaml("n-families: 1\ndroplet-ids: [h2]\nvars:\n  lbi:\n    sort: high\n    n: 1\n")?;
    let chosen = choose_abs(&mut [family], &cfg)?;
    let uids: Vec<_> = chosen.iter().filter_map(|ab| ab.h_uid.as_deref()).collect();
    assert!(uids.contains(&"h2_c1"));
    assert!(uids.contains(&"h1_c1"));
    Ok(())
  }
}
