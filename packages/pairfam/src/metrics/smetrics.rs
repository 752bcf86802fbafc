use crate::annotation::annotation::Annotation;
use crate::metrics::aa_tree::get_aa_tree;
use crate::metrics::cons_dist::cons_dist_aa_metric;
use crate::metrics::lb::{calculate_lb_values, LbMetric};
use crate::tree::newick::parse_newick;
use crate::tree::tree::TreeModel;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;
use itertools::Itertools;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// The known selection metrics; the string forms are the stable contract
/// used in the output sidecar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMetric {
  Lbi,
  Lbr,
  Lbf,
  AaLbi,
  AaLbr,
  AaLbf,
  ConsDistAa,
}

pub const ALL_SELECTION_METRICS: [SelectionMetric; 7] = [
  SelectionMetric::Lbi,
  SelectionMetric::Lbr,
  SelectionMetric::Lbf,
  SelectionMetric::AaLbi,
  SelectionMetric::AaLbr,
  SelectionMetric::AaLbf,
  SelectionMetric::ConsDistAa,
];

impl SelectionMetric {
  pub const fn needs_tree(self) -> bool {
    !matches!(self, Self::ConsDistAa)
  }

  pub const fn is_aa_tree_metric(self) -> bool {
    matches!(self, Self::AaLbi | Self::AaLbr | Self::AaLbf)
  }

  const fn lb_metric(self) -> Option<LbMetric> {
    match self {
      Self::Lbi | Self::AaLbi => Some(LbMetric::Lbi),
      Self::Lbr | Self::AaLbr => Some(LbMetric::Lbr),
      Self::Lbf | Self::AaLbf => Some(LbMetric::Lbf),
      Self::ConsDistAa => None,
    }
  }
}

/// Parses metric names, failing with [`PairfamError::UnsupportedMetric`] on
/// anything outside the known set.
pub fn parse_metrics(names: &[String]) -> Result<Vec<SelectionMetric>, Report> {
  names
    .iter()
    .map(|name| {
      SelectionMetric::from_str(name).map_err(|_| {
        PairfamError::UnsupportedMetric(format!(
          "'{name}' (choose from: {})",
          ALL_SELECTION_METRICS.iter().join(" ")
        ))
        .into()
      })
    })
    .collect()
}

#[derive(Clone, Debug)]
pub struct SmetricsConfig {
  pub metrics: Vec<SelectionMetric>,

  /// Exponential decay length scale; `None` means 1/mean_seq_len per family.
  pub lb_tau: Option<f64>,

  pub normalize_lbi: bool,

  /// Families smaller than this are skipped.
  pub min_cluster_size: usize,

  /// Minimum fraction of family uids that must appear in the tree.
  pub min_tree_uid_overlap: f64,
}

impl Default for SmetricsConfig {
  fn default() -> Self {
    Self {
      metrics: ALL_SELECTION_METRICS.to_vec(),
      lb_tau: None,
      normalize_lbi: true,
      min_cluster_size: 3,
      min_tree_uid_overlap: 0.5,
    }
  }
}

/// Computed metrics for one family, ready for the output sidecar.
#[derive(Clone, Debug)]
pub struct FamilyMetrics {
  pub family_key: String,
  pub unique_ids: Vec<String>,
  pub metrics: IndexMap<SelectionMetric, IndexMap<String, f64>>,
  pub tree: Option<String>,
  pub aa_tree: Option<String>,
}

#[derive(Clone, Debug)]
pub struct FamilyFailure {
  pub family_key: String,
  pub error: String,
}

#[derive(Clone, Debug, Default)]
pub struct SmetricsOutcome {
  /// Sorted by family size, largest first.
  pub families: Vec<FamilyMetrics>,
  /// Families that failed; callers skip these and continue.
  pub failures: Vec<FamilyFailure>,
  pub n_too_small: usize,
}

/// Picks the tree for each family: the annotation's own newick string wins,
/// then the sidecar file (one tree per family, in family order).
pub fn trees_for_annotations(
  annotations: &[Annotation],
  sidecar_trees: Option<&[TreeModel]>,
) -> Result<Vec<Option<TreeModel>>, Report> {
  annotations
    .iter()
    .enumerate()
    .map(|(ifam, annotation)| match &annotation.tree {
      Some(treestr) => parse_newick(treestr).map(Some),
      None => Ok(sidecar_trees.and_then(|trees| trees.get(ifam).cloned())),
    })
    .collect()
}

/// Computes the requested selection metrics for every family, in parallel
/// across families (they share no mutable state). Per-family failures are
/// collected, not fatal.
pub fn add_smetrics(
  annotations: &mut [Annotation],
  trees: Vec<Option<TreeModel>>,
  cfg: &SmetricsConfig,
) -> Result<SmetricsOutcome, Report> {
  if annotations.len() != trees.len() {
    return crate::make_internal_error!("one tree slot per family required");
  }
  info!(
    "calculating selection metrics ({}) for {} families",
    cfg.metrics.iter().join(" "),
    annotations.len()
  );

  let mut trees = trees;
  let results: Vec<Option<Result<FamilyMetrics, (String, Report)>>> = annotations
    .par_iter_mut()
    .zip(trees.par_iter_mut())
    .map(|(annotation, tree)| {
      if annotation.n_seqs() < cfg.min_cluster_size {
        return None;
      }
      let family_key = annotation.key();
      Some(compute_family(annotation, tree.as_mut(), cfg).map_err(|err| (family_key, err)))
    })
    .collect();

  let mut outcome = SmetricsOutcome {
    n_too_small: results.iter().filter(|result| result.is_none()).count(),
    ..SmetricsOutcome::default()
  };
  for result in results.into_iter().flatten() {
    match result {
      Ok(family) => outcome.families.push(family),
      Err((family_key, err)) => {
        warn!("skipping family {family_key}: {err:#}");
        outcome.failures.push(FamilyFailure {
          family_key,
          error: format!("{err:#}"),
        });
      }
    }
  }
  if outcome.n_too_small > 0 {
    info!("skipped {} families smaller than {}", outcome.n_too_small, cfg.min_cluster_size);
  }
  // largest families first in the output
  outcome.families.sort_by(|fam1, fam2| fam2.unique_ids.len().cmp(&fam1.unique_ids.len()));
  Ok(outcome)
}

fn compute_family(
  annotation: &mut Annotation,
  tree: Option<&mut TreeModel>,
  cfg: &SmetricsConfig,
) -> Result<FamilyMetrics, Report> {
  let mut family = FamilyMetrics {
    family_key: annotation.key(),
    unique_ids: annotation.unique_ids.clone(),
    metrics: IndexMap::new(),
    tree: None,
    aa_tree: None,
  };

  if cfg.metrics.contains(&SelectionMetric::ConsDistAa) {
    family
      .metrics
      .insert(SelectionMetric::ConsDistAa, cons_dist_aa_metric(annotation)?);
  }

  let tree_metrics = cfg.metrics.iter().filter(|metric| metric.needs_tree()).copied().collect_vec();
  if tree_metrics.is_empty() {
    return Ok(family);
  }
  let Some(tree) = tree else {
    return Err(
      PairfamError::TreeAnnotationMismatch(format!("no tree available for family {}", family.family_key)).into(),
    );
  };
  check_tree_uid_overlap(tree, annotation, cfg.min_tree_uid_overlap)?;

  let nuc_metrics = tree_metrics.iter().filter(|metric| !metric.is_aa_tree_metric()).copied().collect_vec();
  if !nuc_metrics.is_empty() {
    let lb_metrics = nuc_metrics.iter().filter_map(|metric| metric.lb_metric()).collect_vec();
    let lb_values = calculate_lb_values(tree, cfg.lb_tau, Some(&*annotation), &lb_metrics, cfg.normalize_lbi)?;
    family.tree = Some(lb_values.tree.clone());
    for metric in nuc_metrics {
      let lb_metric = metric.lb_metric().expect("nuc tree metric maps to an lb metric");
      family.metrics.insert(metric, lb_values.values[&lb_metric].clone());
    }
  }

  let aa_metrics = tree_metrics.iter().filter(|metric| metric.is_aa_tree_metric()).copied().collect_vec();
  if !aa_metrics.is_empty() {
    // same pre-flight rescale the nuc pass would have applied
    if tree.max_leaf_depth() > 1.0 {
      warn!("leaf depths greater than 1, rescaling by sequence length");
      tree.scale_edges(1.0 / annotation.mean_seq_len())?;
    }
    let mut aa_tree = get_aa_tree(tree, annotation)?;
    let lb_metrics = aa_metrics.iter().filter_map(|metric| metric.lb_metric()).collect_vec();
    let lb_values = calculate_lb_values(&mut aa_tree, cfg.lb_tau, Some(&*annotation), &lb_metrics, cfg.normalize_lbi)?;
    family.aa_tree = Some(lb_values.tree.clone());
    for metric in aa_metrics {
      let lb_metric = metric.lb_metric().expect("aa tree metric maps to an lb metric");
      family.metrics.insert(metric, lb_values.values[&lb_metric].clone());
    }
  }

  Ok(family)
}

/// A tree covering too few of the family's sequences is useless and usually
/// indicates mismatched inputs.
fn check_tree_uid_overlap(tree: &TreeModel, annotation: &Annotation, min_overlap: f64) -> Result<(), Report> {
  let leaf_labels = tree.leaf_labels();
  let n_in_tree = annotation.unique_ids.iter().filter(|uid| leaf_labels.contains(*uid)).count();
  let overlap = n_in_tree as f64 / annotation.n_seqs() as f64;
  if overlap < min_overlap {
    return Err(
      PairfamError::TreeAnnotationMismatch(format!(
        "only {n_in_tree}/{} family uids appear in the tree (need at least {:.0}%) for family {}",
        annotation.n_seqs(),
        100.0 * min_overlap,
        annotation.key()
      ))
      .into(),
    );
  }
  Ok(())
}

/// `<stem>-selection-metrics.json` next to the input file.
pub fn smetric_fname(input: impl AsRef<Path>) -> PathBuf {
  let input = input.as_ref();
  let stem = input.file_stem().and_then(|stem| stem.to_str()).unwrap_or("output");
  input.with_file_name(format!("{stem}-selection-metrics.json"))
}

/// Serializes families to the sidecar document: one record per family, keyed
/// by uid within each metric; missing metrics are omitted, never null.
pub fn selection_metrics_json(families: &[FamilyMetrics]) -> serde_json::Value {
  let records = families
    .iter()
    .map(|family| {
      let mut lb = serde_json::Map::new();
      for (metric, values) in &family.metrics {
        lb.insert(metric.to_string(), json!(values));
      }
      if let Some(tree) = &family.tree {
        lb.insert("tree".to_owned(), json!(tree));
      }
      if let Some(aa_tree) = &family.aa_tree {
        lb.insert("aa-tree".to_owned(), json!(aa_tree));
      }
      json!({
        "unique_ids": family.unique_ids,
        "tree-info": {"lb": lb},
      })
    })
    .collect_vec();
  json!(records)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use crate::seq::locus::Locus;
  use eyre::Report;
  use pretty_assertions::assert_eq;

  fn family_with_tree() -> Annotation {
    let mut annotation = simple_annotation(
      Locus::Igh,
      &["a", "b", "c"],
      &["ATGACC", "ATGGCG", "ATGGCA"],
      "ATGGCC",
    );
    annotation.tree = Some("((a:0.1,b:0.1)i:0.05,c:0.12)naive;".to_owned());
    annotation
  }

  #[test]
  fn unknown_metric_names_are_rejected() {
    let err = parse_metrics(&["lbi".to_owned(), "shazam".to_owned()]).expect_err("expected failure");
    assert!(err.to_string().contains("shazam"));
    assert_eq!(crate::utils::error::report_exit_code(&err), 1);
  }

  #[test]
  fn computes_all_metrics_for_a_family() -> Result<(), Report> {
    let mut annotations = vec![family_with_tree()];
    let trees = trees_for_annotations(&annotations, None)?;
    let cfg = SmetricsConfig {
      normalize_lbi: false, // toy seqs are far shorter than the bounds table
      ..SmetricsConfig::default()
    };
    let outcome = add_smetrics(&mut annotations, trees, &cfg)?;
    assert_eq!(outcome.failures.len(), 0);
    assert_eq!(outcome.families.len(), 1);
    let family = &outcome.families[0];
    for metric in ALL_SELECTION_METRICS {
      assert!(family.metrics.contains_key(&metric), "missing {metric}");
      for uid in ["a", "b", "c"] {
        assert!(family.metrics[&metric].contains_key(uid), "missing {metric} for {uid}");
      }
    }
    assert!(family.tree.is_some());
    assert!(family.aa_tree.is_some());
    Ok(())
  }

  #[test]
  fn small_families_are_skipped() -> Result<(), Report> {
    let mut annotations = vec![simple_annotation(Locus::Igh, &["a"], &["ATGGCC"], "ATGGCC")];
    let trees = vec![None];
    let outcome = add_smetrics(&mut annotations, trees, &SmetricsConfig::default())?;
    assert_eq!(outcome.n_too_small, 1);
    assert_eq!(outcome.families.len(), 0);
    Ok(())
  }

  #[test]
  fn tree_uid_mismatch_is_a_per_family_failure() -> Result<(), Report> {
    let mut annotation = family_with_tree();
    annotation.tree = Some("(x:0.1,y:0.1)naive;".to_owned());
    let mut annotations = vec![annotation];
    let trees = trees_for_annotations(&annotations, None)?;
    let outcome = add_smetrics(&mut annotations, trees, &SmetricsConfig::default())?;
    assert_eq!(outcome.families.len(), 0);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].error.contains("tree"));
    Ok(())
  }

  #[test]
  fn sidecar_omits_missing_metrics() {
    let family = FamilyMetrics {
      family_key: "a:b".to_owned(),
      unique_ids: vec!["a".to_owned(), "b".to_owned()],
      metrics: IndexMap::new(),
      tree: None,
      aa_tree: None,
    };
    let doc = selection_metrics_json(&[family]);
    let lb = &doc[0]["tree-info"]["lb"];
    assert!(lb.as_object().unwrap().is_empty());
  }

  #[test]
  fn smetric_fname_inserts_suffix() {
    assert_eq!(
      smetric_fname("/tmp/igh.ndjson"),
      PathBuf::from("/tmp/igh-selection-metrics.json")
    );
  }
}
