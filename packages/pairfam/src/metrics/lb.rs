use crate::annotation::annotation::Annotation;
use crate::metrics::bounds::normalize_lb_val;
use crate::metrics::dummies::{add_dummy_branches, is_dummy_label, remove_dummy_branches};
use crate::tree::tree::TreeModel;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Local-branching metrics computed from one message-passing pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LbMetric {
  /// Local branching index: integrated exponentially discounted tree length
  /// around the node.
  Lbi,
  /// Local branching ratio: offspring-side vs ancestor-side contributions.
  Lbr,
  /// Local branching fraction: LBI as a percentage of total tree length.
  Lbf,
}

pub const ALL_LB_METRICS: [LbMetric; 3] = [LbMetric::Lbi, LbMetric::Lbr, LbMetric::Lbf];

/// How many tau lengths of branch to hang above the root.
pub const DEFAULT_N_TAU_LENGTHS: f64 = 10.0;

/// Relative depth/SHM disagreement above which we warn (pre-flight check).
const MAX_DEPTH_SHM_FRAC_DIFF: f64 = 0.25;

#[derive(Clone, Debug)]
pub struct LbValues {
  /// metric -> node label -> value; dummy nodes excluded.
  pub values: IndexMap<LbMetric, IndexMap<String, f64>>,
  /// Newick snapshot of the tree the values were computed on (without dummy
  /// branches).
  pub tree: String,
}

/// Computes LBI/LBR/LBF for every node of `tree`.
///
/// When `tau` is `None` it defaults to `1 / mean_seq_len`. The tree is
/// rescaled by `1 / mean_seq_len` first if any leaf is deeper than 1 (tree
/// units are then mutations, not frequencies). Warns when observed mutation
/// frequencies and leaf depths disagree by more than 25%.
pub fn calculate_lb_values(
  tree: &mut TreeModel,
  tau: Option<f64>,
  annotation: Option<&Annotation>,
  metrics_to_calc: &[LbMetric],
  normalize_lbi: bool,
) -> Result<LbValues, Report> {
  let seq_len = annotation.map(Annotation::mean_seq_len);

  let tau = match (tau, seq_len) {
    (Some(tau), _) => tau,
    (None, Some(seq_len)) if seq_len > 0.0 => 1.0 / seq_len,
    (None, _) => {
      return Err(PairfamError::NumericDomain("need an annotation to default tau to 1/seq_len".to_owned()).into());
    }
  };
  if !(tau.is_finite() && tau > 0.0) {
    return Err(PairfamError::NumericDomain(format!("tau must be in (0, 1], got {tau}")).into());
  }
  if let Some(seq_len) = seq_len {
    if (tau * seq_len - 1.0).abs() > 0.1 {
      warn!(
        "inverse of specified tau {:.1} not within 10% of mean seq len {:.1}",
        1.0 / tau,
        seq_len
      );
    }
  }

  if tree.max_leaf_depth() > 1.0 {
    let Some(seq_len) = seq_len else {
      return Err(
        PairfamError::NumericDomain(
          "tree needs rescaling (leaf depth greater than 1) but no annotation is available to rescale with".to_owned(),
        )
        .into(),
      );
    };
    warn!("leaf depths greater than 1, rescaling by sequence length");
    tree.scale_edges(1.0 / seq_len)?;
  }

  if let Some(annotation) = annotation {
    check_depths_vs_shm(tree, annotation);
  }

  let multiplicities = annotation.map_or_else(IndexMap::new, |annotation| {
    tree
      .preorder()
      .into_iter()
      .map(|id| {
        let label = tree.label(id).to_owned();
        let multiplicity = annotation.iseq(&label).map_or(1, |iseq| annotation.multiplicity(iseq));
        (label, multiplicity)
      })
      .collect()
  });

  if log::log_enabled!(log::Level::Debug) {
    debug!("calculating lb values with tau {tau:.6} on tree:\n{}", crate::tree::ascii::ascii_tree(tree));
  }

  let treestr = crate::tree::newick::to_newick(tree);
  let values = set_lb_values(tree, tau, seq_len, metrics_to_calc, normalize_lbi, &multiplicities)?;
  Ok(LbValues { values, tree: treestr })
}

/// Warn when the tree and the observed SHM tell different stories: for every
/// node that is an observed sequence, compare its root-to-node depth with its
/// mutation frequency.
fn check_depths_vs_shm(tree: &TreeModel, annotation: &Annotation) {
  let depths = tree.depths();
  let mut n_different = 0;
  let mut n_common = 0;
  for id in tree.preorder() {
    let Some(iseq) = annotation.iseq(tree.label(id)) else { continue };
    n_common += 1;
    let depth = depths[id];
    let mut_freq = annotation.mut_freqs[iseq];
    let frac_diff = if depth > 0.0 { (depth - mut_freq).abs() / depth } else { 0.0 };
    if frac_diff > MAX_DEPTH_SHM_FRAC_DIFF {
      n_different += 1;
    }
  }
  if n_different > 0 {
    warn!(
      "tree depth and mut freq differ by more than {:.0}% for {n_different}/{n_common} nodes",
      100.0 * MAX_DEPTH_SHM_FRAC_DIFF
    );
  }
}

/// The message-passing core: augments the tree with dummy branches, runs the
/// up (postorder) and down (preorder) passes, derives the metrics, then
/// removes the dummy branches again.
pub fn set_lb_values(
  tree: &mut TreeModel,
  tau: f64,
  seq_len: Option<f64>,
  metrics_to_calc: &[LbMetric],
  normalize_lbi: bool,
  multiplicities: &IndexMap<String, u32>,
) -> Result<IndexMap<LbMetric, IndexMap<String, f64>>, Report> {
  let initial_labels = tree.labels();
  let dummy_labels = add_dummy_branches(tree, tau, DEFAULT_N_TAU_LENGTHS, multiplicities)?;

  let n_nodes = tree.n_nodes();
  // clock length: distance to the parent; zero for the (dummy) root
  let mut clock = vec![0.0; n_nodes];
  for id in tree.preorder() {
    if tree.parent(id).is_some() {
      let edge = tree.edge_length(id);
      if edge < 0.0 {
        return Err(PairfamError::NumericDomain(format!("negative edge length above node '{}'", tree.label(id))).into());
      }
      clock[id] = edge;
    }
  }

  // up pass: each node's message to its parent, the exponentially discounted
  // tree length below it
  let mut up = vec![0.0; n_nodes];
  for id in tree.postorder() {
    let children_sum: f64 = tree.children(id).iter().map(|&child| up[child]).sum();
    let decay = (-clock[id] / tau).exp();
    up[id] = tau * (1.0 - decay) + decay * children_sum;
  }

  // down pass: each node's message to its children, everything on the other
  // side of the edge
  let mut down = vec![0.0; n_nodes];
  for id in tree.preorder() {
    let children = tree.children(id).to_vec();
    let children_up_sum: f64 = children.iter().map(|&child| up[child]).sum();
    for &child in &children {
      let decay = (-clock[child] / tau).exp();
      let siblings_sum = children_up_sum - up[child];
      down[child] = tau * (1.0 - decay) + decay * (down[id] + siblings_sum);
    }
  }

  let total_length = tree.total_length();

  // the dummy root's single child is the real root; it borders the dummy
  // branch, where LBR is defined to be zero
  let real_root = tree.children(tree.root())[0];

  let mut returnfo: IndexMap<LbMetric, IndexMap<String, f64>> =
    metrics_to_calc.iter().map(|&metric| (metric, IndexMap::new())).collect();
  for id in tree.preorder() {
    let label = tree.label(id);
    if is_dummy_label(label) {
      continue;
    }
    let children_up_sum: f64 = tree.children(id).iter().map(|&child| up[child]).sum();
    let lbi = down[id] + children_up_sum;
    let mut lbr = if down[id] > 0.0 { children_up_sum / down[id] } else { 0.0 };
    if id == real_root || tree.parent(id) == Some(tree.root()) {
      lbr = 0.0;
    }
    let lbf = if total_length > 0.0 { 100.0 * lbi / total_length } else { 0.0 };

    for &metric in metrics_to_calc {
      let mut value = match metric {
        LbMetric::Lbi => lbi,
        LbMetric::Lbr => lbr,
        LbMetric::Lbf => lbf,
      };
      if metric == LbMetric::Lbi && normalize_lbi {
        let Some(seq_len) = seq_len else {
          return Err(
            PairfamError::NumericDomain("cannot normalize lbi without a sequence length".to_owned()).into(),
          );
        };
        value = normalize_lb_val(value, tau, seq_len)?;
      }
      returnfo
        .get_mut(&metric)
        .expect("metric entry initialized")
        .insert(label.to_owned(), value);
    }
  }

  remove_dummy_branches(tree, &initial_labels, &dummy_labels)?;
  Ok(returnfo)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tree::newick::parse_newick;
  use eyre::Report;
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  const TAU: f64 = 0.01;

  fn line_tree(tau: f64) -> Result<TreeModel, Report> {
    // root r - child a (edge tau) - leaf b (edge tau)
    parse_newick(&format!("((b:{tau})a:{tau})r;"))
  }

  /// Three-node line with the dummy root above: the closed forms from the
  /// message-passing recursion, asserted to 1e-9.
  #[test]
  fn lbi_matches_closed_form_on_three_node_line() -> Result<(), Report> {
    let mut tree = line_tree(TAU)?;
    let values = set_lb_values(&mut tree, TAU, None, &ALL_LB_METRICS, false, &IndexMap::new())?;

    let decay = (-1.0_f64).exp(); // e^{-tau/tau}
    let up_b = TAU * (1.0 - decay);
    let up_a = TAU * (1.0 - decay) + decay * up_b;
    // dummy root edge above r is 10*tau; down(r) decays over it from zero
    let decay_root = (-10.0_f64).exp();
    let down_r = TAU * (1.0 - decay_root);
    let down_a = TAU * (1.0 - decay) + decay * down_r;
    let lbi_a = down_a + up_b;
    let lbr_a = up_b / down_a;

    assert!((values[&LbMetric::Lbi]["a"] - lbi_a).abs() < 1e-9);
    assert!((values[&LbMetric::Lbr]["a"] - lbr_a).abs() < 1e-9);
    let total_length = 10.0 * TAU + 2.0 * TAU;
    assert!((values[&LbMetric::Lbf]["a"] - 100.0 * lbi_a / total_length).abs() < 1e-9);
    Ok(())
  }

  /// LBR is zero at the node bordering the dummy branch (the root), while
  /// interior nodes keep their computed ratio.
  #[test]
  fn lbr_is_zero_on_the_dummy_boundary() -> Result<(), Report> {
    let mut tree = parse_newick(&format!("((b:{TAU})a:{TAU},(d:{TAU})c:{TAU})r;"))?;
    let values = set_lb_values(&mut tree, TAU, None, &[LbMetric::Lbr], false, &IndexMap::new())?;
    assert_eq!(values[&LbMetric::Lbr]["r"], 0.0);
    assert!(values[&LbMetric::Lbr]["a"] > 0.0);
    assert!(values[&LbMetric::Lbr]["c"] > 0.0);
    Ok(())
  }

  /// Collapsing an edge to zero length makes the child's LBI approach the
  /// parent's (continuity under refinement).
  #[test]
  fn lbi_is_continuous_when_edge_shrinks_to_zero() -> Result<(), Report> {
    let mut tree = parse_newick(&format!("((b:0.0)a:{TAU})r;"))?;
    let values = set_lb_values(&mut tree, TAU, None, &[LbMetric::Lbi], false, &IndexMap::new())?;
    assert!((values[&LbMetric::Lbi]["b"] - values[&LbMetric::Lbi]["a"]).abs() < 1e-9);
    Ok(())
  }

  /// A multiplicity-2 leaf gets one dummy nub, which raises its parent-ward
  /// message and thus its own LBI relative to a multiplicity-1 leaf.
  #[test]
  fn multiplicity_nubs_increase_lbi() -> Result<(), Report> {
    let mut plain = line_tree(TAU)?;
    let plain_values = set_lb_values(&mut plain, TAU, None, &[LbMetric::Lbi], false, &IndexMap::new())?;
    let mut multi = line_tree(TAU)?;
    let multiplicities = indexmap! {"b".to_owned() => 2_u32};
    let multi_values = set_lb_values(&mut multi, TAU, None, &[LbMetric::Lbi], false, &multiplicities)?;
    assert!(multi_values[&LbMetric::Lbi]["b"] > plain_values[&LbMetric::Lbi]["b"]);
    // the tree comes back without the nubs
    assert_eq!(multi.n_nodes(), 3);
    Ok(())
  }

  /// The scratch pass leaves the tree exactly as it found it.
  #[test]
  fn tree_is_restored_after_metrics() -> Result<(), Report> {
    let mut tree = line_tree(TAU)?;
    let newick_before = crate::tree::newick::to_newick(&tree);
    set_lb_values(&mut tree, TAU, None, &ALL_LB_METRICS, false, &IndexMap::new())?;
    assert_eq!(crate::tree::newick::to_newick(&tree), newick_before);
    Ok(())
  }
}
