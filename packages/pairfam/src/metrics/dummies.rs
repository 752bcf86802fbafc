use crate::tree::tree::TreeModel;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;

/// Marker embedded in every synthetic node label. Stable, part of the output
/// contract.
pub const DUMMY_STR: &str = "x-dummy-x";

pub fn dummy_root_label() -> String {
  format!("{DUMMY_STR}-root")
}

pub fn dummy_multi_label(idum: u32, node_label: &str) -> String {
  format!("{DUMMY_STR}-multi-{idum}-{node_label}")
}

pub fn is_dummy_label(label: &str) -> bool {
  label.contains(DUMMY_STR)
}

/// Adds the synthetic branches that regularise the boundary behaviour of the
/// LB integrals: a long branch (`n_tau_lengths * tau`) above the root, and
/// for every node with multiplicity m > 1, m-1 leaf nubs of length `tau`
/// hanging off it.
///
/// Returns the inserted labels, in insertion order, for later removal.
pub fn add_dummy_branches(
  tree: &mut TreeModel,
  tau: f64,
  n_tau_lengths: f64,
  multiplicities: &IndexMap<String, u32>,
) -> Result<Vec<String>, Report> {
  if !(tau.is_finite() && tau > 0.0) {
    return Err(PairfamError::NumericDomain(format!("tau must be positive, got {tau}")).into());
  }
  let mut dummy_labels = vec![];

  let root_label = dummy_root_label();
  tree.add_root_above(root_label.clone(), n_tau_lengths * tau)?;
  dummy_labels.push(root_label);

  // snapshot before we start adding nubs
  let real_nodes = tree.preorder();
  for id in real_nodes {
    let label = tree.label(id).to_owned();
    let multiplicity = multiplicities.get(&label).copied().unwrap_or(1);
    for idum in 1..multiplicity {
      let nub_label = dummy_multi_label(idum, &label);
      tree.add_child(id, nub_label.clone(), tau)?;
      dummy_labels.push(nub_label);
    }
  }
  Ok(dummy_labels)
}

/// Reverses [`add_dummy_branches`]: prunes the nubs and restores the original
/// root. Verifies the surviving node set matches `initial_labels` exactly.
pub fn remove_dummy_branches(
  tree: &mut TreeModel,
  initial_labels: &indexmap::IndexSet<String>,
  dummy_labels: &[String],
) -> Result<(), Report> {
  // nubs are leaves, so remove them before the (unifurcating) root
  let mut ordered: Vec<String> = dummy_labels
    .iter()
    .filter(|label| **label != dummy_root_label())
    .cloned()
    .collect();
  ordered.push(dummy_root_label());
  tree.remove_labels(&ordered)?;

  let final_labels = tree.labels();
  if final_labels != *initial_labels {
    return crate::make_internal_error!(
      "tree nodes after dummy branch addition and removal not the same as before (missing: {}; extra: {})",
      initial_labels.difference(&final_labels).map(String::as_str).collect::<Vec<_>>().join(" "),
      final_labels.difference(initial_labels).map(String::as_str).collect::<Vec<_>>().join(" ")
    );
  }
  Ok(())
}
