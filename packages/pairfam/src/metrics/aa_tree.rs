use crate::annotation::annotation::Annotation;
use crate::seq::hamming::{hamming_frac_aa, hamming_frac_nuc};
use crate::tree::tree::TreeModel;
use eyre::Report;
use log::warn;
use std::collections::HashMap;

/// Relative difference between a nucleotide edge length and the
/// corresponding sequence Hamming fraction above which we warn.
const VERY_DIFFERENT_FRAC: f64 = 0.5;

/// Converts a nucleotide tree to an amino-acid tree: every edge length
/// becomes the aa Hamming fraction between the endpoint sequences (the naive
/// sequence stands in for the root). Edges with a missing endpoint sequence
/// keep their nucleotide length, with a warning.
pub fn get_aa_tree(tree: &TreeModel, annotation: &mut Annotation) -> Result<TreeModel, Report> {
  annotation.ensure_seqs_aa();
  annotation.ensure_naive_seq_aa();

  let mut nuc_seqs: HashMap<&str, &str> = HashMap::new();
  let mut aa_seqs: HashMap<&str, &str> = HashMap::new();
  for (iseq, uid) in annotation.unique_ids.iter().enumerate() {
    nuc_seqs.insert(uid, &annotation.seqs[iseq]);
    aa_seqs.insert(uid, &annotation.seqs_aa.as_ref().unwrap()[iseq]);
  }
  let root_label = tree.label(tree.root());
  // the root is the inferred naive sequence unless an observed seq sits there
  if !nuc_seqs.contains_key(root_label) {
    nuc_seqs.insert(root_label, &annotation.naive_seq);
    aa_seqs.insert(root_label, annotation.naive_seq_aa.as_ref().unwrap());
  }

  let mut aa_tree = tree.clone();
  let mut skipped_edges = 0;
  let mut missing_nodes: Vec<String> = vec![];
  let mut n_edges = 0;
  for id in tree.preorder() {
    let Some(parent) = tree.parent(id) else { continue };
    n_edges += 1;
    let (child_label, parent_label) = (tree.label(id), tree.label(parent));
    let (Some(&parent_aa), Some(&child_aa)) = (aa_seqs.get(parent_label), aa_seqs.get(child_label)) else {
      skipped_edges += 1;
      for label in [child_label, parent_label] {
        if !aa_seqs.contains_key(label) && !missing_nodes.contains(&label.to_owned()) {
          missing_nodes.push(label.to_owned());
        }
      }
      continue;
    };
    let (aa_mut_frac, _) = hamming_frac_aa(parent_aa, child_aa)?;
    let nuc_edge_length = tree.edge_length(id);
    if let (Some(&parent_nuc), Some(&child_nuc)) = (nuc_seqs.get(parent_label), nuc_seqs.get(child_label)) {
      let (nuc_mut_frac, _) = hamming_frac_nuc(parent_nuc, child_nuc)?;
      if nuc_mut_frac > 0.0 && (nuc_edge_length - nuc_mut_frac).abs() / nuc_mut_frac > VERY_DIFFERENT_FRAC {
        warn!(
          "nuc branch length {nuc_edge_length:.4} and hamming frac {nuc_mut_frac:.4} very different for branch {parent_label} --> {child_label}"
        );
      }
    }
    aa_tree.set_edge_length(id, aa_mut_frac);
  }

  if skipped_edges > 0 {
    warn!(
      "get_aa_tree: skipped {skipped_edges}/{n_edges} edges with missing sequences (left the nucleotide branch length unmodified). Missing nodes: {}",
      missing_nodes.join(" ")
    );
  }
  Ok(aa_tree)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use crate::seq::locus::Locus;
  use crate::tree::newick::parse_newick;
  use eyre::Report;
  use pretty_assertions::assert_eq;

  /// The aa edge length is the aa Hamming fraction; a synonymous nucleotide
  /// change gives a zero-length aa edge.
  #[test]
  fn edges_become_aa_hamming_fractions() -> Result<(), Report> {
    // naive ATGGCC (MA); a has a nonsynonymous change (MT), b a synonymous one (MA)
    let mut annotation = simple_annotation(Locus::Igh, &["a", "b"], &["ATGACC", "ATGGCG"], "ATGGCC");
    let tree = parse_newick("(a:0.17,b:0.17)naive;")?;
    let aa_tree = get_aa_tree(&tree, &mut annotation)?;
    let a = aa_tree.find("a").unwrap();
    let b = aa_tree.find("b").unwrap();
    assert!((aa_tree.edge_length(a) - 0.5).abs() < 1e-12); // 1 of 2 aa positions
    assert_eq!(aa_tree.edge_length(b), 0.0);
    Ok(())
  }

  /// Edges touching a node with no sequence keep their nucleotide length.
  #[test]
  fn missing_sequence_preserves_nuc_edge_length() -> Result<(), Report> {
    let mut annotation = simple_annotation(Locus::Igh, &["a"], &["ATGACC"], "ATGGCC");
    let tree = parse_newick("((a:0.1)ghost:0.2)naive;")?;
    let aa_tree = get_aa_tree(&tree, &mut annotation)?;
    let ghost = aa_tree.find("ghost").unwrap();
    let a = aa_tree.find("a").unwrap();
    assert!((aa_tree.edge_length(ghost) - 0.2).abs() < 1e-12);
    assert!((aa_tree.edge_length(a) - 0.1).abs() < 1e-12);
    Ok(())
  }

  /// For every edge the aa fraction is bounded by the nuc fraction times the
  /// codon factor (an aa site changes only if one of its three nucs does).
  #[test]
  fn aa_edges_bounded_by_codon_factor() -> Result<(), Report> {
    let mut annotation = simple_annotation(
      Locus::Igh,
      &["a", "b"],
      &["ATGACCGAA", "ATGGCGGAG"],
      "ATGGCCGAA",
    );
    let tree = parse_newick("(a:0.222,b:0.222)naive;")?;
    let aa_tree = get_aa_tree(&tree, &mut annotation)?;
    let seq_len = 9.0;
    for label in ["a", "b"] {
      let id = tree.find(label).unwrap();
      let nuc_frac = tree.edge_length(id);
      let aa_frac = aa_tree.edge_length(aa_tree.find(label).unwrap());
      assert!(aa_frac <= nuc_frac * (seq_len / 3.0) + 1e-9, "edge {label}");
    }
    Ok(())
  }
}
