use crate::annotation::annotation::Annotation;
use crate::seq::hamming::{hamming_dist_aa, hamming_dist_nuc};
use eyre::Report;
use indexmap::IndexMap;

/// Per-sequence Hamming distance to the family consensus. Amino acid by
/// default for selection metrics; the nucleotide variant is kept for
/// diagnostics.
pub fn cons_dists_aa(annotation: &mut Annotation) -> Result<Vec<usize>, Report> {
  annotation.ensure_seqs_aa();
  annotation.ensure_consensus_seq_aa()?;
  let cons = annotation.consensus_seq_aa.clone().unwrap();
  annotation
    .seqs_aa
    .as_ref()
    .unwrap()
    .iter()
    .map(|seq| hamming_dist_aa(&cons, seq))
    .collect()
}

pub fn cons_dists_nuc(annotation: &mut Annotation) -> Result<Vec<usize>, Report> {
  annotation.ensure_consensus_seq()?;
  let cons = annotation.consensus_seq.clone().unwrap();
  annotation.seqs.iter().map(|seq| hamming_dist_nuc(&cons, seq)).collect()
}

/// The stored selection metric is negated so that higher is better, like the
/// tree metrics.
pub fn cons_dist_aa_metric(annotation: &mut Annotation) -> Result<IndexMap<String, f64>, Report> {
  let dists = cons_dists_aa(annotation)?;
  Ok(
    annotation
      .unique_ids
      .iter()
      .zip(dists)
      .map(|(uid, dist)| (uid.clone(), -(dist as f64)))
      .collect(),
  )
}

/// Family-level SHM count: Hamming distance between the naive sequence and
/// the consensus.
pub fn cons_seq_shm_nuc(annotation: &mut Annotation) -> Result<usize, Report> {
  annotation.ensure_consensus_seq()?;
  hamming_dist_nuc(&annotation.naive_seq, annotation.consensus_seq.as_ref().unwrap())
}

pub fn cons_seq_shm_aa(annotation: &mut Annotation) -> Result<usize, Report> {
  annotation.ensure_naive_seq_aa();
  annotation.ensure_consensus_seq_aa()?;
  hamming_dist_aa(
    annotation.naive_seq_aa.as_ref().unwrap(),
    annotation.consensus_seq_aa.as_ref().unwrap(),
  )
}
