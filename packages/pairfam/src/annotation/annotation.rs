use crate::seq::consensus::consensus_seq;
use crate::seq::hamming::{AMBIGUOUS_AA, AMBIGUOUS_NUC};
use crate::seq::locus::Locus;
use crate::seq::translate::translate;
use crate::utils::error::PairfamError;
use eyre::Report;
use serde::{Deserialize, Serialize};

/// One clonal family: an ordered list of sequences inferred to descend from a
/// single naive ancestor, with per-sequence columns kept in parallel vectors.
///
/// Invariants (checked by [`Annotation::validate`]): all per-seq vectors have
/// the same length, all padded sequences have the same length, multiplicities
/// are at least 1, uids are unique within the family.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Annotation {
  #[serde(default)]
  pub locus: Locus,

  pub unique_ids: Vec<String>,

  /// Aligned, padded nucleotide sequences.
  pub seqs: Vec<String>,

  /// Original input sequences; differ from `seqs` when SHM indels are present.
  /// Defaults to `seqs` when absent from the input record.
  #[serde(default)]
  pub input_seqs: Vec<String>,

  pub naive_seq: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub naive_seq_aa: Option<String>,

  pub cdr3_length: usize,

  pub n_mutations: Vec<usize>,

  pub mut_freqs: Vec<f64>,

  #[serde(default)]
  pub has_shm_indels: Vec<bool>,

  pub paired_uids: Vec<Vec<String>>,

  /// Number of reads/cells collapsed into each uid; empty means all 1.
  #[serde(default)]
  pub multiplicities: Vec<u32>,

  /// Per-seq stop-codon flags; empty means none.
  #[serde(default)]
  pub stops: Vec<bool>,

  /// Per-seq in-frame flags; empty means all in frame.
  #[serde(default)]
  pub in_frames: Vec<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub affinities: Option<Vec<Option<f64>>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub umis: Option<Vec<u64>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cell_types: Option<Vec<String>>,

  /// Newick string for this family's tree, when one was inferred externally.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tree: Option<String>,

  // derived caches, never serialized
  #[serde(skip)]
  pub seqs_aa: Option<Vec<String>>,

  #[serde(skip)]
  pub input_seqs_aa: Option<Vec<String>>,

  #[serde(skip)]
  pub consensus_seq: Option<String>,

  #[serde(skip)]
  pub consensus_seq_aa: Option<String>,
}

impl Annotation {
  pub fn n_seqs(&self) -> usize {
    self.unique_ids.len()
  }

  /// Key identifying this family in diagnostics and error records.
  pub fn key(&self) -> String {
    self.unique_ids.join(":")
  }

  pub fn iseq(&self, uid: &str) -> Option<usize> {
    self.unique_ids.iter().position(|u| u == uid)
  }

  pub fn multiplicity(&self, iseq: usize) -> u32 {
    self.multiplicities.get(iseq).copied().unwrap_or(1)
  }

  /// In frame and without stop codon.
  pub fn is_functional(&self, iseq: usize) -> bool {
    let in_frame = self.in_frames.get(iseq).copied().unwrap_or(true);
    let stop = self.stops.get(iseq).copied().unwrap_or(false);
    in_frame && !stop
  }

  pub fn mean_seq_len(&self) -> f64 {
    if self.seqs.is_empty() {
      return 0.0;
    }
    self.seqs.iter().map(String::len).sum::<usize>() as f64 / self.seqs.len() as f64
  }

  /// Positions at which each sequence differs from the family naive sequence,
  /// skipping ambiguous positions. Used for the approximate pairwise Hamming
  /// distance in unpaired-sequence reattachment.
  pub fn mut_positions(&self) -> Vec<Vec<usize>> {
    let naive = self.naive_seq.as_bytes();
    self
      .seqs
      .iter()
      .map(|seq| {
        seq
          .bytes()
          .zip(naive.iter().copied())
          .enumerate()
          .filter(|&(_, (chr, naive_chr))| chr != AMBIGUOUS_NUC && naive_chr != AMBIGUOUS_NUC && chr != naive_chr)
          .map(|(ipos, _)| ipos)
          .collect()
      })
      .collect()
  }

  pub fn ensure_seqs_aa(&mut self) -> &[String] {
    if self.seqs_aa.is_none() {
      self.seqs_aa = Some(self.seqs.iter().map(|s| translate(s)).collect());
    }
    self.seqs_aa.as_ref().unwrap()
  }

  pub fn ensure_input_seqs_aa(&mut self) -> &[String] {
    if self.input_seqs_aa.is_none() {
      self.input_seqs_aa = Some(self.input_seqs.iter().map(|s| translate(s)).collect());
    }
    self.input_seqs_aa.as_ref().unwrap()
  }

  pub fn ensure_naive_seq_aa(&mut self) -> &str {
    if self.naive_seq_aa.is_none() {
      self.naive_seq_aa = Some(translate(&self.naive_seq));
    }
    self.naive_seq_aa.as_ref().unwrap()
  }

  pub fn ensure_consensus_seq(&mut self) -> Result<&str, Report> {
    if self.consensus_seq.is_none() {
      let multis = self.effective_multiplicities();
      self.consensus_seq = Some(consensus_seq(&self.seqs, Some(&multis), AMBIGUOUS_NUC)?);
    }
    Ok(self.consensus_seq.as_ref().unwrap())
  }

  pub fn ensure_consensus_seq_aa(&mut self) -> Result<&str, Report> {
    if self.consensus_seq_aa.is_none() {
      self.ensure_seqs_aa();
      let multis = self.effective_multiplicities();
      let cons = consensus_seq(self.seqs_aa.as_ref().unwrap(), Some(&multis), AMBIGUOUS_AA)?;
      self.consensus_seq_aa = Some(cons);
    }
    Ok(self.consensus_seq_aa.as_ref().unwrap())
  }

  fn effective_multiplicities(&self) -> Vec<u32> {
    (0..self.n_seqs()).map(|iseq| self.multiplicity(iseq)).collect()
  }

  /// Normalizes optional columns after deserialization (input seqs default to
  /// the aligned seqs) and checks the structural invariants.
  pub fn finalize(&mut self, locus: Locus) -> Result<(), Report> {
    self.locus = locus;
    if self.input_seqs.is_empty() {
      self.input_seqs = self.seqs.clone();
    }
    self.validate()
  }

  pub fn validate(&self) -> Result<(), Report> {
    let n = self.n_seqs();
    if n == 0 {
      return Err(PairfamError::InputMalformed(format!("empty family for locus {}", self.locus)).into());
    }
    let per_seq_lens = [
      ("seqs", self.seqs.len()),
      ("input_seqs", self.input_seqs.len()),
      ("n_mutations", self.n_mutations.len()),
      ("mut_freqs", self.mut_freqs.len()),
      ("paired_uids", self.paired_uids.len()),
    ];
    for (field, len) in per_seq_lens {
      if len != n {
        return Err(
          PairfamError::InputMalformed(format!(
            "family {}: per-seq field '{field}' has length {len}, expected {n}",
            self.key()
          ))
          .into(),
        );
      }
    }
    for (field, len) in [
      ("has_shm_indels", self.has_shm_indels.len()),
      ("multiplicities", self.multiplicities.len()),
      ("stops", self.stops.len()),
      ("in_frames", self.in_frames.len()),
    ] {
      if len != 0 && len != n {
        return Err(
          PairfamError::InputMalformed(format!(
            "family {}: optional per-seq field '{field}' has length {len}, expected 0 or {n}",
            self.key()
          ))
          .into(),
        );
      }
    }
    if self.multiplicities.iter().any(|&m| m < 1) {
      return Err(PairfamError::InputMalformed(format!("family {}: multiplicity below 1", self.key())).into());
    }
    let seq_len = self.seqs[0].len();
    if self.seqs.iter().any(|s| s.len() != seq_len) || self.naive_seq.len() != seq_len {
      return Err(
        PairfamError::InputMalformed(format!("family {}: unequal padded sequence lengths", self.key())).into(),
      );
    }
    for (iseq, uid) in self.unique_ids.iter().enumerate() {
      if self.unique_ids[..iseq].contains(uid) {
        return Err(PairfamError::DuplicateUid(format!("uid '{uid}' appears twice in family {}", self.key())).into());
      }
    }
    Ok(())
  }

  /// A copy containing only the given rows, caches cleared.
  pub fn restricted_to(&self, iseqs: &[usize]) -> Self {
    fn take<T: Clone>(vals: &[T], iseqs: &[usize]) -> Vec<T> {
      iseqs.iter().map(|&i| vals[i].clone()).collect()
    }
    fn take_opt<T: Clone>(vals: &Option<Vec<T>>, iseqs: &[usize]) -> Option<Vec<T>> {
      vals.as_ref().map(|v| take(v, iseqs))
    }
    Self {
      locus: self.locus,
      unique_ids: take(&self.unique_ids, iseqs),
      seqs: take(&self.seqs, iseqs),
      input_seqs: take(&self.input_seqs, iseqs),
      naive_seq: self.naive_seq.clone(),
      naive_seq_aa: self.naive_seq_aa.clone(),
      cdr3_length: self.cdr3_length,
      n_mutations: take(&self.n_mutations, iseqs),
      mut_freqs: take(&self.mut_freqs, iseqs),
      has_shm_indels: if self.has_shm_indels.is_empty() {
        vec![]
      } else {
        take(&self.has_shm_indels, iseqs)
      },
      paired_uids: take(&self.paired_uids, iseqs),
      multiplicities: if self.multiplicities.is_empty() {
        vec![]
      } else {
        take(&self.multiplicities, iseqs)
      },
      stops: if self.stops.is_empty() { vec![] } else { take(&self.stops, iseqs) },
      in_frames: if self.in_frames.is_empty() {
        vec![]
      } else {
        take(&self.in_frames, iseqs)
      },
      affinities: take_opt(&self.affinities, iseqs),
      umis: take_opt(&self.umis, iseqs),
      cell_types: take_opt(&self.cell_types, iseqs),
      tree: None,
      seqs_aa: None,
      input_seqs_aa: None,
      consensus_seq: None,
      consensus_seq_aa: None,
    }
  }
}
