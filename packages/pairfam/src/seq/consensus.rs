use crate::utils::error::PairfamError;
use eyre::Report;
use std::collections::BTreeMap;

/// Per-position plurality consensus, weighted by per-sequence multiplicity.
///
/// Ambiguous characters are excluded from the vote; a column with nothing but
/// ambiguous characters yields the ambiguous character. Ties resolve to the
/// lexicographically smallest candidate, so the result is independent of
/// sequence order.
pub fn consensus_seq(seqs: &[String], multiplicities: Option<&[u32]>, ambig: u8) -> Result<String, Report> {
  if seqs.is_empty() {
    return Err(PairfamError::InputMalformed("cannot take consensus of zero sequences".to_owned()).into());
  }
  let seq_len = seqs[0].len();
  if seqs.iter().any(|s| s.len() != seq_len) {
    return Err(PairfamError::InputMalformed("consensus needs equal-length sequences".to_owned()).into());
  }
  if let Some(multis) = multiplicities {
    if multis.len() != seqs.len() {
      return Err(PairfamError::InputMalformed("one multiplicity per sequence required".to_owned()).into());
    }
  }

  let mut cons = String::with_capacity(seq_len);
  for ipos in 0..seq_len {
    let mut counts = BTreeMap::<u8, u64>::new();
    for (iseq, seq) in seqs.iter().enumerate() {
      let chr = seq.as_bytes()[ipos];
      if chr == ambig {
        continue;
      }
      let weight = multiplicities.map_or(1, |multis| u64::from(multis[iseq]));
      *counts.entry(chr).or_insert(0) += weight;
    }
    // BTreeMap iteration is ascending, so the first maximal count is the
    // lexicographically smallest tied character
    let best = counts
      .iter()
      .fold(None::<(u8, u64)>, |acc, (&chr, &count)| match acc {
        Some((_, best_count)) if best_count >= count => acc,
        _ => Some((chr, count)),
      })
      .map_or(ambig, |(chr, _)| chr);
    cons.push(char::from(best));
  }
  Ok(cons)
}
