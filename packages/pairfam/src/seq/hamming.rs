use crate::utils::error::PairfamError;
use eyre::Report;

/// Ambiguous nucleotide character. Positions carrying it are excluded from
/// distance and fraction calculations.
pub const AMBIGUOUS_NUC: u8 = b'N';

/// Ambiguous amino acid character.
pub const AMBIGUOUS_AA: u8 = b'X';

fn check_lengths(s1: &str, s2: &str) -> Result<(), Report> {
  if s1.len() != s2.len() {
    return Err(
      PairfamError::InputMalformed(format!(
        "hamming distance needs equal-length sequences, got {} and {}",
        s1.len(),
        s2.len()
      ))
      .into(),
    );
  }
  Ok(())
}

/// Number of mismatching positions, skipping positions where either sequence
/// carries `ambig`.
pub fn hamming_distance(s1: &str, s2: &str, ambig: u8) -> Result<usize, Report> {
  check_lengths(s1, s2)?;
  let dist = s1
    .bytes()
    .zip(s2.bytes())
    .filter(|&(c1, c2)| c1 != ambig && c2 != ambig && c1 != c2)
    .count();
  Ok(dist)
}

/// Returns `(fraction, distance)`. The fraction divides by the number of
/// positions actually compared, so ambiguous positions reduce the denominator.
pub fn hamming_fraction(s1: &str, s2: &str, ambig: u8) -> Result<(f64, usize), Report> {
  check_lengths(s1, s2)?;
  let (mut n_compared, mut dist) = (0_usize, 0_usize);
  for (c1, c2) in s1.bytes().zip(s2.bytes()) {
    if c1 == ambig || c2 == ambig {
      continue;
    }
    n_compared += 1;
    if c1 != c2 {
      dist += 1;
    }
  }
  let frac = if n_compared == 0 { 0.0 } else { dist as f64 / n_compared as f64 };
  Ok((frac, dist))
}

pub fn hamming_dist_nuc(s1: &str, s2: &str) -> Result<usize, Report> {
  hamming_distance(s1, s2, AMBIGUOUS_NUC)
}

pub fn hamming_frac_nuc(s1: &str, s2: &str) -> Result<(f64, usize), Report> {
  hamming_fraction(s1, s2, AMBIGUOUS_NUC)
}

pub fn hamming_dist_aa(s1: &str, s2: &str) -> Result<usize, Report> {
  hamming_distance(s1, s2, AMBIGUOUS_AA)
}

pub fn hamming_frac_aa(s1: &str, s2: &str) -> Result<(f64, usize), Report> {
  hamming_fraction(s1, s2, AMBIGUOUS_AA)
}

/// Distance variant for sequences that may have different lengths: returns the
/// longer length in that case. Used where we only care about finding very
/// similar sequences.
pub fn local_hamming_dist_aa(s1: &str, s2: &str) -> usize {
  if s1.len() == s2.len() {
    hamming_dist_aa(s1, s2).unwrap_or_else(|_| s1.len())
  } else {
    s1.len().max(s2.len())
  }
}

/// Fraction of positions carrying the ambiguous character.
pub fn ambig_frac(seq: &str, ambig: u8) -> f64 {
  if seq.is_empty() {
    return 0.0;
  }
  seq.bytes().filter(|&c| c == ambig).count() as f64 / seq.len() as f64
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use rstest::rstest;

  #[rstest]
  #[case("ACGT", "ACGT", 0)]
  #[case("ACGT", "AGGA", 2)]
  #[case("ACGT", "NCGA", 1)] // N position skipped
  #[case("NNNN", "ACGT", 0)]
  fn nuc_distances(#[case] s1: &str, #[case] s2: &str, #[case] expected: usize) {
    assert_eq!(hamming_dist_nuc(s1, s2).unwrap(), expected);
  }

  #[test]
  fn fraction_denominator_excludes_ambiguous() {
    let (frac, dist) = hamming_frac_nuc("ACGN", "ACTT").unwrap();
    assert_eq!(dist, 1);
    assert!((frac - 1.0 / 3.0).abs() < 1e-12);
  }

  #[test]
  fn length_mismatch_is_an_error() {
    assert!(hamming_dist_nuc("ACG", "ACGT").is_err());
    assert_eq!(local_hamming_dist_aa("ACG", "ACGT"), 4);
  }

  #[test]
  fn ambig_frac_counts() {
    assert!((ambig_frac("NANN", AMBIGUOUS_NUC) - 0.75).abs() < 1e-12);
  }
}
