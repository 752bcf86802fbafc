use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Chain type: each locus is either heavy or light, and pairing is only ever
/// between opposite chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Chain {
  Heavy,
  Light,
}

#[derive(
  Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Locus {
  #[default]
  Igh,
  Igk,
  Igl,
}

impl Locus {
  pub const fn chain(self) -> Chain {
    match self {
      Self::Igh => Chain::Heavy,
      Self::Igk | Self::Igl => Chain::Light,
    }
  }

  pub const fn is_heavy(self) -> bool {
    matches!(self.chain(), Chain::Heavy)
  }

  /// True when both loci are on the same chain (heavy/heavy or light/light),
  /// i.e. when a pairing between them is impossible.
  pub const fn same_chain(self, other: Self) -> bool {
    matches!(
      (self.chain(), other.chain()),
      (Chain::Heavy, Chain::Heavy) | (Chain::Light, Chain::Light)
    )
  }

  /// One-character label used in diagnostics ('h', 'k', 'l').
  pub const fn short_str(self) -> char {
    match self {
      Self::Igh => 'h',
      Self::Igk => 'k',
      Self::Igl => 'l',
    }
  }
}

/// The heavy locus plus the light locus chosen for one merge: joint
/// partitions are built per heavy+light pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairedLoci {
  pub h: Locus,
  pub l: Locus,
}

impl PairedLoci {
  pub fn new(light: Locus) -> Self {
    assert!(!light.is_heavy(), "light locus of a pair cannot be igh");
    Self { h: Locus::Igh, l: light }
  }

  pub const fn locus(self, chain: Chain) -> Locus {
    match chain {
      Chain::Heavy => self.h,
      Chain::Light => self.l,
    }
  }

  /// Chains in processing order (heavy first).
  pub const fn chains(self) -> [(Chain, Locus); 2] {
    [(Chain::Heavy, self.h), (Chain::Light, self.l)]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use std::str::FromStr;

  #[test]
  fn locus_strings_round_trip() {
    assert_eq!(Locus::Igk.to_string(), "igk");
    assert_eq!(Locus::from_str("igl").unwrap(), Locus::Igl);
  }

  #[test]
  fn chain_comparisons() {
    assert!(Locus::Igk.same_chain(Locus::Igl));
    assert!(!Locus::Igh.same_chain(Locus::Igk));
    assert!(Locus::Igh.is_heavy());
  }
}
