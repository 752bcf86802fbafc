use crate::annotation::annotation::Annotation;
use crate::seq::locus::Locus;
use crate::utils::error::PairfamError;
use eyre::Report;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Location of one sequence within the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeqAddr {
  pub locus: Locus,
  pub ifam: usize,
  pub iseq: usize,
}

/// Per-locus annotation lists with a uid index for O(1) per-sequence access
/// across loci. Loaded once; pairing steps write `paired_uids` back in place.
#[derive(Clone, Debug, Default)]
pub struct AnnotationStore {
  annotations: IndexMap<Locus, Vec<Annotation>>,
  index: HashMap<String, SeqAddr>,
}

impl AnnotationStore {
  pub fn new(annotations: IndexMap<Locus, Vec<Annotation>>) -> Result<Self, Report> {
    let mut store = Self {
      annotations,
      index: HashMap::new(),
    };
    store.rebuild_index()?;
    Ok(store)
  }

  fn rebuild_index(&mut self) -> Result<(), Report> {
    self.index.clear();
    for (&locus, families) in &self.annotations {
      for (ifam, family) in families.iter().enumerate() {
        for (iseq, uid) in family.unique_ids.iter().enumerate() {
          let addr = SeqAddr { locus, ifam, iseq };
          if self.index.insert(uid.clone(), addr).is_some() {
            return Err(PairfamError::DuplicateUid(format!("uid '{uid}' appears in more than one family")).into());
          }
        }
      }
    }
    Ok(())
  }

  pub fn loci(&self) -> impl Iterator<Item = Locus> + '_ {
    self.annotations.keys().copied()
  }

  pub fn families(&self, locus: Locus) -> &[Annotation] {
    self.annotations.get(&locus).map_or(&[], Vec::as_slice)
  }

  pub fn family(&self, locus: Locus, ifam: usize) -> &Annotation {
    &self.annotations[&locus][ifam]
  }

  pub fn family_mut(&mut self, locus: Locus, ifam: usize) -> &mut Annotation {
    &mut self.annotations[&locus][ifam]
  }

  pub fn addr(&self, uid: &str) -> Option<SeqAddr> {
    self.index.get(uid).copied()
  }

  pub fn locus_of(&self, uid: &str) -> Option<Locus> {
    self.addr(uid).map(|addr| addr.locus)
  }

  pub fn family_of(&self, uid: &str) -> Option<&Annotation> {
    self.addr(uid).map(|addr| self.family(addr.locus, addr.ifam))
  }

  /// Key of the family containing `uid` (joined uids), used to identify
  /// candidate paired families during arbitration.
  pub fn family_key_of(&self, uid: &str) -> Option<String> {
    self.family_of(uid).map(Annotation::key)
  }

  pub fn pids_of(&self, uid: &str) -> Option<&[String]> {
    self
      .addr(uid)
      .map(|addr| self.family(addr.locus, addr.ifam).paired_uids[addr.iseq].as_slice())
  }

  pub fn set_pids(&mut self, uid: &str, pids: Vec<String>) -> Result<(), Report> {
    let addr = self
      .addr(uid)
      .ok_or_else(|| PairfamError::InputMalformed(format!("unknown uid '{uid}'")))?;
    self.family_mut(addr.locus, addr.ifam).paired_uids[addr.iseq] = pids;
    Ok(())
  }

  pub fn seq_of(&self, uid: &str) -> Option<&str> {
    self
      .addr(uid)
      .map(|addr| self.family(addr.locus, addr.ifam).seqs[addr.iseq].as_str())
  }

  pub fn is_functional(&self, uid: &str) -> bool {
    self
      .addr(uid)
      .is_some_and(|addr| self.family(addr.locus, addr.ifam).is_functional(addr.iseq))
  }

  /// Map from the key of each family of `locus` to its index, for looking up
  /// the annotation belonging to a partition cluster.
  pub fn family_key_index(&self, locus: Locus) -> IndexMap<String, usize> {
    self
      .families(locus)
      .iter()
      .enumerate()
      .map(|(ifam, family)| (family.key(), ifam))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use indexmap::indexmap;
  use pretty_assertions::assert_eq;

  #[test]
  fn index_resolves_across_loci() -> Result<(), Report> {
    let store = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![simple_annotation(Locus::Igh, &["h1", "h2"], &["ACG", "ACT"], "ACG")],
      Locus::Igk => vec![simple_annotation(Locus::Igk, &["k1"], &["TTT"], "TTT")],
    })?;
    assert_eq!(store.locus_of("k1"), Some(Locus::Igk));
    assert_eq!(store.addr("h2").unwrap().iseq, 1);
    assert_eq!(store.family_key_of("h1").unwrap(), "h1:h2");
    Ok(())
  }

  #[test]
  fn duplicate_uids_across_families_rejected() {
    let result = AnnotationStore::new(indexmap! {
      Locus::Igh => vec![
        simple_annotation(Locus::Igh, &["h1"], &["ACG"], "ACG"),
        simple_annotation(Locus::Igh, &["h1"], &["ACG"], "ACG"),
      ],
    });
    assert!(result.is_err());
  }
}
