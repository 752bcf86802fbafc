use crate::utils::error::PairfamError;
use eyre::{Report, WrapErr};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declarative antibody-choice configuration, read from a YAML document.
/// Keys mirror the historical config format (kebab-case).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct AbChoiceCfg {
  /// How many families (largest first) to choose from.
  pub n_families: usize,

  /// Overall cap per family, across all sort vars (including any injected
  /// unobserved seqs). Mutually exclusive with per-var `n`.
  #[serde(default)]
  pub n_per_family: Option<usize>,

  /// Sort variables, applied in order; values are summed over the heavy and
  /// light chain of each pair.
  pub vars: IndexMap<String, SortVarCfg>,

  #[serde(default)]
  pub include_unobs_cons_seqs: BoolPerFamily,

  #[serde(default)]
  pub include_unobs_naive_seqs: BoolPerFamily,

  /// Only pairs whose cells carry one of these types are eligible.
  #[serde(default)]
  pub cell_types: Option<Vec<String>>,

  #[serde(default)]
  pub min_umis: Option<u64>,

  /// Skip a whole family when its median h+l nucleotide SHM percentage is
  /// below this.
  #[serde(default, rename = "min-median-nuc-shm-%")]
  pub min_median_nuc_shm_pct: Option<f64>,

  /// Maximum ambiguous amino-acid positions summed over h+l.
  #[serde(default)]
  pub max_ambig_positions: Option<usize>,

  /// Minimum summed h+l aa Hamming distance to every already-chosen pair.
  #[serde(default)]
  pub min_hdist_to_already_chosen: Option<usize>,

  /// Droplet ids that are always included.
  #[serde(default)]
  pub droplet_ids: Vec<String>,

  /// `(droplet id, n)`: additionally take the n pairs nearest to this one.
  #[serde(default)]
  pub similar_to_droplet_ids: Vec<(String, usize)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
  Low,
  High,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortVarCfg {
  pub sort: SortDir,

  /// How many to take for this var: one number for every family, or one per
  /// family index.
  #[serde(default)]
  pub n: Option<NPerFamily>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NPerFamily {
  Same(usize),
  PerFamily(Vec<usize>),
}

impl NPerFamily {
  pub fn get(&self, iclust: usize) -> usize {
    match self {
      Self::Same(n) => *n,
      Self::PerFamily(ns) => ns.get(iclust).copied().unwrap_or(0),
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoolPerFamily {
  One(bool),
  Many(Vec<bool>),
}

impl Default for BoolPerFamily {
  fn default() -> Self {
    Self::One(false)
  }
}

impl BoolPerFamily {
  pub fn get(&self, iclust: usize) -> bool {
    match self {
      Self::One(value) => *value,
      Self::Many(values) => values.get(iclust).copied().unwrap_or(false),
    }
  }
}

impl AbChoiceCfg {
  pub fn from_yaml(content: &str) -> Result<Self, Report> {
    let cfg: Self = serde_yaml::from_str(content)
      .map_err(|err| PairfamError::InputMalformed(format!("bad ab choice cfg: {err}")))?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Report> {
    let path = path.as_ref();
    let content = crate::io::fs::read_file_to_string(path)?;
    Self::from_yaml(&content).wrap_err_with(|| format!("When reading ab choice cfg {path:#?}"))
  }

  fn validate(&self) -> Result<(), Report> {
    let any_per_var_n = self.vars.values().any(|var_cfg| var_cfg.n.is_some());
    if self.n_per_family.is_some() && any_per_var_n {
      return Err(
        PairfamError::InputMalformed(
          "'n-per-family' was set, but sort vars also carry 'n' (can only specify the number to take in one place)"
            .to_owned(),
        )
        .into(),
      );
    }
    for (var, var_cfg) in &self.vars {
      if let Some(NPerFamily::PerFamily(ns)) = &var_cfg.n {
        if ns.len() != self.n_families {
          return Err(
            PairfamError::InputMalformed(format!(
              "length of per-family n list ({}) for sort var '{var}' doesn't match n-families ({})",
              ns.len(),
              self.n_families
            ))
            .into(),
          );
        }
      }
    }
    for (key, values) in [
      ("include-unobs-cons-seqs", &self.include_unobs_cons_seqs),
      ("include-unobs-naive-seqs", &self.include_unobs_naive_seqs),
    ] {
      if let BoolPerFamily::Many(flags) = values {
        if flags.len() != self.n_families {
          return Err(
            PairfamError::InputMalformed(format!(
              "length of '{key}' list ({}) not equal to n-families ({})",
              flags.len(),
              self.n_families
            ))
            .into(),
          );
        }
      }
    }
    Ok(())
  }
}
