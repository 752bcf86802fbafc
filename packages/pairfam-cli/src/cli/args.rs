use clap::{Parser, Subcommand, ValueHint};
use log::LevelFilter;
use pairfam::merge::joint_merger::HBoundType;
use pairfam::seq::locus::Locus;
use std::path::PathBuf;

/// Paired heavy/light BCR clonal-family reconciliation and tree-based
/// selection metrics.
#[derive(Parser, Debug)]
#[clap(name = "pairfam")]
#[clap(author, version)]
pub struct PairfamArgs {
  #[clap(subcommand)]
  pub command: PairfamCommands,

  /// Console output verbosity
  #[clap(long, global = true, default_value = "warn")]
  pub verbosity: LevelFilter,
}

#[derive(Subcommand, Debug)]
pub enum PairfamCommands {
  /// Clean pair info, remove badly paired seqs and merge the heavy and light
  /// partitions into a joint partition.
  Merge(MergeArgs),

  /// Compute tree-based selection metrics per family.
  Metrics(MetricsArgs),

  /// Pick representative antibodies per joint family from a config.
  Choose(ChooseArgs),

  /// Compare inferred partitions and pair info against the truth.
  Evaluate(EvaluateArgs),
}

#[derive(Parser, Debug)]
pub struct MergeArgs {
  /// Heavy-chain annotation bundle (one JSON record per family per line)
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub heavy: PathBuf,

  /// Light-chain annotation bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub light: PathBuf,

  /// Locus of the light-chain bundle
  #[clap(long, default_value = "igk")]
  pub light_locus: Locus,

  /// Bundle for the other light locus; needed to spot heavy seqs paired
  /// with a contaminating light chain
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub other_light: Option<PathBuf>,

  /// Locus of the other light bundle
  #[clap(long, default_value = "igl")]
  pub other_light_locus: Locus,

  /// Write the joint partition and rewritten bundles here
  #[clap(long, short = 'o')]
  #[clap(value_hint = ValueHint::DirPath)]
  pub output_dir: PathBuf,

  /// Input is real data (enables the droplet-id sanity check and the
  /// unproductive-seq removal)
  #[clap(long)]
  pub is_data: bool,

  /// Collapse nearly identical same-locus seqs within a droplet
  #[clap(long)]
  pub collapse_similar_paired_seqs: bool,

  /// Remove non-functional seqs from overfull droplets (data only)
  #[clap(long)]
  pub remove_unproductive: bool,

  /// Hamming threshold for the similar-seq collapse
  #[clap(long, default_value_t = 4)]
  pub max_hdist: usize,

  /// Threshold family for the naive-Hamming cluster splits
  #[clap(long, default_value = "likelihood")]
  pub naive_hamming_bound_type: HBoundType,

  /// Skip all naive-Hamming splitting
  #[clap(long)]
  pub overmerge: bool,

  /// Verify partition disjointness after each merge step
  #[clap(long)]
  pub check_partitions: bool,
}

#[derive(Parser, Debug)]
pub struct MetricsArgs {
  /// Annotation bundle to compute metrics for
  #[clap(long, short = 'i')]
  #[clap(value_hint = ValueHint::FilePath)]
  pub input: PathBuf,

  /// Locus of the bundle
  #[clap(long, default_value = "igh")]
  pub locus: Locus,

  /// Newick sidecar, one tree per family (families without an embedded tree)
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub treefile: Option<PathBuf>,

  /// Metrics to compute (default: all)
  #[clap(long, value_delimiter = ',')]
  pub metrics: Vec<String>,

  /// Exponential decay length scale; default 1/mean_seq_len per family
  #[clap(long)]
  pub lb_tau: Option<f64>,

  /// Skip LBI normalization
  #[clap(long)]
  pub dont_normalize_lbi: bool,

  /// Skip families smaller than this
  #[clap(long, default_value_t = 3)]
  pub min_cluster_size: usize,

  /// Output file (default: `<input stem>-selection-metrics.json`)
  #[clap(long, short = 'o')]
  #[clap(value_hint = ValueHint::FilePath)]
  pub output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ChooseArgs {
  /// Heavy-chain joint bundle (family order must match the light bundle)
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub heavy: PathBuf,

  /// Light-chain joint bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub light: PathBuf,

  /// Locus of the light bundle
  #[clap(long, default_value = "igk")]
  pub light_locus: Locus,

  /// Selection-metric sidecar files (from `pairfam metrics`)
  #[clap(long, value_delimiter = ',')]
  pub metric_files: Vec<PathBuf>,

  /// Antibody choice config (YAML)
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub cfg: PathBuf,

  /// Output file with the chosen antibodies
  #[clap(long, short = 'o')]
  #[clap(value_hint = ValueHint::FilePath)]
  pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct EvaluateArgs {
  /// Inferred heavy-chain bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub heavy: PathBuf,

  /// Inferred light-chain bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub light: PathBuf,

  /// Locus of the light bundle
  #[clap(long, default_value = "igk")]
  pub light_locus: Locus,

  /// True heavy-chain bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub true_heavy: PathBuf,

  /// True light-chain bundle
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub true_light: PathBuf,

  /// Joint partition file (from `pairfam merge`) to evaluate as well
  #[clap(long)]
  #[clap(value_hint = ValueHint::FilePath)]
  pub joint: Option<PathBuf>,
}
