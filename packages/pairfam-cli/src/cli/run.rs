use crate::cli::args::{ChooseArgs, EvaluateArgs, MergeArgs, MetricsArgs, PairfamArgs, PairfamCommands};
use eyre::{Report, WrapErr};
use indexmap::IndexMap;
use log::info;
use pairfam::annotation::annotation::Annotation;
use pairfam::annotation::partition::{ClusterPath, Partition};
use pairfam::annotation::store::AnnotationStore;
use pairfam::choose::cfg::AbChoiceCfg;
use pairfam::choose::chooser::{choose_abs, FamilyPair};
use pairfam::eval::evaluator::{evaluate_joint_partitions, evaluate_pair_cleaning, per_seq_ccf, remove_missing_uids_from_partition};
use pairfam::io::json::{json_parse, json_write};
use pairfam::io::ndjson::{read_annotation_bundle, read_tree_sidecar, write_annotation_bundle};
use pairfam::merge::joint_merger::{merge_chains, pair_unpaired_with_family, JointPartitions, MergeConfig};
use pairfam::metrics::smetrics::{
  add_smetrics, parse_metrics, selection_metrics_json, smetric_fname, trees_for_annotations, SmetricsConfig,
  ALL_SELECTION_METRICS,
};
use pairfam::pairing::bad_pair_filter::remove_badly_paired_seqs;
use pairfam::pairing::pair_cleaner::{clean_pair_info, PairCleanConfig};
use pairfam::seq::hamming::AMBIGUOUS_NUC;
use pairfam::seq::locus::{Locus, PairedLoci};
use pairfam::utils::error::PairfamError;
use serde_json::json;
use std::path::Path;

pub fn run(args: &PairfamArgs) -> Result<(), Report> {
  match &args.command {
    PairfamCommands::Merge(merge_args) => run_merge(merge_args),
    PairfamCommands::Metrics(metrics_args) => run_metrics(metrics_args),
    PairfamCommands::Choose(choose_args) => run_choose(choose_args),
    PairfamCommands::Evaluate(evaluate_args) => run_evaluate(evaluate_args),
  }
}

fn bundle_cpath(annotations: &[Annotation]) -> ClusterPath {
  ClusterPath::from_partition(annotations.iter().map(|family| family.unique_ids.clone()).collect())
}

fn run_merge(args: &MergeArgs) -> Result<(), Report> {
  if args.light_locus.is_heavy() || args.other_light_locus.is_heavy() {
    return Err(PairfamError::InputMalformed("light locus arguments must be igk or igl".to_owned()).into());
  }

  let mut annotations: IndexMap<Locus, Vec<Annotation>> = IndexMap::new();
  annotations.insert(Locus::Igh, read_annotation_bundle(&args.heavy, Locus::Igh)?);
  annotations.insert(args.light_locus, read_annotation_bundle(&args.light, args.light_locus)?);
  if let Some(other_light) = &args.other_light {
    annotations.insert(args.other_light_locus, read_annotation_bundle(other_light, args.other_light_locus)?);
  }
  let cpaths: IndexMap<Locus, ClusterPath> = annotations
    .iter()
    .map(|(&locus, families)| (locus, bundle_cpath(families)))
    .collect();
  let mut store = AnnotationStore::new(annotations)?;

  let clean_cfg = PairCleanConfig {
    is_data: args.is_data,
    collapse_similar_paired_seqs: args.collapse_similar_paired_seqs,
    remove_unproductive: args.remove_unproductive,
    max_hdist: args.max_hdist,
    ..PairCleanConfig::default()
  };
  clean_pair_info(&mut store, &cpaths, &clean_cfg)?;

  let ploci = PairedLoci::new(args.light_locus);
  let (filtered, _) = remove_badly_paired_seqs(ploci, &store, &cpaths)?;

  let merge_cfg = MergeConfig {
    naive_hamming_bound_type: args.naive_hamming_bound_type,
    overmerge: args.overmerge,
    check_partitions: args.check_partitions,
  };
  let joint = merge_chains(ploci, &filtered, &merge_cfg)?;
  pair_unpaired_with_family(ploci, &mut store, &joint, &filtered.unpaired)?;

  let partition_doc: IndexMap<String, &Partition> = joint
    .by_locus
    .iter()
    .map(|(locus, partition)| (locus.to_string(), partition))
    .collect();
  json_write(args.output_dir.join("joint-partition.json"), &partition_doc)?;

  for (&locus, partition) in &joint.by_locus {
    let rewritten = rewrite_bundle_for_partition(&store, locus, partition)?;
    write_annotation_bundle(args.output_dir.join(format!("{locus}.ndjson")), &rewritten)?;
  }
  info!("wrote joint partition and bundles to {:#?}", args.output_dir);
  Ok(())
}

/// Rebuilds one annotation record per joint cluster, pulling each sequence's
/// columns from its original family. Family-level fields come from the
/// largest contributing family; shorter sequences are padded to the longest.
fn rewrite_bundle_for_partition(
  store: &AnnotationStore,
  locus: Locus,
  partition: &Partition,
) -> Result<Vec<Annotation>, Report> {
  let mut rewritten = vec![];
  for cluster in partition {
    let mut contributions: IndexMap<usize, Vec<usize>> = IndexMap::new(); // ifam -> iseqs
    for uid in cluster {
      let addr = store
        .addr(uid)
        .ok_or_else(|| PairfamError::InputMalformed(format!("no annotation for joint cluster member '{uid}'")))?;
      if addr.locus != locus {
        return Err(
          PairfamError::InputMalformed(format!("uid '{uid}' in the {locus} joint partition belongs to {}", addr.locus))
            .into(),
        );
      }
      contributions.entry(addr.ifam).or_default().push(addr.iseq);
    }
    let parts: Vec<Annotation> = contributions
      .iter()
      .map(|(&ifam, iseqs)| store.family(locus, ifam).restricted_to(iseqs))
      .collect();
    rewritten.push(combine_restricted(parts)?);
  }
  Ok(rewritten)
}

fn combine_restricted(mut parts: Vec<Annotation>) -> Result<Annotation, Report> {
  let ilargest = parts
    .iter()
    .enumerate()
    .max_by_key(|(ipart, part)| (part.n_seqs(), std::cmp::Reverse(*ipart)))
    .map(|(ipart, _)| ipart)
    .expect("joint cluster has at least one contributing family");
  let mut combined = parts.swap_remove(ilargest);
  if !parts.is_empty() {
    // per-seq metadata can't be stitched across families coherently
    combined.affinities = None;
    combined.umis = None;
    combined.cell_types = None;
  }
  for part in parts {
    combined.unique_ids.extend(part.unique_ids);
    combined.seqs.extend(part.seqs);
    combined.input_seqs.extend(part.input_seqs);
    combined.n_mutations.extend(part.n_mutations);
    combined.mut_freqs.extend(part.mut_freqs);
    combined.paired_uids.extend(part.paired_uids);
    extend_defaulted(&mut combined.has_shm_indels, part.has_shm_indels, false, combined.unique_ids.len());
    extend_defaulted(&mut combined.multiplicities, part.multiplicities, 1, combined.unique_ids.len());
    extend_defaulted(&mut combined.stops, part.stops, false, combined.unique_ids.len());
    extend_defaulted(&mut combined.in_frames, part.in_frames, true, combined.unique_ids.len());
  }
  // clusters can combine families with different padded lengths
  let max_len = combined.seqs.iter().map(String::len).max().unwrap_or(0).max(combined.naive_seq.len());
  for seq in combined.seqs.iter_mut().chain([&mut combined.naive_seq]) {
    while seq.len() < max_len {
      seq.push(char::from(AMBIGUOUS_NUC));
    }
  }
  combined.seqs_aa = None;
  combined.input_seqs_aa = None;
  combined.consensus_seq = None;
  combined.consensus_seq_aa = None;
  combined.naive_seq_aa = None;
  combined.tree = None;
  combined.validate()?;
  Ok(combined)
}

fn extend_defaulted<T: Clone>(target: &mut Vec<T>, source: Vec<T>, default: T, total: usize) {
  let already = total - source.len().min(total);
  if target.is_empty() && source.is_empty() {
    return;
  }
  while target.len() < already {
    target.push(default.clone());
  }
  target.extend(source);
}

fn run_metrics(args: &MetricsArgs) -> Result<(), Report> {
  let mut annotations = read_annotation_bundle(&args.input, args.locus)?;
  let sidecar_trees = args.treefile.as_ref().map(read_tree_sidecar).transpose()?;
  let trees = trees_for_annotations(&annotations, sidecar_trees.as_deref())?;

  let metrics = if args.metrics.is_empty() {
    ALL_SELECTION_METRICS.to_vec()
  } else {
    parse_metrics(&args.metrics)?
  };
  let cfg = SmetricsConfig {
    metrics,
    lb_tau: args.lb_tau,
    normalize_lbi: !args.dont_normalize_lbi,
    min_cluster_size: args.min_cluster_size,
    ..SmetricsConfig::default()
  };
  let outcome = add_smetrics(&mut annotations, trees, &cfg)?;
  if outcome.families.is_empty() && !outcome.failures.is_empty() {
    return Err(
      PairfamError::TreeAnnotationMismatch(format!(
        "no family succeeded; first failure: {} ({})",
        outcome.failures[0].family_key, outcome.failures[0].error
      ))
      .into(),
    );
  }

  let output = args.output.clone().unwrap_or_else(|| smetric_fname(&args.input));
  json_write(&output, &selection_metrics_json(&outcome.families))?;
  info!("wrote selection metrics for {} families to {output:#?}", outcome.families.len());
  Ok(())
}

/// Flattens the sidecar documents into metric -> uid -> value maps.
fn read_metric_files(paths: &[impl AsRef<Path>]) -> Result<IndexMap<String, IndexMap<String, f64>>, Report> {
  let mut metrics: IndexMap<String, IndexMap<String, f64>> = IndexMap::new();
  for path in paths {
    let doc: serde_json::Value = json_parse(&pairfam::io::fs::read_file_to_string(path)?)
      .wrap_err_with(|| format!("When reading metric file {:#?}", path.as_ref()))?;
    let records = doc
      .as_array()
      .ok_or_else(|| PairfamError::InputMalformed("metric sidecar must be a JSON array".to_owned()))?;
    for record in records {
      let Some(lb) = record.pointer("/tree-info/lb").and_then(serde_json::Value::as_object) else {
        continue;
      };
      for (name, values) in lb {
        if name == "tree" || name == "aa-tree" {
          continue;
        }
        let Some(values) = values.as_object() else { continue };
        let entry = metrics.entry(name.clone()).or_default();
        for (uid, value) in values {
          if let Some(value) = value.as_f64() {
            entry.insert(uid.clone(), value);
          }
        }
      }
    }
  }
  Ok(metrics)
}

fn run_choose(args: &ChooseArgs) -> Result<(), Report> {
  let heavy = read_annotation_bundle(&args.heavy, Locus::Igh)?;
  let light = read_annotation_bundle(&args.light, args.light_locus)?;
  if heavy.len() != light.len() {
    return Err(
      PairfamError::InputMalformed(format!(
        "heavy and light bundles must have matching joint families ({} vs {})",
        heavy.len(),
        light.len()
      ))
      .into(),
    );
  }
  let metrics = read_metric_files(&args.metric_files)?;
  let cfg = AbChoiceCfg::from_path(&args.cfg)?;

  let mut families: Vec<FamilyPair> = heavy
    .into_iter()
    .zip(light)
    .map(|(h, l)| FamilyPair::new(h, l, metrics.clone()))
    .collect::<Result<_, _>>()?;
  let chosen = choose_abs(&mut families, &cfg)?;
  json_write(&args.output, &chosen)?;
  info!("wrote {} chosen antibodies to {:#?}", chosen.len(), args.output);
  Ok(())
}

fn run_evaluate(args: &EvaluateArgs) -> Result<(), Report> {
  let ploci = PairedLoci::new(args.light_locus);
  let mut annotations: IndexMap<Locus, Vec<Annotation>> = IndexMap::new();
  annotations.insert(Locus::Igh, read_annotation_bundle(&args.heavy, Locus::Igh)?);
  annotations.insert(args.light_locus, read_annotation_bundle(&args.light, args.light_locus)?);
  let init_partitions: IndexMap<Locus, Partition> = annotations
    .iter()
    .map(|(&locus, families)| (locus, families.iter().map(|family| family.unique_ids.clone()).collect()))
    .collect();
  let store = AnnotationStore::new(annotations)?;

  let mut true_partitions: IndexMap<Locus, Partition> = IndexMap::new();
  for (locus, path) in [(Locus::Igh, &args.true_heavy), (args.light_locus, &args.true_light)] {
    let families = read_annotation_bundle(path, locus)?;
    true_partitions.insert(locus, families.iter().map(|family| family.unique_ids.clone()).collect());
  }

  let pairing = evaluate_pair_cleaning(&store, &true_partitions);
  let mut report = json!({
    "pairing": {
      "n_seqs": pairing.n_seqs,
      "totals": pairing.totals,
      "by_family_size": pairing.by_family_size,
    },
  });

  if let Some(joint_path) = &args.joint {
    let joint_doc: IndexMap<String, Partition> = json_parse(&pairfam::io::fs::read_file_to_string(joint_path)?)?;
    let mut joint = JointPartitions::default();
    for (locus_str, partition) in joint_doc {
      let locus: Locus = locus_str
        .parse()
        .map_err(|_| PairfamError::InputMalformed(format!("unknown locus '{locus_str}' in joint partition file")))?;
      joint.by_locus.insert(locus, partition);
    }
    let ccfs = evaluate_joint_partitions(ploci, &true_partitions, &init_partitions, &joint.by_locus)?;
    report["ccfs"] = json!(
      ccfs
        .iter()
        .map(|(locus, comparison)| {
          (
            locus.to_string(),
            json!({"single": comparison.single, "joint": comparison.joint}),
          )
        })
        .collect::<IndexMap<String, serde_json::Value>>()
    );
  } else {
    let mut single_ccfs: IndexMap<String, (f64, f64)> = IndexMap::new();
    for (&locus, partition) in &init_partitions {
      let truth = remove_missing_uids_from_partition(&true_partitions[&locus], partition);
      single_ccfs.insert(locus.to_string(), per_seq_ccf(partition, &truth)?);
    }
    report["ccfs"] = json!(single_ccfs);
  }

  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}
