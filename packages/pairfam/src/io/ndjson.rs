use crate::annotation::annotation::Annotation;
use crate::io::fs::{read_file_to_string, write_file};
use crate::seq::locus::Locus;
use crate::tree::newick::parse_newick_lines;
use crate::tree::tree::TreeModel;
use eyre::{Report, WrapErr};
use std::path::Path;

/// Reads an annotation bundle: one JSON record per line, one clonal family
/// per record, all of one locus.
pub fn read_annotation_bundle(filepath: impl AsRef<Path>, locus: Locus) -> Result<Vec<Annotation>, Report> {
  let filepath = filepath.as_ref();
  let content = read_file_to_string(filepath)?;
  let mut annotations = vec![];
  for (iline, line) in content.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let mut annotation: Annotation = serde_json::from_str(line)
      .wrap_err_with(|| format!("When parsing annotation record on line {} of {filepath:#?}", iline + 1))?;
    annotation
      .finalize(locus)
      .wrap_err_with(|| format!("When validating annotation record on line {} of {filepath:#?}", iline + 1))?;
    annotations.push(annotation);
  }
  Ok(annotations)
}

pub fn write_annotation_bundle(filepath: impl AsRef<Path>, annotations: &[Annotation]) -> Result<(), Report> {
  let filepath = filepath.as_ref();
  let mut content = String::new();
  for annotation in annotations {
    let line = serde_json::to_string(annotation)
      .wrap_err_with(|| format!("When serializing annotation record for family {}", annotation.key()))?;
    content.push_str(&line);
    content.push('\n');
  }
  write_file(filepath, &content).wrap_err_with(|| format!("When writing annotation bundle {filepath:#?}"))
}

/// Reads a newick tree sidecar: one rooted tree per line, matched to
/// families by order.
pub fn read_tree_sidecar(filepath: impl AsRef<Path>) -> Result<Vec<TreeModel>, Report> {
  let filepath = filepath.as_ref();
  let content = read_file_to_string(filepath)?;
  parse_newick_lines(&content).wrap_err_with(|| format!("When reading trees from {filepath:#?}"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::annotation::test_fixtures::simple_annotation;
  use eyre::Report;
  use pretty_assertions::assert_eq;

  #[test]
  fn bundle_round_trip() -> Result<(), Report> {
    let dir = crate::io::fs::work_dir().join("pairfam-ndjson-test");
    let path = dir.join("igh.ndjson");
    let annotations = vec![
      simple_annotation(Locus::Igh, &["a", "b"], &["ACGACG", "ACGACT"], "ACGACG"),
      simple_annotation(Locus::Igh, &["c"], &["TTTTTT"], "TTTTTT"),
    ];
    write_annotation_bundle(&path, &annotations)?;
    let reread = read_annotation_bundle(&path, Locus::Igh)?;
    assert_eq!(reread.len(), 2);
    assert_eq!(reread[0].unique_ids, annotations[0].unique_ids);
    assert_eq!(reread[1].naive_seq, "TTTTTT");
    std::fs::remove_dir_all(&dir).ok();
    Ok(())
  }

  #[test]
  fn malformed_record_reports_line_number() -> Result<(), Report> {
    let dir = crate::io::fs::work_dir().join("pairfam-ndjson-bad-test");
    let path = dir.join("igk.ndjson");
    crate::io::fs::write_file(&path, "{\"unique_ids\": [\"a\"]}\n")?;
    let err = read_annotation_bundle(&path, Locus::Igk).expect_err("expected parse failure");
    assert!(format!("{err:#}").contains("line 1"));
    std::fs::remove_dir_all(&dir).ok();
    Ok(())
  }
}
