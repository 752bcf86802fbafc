use crate::io::fs::write_file;
use eyre::{Report, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub fn json_parse<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T, Report> {
  serde_json::from_str(content).wrap_err("When parsing JSON")
}

pub fn json_stringify<T: Serialize>(obj: &T) -> Result<String, Report> {
  serde_json::to_string_pretty(obj).wrap_err("When converting an entry to JSON string")
}

pub fn json_write<T: Serialize>(filepath: impl AsRef<Path>, obj: &T) -> Result<(), Report> {
  let filepath = filepath.as_ref();
  let content = json_stringify(obj)?;
  write_file(filepath, &content).wrap_err_with(|| format!("When writing JSON to file: {filepath:#?}"))
}
