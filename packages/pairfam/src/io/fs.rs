use eyre::{eyre, Report, WrapErr};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Environment variable naming the working directory for temporary tree
/// files; defaults to the OS temp dir.
pub const WORKDIR_ENV_VAR: &str = "PAIRFAM_WORKDIR";

pub fn work_dir() -> PathBuf {
  env::var_os(WORKDIR_ENV_VAR).map_or_else(env::temp_dir, PathBuf::from)
}

pub fn ensure_dir(filepath: impl AsRef<Path>) -> Result<(), Report> {
  let filepath = filepath.as_ref();
  let parent_dir = filepath
    .parent()
    .ok_or_else(|| eyre!("Unable to get parent path for {filepath:#?}"))?;
  if !parent_dir.as_os_str().is_empty() {
    fs::create_dir_all(parent_dir).wrap_err_with(|| format!("When creating directory '{parent_dir:#?}'"))?;
  }
  Ok(())
}

/// Reads entire file into a string, through a buffered reader.
pub fn read_file_to_string(filepath: impl AsRef<Path>) -> Result<String, Report> {
  const BUF_SIZE: usize = 2 * 1024 * 1024;

  let filepath = filepath.as_ref();
  let file = File::open(filepath).wrap_err_with(|| format!("When opening file: {filepath:#?}"))?;
  let mut reader = BufReader::with_capacity(BUF_SIZE, file);
  let mut data = String::new();
  reader
    .read_to_string(&mut data)
    .wrap_err_with(|| format!("When reading file: {filepath:#?}"))?;
  Ok(data)
}

pub fn write_file(filepath: impl AsRef<Path>, content: &str) -> Result<(), Report> {
  let filepath = filepath.as_ref();
  ensure_dir(filepath)?;
  let file = File::create(filepath).wrap_err_with(|| format!("When creating file: {filepath:#?}"))?;
  let mut writer = BufWriter::new(file);
  writer
    .write_all(content.as_bytes())
    .and_then(|()| writer.flush())
    .wrap_err_with(|| format!("When writing file: {filepath:#?}"))?;
  Ok(())
}
