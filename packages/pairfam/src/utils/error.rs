use std::error::Error;
use std::fmt;

/// Failure taxonomy. Wrapped into `eyre::Report` at the point of failure, so
/// that callers can downcast to decide whether a failure is recoverable and
/// which process exit code it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairfamError {
  /// Structural problem in an input record: missing required field, wrong list length.
  InputMalformed(String),

  /// A uid has more than one surviving partner after cleaning, or pid-group invariants are violated.
  InconsistentPairing(String),

  /// A uid appears in more than one cluster, or twice in one cluster.
  DuplicateUid(String),

  /// A tree references uids not in the annotation (or vice versa) beyond tolerance.
  TreeAnnotationMismatch(String),

  /// Caller requested a metric outside the known set.
  UnsupportedMetric(String),

  /// Numeric precondition violated: tau <= 0, negative edge length, rescale of an empty tree.
  NumericDomain(String),
}

impl fmt::Display for PairfamError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::InputMalformed(msg) => write!(f, "malformed input: {msg}"),
      Self::InconsistentPairing(msg) => write!(f, "inconsistent pairing info: {msg}"),
      Self::DuplicateUid(msg) => write!(f, "duplicate uid: {msg}"),
      Self::TreeAnnotationMismatch(msg) => write!(f, "tree/annotation mismatch: {msg}"),
      Self::UnsupportedMetric(msg) => write!(f, "unsupported metric: {msg}"),
      Self::NumericDomain(msg) => write!(f, "numeric domain error: {msg}"),
    }
  }
}

impl Error for PairfamError {}

impl PairfamError {
  /// Process exit code for a driver wrapping the core.
  pub const fn exit_code(&self) -> i32 {
    match self {
      Self::InputMalformed(_) => 2,
      Self::InconsistentPairing(_) | Self::DuplicateUid(_) => 3,
      Self::TreeAnnotationMismatch(_) => 4,
      Self::UnsupportedMetric(_) | Self::NumericDomain(_) => 1,
    }
  }
}

/// Exit code for an arbitrary report: taxonomy code if one is embedded, 1 otherwise.
pub fn report_exit_code(report: &eyre::Report) -> i32 {
  report
    .chain()
    .find_map(|err| err.downcast_ref::<PairfamError>())
    .map_or(1, PairfamError::exit_code)
}

#[macro_export]
macro_rules! make_error {
  ($($arg:tt)*) => {
    Err(eyre::eyre!($($arg)*))
  };
}

#[macro_export]
macro_rules! make_internal_report {
  ($($arg:tt)*) => {
    eyre::Report::msg(format!(
      "{}. This is an internal error. Please report it to developers.",
      format!($($arg)*)
    ))
  };
}

#[macro_export]
macro_rules! make_internal_error {
  ($($arg:tt)*) => {
    Err($crate::make_internal_report!($($arg)*))
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use eyre::{Report, WrapErr};
  use pretty_assertions::assert_eq;

  #[test]
  fn exit_code_survives_wrapping() {
    let report: Report = Report::new(PairfamError::DuplicateUid("x".to_owned()));
    let wrapped = Err::<(), Report>(report)
      .wrap_err("while merging")
      .expect_err("expected error");
    assert_eq!(report_exit_code(&wrapped), 3);
  }

  #[test]
  fn unknown_errors_map_to_one() {
    let report = eyre::eyre!("something else");
    assert_eq!(report_exit_code(&report), 1);
  }
}
