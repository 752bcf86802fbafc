use crate::utils::error::PairfamError;
use eyre::Report;
use log::warn;

/// Maximum attainable LBI by sequence length, computed offline on maximally
/// branching trees. The values must be reproduced verbatim; linear
/// interpolation in between, nearest endpoint (with a warning) outside.
const LB_BOUNDS: [(f64, f64); 6] = [
  (300.0, 0.0219),
  (400.0, 0.0169),
  (500.0, 0.0135),
  (600.0, 0.0119),
  (700.0, 0.0091),
  (900.0, 0.0073),
];

/// `(min, max)` LBI bounds for the given tau and sequence length. The minimum
/// is tau itself. Normalization is only defined for tau = 1/seq_len.
pub fn lb_bounds(tau: f64, seq_len: f64) -> Result<(f64, f64), Report> {
  if seq_len <= 0.0 {
    return Err(PairfamError::NumericDomain(format!("sequence length {seq_len} out of domain")).into());
  }
  if (tau * seq_len - 1.0).abs() > 1e-6 {
    return Err(
      PairfamError::NumericDomain(format!(
        "tau has to equal 1/seq_len in order to normalize lb metrics (got tau {tau}, seq len {seq_len})"
      ))
      .into(),
    );
  }
  let (min_len, _) = LB_BOUNDS[0];
  let (max_len, _) = LB_BOUNDS[LB_BOUNDS.len() - 1];
  if seq_len < min_len || seq_len > max_len {
    warn!("seq len {seq_len} outside known lb interpolation range [{min_len}, {max_len}], using nearest endpoint");
    let endpoint = if seq_len < min_len { LB_BOUNDS[0].1 } else { LB_BOUNDS[LB_BOUNDS.len() - 1].1 };
    return Ok((tau, endpoint));
  }
  let mut max_bound = LB_BOUNDS[LB_BOUNDS.len() - 1].1;
  for window in LB_BOUNDS.windows(2) {
    let [(len1, max1), (len2, max2)] = [window[0], window[1]];
    if seq_len >= len1 && seq_len <= len2 {
      max_bound = max1 + (max2 - max1) * (seq_len - len1) / (len2 - len1);
      break;
    }
  }
  Ok((tau, max_bound))
}

/// `(lbi - min) / (max - min)` with the bounds above.
pub fn normalize_lb_val(lbval: f64, tau: f64, seq_len: f64) -> Result<f64, Report> {
  let (lbmin, lbmax) = lb_bounds(tau, seq_len)?;
  Ok((lbval - lbmin) / (lbmax - lbmin))
}
