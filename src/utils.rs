/// `false` for NaN and infinities. Frequencies of positions without
/// observations are NaN and must be treated as non-informative.
pub fn is_valid_float(value: f64) -> bool {
    value.is_finite()
}

/// Fixed-point formatting with `decimals` digits after the point.
///
/// Non-finite values are written as `nan`/`inf`/`-inf` instead of Rust's
/// `NaN` spelling so that downstream TSV consumers parse them.
pub fn format_fixed(value: f64, decimals: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let formatted = format!("{value:.decimals$}");
    // avoid "-0.00"
    if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.') {
        return formatted[1..].to_string();
    }
    formatted
}

/// Percentage of `part` in `total`, or `None` when `total` is zero.
pub fn percentage(part: f64, total: f64) -> Option<f64> {
    (total != 0.0).then(|| 100.0 * part / total)
}
