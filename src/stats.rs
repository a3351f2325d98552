use crate::utils::is_valid_float;

/// Factorials `0!..=max_n!` as `f64`. Entries past 170! are infinite.
#[derive(Debug, Clone)]
pub struct FactorialTable {
    values: Vec<f64>,
}

impl FactorialTable {
    pub fn new(max_n: usize) -> Self {
        let mut values = Vec::with_capacity(max_n + 1);
        let mut current = 1.0f64;
        values.push(current);
        for n in 1..=max_n {
            current *= n as f64;
            values.push(current);
        }
        Self { values }
    }

    /// `n!`, or infinity when `n` is past the table.
    pub fn factorial(&self, n: usize) -> f64 {
        self.values.get(n).copied().unwrap_or(f64::INFINITY)
    }

    pub fn max_n(&self) -> usize {
        self.values.len() - 1
    }
}

/// Two-sided binomial test p-value for `successes` out of `trials` with
/// success probability 0.5.
///
/// While `trials!` is not representable, trials and successes are halved.
/// Returns `None` for zero trials.
pub fn binomial_two_sided_half(
    trials: u32,
    successes: u32,
    table: &FactorialTable,
) -> Option<f64> {
    if trials == 0 {
        return None;
    }

    let frequency = f64::from(successes) / f64::from(trials);
    let mut trials = trials as usize;
    let mut successes = (successes as usize).min(trials);
    while !is_valid_float(table.factorial(trials)) {
        trials /= 2;
        successes /= 2;
    }

    let limit = if frequency > 0.5 {
        trials - successes
    } else {
        successes
    };
    let base = 0.5f64.powi(trials as i32) * table.factorial(trials);
    let one_sided: f64 = (0..=limit)
        .map(|x| base / table.factorial(x) / table.factorial(trials - x))
        .sum();

    if is_valid_float(one_sided) {
        Some((2.0 * one_sided).min(1.0))
    } else {
        Some(one_sided)
    }
}
