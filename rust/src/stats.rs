//! Descriptive statistics and the gated Welch test shared by both significance stages
//!
//! Missing values are `None` throughout. `mean` skips them; the gated test decides
//! per `GateRule` whether a missing value makes a comparison untestable.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Mean of the non-missing values, `None` if there are none
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    mean_of(&present)
}

/// Mean of a plain slice, `None` if empty
pub fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (n - 1 denominator)
pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean_of(values)?;
    Some(values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64)
}

/// Sample standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// `num / den`, or `None` when either side is missing, the denominator is zero,
/// or the result is not finite.
pub fn ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => {
            let r = n / d;
            r.is_finite().then_some(r)
        }
        _ => None,
    }
}

/// Result of an unpaired two-sample t-test with unequal variances
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchResult {
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Welch's unequal-variance t-test, two-sided.
///
/// Both samples need at least two values. With zero variance on both sides the
/// statistic degenerates: identical means give `t = NaN, p = NaN` (never
/// significant), different means give `t = ±inf, p = 0`.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchResult> {
    let (var_a, var_b) = (variance(a)?, variance(b)?);
    let (mean_a, mean_b) = (mean_of(a)?, mean_of(b)?);
    let (n_a, n_b) = (a.len() as f64, b.len() as f64);

    let se_a = var_a / n_a;
    let se_b = var_b / n_b;
    let se2 = se_a + se_b;
    let diff = mean_a - mean_b;

    if se2 == 0.0 {
        return Some(if diff == 0.0 {
            WelchResult { t: f64::NAN, df: f64::NAN, p_value: f64::NAN }
        } else {
            WelchResult { t: diff.signum() * f64::INFINITY, df: f64::NAN, p_value: 0.0 }
        });
    }

    let t = diff / se2.sqrt();
    // Welch-Satterthwaite
    let df = se2.powi(2) / (se_a.powi(2) / (n_a - 1.0) + se_b.powi(2) / (n_b - 1.0));

    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0);

    Some(WelchResult { t, df, p_value })
}

/// How a gated comparison treats a missing value in either sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingValues {
    /// Any missing value makes the comparison untestable
    Untestable,
    /// Any missing value makes the comparison not significant
    NotSignificant,
}

/// Guards applied before a Welch test is run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateRule {
    pub alpha: f64,
    pub min_n: usize,
    pub missing: MissingValues,
    /// Outcome when either side has fewer than `min_n` values
    pub undersampled: Outcome,
}

/// Tri-state result of a gated test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Significant,
    NotSignificant,
    Untestable,
}

impl Outcome {
    pub fn is_significant(&self) -> bool {
        matches!(self, Outcome::Significant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Significant => "true",
            Outcome::NotSignificant => "false",
            Outcome::Untestable => "NA",
        }
    }
}

/// Outcome plus the test details, when a test was actually run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatedTest {
    pub outcome: Outcome,
    pub welch: Option<WelchResult>,
}

impl GatedTest {
    fn without_test(outcome: Outcome) -> Self {
        Self { outcome, welch: None }
    }
}

/// Compare `a` against `b` behind the rule's missing-value and sample-size guards.
///
/// Guards are checked in order: missing values, then sample size. A NaN p-value
/// (degenerate zero-variance case) is not significant.
pub fn gated_welch_test(a: &[Option<f64>], b: &[Option<f64>], rule: &GateRule) -> GatedTest {
    if a.iter().chain(b.iter()).any(|v| v.is_none()) {
        let outcome = match rule.missing {
            MissingValues::Untestable => Outcome::Untestable,
            MissingValues::NotSignificant => Outcome::NotSignificant,
        };
        return GatedTest::without_test(outcome);
    }

    let a: Vec<f64> = a.iter().flatten().copied().collect();
    let b: Vec<f64> = b.iter().flatten().copied().collect();
    let min_n = rule.min_n.max(2);
    if a.len() < min_n || b.len() < min_n {
        return GatedTest::without_test(rule.undersampled);
    }

    match welch_t_test(&a, &b) {
        Some(w) => {
            let outcome = if w.p_value < rule.alpha {
                Outcome::Significant
            } else {
                Outcome::NotSignificant
            };
            GatedTest { outcome, welch: Some(w) }
        }
        None => GatedTest::without_test(rule.undersampled),
    }
}
