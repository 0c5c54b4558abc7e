//! `scipy.stats` and `scipy.signal`.

use indexmap::IndexMap;

use super::{float_list, floats, int_option, mean, median, str_option, variance, LibraryModule};
use crate::script::error::Fault;
use crate::script::interp::{Interpreter, Stream};
use crate::script::value::{CallArgs, Key, Value};

pub(super) fn stats() -> LibraryModule {
    LibraryModule::new("scipy.stats")
        .function("zscore", zscore)
        .function("pearsonr", pearsonr)
        .function("describe", describe)
}

pub(super) fn signal() -> LibraryModule {
    LibraryModule::new("scipy.signal")
        .function("medfilt", medfilt)
        .function("detrend", detrend)
}

// =============================================================================
// stats
// =============================================================================

fn zscore(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("zscore", 1, 2, &["ddof"])?;
    let ddof = int_option(&args, 1, "ddof", 0)?.max(0) as usize;
    let values = floats(interp, &args.positional[0], "zscore")?;
    if values.is_empty() {
        return interp.new_list(Vec::new());
    }
    let m = mean(&values);
    let sd = variance(&values, ddof).sqrt();
    let scores = values
        .iter()
        .map(|x| if sd == 0.0 { f64::NAN } else { (x - m) / sd })
        .collect();
    float_list(interp, scores)
}

/// Pearson correlation and two-sided p-value, returned as `[r, p]`.
fn pearsonr(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("pearsonr", 2, 2, &[])?;
    let x = floats(interp, &args.positional[0], "pearsonr")?;
    let y = floats(interp, &args.positional[1], "pearsonr")?;
    if x.len() != y.len() {
        return Err(Fault::value_error("x and y must have the same length."));
    }
    if x.len() < 2 {
        return Err(Fault::value_error("x and y must have length at least 2."));
    }

    let (mx, my) = (mean(&x), mean(&y));
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(&y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        interp.write(
            Stream::Stderr,
            "ConstantInputWarning: An input array is constant; the correlation coefficient is not defined.\n",
        )?;
        return float_list(interp, vec![f64::NAN, f64::NAN]);
    }

    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);
    let n = x.len() as f64;
    let p = if x.len() == 2 {
        1.0
    } else if r.abs() == 1.0 {
        0.0
    } else {
        let df = n - 2.0;
        let t2 = r * r * df / (1.0 - r * r);
        incomplete_beta(df / 2.0, 0.5, df / (df + t2))
    };
    float_list(interp, vec![r, p])
}

fn describe(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("describe", 1, 1, &[])?;
    let values = floats(interp, &args.positional[0], "describe")?;
    if values.is_empty() {
        return Err(Fault::value_error("The input must not be empty."));
    }

    let n = values.len() as f64;
    let m = mean(&values);
    let moment = |k: i32| values.iter().map(|x| (x - m).powi(k)).sum::<f64>() / n;
    let (m2, m3, m4) = (moment(2), moment(3), moment(4));
    let (skewness, kurtosis) = if m2 == 0.0 {
        (f64::NAN, f64::NAN)
    } else {
        (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
    };
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let minmax = float_list(interp, vec![min, max])?;

    let mut summary = IndexMap::new();
    summary.insert(Key::Str("nobs".into()), Value::Int(values.len() as i64));
    summary.insert(Key::Str("minmax".into()), minmax);
    summary.insert(Key::Str("mean".into()), Value::Float(m));
    summary.insert(Key::Str("variance".into()), Value::Float(variance(&values, 1)));
    summary.insert(Key::Str("skewness".into()), Value::Float(skewness));
    summary.insert(Key::Str("kurtosis".into()), Value::Float(kurtosis));
    interp.new_dict(summary)
}

// ===== Special functions =====

fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFICIENTS[1..]
        .iter()
        .enumerate()
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64 + 1.0));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularised incomplete beta function `I_x(a, b)`.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let front =
        (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_fraction(b, a, 1.0 - x) / b
    }
}

/// Lentz's continued fraction for the incomplete beta function.
fn beta_fraction(a: f64, b: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    const EPSILON: f64 = 1e-15;
    let mut c = 1.0;
    let mut d = 1.0 - (a + b) * x / (a + 1.0);
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;
    for m in 1..=300 {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((a + m2 - 1.0) * (a + m2));
        d = 1.0 + even * d;
        d = if d.abs() < TINY { TINY } else { d };
        c = 1.0 + even / c;
        c = if c.abs() < TINY { TINY } else { c };
        d = 1.0 / d;
        h *= d * c;

        let odd = -(a + m) * (a + b + m) * x / ((a + m2) * (a + m2 + 1.0));
        d = 1.0 + odd * d;
        d = if d.abs() < TINY { TINY } else { d };
        c = 1.0 + odd / c;
        c = if c.abs() < TINY { TINY } else { c };
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

// =============================================================================
// signal
// =============================================================================

/// Median filter with zero padding at both edges.
fn medfilt(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("medfilt", 1, 2, &["kernel_size"])?;
    let kernel = int_option(&args, 1, "kernel_size", 3)?;
    if kernel < 1 || kernel % 2 == 0 {
        return Err(Fault::value_error("Each element of kernel_size should be odd."));
    }
    interp.check_len(kernel as usize)?;
    let values = floats(interp, &args.positional[0], "medfilt")?;
    let half = (kernel / 2) as usize;
    let mut out = Vec::with_capacity(values.len());
    let mut window = Vec::with_capacity(kernel as usize);
    for center in 0..values.len() {
        interp.tick()?;
        window.clear();
        for offset in 0..kernel as usize {
            let at = (center + offset).checked_sub(half);
            window.push(at.and_then(|i| values.get(i)).copied().unwrap_or(0.0));
        }
        out.push(median(&window));
    }
    float_list(interp, out)
}

/// Remove a least-squares line (`type='linear'`) or the mean (`type='constant'`).
fn detrend(interp: &mut Interpreter, args: CallArgs) -> Result<Value, Fault> {
    args.check("detrend", 1, 2, &["type"])?;
    let linear = match str_option(&args, 1, "type", "linear")? {
        "linear" | "l" => true,
        "constant" | "c" => false,
        _ => return Err(Fault::value_error("Trend type must be 'linear' or 'constant'.")),
    };
    let values = floats(interp, &args.positional[0], "detrend")?;
    if values.is_empty() {
        return interp.new_list(Vec::new());
    }
    let m = mean(&values);
    if !linear || values.len() < 2 {
        return float_list(interp, values.iter().map(|v| v - m).collect());
    }

    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, v) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (v - m);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let residuals = values
        .iter()
        .enumerate()
        .map(|(i, v)| v - (m + slope * (i as f64 - mean_x)))
        .collect();
    float_list(interp, residuals)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{fault_type, out, run};
    use super::*;
    use serde_json::json;

    fn approx(value: &serde_json::Value) -> f64 {
        value.as_f64().unwrap()
    }

    #[test]
    fn test_incomplete_beta_known_values() {
        assert!((incomplete_beta(1.0, 1.0, 0.3) - 0.3).abs() < 1e-12);
        assert!((incomplete_beta(2.0, 3.0, 0.4) - 0.5248).abs() < 1e-10);
        assert!((ln_gamma(5.0) - 24f64.ln()).abs() < 1e-10);
    }

    #[test]
    fn test_zscore() {
        let scores = out("from scipy.stats import zscore\nout = zscore([1, 2, 3])");
        let scores = scores.as_array().unwrap();
        assert_eq!(scores.len(), 3);
        assert!((approx(&scores[0]) + 1.224744871391589).abs() < 1e-12);
        assert_eq!(approx(&scores[1]), 0.0);
        assert_eq!(
            out("from scipy.stats import zscore\nout = zscore([5, 5])"),
            json!([null, null])
        );
    }

    #[test]
    fn test_pearsonr() {
        let result = out("import scipy.stats\nr, p = scipy.stats.pearsonr([1, 2, 3, 4, 5], [2, 4, 5, 4, 5])\nout = [r, p]");
        let pair = result.as_array().unwrap();
        assert!((approx(&pair[0]) - 0.7745966692414834).abs() < 1e-12);
        assert!((approx(&pair[1]) - 0.124027062657).abs() < 1e-9);

        let perfect = out("from scipy import stats\nout = stats.pearsonr([1, 2, 3], [2, 4, 6])");
        assert_eq!(perfect, json!([1.0, 0.0]));

        assert_eq!(
            fault_type("from scipy import stats\nstats.pearsonr([1, 2], [1])"),
            "ValueError"
        );
    }

    #[test]
    fn test_pearsonr_constant_input_warns() {
        let outcome = run("from scipy import stats\nout = stats.pearsonr([1, 1, 1], [1, 2, 3])");
        assert_eq!(outcome.out, Some(json!([null, null])));
        assert!(outcome.stderr.starts_with("ConstantInputWarning"));
    }

    #[test]
    fn test_describe() {
        let summary = out("from scipy.stats import describe\nout = describe([1, 2, 3, 4])");
        assert_eq!(summary["nobs"], json!(4));
        assert_eq!(summary["minmax"], json!([1.0, 4.0]));
        assert_eq!(summary["mean"], json!(2.5));
        assert!((approx(&summary["variance"]) - 1.6666666666666667).abs() < 1e-12);
        assert_eq!(summary["skewness"], json!(0.0));
        assert!((approx(&summary["kurtosis"]) + 1.36).abs() < 1e-12);
        assert_eq!(fault_type("from scipy.stats import describe\ndescribe([])"), "ValueError");
    }

    #[test]
    fn test_medfilt() {
        assert_eq!(
            out("from scipy.signal import medfilt\nout = medfilt([2, 6, 5, 4, 0, 3, 5, 7, 9, 2, 0, 1], kernel_size=5)"),
            json!([2.0, 4.0, 4.0, 4.0, 4.0, 4.0, 5.0, 5.0, 5.0, 2.0, 1.0, 0.0])
        );
        assert_eq!(
            fault_type("from scipy.signal import medfilt\nmedfilt([1, 2], 2)"),
            "ValueError"
        );
    }

    #[test]
    fn test_detrend() {
        assert_eq!(
            out("from scipy.signal import detrend\nout = detrend([1, 2, 3, 4])"),
            json!([0.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(
            out("from scipy.signal import detrend\nout = detrend([1, 2, 6], type='constant')"),
            json!([-2.0, -1.0, 3.0])
        );
    }
}
