//! Series primitives shared by the feature implementations.
//!
//! All functions return a vector the same length as their input, with NaN
//! wherever the window is incomplete or contains a NaN.

/// Rolling arithmetic mean over `window` values.
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Rolling sum over `window` values.
pub fn rolling_sum(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().sum::<f64>())
}

/// Rolling standard deviation. `ddof` = 0 for population, 1 for sample.
pub fn rolling_std(values: &[f64], window: usize, ddof: usize) -> Vec<f64> {
    if window <= ddof {
        return vec![f64::NAN; values.len()];
    }
    rolling(values, window, |w| std_dev(w, ddof))
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Apply `f` to every complete, NaN-free window ending at each index.
pub fn rolling(values: &[f64], window: usize, f: impl Fn(&[f64]) -> f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if window == 0 || n < window {
        return result;
    }
    for i in (window - 1)..n {
        let w = &values[(i + 1 - window)..=i];
        if w.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = f(w);
    }
    result
}

/// Standard deviation of a slice with the given delta degrees of freedom.
pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    let n = values.len();
    if n <= ddof {
        return f64::NAN;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - ddof) as f64).sqrt()
}

/// Linearly weighted moving average: weights 1..=window, newest heaviest.
pub fn wma(values: &[f64], window: usize) -> Vec<f64> {
    let denom = (window * (window + 1)) as f64 / 2.0;
    rolling(values, window, |w| {
        w.iter()
            .enumerate()
            .map(|(j, v)| (j + 1) as f64 * v)
            .sum::<f64>()
            / denom
    })
}

/// Exponential moving average with alpha = 2 / (period + 1).
///
/// Leading NaNs are skipped; the EMA is seeded with the SMA of the first
/// `period` values after them. A NaN after the seed taints the rest.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    recursive_smooth(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder smoothing: an EMA with alpha = 1 / period and the same seeding rule.
pub fn wilder(values: &[f64], period: usize) -> Vec<f64> {
    recursive_smooth(values, period, 1.0 / period as f64)
}

fn recursive_smooth(values: &[f64], period: usize, alpha: f64) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }

    let start = match values.iter().position(|v| !v.is_nan()) {
        Some(s) => s,
        None => return result,
    };
    let seed_end = start + period;
    if seed_end > n {
        return result;
    }

    let seed_window = &values[start..seed_end];
    if seed_window.iter().any(|v| v.is_nan()) {
        return result;
    }
    let seed = seed_window.iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = seed;

    let mut prev = seed;
    for i in seed_end..n {
        if values[i].is_nan() {
            break;
        }
        let smoothed = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = smoothed;
        prev = smoothed;
    }
    result
}

/// `values[i] / values[i - periods] - 1`.
pub fn pct_change(values: &[f64], periods: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in periods..n {
        let prev = values[i - periods];
        if prev != 0.0 {
            result[i] = values[i] / prev - 1.0;
        }
    }
    result
}

/// `ln(values[i] / values[i - 1])`. Non-positive ratios yield NaN.
pub fn log_returns(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    for i in 1..n {
        let ratio = values[i] / values[i - 1];
        if ratio > 0.0 && ratio.is_finite() {
            result[i] = ratio.ln();
        }
    }
    result
}

/// True Range: max(high-low, |high-prev_close|, |low-prev_close|).
/// The first bar has no previous close and is NaN.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = close.len();
    let mut tr = vec![f64::NAN; n];
    for i in 1..n {
        let (h, l, pc) = (high[i], low[i], close[i - 1]);
        if h.is_nan() || l.is_nan() || pc.is_nan() {
            continue;
        }
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Mean of the non-NaN values, NaN if there are none.
pub fn nan_mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Median of the non-NaN values, NaN if there are none.
pub fn nan_median(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut valid: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    valid.sort_by(|a, b| a.total_cmp(b));
    let mid = valid.len() / 2;
    if valid.len() % 2 == 0 {
        (valid[mid - 1] + valid[mid]) / 2.0
    } else {
        valid[mid]
    }
}

/// Pearson correlation of two equal-length slices. NaN if either is constant.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}
