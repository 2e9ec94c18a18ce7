//! Math utilities and formatting helpers.

use std::time::Duration;

/// Logistic sigmoid, stable for large negative inputs.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse sigmoid: ln(p / (1 - p)).
#[inline]
pub fn logit(p: f32) -> f32 {
    (p / (1.0 - p)).ln()
}

/// The factor pair `(a, b)` with `a * b == n` and `a <= b` closest to a square.
///
/// Used to lay out `n` samples in a grid.
pub fn closest_to_square_factors(n: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let mut a = (n as f64).sqrt() as usize;
    while a > 1 && n % a != 0 {
        a -= 1;
    }
    let a = a.max(1);
    (a, n / a)
}

/// Human-readable duration, e.g. `1 hour 2 minutes 3.50 seconds`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0).floor() as u64;
    let minutes = ((total - hours as f64 * 3600.0) / 60.0).floor() as u64;
    let seconds = total - hours as f64 * 3600.0 - minutes as f64 * 60.0;

    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(plural(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(plural(minutes, "minute"));
    }
    parts.push(format!("{seconds:.2} seconds"));
    parts.join(" ")
}
