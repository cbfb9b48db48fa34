//! Numeric normalization primitives shared by every signal
//!
//! All nine signals map raw market observations onto a 0-100 scale through
//! the same policy: a monotonic piecewise-linear curve over explicit
//! breakpoints, clamped at the endpoints. Keeping these pure and boring
//! makes the curves in the signal engine easy to audit.

/// Clamp `value` into `[min_val, max_val]`.
pub fn clamp(value: f64, min_val: f64, max_val: f64) -> f64 {
    value.max(min_val).min(max_val)
}

/// Division that returns `default` instead of inf/NaN on a zero or
/// non-finite denominator.
pub fn safe_divide(numerator: f64, denominator: f64, default: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        return default;
    }
    numerator / denominator
}

/// Round to `dp` decimal places, half away from zero.
pub fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Linear interpolation over `(x, y)` breakpoints.
///
/// Below the first breakpoint returns the first `y`; above the last returns
/// the last `y`; at any exact breakpoint returns its exact `y`. Breakpoints
/// are expected sorted by `x` ascending; with monotonic `y` the result is
/// monotonic in `value`.
pub fn piecewise_lerp(value: f64, breakpoints: &[(f64, f64)]) -> f64 {
    let Some(&(first_x, first_y)) = breakpoints.first() else {
        return 0.0;
    };
    let &(last_x, last_y) = breakpoints.last().unwrap_or(&(first_x, first_y));

    if value <= first_x {
        return first_y;
    }
    if value >= last_x {
        return last_y;
    }

    for pair in breakpoints.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x0 <= value && value <= x1 {
            if x1 == x0 {
                return y0;
            }
            let t = (value - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }

    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVE: &[(f64, f64)] = &[(0.0, 0.0), (10.0, 50.0), (20.0, 100.0)];

    #[test]
    fn test_lerp_exact_breakpoints() {
        assert_eq!(piecewise_lerp(0.0, CURVE), 0.0);
        assert_eq!(piecewise_lerp(10.0, CURVE), 50.0);
        assert_eq!(piecewise_lerp(20.0, CURVE), 100.0);
    }

    #[test]
    fn test_lerp_endpoint_clamping() {
        assert_eq!(piecewise_lerp(-5.0, CURVE), 0.0);
        assert_eq!(piecewise_lerp(1e9, CURVE), 100.0);
    }

    #[test]
    fn test_lerp_interpolates_between() {
        assert!((piecewise_lerp(5.0, CURVE) - 25.0).abs() < 1e-9);
        assert!((piecewise_lerp(15.0, CURVE) - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_lerp_monotonic_over_dense_sweep() {
        let curve = [
            (-10.0, 0.0),
            (0.0, 10.0),
            (5.0, 25.0),
            (10.0, 45.0),
            (20.0, 68.0),
            (60.0, 100.0),
        ];
        let mut prev = f64::NEG_INFINITY;
        let mut x = -20.0;
        while x <= 80.0 {
            let y = piecewise_lerp(x, &curve);
            assert!(y >= prev, "non-monotonic at x={x}: {y} < {prev}");
            prev = y;
            x += 0.25;
        }
    }

    #[test]
    fn test_lerp_empty_breakpoints() {
        assert_eq!(piecewise_lerp(42.0, &[]), 0.0);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(150.0, 0.0, 100.0), 100.0);
        assert_eq!(clamp(-3.0, 0.0, 100.0), 0.0);
        assert_eq!(clamp(42.0, 0.0, 100.0), 42.0);
    }

    #[test]
    fn test_safe_divide() {
        assert_eq!(safe_divide(10.0, 2.0, 0.0), 5.0);
        assert_eq!(safe_divide(10.0, 0.0, 3.0), 3.0);
        assert_eq!(safe_divide(10.0, f64::NAN, 3.0), 3.0);
    }
}
