//! Contract-level numerical guards: sigmoid saturation outside +/-20,
//! divisions guarded at 1e-9, unit clamps. Every call site relies on these
//! bounds, so they live here rather than being applied ad hoc.

/// Logistic sigmoid with saturated tails.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x > 20.0 {
        1.0
    } else if x < -20.0 {
        0.0
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

/// Division with the denominator guarded at 1e-9.
#[inline]
pub fn guarded_div(num: f64, den: f64) -> f64 {
    num / den.max(1e-9)
}

#[inline]
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Linear interpolation of sorted samples at percentile `p` in [0, 1].
pub fn percentile(mut values: Vec<f64>, p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    values.sort_by(|a, b| a.total_cmp(b));
    let pos = p * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f64;
    values[lo] * (1.0 - t) + values[hi] * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_saturates() {
        assert_eq!(sigmoid(21.0), 1.0);
        assert_eq!(sigmoid(-21.0), 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_guarded_div_never_blows_up() {
        assert!(guarded_div(1.0, 0.0).is_finite());
        assert!((guarded_div(6.0, 3.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = vec![1.0, 3.0, 2.0, 4.0];
        assert!((percentile(v.clone(), 0.5) - 2.5).abs() < 1e-12);
        assert!((percentile(v.clone(), 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(v, 1.0) - 4.0).abs() < 1e-12);
        assert_eq!(percentile(Vec::new(), 0.5), 0.0);
    }
}
