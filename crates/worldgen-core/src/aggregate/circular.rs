//! Circular (angular) mean for degree-valued maps such as aspect.
//!
//! Degrees clockwise from North are averaged as unit vectors:
//!   S = Σ sin θ / N,  C = Σ cos θ / N
//!   mean = atan2(S, C), converted back to degrees and normalised to [0°, 360°).

/// Sine components closer to zero than this are treated as exactly zero, so
/// directions symmetric about North resolve to 0° rather than 359.999…°.
const SIN_EPSILON: f64 = 1e-12;

/// Circular mean, in degrees, of `values` over the given cells.
/// NaN when `cells` is empty.
pub fn circular_mean_deg(values: &[f64], cells: &[usize]) -> f64 {
    if cells.is_empty() {
        return f64::NAN;
    }

    let mut sum_sin = 0.0f64;
    let mut sum_cos = 0.0f64;
    for &c in cells {
        let rad = values[c].to_radians();
        sum_sin += rad.sin();
        sum_cos += rad.cos();
    }

    let n = cells.len() as f64;
    let mut mean_sin = sum_sin / n;
    let mean_cos = sum_cos / n;
    if mean_sin.abs() < SIN_EPSILON {
        mean_sin = 0.0;
    }

    let mut deg = mean_sin.atan2(mean_cos).to_degrees();
    if deg < 0.0 {
        deg += 360.0;
    }
    // -tiny + 360 can round up to exactly 360.
    if deg >= 360.0 {
        deg -= 360.0;
    }
    deg
}
