//! Helper functions

use nalgebra::Vector3;

/// Normalizes the vector. The zero vector is returned unchanged rather than
/// producing NaN components, as displacement directions may legitimately
/// degenerate when two nodes coincide.
pub fn normalize_or_zero(v: &Vector3<f64>) -> Vector3<f64> {
    let norm = v.norm();
    if norm == 0.0 {
        *v
    } else {
        v / norm
    }
}

/// Unit direction from `from` towards `to`, zero if the points coincide.
pub fn direction_to(from: &Vector3<f64>, to: &Vector3<f64>) -> Vector3<f64> {
    normalize_or_zero(&(to - from))
}

/// Scales the vector down so its norm does not exceed `max_norm`.
/// Shorter vectors pass through unchanged.
pub fn clamp_norm(v: &Vector3<f64>, max_norm: f64) -> Vector3<f64> {
    let norm = v.norm();
    if norm > max_norm {
        v * (max_norm / norm)
    } else {
        *v
    }
}

/// Allows to specify joint values in degrees (converts to radians)
#[allow(dead_code)]
pub fn as_radians(degrees: &[i32]) -> Vec<f64> {
    degrees.iter().map(|d| (*d as f64).to_radians()).collect()
}

/// Print joint values, converting radians to degrees.
#[allow(dead_code)]
pub fn dump_thetas(thetas: &[f64]) {
    let mut row_str = String::new();
    for theta in thetas {
        row_str.push_str(&format!("{:5.2} ", theta.to_degrees()));
    }
    println!("[{}]", row_str.trim_end());
}
