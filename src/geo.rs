//! Geographic projection onto the globe
//!
//! Maps latitude/longitude onto a sphere using the same orientation as the
//! globe mesh: longitude is offset by 180 degrees and latitude is measured
//! from the north pole (colatitude), so +Y is north.

use three_d::{vec3, InnerSpace, Mat3, Vec3};

/// Project a geographic coordinate onto a sphere of the given radius.
///
/// Inputs are not validated; callers supply lat in [-90, 90] and lng in
/// [-180, 180].
pub fn project(lat: f64, lng: f64, radius: f64) -> Vec3 {
    let phi = (90.0 - lat).to_radians();
    let theta = (lng + 180.0).to_radians();

    let x = -radius * phi.sin() * theta.cos();
    let y = radius * phi.cos();
    let z = radius * phi.sin() * theta.sin();

    vec3(x as f32, y as f32, z as f32)
}

/// Outward unit normal at a surface point, +Y for the sphere centre
pub fn surface_normal(point: Vec3) -> Vec3 {
    if point.magnitude2() <= f32::EPSILON {
        return vec3(0.0, 1.0, 0.0);
    }
    point.normalize()
}

/// Orthonormal basis whose third column points along `axis`.
///
/// The first two columns span the plane perpendicular to `axis`, which is the
/// local tangent plane when `axis` is a surface normal.
pub fn tangent_frame(axis: Vec3) -> Mat3 {
    let z = surface_normal(axis);
    // Pick a helper that is not parallel to z
    let helper = if z.y.abs() > 0.99 {
        vec3(1.0, 0.0, 0.0)
    } else {
        vec3(0.0, 1.0, 0.0)
    };
    let x = helper.cross(z).normalize();
    let y = z.cross(x);
    Mat3::from_cols(x, y, z)
}

/// Length of a vector in f64, for checks that need more than f32 precision
#[cfg(test)]
pub fn magnitude_f64(v: Vec3) -> f64 {
    let (x, y, z) = (v.x as f64, v.y as f64, v.z as f64);
    (x * x + y * y + z * z).sqrt()
}
