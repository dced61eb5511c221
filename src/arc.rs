//! Arc curves between two points on the globe
//!
//! An arc is a quadratic Bézier whose control point is the chord midpoint
//! pushed outward from the globe centre. The push is proportional to the
//! chord length, so long-haul routes bulge higher than short hops. This is a
//! visual approximation of a great circle, not a geodesic.

use three_d::{InnerSpace, Vec3};

use crate::routes::RouteError;

/// Default apex height as a fraction of the chord length
pub const DEFAULT_BULGE: f32 = 0.15;

/// Chords shorter than this are treated as zero-length
const MIN_CHORD: f32 = 1e-6;

/// Quadratic Bézier curve arcing above the sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcCurve {
    pub start: Vec3,
    pub control: Vec3,
    pub end: Vec3,
}

impl ArcCurve {
    /// Build an arc from `start` to `end`, raised by `bulge * |end - start|`.
    pub fn build(start: Vec3, end: Vec3, bulge: f32) -> Result<Self, RouteError> {
        let chord = (end - start).magnitude();
        if !chord.is_finite() || chord < MIN_CHORD {
            return Err(RouteError::ZeroLengthArc);
        }

        let mid = (start + end) * 0.5;
        // Midpoint at the centre means the endpoints are antipodal
        if mid.magnitude() < MIN_CHORD {
            return Err(RouteError::AntipodalArc);
        }

        let control = mid + mid.normalize() * (chord * bulge);
        Ok(Self { start, control, end })
    }

    /// Point at parameter `t` in [0, 1]
    pub fn point_at(&self, t: f32) -> Vec3 {
        let u = 1.0 - t;
        self.start * (u * u) + self.control * (2.0 * u * t) + self.end * (t * t)
    }

    /// Unit tangent at parameter `t`
    pub fn tangent_at(&self, t: f32) -> Vec3 {
        let u = 1.0 - t;
        let d = (self.control - self.start) * (2.0 * u) + (self.end - self.control) * (2.0 * t);
        if d.magnitude2() <= f32::EPSILON {
            return (self.end - self.start).normalize();
        }
        d.normalize()
    }

    pub fn chord_length(&self) -> f32 {
        (self.end - self.start).magnitude()
    }

    /// How far the control point sits above the chord midpoint
    pub fn apex_height(&self) -> f32 {
        (self.control - (self.start + self.end) * 0.5).magnitude()
    }
}
