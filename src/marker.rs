//! Airport markers
//!
//! Each endpoint of a route gets a small flat glyph lying in the tangent plane
//! of the globe: a faint base ring plus a role-specific centre (filled disk for
//! the origin, open ring for the destination).

use three_d::{Mat3, Mat4, Vec3};

use crate::geo::{surface_normal, tangent_frame};
use crate::routes::Rgb;

/// Endpoint role of a marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerRole {
    Origin,
    Destination,
}

impl MarkerRole {
    pub fn color(&self) -> Rgb {
        match self {
            MarkerRole::Origin => Rgb::CYAN,
            MarkerRole::Destination => Rgb::ORANGE,
        }
    }
}

/// Flat shape in the marker's local XY plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlyphShape {
    Disk { radius: f32 },
    Ring { inner: f32, outer: f32 },
}

/// One layer of a marker
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub shape: GlyphShape,
    pub opacity: f32,
    /// Offset along the surface normal
    pub lift: f32,
}

/// Oriented origin/destination marker
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: Vec3,
    pub normal: Vec3,
    pub role: MarkerRole,
    pub color: Rgb,
    pub base: Glyph,
    pub center: Glyph,
}

impl Marker {
    pub fn build(position: Vec3, role: MarkerRole) -> Self {
        let base = Glyph {
            shape: GlyphShape::Ring {
                inner: 0.001,
                outer: 0.005,
            },
            opacity: 0.2,
            lift: 0.0,
        };

        let center_shape = match role {
            MarkerRole::Origin => GlyphShape::Disk { radius: 0.008 },
            MarkerRole::Destination => GlyphShape::Ring {
                inner: 0.003,
                outer: 0.008,
            },
        };

        Self {
            position,
            normal: surface_normal(position),
            role,
            color: role.color(),
            base,
            center: Glyph {
                shape: center_shape,
                opacity: 0.9,
                lift: 0.001,
            },
        }
    }

    pub fn glyphs(&self) -> [&Glyph; 2] {
        [&self.base, &self.center]
    }

    /// Rotation taking the glyph plane's +Z onto the inward normal.
    ///
    /// The glyph is double sided, so aiming at -normal keeps it flat against
    /// the globe whichever way the globe is turned.
    pub fn orientation(&self) -> Mat3 {
        tangent_frame(-self.normal)
    }

    /// World transform for one glyph layer
    pub fn transform(&self, glyph: &Glyph) -> Mat4 {
        let origin = self.position + self.normal * glyph.lift;
        Mat4::from_translation(origin) * Mat4::from(self.orientation())
    }
}
