//! Sampled arc geometry with a flowing dash pattern
//!
//! The polyline is built once per route. Animation happens at the shading
//! stage: each vertex carries `progress` in [0, 1] and the dash alpha is a
//! periodic function of progress and time, so positions never change after
//! creation.

use three_d::Vec3;

use crate::arc::ArcCurve;
use crate::routes::Rgb;

/// Default number of segments per arc
pub const DEFAULT_SEGMENTS: usize = 100;

/// Fragments below this alpha are discarded
pub const DASH_DISCARD_ALPHA: f32 = 0.1;

/// GLSL-style smoothstep, including reversed edges
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Dash shading parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DashPattern {
    /// Dash repetitions along the path
    pub length: f32,
    /// Flow rate in path lengths per time unit
    pub speed: f32,
}

impl Default for DashPattern {
    fn default() -> Self {
        Self {
            length: 1.0,
            speed: 0.5,
        }
    }
}

impl DashPattern {
    /// Position of a vertex within its dash cycle, in [0, 1)
    pub fn cycle_position(&self, progress: f32, time: f32) -> f32 {
        (progress * self.length + time * self.speed).rem_euclid(1.0)
    }

    /// Opacity of a vertex at `progress` along the path at `time`
    pub fn alpha(&self, progress: f32, time: f32) -> f32 {
        let d = self.cycle_position(progress, time);
        smoothstep(0.0, 0.1, d) * smoothstep(0.4, 0.3, d)
    }

    pub fn is_visible(&self, progress: f32, time: f32) -> bool {
        self.alpha(progress, time) >= DASH_DISCARD_ALPHA
    }
}

/// Static polyline sampled from an arc
#[derive(Debug, Clone)]
pub struct PathVisual {
    positions: Vec<Vec3>,
    progress: Vec<f32>,
    pub dash: DashPattern,
    pub color: Rgb,
    time: f32,
}

impl PathVisual {
    /// Sample `segments + 1` points along the curve
    pub fn sample(curve: &ArcCurve, segments: usize, dash: DashPattern, color: Rgb) -> Self {
        let segments = segments.max(1);
        let mut positions = Vec::with_capacity(segments + 1);
        let mut progress = Vec::with_capacity(segments + 1);

        for i in 0..=segments {
            let t = i as f32 / segments as f32;
            positions.push(curve.point_at(t));
            progress.push(t);
        }

        Self {
            positions,
            progress,
            dash,
            color,
            time: 0.0,
        }
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn progress(&self) -> &[f32] {
        &self.progress
    }

    pub fn segment_count(&self) -> usize {
        self.positions.len().saturating_sub(1)
    }

    /// Advance the shading clock; geometry is untouched
    pub fn update(&mut self, time: f64) {
        self.time = time as f32;
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Dash alpha for every vertex at the current shading time, zero where
    /// the fragment is discarded
    pub fn vertex_alphas(&self) -> impl Iterator<Item = f32> + '_ {
        self.progress.iter().map(move |&p| {
            if self.dash.is_visible(p, self.time) {
                self.dash.alpha(p, self.time)
            } else {
                0.0
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arc::DEFAULT_BULGE;
    use crate::geo::project;

    fn hamburg_london() -> ArcCurve {
        ArcCurve::build(project(53.6, 10.0, 2.0), project(51.5, -0.1, 2.0), DEFAULT_BULGE).unwrap()
    }

    #[test]
    fn test_sample_count_and_progress() {
        let path = PathVisual::sample(&hamburg_london(), DEFAULT_SEGMENTS, DashPattern::default(), Rgb::RED);
        assert_eq!(path.positions().len(), 101);
        assert_eq!(path.progress().len(), 101);
        assert_eq!(path.segment_count(), 100);
        assert_eq!(path.progress()[0], 0.0);
        assert_eq!(path.progress()[100], 1.0);
        assert!(path.progress().windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_zero_segments_is_clamped() {
        let path = PathVisual::sample(&hamburg_london(), 0, DashPattern::default(), Rgb::CYAN);
        assert_eq!(path.positions().len(), 2);
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.0, 0.1, -1.0), 0.0);
        assert_eq!(smoothstep(0.0, 0.1, 0.5), 1.0);
        assert!((smoothstep(0.0, 0.1, 0.05) - 0.5).abs() < 1e-6);
        // Reversed edges fall from 1 to 0
        assert_eq!(smoothstep(0.4, 0.3, 0.2), 1.0);
        assert_eq!(smoothstep(0.4, 0.3, 0.5), 0.0);
    }

    #[test]
    fn test_dash_shape() {
        let dash = DashPattern::default();
        // Inside the dash body
        assert!((dash.alpha(0.2, 0.0) - 1.0).abs() < 1e-6);
        // In the gap
        assert_eq!(dash.alpha(0.6, 0.0), 0.0);
        assert!(!dash.is_visible(0.6, 0.0));
        assert!(dash.is_visible(0.2, 0.0));
    }

    #[test]
    fn test_dash_flows_with_time() {
        let dash = DashPattern::default();
        // speed 0.5: after 1.2 time units the pattern has moved 0.6 along
        assert!(dash.is_visible(0.2, 0.0));
        assert!(!dash.is_visible(0.2, 1.2));
        // Periodic: 2 time units is one full cycle
        assert!((dash.alpha(0.35, 0.0) - dash.alpha(0.35, 2.0)).abs() < 1e-5);
    }

    #[test]
    fn test_update_leaves_geometry_alone() {
        let mut path = PathVisual::sample(&hamburg_london(), 10, DashPattern::default(), Rgb::CYAN);
        let before = path.positions().to_vec();
        path.update(3.5);
        assert_eq!(path.positions(), &before[..]);
        assert_eq!(path.time(), 3.5);
        assert_eq!(path.vertex_alphas().count(), 11);
    }
}
