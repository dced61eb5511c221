//! Particle and fading trail along an arc
//!
//! A particle loops over its arc forever. Its phase is always derived from the
//! absolute animation clock, so frame jitter never accumulates into drift.
//! The trail keeps the last N positions, newest first.

use std::collections::VecDeque;
use three_d::Vec3;

use crate::arc::ArcCurve;
use crate::routes::Rgb;

pub const DEFAULT_TRAIL_LENGTH: usize = 30;
pub const DEFAULT_PARTICLE_SPEED: f64 = 0.2;

/// Time step used to probe whether the phase just wrapped
const WRAP_PROBE_STEP: f64 = 0.01;

const HEAD_SIZE: f32 = 7.0;
const TAIL_SIZE_DROP: f32 = 6.0;
const HEAD_ALPHA: f32 = 0.7;
const TAIL_ALPHA_DROP: f32 = 0.69;

/// Bounded, most-recent-first history of particle positions
#[derive(Debug, Clone)]
pub struct TrailState {
    capacity: usize,
    recent: VecDeque<Vec3>,
    /// Fixed-size render buffer, zero beyond `len()`
    buffer: Vec<[f32; 3]>,
    sizes: Vec<f32>,
    alphas: Vec<f32>,
}

impl TrailState {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let step = 1.0 / capacity as f32;
        let sizes = (0..capacity)
            .map(|i| HEAD_SIZE - i as f32 * TAIL_SIZE_DROP * step)
            .collect();
        let alphas = (0..capacity)
            .map(|i| HEAD_ALPHA - i as f32 * TAIL_ALPHA_DROP * step)
            .collect();

        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity + 1),
            buffer: vec![[0.0; 3]; capacity],
            sizes,
            alphas,
        }
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Insert the newest position, dropping the oldest beyond capacity
    pub fn push(&mut self, position: Vec3) {
        self.recent.push_front(position);
        self.recent.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.recent.clear();
    }

    /// Newest first
    pub fn positions(&self) -> impl Iterator<Item = &Vec3> {
        self.recent.iter()
    }

    /// Rewrite the whole render buffer from the history
    pub fn write_buffer(&mut self) {
        for slot in self.buffer.iter_mut() {
            *slot = [0.0; 3];
        }
        for (slot, p) in self.buffer.iter_mut().zip(self.recent.iter()) {
            *slot = [p.x, p.y, p.z];
        }
    }

    /// Clear history and zero the render buffer
    pub fn reset(&mut self) {
        self.clear();
        self.write_buffer();
    }

    pub fn buffer(&self) -> &[[f32; 3]] {
        &self.buffer
    }

    pub fn sizes(&self) -> &[f32] {
        &self.sizes
    }

    pub fn alphas(&self) -> &[f32] {
        &self.alphas
    }
}

/// Particle looping along an arc with a trail behind it
#[derive(Debug, Clone)]
pub struct ParticleAnimator {
    curve: ArcCurve,
    speed: f64,
    pub color: Rgb,
    position: Vec3,
    phase: f64,
    last_phase: Option<f64>,
    trail: TrailState,
}

impl ParticleAnimator {
    pub fn new(curve: ArcCurve, speed: f64, trail_length: usize, color: Rgb) -> Self {
        Self {
            position: curve.start,
            curve,
            speed,
            color,
            phase: 0.0,
            last_phase: None,
            trail: TrailState::new(trail_length),
        }
    }

    fn phase_at(&self, time: f64) -> f64 {
        (time * self.speed).rem_euclid(1.0)
    }

    /// Move the particle to its position at absolute time `time`
    pub fn update(&mut self, time: f64) {
        let phase = self.phase_at(time);
        let probe = self.phase_at(time - WRAP_PROBE_STEP);
        let wrapped = probe > phase || self.last_phase.is_some_and(|last| phase < last);

        if wrapped {
            // Drop the end-of-loop history so the trail does not streak
            // back across the arc
            self.trail.clear();
        }

        let point = self.curve.point_at(phase as f32);
        self.position = point;
        self.phase = phase;
        self.last_phase = Some(phase);

        self.trail.push(point);
        self.trail.write_buffer();
    }

    /// Forget the trail, e.g. after the host was suspended
    pub fn reset(&mut self) {
        self.trail.reset();
        self.last_phase = None;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn trail(&self) -> &TrailState {
        &self.trail
    }

    pub fn curve(&self) -> &ArcCurve {
        &self.curve
    }
}

impl Default for TrailState {
    fn default() -> Self {
        Self::new(DEFAULT_TRAIL_LENGTH)
    }
}
