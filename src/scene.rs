//! Scene abstraction the flight-path set renders into
//!
//! The flight-path set owns every visual. A scene only receives keys and
//! borrowed visuals: it may build whatever GPU resources it needs from them,
//! but it never owns the visuals themselves.

use std::collections::BTreeMap;
use std::fmt;

use crate::marker::Marker;
use crate::particle::ParticleAnimator;
use crate::path::PathVisual;

/// Which visual of a route a key refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VisualPart {
    FlightPath,
    StartMarker,
    EndMarker,
    Particle,
}

impl VisualPart {
    fn prefix(&self) -> &'static str {
        match self {
            VisualPart::FlightPath => "flightPath",
            VisualPart::StartMarker => "startMarker",
            VisualPart::EndMarker => "endMarker",
            VisualPart::Particle => "particle",
        }
    }
}

/// Stable name of one visual in the scene
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VisualKey {
    pub route_id: String,
    pub part: VisualPart,
}

impl VisualKey {
    pub fn new(route_id: impl Into<String>, part: VisualPart) -> Self {
        Self {
            route_id: route_id.into(),
            part,
        }
    }
}

impl fmt::Display for VisualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.part.prefix(), self.route_id)
    }
}

/// Draw order; later layers are drawn over earlier ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderLayer {
    Globe = 0,
    Path = 1,
    Marker = 2,
    Particle = 3,
}

/// A visual together with its animation capability
#[derive(Debug, Clone)]
pub enum Visual {
    /// Never changes after creation
    Static(Marker),
    /// Per-frame `update` of shading state only
    Animated(PathVisual),
    /// Per-frame `update` plus `reset` of its trail
    Trailed(ParticleAnimator),
}

impl Visual {
    pub fn update(&mut self, time: f64) {
        match self {
            Visual::Static(_) => {}
            Visual::Animated(path) => path.update(time),
            Visual::Trailed(particle) => particle.update(time),
        }
    }

    /// Returns true if the visual had resettable state
    pub fn reset(&mut self) -> bool {
        match self {
            Visual::Trailed(particle) => {
                particle.reset();
                true
            }
            Visual::Static(_) | Visual::Animated(_) => false,
        }
    }

    pub fn layer(&self) -> RenderLayer {
        match self {
            Visual::Animated(_) => RenderLayer::Path,
            Visual::Static(_) => RenderLayer::Marker,
            Visual::Trailed(_) => RenderLayer::Particle,
        }
    }
}

/// Host scene the flight-path set adds whole objects to
pub trait SceneHandle {
    fn add(&mut self, key: &VisualKey, visual: &Visual);
    fn remove(&mut self, key: &VisualKey);
}

/// Scene without a renderer; tracks what is currently attached
#[derive(Debug, Default)]
pub struct HeadlessScene {
    objects: BTreeMap<VisualKey, RenderLayer>,
    added: usize,
    removed: usize,
}

impl HeadlessScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &VisualKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Attached objects belonging to one route
    pub fn count_for_route(&self, route_id: &str) -> usize {
        self.objects.keys().filter(|k| k.route_id == route_id).count()
    }

    pub fn total_added(&self) -> usize {
        self.added
    }

    pub fn total_removed(&self) -> usize {
        self.removed
    }
}

impl SceneHandle for HeadlessScene {
    fn add(&mut self, key: &VisualKey, visual: &Visual) {
        if self.objects.insert(key.clone(), visual.layer()).is_some() {
            tracing::warn!("Scene object {} added twice", key);
        }
        self.added += 1;
    }

    fn remove(&mut self, key: &VisualKey) {
        if self.objects.remove(key).is_some() {
            self.removed += 1;
        }
    }
}
