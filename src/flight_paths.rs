//! Flight-path set - owns every per-route visual and drives the frame loop
//!
//! A route list change is a full rebuild: everything from the previous list is
//! removed from the scene and dropped before the new visuals are built. Route
//! lists are small and change rarely, so no diffing is attempted.
//!
//! The frame loop is represented by a `FrameHandle`. Rebuilding or clearing
//! cancels the current handle, so a frame callback that was scheduled before
//! teardown can never touch the new (or disposed) visuals.

use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::arc::ArcCurve;
use crate::marker::{Marker, MarkerRole};
use crate::particle::ParticleAnimator;
use crate::path::{DashPattern, PathVisual};
use crate::routes::{Route, RouteError, RouteTunables};
use crate::scene::{SceneHandle, Visual, VisualKey, VisualPart};

/// Default gap between frames treated as a host suspension
pub const DEFAULT_TIME_JUMP_THRESHOLD: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlightPathError {
    #[error("Frame handle {0:?} is no longer active")]
    StaleFrameHandle(FrameHandle),
}

/// Settings shared by all routes in a set
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPathSettings {
    pub globe_radius: f64,
    /// Used for routes that carry no tunables of their own
    pub tunables: RouteTunables,
    pub time_jump_threshold: f64,
}

impl Default for FlightPathSettings {
    fn default() -> Self {
        Self {
            globe_radius: 2.0,
            tunables: RouteTunables::default(),
            time_jump_threshold: DEFAULT_TIME_JUMP_THRESHOLD,
        }
    }
}

/// Registration of the frame callback; only the newest handle is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(u64);

#[derive(Debug, Default)]
struct FrameLoop {
    generation: u64,
    active: Option<u64>,
    previous_time: f64,
}

impl FrameLoop {
    fn start(&mut self) -> FrameHandle {
        self.generation += 1;
        self.active = Some(self.generation);
        self.previous_time = 0.0;
        FrameHandle(self.generation)
    }

    fn cancel(&mut self) {
        if let Some(generation) = self.active.take() {
            debug!("Cancelled frame loop #{}", generation);
        }
    }

    fn is_current(&self, handle: FrameHandle) -> bool {
        self.active == Some(handle.0)
    }
}

/// All visuals belonging to one route
#[derive(Debug)]
pub struct RouteVisualSet {
    route_id: String,
    visuals: Vec<(VisualKey, Visual)>,
}

impl RouteVisualSet {
    /// Build the path, both markers and the particle for a route
    pub fn build(route: &Route, settings: &FlightPathSettings) -> Result<Self, RouteError> {
        route.validate()?;

        let tunables = route.tunables.unwrap_or(settings.tunables);
        tunables.validate()?;
        let start = route.start.to_surface(settings.globe_radius);
        let end = route.destination.to_surface(settings.globe_radius);
        let curve = ArcCurve::build(start, end, tunables.arc_bulge)?;
        let color = route.color_or_default();

        let dash = DashPattern {
            length: tunables.dash_length,
            speed: tunables.dash_speed,
        };
        let path = PathVisual::sample(&curve, tunables.path_segments, dash, color);
        let particle = ParticleAnimator::new(curve, tunables.particle_speed, tunables.trail_length, color);

        let key = |part| VisualKey::new(route.id.clone(), part);
        let visuals = vec![
            (key(VisualPart::FlightPath), Visual::Animated(path)),
            (key(VisualPart::StartMarker), Visual::Static(Marker::build(start, MarkerRole::Origin))),
            (key(VisualPart::EndMarker), Visual::Static(Marker::build(end, MarkerRole::Destination))),
            (key(VisualPart::Particle), Visual::Trailed(particle)),
        ];

        Ok(Self {
            route_id: route.id.clone(),
            visuals,
        })
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn visuals(&self) -> impl Iterator<Item = (&VisualKey, &Visual)> {
        self.visuals.iter().map(|(k, v)| (k, v))
    }

    pub fn particle(&self) -> Option<&ParticleAnimator> {
        self.visuals.iter().find_map(|(_, v)| match v {
            Visual::Trailed(p) => Some(p),
            _ => None,
        })
    }

    pub fn path(&self) -> Option<&PathVisual> {
        self.visuals.iter().find_map(|(_, v)| match v {
            Visual::Animated(p) => Some(p),
            _ => None,
        })
    }
}

/// Result of handing a route list to the set
#[derive(Debug)]
pub enum RebuildOutcome {
    /// No scene yet; nothing was built and the list was not remembered
    SceneNotReady,
    /// Same list as last time; the existing visuals stay
    Unchanged,
    Rebuilt {
        built: usize,
        skipped: Vec<(String, RouteError)>,
        handle: FrameHandle,
    },
}

/// What happened during one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub time_jump: bool,
    pub resets: usize,
    pub updated: usize,
}

/// Owner of every route visual and of the frame loop
#[derive(Debug)]
pub struct FlightPathSet {
    settings: FlightPathSettings,
    applied: Option<Vec<Route>>,
    sets: Vec<RouteVisualSet>,
    frame: FrameLoop,
}

impl FlightPathSet {
    pub fn new(settings: FlightPathSettings) -> Self {
        Self {
            settings,
            applied: None,
            sets: Vec::new(),
            frame: FrameLoop::default(),
        }
    }

    /// Rebuild if `routes` differs from the last applied list
    pub fn apply_routes(
        &mut self,
        routes: &[Route],
        scene: Option<&mut dyn SceneHandle>,
    ) -> RebuildOutcome {
        let Some(scene) = scene else {
            debug!("Scene not ready, deferring {} routes", routes.len());
            return RebuildOutcome::SceneNotReady;
        };

        if self.applied.as_deref() == Some(routes) {
            debug!("Route list unchanged ({} routes)", routes.len());
            return RebuildOutcome::Unchanged;
        }

        self.rebuild(routes, scene)
    }

    /// Tear everything down and build visuals for `routes`
    pub fn rebuild(&mut self, routes: &[Route], scene: &mut dyn SceneHandle) -> RebuildOutcome {
        self.clear(scene);

        let mut skipped = Vec::new();
        let mut seen = HashSet::new();
        for route in routes {
            // Ids of rejected routes count too: the first record with an id wins
            if !seen.insert(route.id.as_str()) {
                warn!(route = %route.id, "Skipping duplicate route id");
                skipped.push((route.id.clone(), RouteError::DuplicateId(route.id.clone())));
                continue;
            }

            match RouteVisualSet::build(route, &self.settings) {
                Ok(set) => {
                    for (key, visual) in set.visuals() {
                        scene.add(key, visual);
                    }
                    self.sets.push(set);
                }
                Err(e) => {
                    warn!(route = %route.id, "Skipping route: {}", e);
                    skipped.push((route.id.clone(), e));
                }
            }
        }

        self.applied = Some(routes.to_vec());
        let handle = self.frame.start();
        info!(
            "Built {} flight paths ({} skipped), frame loop #{}",
            self.sets.len(),
            skipped.len(),
            handle.0
        );

        RebuildOutcome::Rebuilt {
            built: self.sets.len(),
            skipped,
            handle,
        }
    }

    /// Stop the frame loop, remove every visual from the scene and drop it
    pub fn clear(&mut self, scene: &mut dyn SceneHandle) {
        self.frame.cancel();
        let count = self.sets.len();
        for set in self.sets.drain(..) {
            for (key, _) in set.visuals() {
                scene.remove(key);
            }
        }
        self.applied = None;
        if count > 0 {
            debug!("Disposed {} flight paths", count);
        }
    }

    /// Handle of the running frame loop, if any
    pub fn frame_handle(&self) -> Option<FrameHandle> {
        self.frame.active.map(FrameHandle)
    }

    /// Advance every visual to animation time `now` (seconds).
    ///
    /// A gap larger than the time-jump threshold since the previous frame
    /// resets every trail before positions are updated.
    pub fn tick(&mut self, handle: FrameHandle, now: f64) -> Result<FrameReport, FlightPathError> {
        if !self.frame.is_current(handle) {
            return Err(FlightPathError::StaleFrameHandle(handle));
        }

        let mut report = FrameReport {
            time_jump: (now - self.frame.previous_time).abs() > self.settings.time_jump_threshold,
            ..Default::default()
        };
        self.frame.previous_time = now;

        if report.time_jump {
            for set in &mut self.sets {
                for (_, visual) in &mut set.visuals {
                    if visual.reset() {
                        report.resets += 1;
                    }
                }
            }
            debug!("Time jump detected at t={:.3}, reset {} trails", now, report.resets);
        }

        for set in &mut self.sets {
            for (_, visual) in &mut set.visuals {
                if !matches!(visual, Visual::Static(_)) {
                    visual.update(now);
                    report.updated += 1;
                }
            }
        }

        Ok(report)
    }

    /// Every live visual, for render hosts
    pub fn visuals(&self) -> impl Iterator<Item = (&VisualKey, &Visual)> {
        self.sets.iter().flat_map(|s| s.visuals())
    }

    pub fn sets(&self) -> &[RouteVisualSet] {
        &self.sets
    }

    pub fn route_ids(&self) -> impl Iterator<Item = &str> {
        self.sets.iter().map(|s| s.route_id())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::magnitude_f64;
    use crate::routes::{GeoPoint, Rgb};
    use crate::scene::HeadlessScene;

    fn hamburg_london() -> Route {
        Route::new("A1", GeoPoint::new(53.6, 10.0), GeoPoint::new(51.5, -0.1)).with_color(Rgb::RED)
    }

    fn routes() -> Vec<Route> {
        vec![
            hamburg_london(),
            Route::new("B2", GeoPoint::new(40.6, -73.8), GeoPoint::new(51.5, -0.1)),
            Route::new("C3", GeoPoint::new(-33.9, 151.2), GeoPoint::new(1.4, 104.0)),
        ]
    }

    fn rebuilt(outcome: RebuildOutcome) -> (usize, Vec<(String, RouteError)>, FrameHandle) {
        match outcome {
            RebuildOutcome::Rebuilt { built, skipped, handle } => (built, skipped, handle),
            other => panic!("expected rebuild, got {:?}", other),
        }
    }

    #[test]
    fn test_end_to_end_single_route() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (built, skipped, _) = rebuilt(set.apply_routes(&[hamburg_london()], Some(&mut scene)));
        assert_eq!(built, 1);
        assert!(skipped.is_empty());
        assert_eq!(scene.len(), 4);

        let start = hamburg_london().start.to_surface(2.0);
        assert!((magnitude_f64(start) - 2.0).abs() < 1e-6);

        let route_set = &set.sets()[0];
        let curve = route_set.particle().unwrap().curve();
        assert!(magnitude_f64(curve.start) >= 2.0 - 1e-6);
        assert!(magnitude_f64(curve.end) >= 2.0 - 1e-6);
        assert!(magnitude_f64(curve.control) > 2.0);

        let path = route_set.path().unwrap();
        assert_eq!(path.positions().len(), 101);
        assert_eq!(path.progress()[0], 0.0);
        assert_eq!(path.progress()[100], 1.0);
        assert!(path.progress().windows(2).all(|w| w[1] > w[0]));
        assert_eq!(path.color, Rgb::RED);
    }

    #[test]
    fn test_missing_scene_is_a_no_op() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        assert!(matches!(set.apply_routes(&routes(), None), RebuildOutcome::SceneNotReady));
        assert!(set.is_empty());
        assert!(set.frame_handle().is_none());

        // Once the scene exists the same list is built
        let mut scene = HeadlessScene::new();
        let (built, _, _) = rebuilt(set.apply_routes(&routes(), Some(&mut scene)));
        assert_eq!(built, 3);
    }

    #[test]
    fn test_same_list_twice_leaves_one_set_per_route() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let list = routes();

        rebuilt(set.apply_routes(&list, Some(&mut scene)));
        assert!(matches!(set.apply_routes(&list, Some(&mut scene)), RebuildOutcome::Unchanged));
        for route in &list {
            assert_eq!(scene.count_for_route(&route.id), 4);
        }

        // A forced rebuild must not accumulate either
        rebuilt(set.rebuild(&list, &mut scene));
        assert_eq!(scene.len(), 12);
        assert_eq!(set.len(), 3);
        assert_eq!(scene.total_removed(), 12);
    }

    #[test]
    fn test_empty_list_removes_everything() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        rebuilt(set.apply_routes(&routes(), Some(&mut scene)));
        assert_eq!(scene.len(), 12);

        let (built, _, _) = rebuilt(set.apply_routes(&[], Some(&mut scene)));
        assert_eq!(built, 0);
        assert!(scene.is_empty());
        assert_eq!(set.visuals().count(), 0);
    }

    #[test]
    fn test_bad_routes_are_skipped_individually() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let mut list = routes();
        list.push(Route::new("same", GeoPoint::new(10.0, 10.0), GeoPoint::new(10.0, 10.0)));
        list.push(Route::new("nan", GeoPoint::new(f64::NAN, 0.0), GeoPoint::new(1.0, 1.0)));
        list.push(Route::new("A1", GeoPoint::new(0.0, 0.0), GeoPoint::new(5.0, 5.0)));

        let (built, skipped, _) = rebuilt(set.apply_routes(&list, Some(&mut scene)));
        assert_eq!(built, 3);
        assert_eq!(skipped.len(), 3);
        assert_eq!(skipped[0], ("same".to_string(), RouteError::ZeroLengthArc));
        assert!(matches!(skipped[1].1, RouteError::InvalidCoordinate { .. }));
        assert_eq!(skipped[2].1, RouteError::DuplicateId("A1".to_string()));
        assert_eq!(scene.count_for_route("same"), 0);
        assert_eq!(scene.count_for_route("A1"), 4);
    }

    #[test]
    fn test_rebuild_cancels_previous_frame_handle() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (_, _, first) = rebuilt(set.apply_routes(&routes(), Some(&mut scene)));
        let (_, _, second) = rebuilt(set.apply_routes(&[hamburg_london()], Some(&mut scene)));

        assert_ne!(first, second);
        assert_eq!(set.tick(first, 0.5), Err(FlightPathError::StaleFrameHandle(first)));
        assert!(set.tick(second, 0.5).is_ok());

        set.clear(&mut scene);
        assert!(set.tick(second, 0.6).is_err());
        assert!(set.frame_handle().is_none());
    }

    #[test]
    fn test_tick_updates_animated_visuals() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (_, _, handle) = rebuilt(set.apply_routes(&routes(), Some(&mut scene)));

        let report = set.tick(handle, 0.5).unwrap();
        assert!(!report.time_jump);
        // One path and one particle per route
        assert_eq!(report.updated, 6);
        for route_set in set.sets() {
            assert_eq!(route_set.particle().unwrap().trail().len(), 1);
            assert_eq!(route_set.path().unwrap().time(), 0.5);
        }
    }

    #[test]
    fn test_time_jump_resets_trails_before_update() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (_, _, handle) = rebuilt(set.apply_routes(&routes(), Some(&mut scene)));

        for frame in 0..30 {
            let report = set.tick(handle, 0.1 + frame as f64 / 60.0).unwrap();
            assert!(!report.time_jump);
        }
        assert!(set.sets().iter().all(|s| s.particle().unwrap().trail().len() > 1));

        // Host suspended for 1.5 time units
        let last = 0.1 + 29.0 / 60.0;
        let report = set.tick(handle, last + 1.5).unwrap();
        assert!(report.time_jump);
        assert_eq!(report.resets, 3);
        assert!(set.sets().iter().all(|s| s.particle().unwrap().trail().len() <= 1));

        let report = set.tick(handle, last + 1.5 + 1.0 / 60.0).unwrap();
        assert!(!report.time_jump);
        assert!(set.sets().iter().all(|s| s.particle().unwrap().trail().len() == 2));
    }

    #[test]
    fn test_route_tunables_override_defaults() {
        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let tunables = RouteTunables {
            trail_length: 5,
            path_segments: 20,
            ..RouteTunables::default()
        };
        let route = hamburg_london().with_tunables(tunables);
        let (_, _, handle) = rebuilt(set.apply_routes(&[route], Some(&mut scene)));

        for frame in 0..20 {
            set.tick(handle, 0.1 + frame as f64 * 0.01).unwrap();
        }
        let route_set = &set.sets()[0];
        assert_eq!(route_set.path().unwrap().positions().len(), 21);
        assert_eq!(route_set.particle().unwrap().trail().len(), 5);
    }

    #[test]
    fn test_bad_tunables_skip_only_that_route() {
        let huge = RouteTunables {
            path_segments: usize::MAX,
            ..Default::default()
        };
        let backwards = RouteTunables {
            particle_speed: -0.2,
            ..Default::default()
        };
        let list = vec![
            hamburg_london(),
            Route::new("B2", GeoPoint::new(40.6, -73.8), GeoPoint::new(51.5, -0.1)).with_tunables(huge),
            Route::new("C3", GeoPoint::new(-33.9, 151.2), GeoPoint::new(1.4, 104.0)).with_tunables(backwards),
        ];

        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (built, skipped, handle) = rebuilt(set.apply_routes(&list, Some(&mut scene)));
        assert_eq!(built, 1);
        assert_eq!(skipped.len(), 2);
        assert!(skipped
            .iter()
            .all(|(_, e)| matches!(e, RouteError::InvalidTunables { .. })));
        assert_eq!(scene.count_for_route("A1"), 4);
        assert_eq!(scene.count_for_route("C3"), 0);

        for frame in 0..60 {
            set.tick(handle, 0.1 + frame as f64 / 60.0).unwrap();
        }
        assert!(set.sets()[0].particle().unwrap().trail().len() > 1);
    }

    #[test]
    fn test_duplicate_of_rejected_route_is_skipped() {
        let list = vec![
            Route::new("X", GeoPoint::new(123.0, 0.0), GeoPoint::new(10.0, 10.0)),
            Route::new("X", GeoPoint::new(53.6, 10.0), GeoPoint::new(51.5, -0.1)),
        ];

        let mut set = FlightPathSet::new(FlightPathSettings::default());
        let mut scene = HeadlessScene::new();
        let (built, skipped, _) = rebuilt(set.apply_routes(&list, Some(&mut scene)));
        assert_eq!(built, 0);
        assert!(matches!(skipped[0].1, RouteError::InvalidCoordinate { .. }));
        assert_eq!(skipped[1].1, RouteError::DuplicateId("X".to_string()));
        assert!(scene.is_empty());
    }
}
