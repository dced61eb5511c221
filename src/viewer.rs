//! Native globe viewer using three-d
//!
//! Hosts the flight-path set in a three-d window. The window owns a
//! `GpuScene` that mirrors every visual the set adds or removes, the camera
//! slowly orbits the globe, and the route file is re-read when it changes.
//! `snapshot` renders a single frame at a fixed animation time to a PNG.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use three_d::*;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::flight_paths::{FlightPathError, FlightPathSet, FrameHandle, RebuildOutcome};
use crate::geo::tangent_frame;
use crate::marker::{Glyph, GlyphShape, Marker};
use crate::particle::ParticleAnimator;
use crate::path::PathVisual;
use crate::routes::{self, Rgb, Route};
use crate::scene::{RenderLayer, SceneHandle, Visual, VisualKey};

/// Arc tube radius relative to the globe radius
const LINE_WIDTH: f32 = 0.002;
/// World size of one trail size unit, relative to the globe radius
const POINT_SCALE: f32 = 0.001;
const HEAD_SIZE: f32 = 8.0;
const GLYPH_SUBDIVISIONS: u32 = 16;
/// Seconds between route file checks
const RELOAD_INTERVAL: f64 = 2.0;
/// Animation time simulated before a snapshot so trails are populated
const SNAPSHOT_WARM_UP: f64 = 0.5;

fn srgba(color: Rgb, alpha: f32) -> Srgba {
    Srgba::new(color.r, color.g, color.b, (alpha.clamp(0.0, 1.0) * 255.0) as u8)
}

/// Material for visuals drawn over the globe regardless of depth
fn overlay_material(color: Srgba) -> ColorMaterial {
    ColorMaterial {
        color,
        is_transparent: true,
        render_states: RenderStates {
            depth_test: DepthTest::Always,
            write_mask: WriteMask::COLOR,
            blend: Blend::TRANSPARENCY,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Cylinder (unit length along +X) stretched from `a` to `b`
fn segment_transform(a: Vec3, b: Vec3, width: f32) -> Mat4 {
    let dir = b - a;
    let length = dir.magnitude();
    if length < 1e-6 {
        return Mat4::from_scale(0.0);
    }
    let frame = tangent_frame(dir);
    // Cyclic permutation keeps the basis right-handed with X along the segment
    let rotation = Mat3::from_cols(frame.z, frame.x, frame.y);
    Mat4::from_translation(a) * Mat4::from(rotation) * Mat4::from_nonuniform_scale(length, width, width)
}

/// Particle head stretched along its direction of travel
fn head_transform(particle: &ParticleAnimator, size: f32) -> Mat4 {
    let heading = particle.curve().tangent_at(particle.phase() as f32);
    let frame = tangent_frame(heading);
    let rotation = Mat3::from_cols(frame.z, frame.x, frame.y);
    Mat4::from_translation(particle.position())
        * Mat4::from(rotation)
        * Mat4::from_nonuniform_scale(size * 1.6, size, size)
}

/// Flat glyph mesh in the XY plane
fn glyph_mesh(shape: &GlyphShape, scale: f32) -> CpuMesh {
    let n = GLYPH_SUBDIVISIONS;
    let ring_point = |i: u32, r: f32| {
        let angle = i as f32 / n as f32 * std::f32::consts::TAU;
        vec3(angle.cos() * r * scale, angle.sin() * r * scale, 0.0)
    };

    let mut positions = Vec::new();
    let mut indices = Vec::new();
    match *shape {
        GlyphShape::Disk { radius } => {
            positions.push(vec3(0.0, 0.0, 0.0));
            for i in 0..n {
                positions.push(ring_point(i, radius));
            }
            for i in 0..n {
                indices.extend_from_slice(&[0, 1 + i, 1 + (i + 1) % n]);
            }
        }
        GlyphShape::Ring { inner, outer } => {
            for i in 0..n {
                positions.push(ring_point(i, inner));
                positions.push(ring_point(i, outer));
            }
            for i in 0..n {
                let j = (i + 1) % n;
                let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * j, 2 * j + 1);
                indices.extend_from_slice(&[a, b, d, a, d, c]);
            }
        }
    }

    CpuMesh {
        positions: Positions::F32(positions),
        indices: Indices::U32(indices),
        ..Default::default()
    }
}

/// GPU-side mirror of one visual
enum GpuVisual {
    Path {
        mesh: Gm<InstancedMesh, ColorMaterial>,
        transformations: Vec<Mat4>,
    },
    Marker {
        glyphs: Vec<Gm<Mesh, ColorMaterial>>,
    },
    Particle {
        head: Gm<Mesh, ColorMaterial>,
        trail: Gm<InstancedMesh, ColorMaterial>,
    },
}

impl GpuVisual {
    fn render(&self, camera: &Camera) {
        match self {
            GpuVisual::Path { mesh, .. } => mesh.render(camera, &[]),
            GpuVisual::Marker { glyphs } => {
                for glyph in glyphs {
                    glyph.render(camera, &[]);
                }
            }
            GpuVisual::Particle { head, trail } => {
                trail.render(camera, &[]);
                head.render(camera, &[]);
            }
        }
    }
}

/// Instance colours for the arc segments at the path's current shading time
fn dash_colors(path: &PathVisual) -> Vec<Srgba> {
    path.vertex_alphas()
        .take(path.segment_count())
        .map(|alpha| srgba(path.color, alpha))
        .collect()
}

/// One instance per trail buffer slot; slots past the live length are
/// fully transparent
fn trail_instances(particle: &ParticleAnimator, point_scale: f32) -> Instances {
    let state = particle.trail();
    let live = state.len();

    let mut instances = Instances::default();
    instances.transformations = state
        .buffer()
        .iter()
        .zip(state.sizes())
        .map(|(p, size)| Mat4::from_translation(Vec3::from(*p)) * Mat4::from_scale(size * point_scale))
        .collect();
    instances.colors = Some(
        state
            .alphas()
            .iter()
            .enumerate()
            .map(|(i, &a)| srgba(particle.color, if i < live { a } else { 0.0 }))
            .collect(),
    );
    instances
}

/// three-d scene the flight-path set renders into
struct GpuScene {
    context: Context,
    globe: Gm<Mesh, ColorMaterial>,
    line_width: f32,
    point_scale: f32,
    marker_scale: f32,
    objects: BTreeMap<VisualKey, (RenderLayer, GpuVisual)>,
}

impl GpuScene {
    fn new(context: &Context, config: &Config) -> Self {
        let radius = config.globe.radius as f32;
        let mut globe = Gm::new(
            Mesh::new(context, &CpuMesh::sphere(48)),
            ColorMaterial {
                color: srgba(config.globe.color, 1.0),
                ..Default::default()
            },
        );
        globe.geometry.set_transformation(Mat4::from_scale(radius));

        Self {
            context: context.clone(),
            globe,
            line_width: LINE_WIDTH * radius,
            point_scale: POINT_SCALE * radius,
            marker_scale: config.globe.marker_scale,
            objects: BTreeMap::new(),
        }
    }

    fn build_path(&self, path: &PathVisual) -> GpuVisual {
        let transformations: Vec<Mat4> = path
            .positions()
            .windows(2)
            .map(|w| segment_transform(w[0], w[1], self.line_width))
            .collect();

        let mut instances = Instances::default();
        instances.transformations = transformations.clone();
        instances.colors = Some(dash_colors(path));

        let mesh = Gm::new(
            InstancedMesh::new(&self.context, &instances, &CpuMesh::cylinder(6)),
            overlay_material(Srgba::WHITE),
        );
        GpuVisual::Path {
            mesh,
            transformations,
        }
    }

    fn build_marker(&self, marker: &Marker) -> GpuVisual {
        let glyphs = marker
            .glyphs()
            .into_iter()
            .map(|glyph: &Glyph| {
                let mut gm = Gm::new(
                    Mesh::new(&self.context, &glyph_mesh(&glyph.shape, self.marker_scale)),
                    overlay_material(srgba(marker.color, glyph.opacity)),
                );
                gm.geometry.set_transformation(marker.transform(glyph));
                gm
            })
            .collect();
        GpuVisual::Marker { glyphs }
    }

    fn build_particle(&self, particle: &ParticleAnimator) -> GpuVisual {
        let mut head = Gm::new(
            Mesh::new(&self.context, &CpuMesh::sphere(12)),
            overlay_material(srgba(particle.color, 1.0)),
        );
        head.geometry
            .set_transformation(head_transform(particle, HEAD_SIZE * self.point_scale));
        let trail = Gm::new(
            InstancedMesh::new(
                &self.context,
                &trail_instances(particle, self.point_scale),
                &CpuMesh::sphere(6),
            ),
            overlay_material(Srgba::WHITE),
        );
        GpuVisual::Particle { head, trail }
    }

    /// Copy per-frame state from the flight-path set onto the GPU objects
    fn sync<'a>(&mut self, visuals: impl Iterator<Item = (&'a VisualKey, &'a Visual)>) {
        let Self {
            point_scale,
            objects,
            ..
        } = self;

        for (key, visual) in visuals {
            let Some((_, gpu)) = objects.get_mut(key) else {
                continue;
            };

            match (gpu, visual) {
                (GpuVisual::Path { mesh, transformations }, Visual::Animated(path)) => {
                    let mut instances = Instances::default();
                    instances.transformations = transformations.clone();
                    instances.colors = Some(dash_colors(path));
                    mesh.geometry.set_instances(&instances);
                }
                (GpuVisual::Particle { head, trail }, Visual::Trailed(particle)) => {
                    head.geometry
                        .set_transformation(head_transform(particle, HEAD_SIZE * *point_scale));
                    trail
                        .geometry
                        .set_instances(&trail_instances(particle, *point_scale));
                }
                _ => {}
            }
        }
    }

    fn render(&self, camera: &Camera) {
        self.globe.render(camera, &[]);

        let mut layered: Vec<&(RenderLayer, GpuVisual)> = self.objects.values().collect();
        layered.sort_by_key(|(layer, _)| *layer);
        for (_, gpu) in layered {
            gpu.render(camera);
        }
    }
}

impl SceneHandle for GpuScene {
    fn add(&mut self, key: &VisualKey, visual: &Visual) {
        let gpu = match visual {
            Visual::Animated(path) => self.build_path(path),
            Visual::Static(marker) => self.build_marker(marker),
            Visual::Trailed(particle) => self.build_particle(particle),
        };
        debug!("Scene add {}", key);
        self.objects.insert(key.clone(), (visual.layer(), gpu));
    }

    fn remove(&mut self, key: &VisualKey) {
        // Dropping the meshes releases their GPU buffers
        self.objects.remove(key);
    }
}

/// Place the camera on its orbit around the globe
fn orbit(camera: &mut Camera, radius: f32, angle: f32) {
    let distance = radius * 6.8;
    let position = vec3(angle.cos() * distance, distance * 0.35, angle.sin() * distance);
    camera.set_view(position, vec3(0.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0));
}

fn new_camera(viewport: Viewport, radius: f32) -> Camera {
    let mut camera = Camera::new_perspective(
        viewport,
        vec3(radius * 6.8, radius * 2.4, 0.0),
        vec3(0.0, 0.0, 0.0),
        vec3(0.0, 1.0, 0.0),
        degrees(25.0),
        0.1,
        radius * 50.0,
    );
    orbit(&mut camera, radius, 0.0);
    camera
}

/// Hand a route list to the set; returns the new frame handle on rebuild
fn install(flight_paths: &mut FlightPathSet, routes: &[Route], scene: &mut GpuScene) -> Option<FrameHandle> {
    match flight_paths.apply_routes(routes, Some(scene)) {
        RebuildOutcome::Rebuilt { built, skipped, handle } => {
            info!("{} routes on the globe, {} not drawn", built, skipped.len());
            debug!("Drawing {:?}", flight_paths.route_ids().collect::<Vec<_>>());
            Some(handle)
        }
        RebuildOutcome::Unchanged | RebuildOutcome::SceneNotReady => None,
    }
}

/// Route file watched for changes while the viewer runs
struct RouteSource {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    next_check: f64,
}

impl RouteSource {
    fn new(path: Option<PathBuf>) -> Self {
        let modified = path.as_ref().and_then(|p| modified_time(p));
        Self {
            path,
            modified,
            next_check: RELOAD_INTERVAL,
        }
    }

    /// New route list if the file changed since the last check
    fn poll(&mut self, now: f64) -> Option<Vec<Route>> {
        if now < self.next_check {
            return None;
        }
        self.next_check = now + RELOAD_INTERVAL;

        let path = self.path.as_ref()?;
        let modified = modified_time(path)?;
        if self.modified == Some(modified) {
            return None;
        }
        self.modified = Some(modified);

        info!("Route file {:?} changed, reloading", path);
        let loaded = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| routes::parse_routes(&text));
        match loaded {
            Ok(batch) => Some(batch.routes),
            Err(e) => {
                warn!("Failed to reload {:?}: {}", path, e);
                None
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Run the interactive globe window
pub fn run_viewer(config: Config, routes: Vec<Route>, routes_file: Option<PathBuf>) -> anyhow::Result<()> {
    let window = Window::new(WindowSettings {
        title: config.window.title.clone(),
        max_size: Some((config.window.width, config.window.height)),
        ..Default::default()
    })?;
    let context = window.gl();

    let radius = config.globe.radius as f32;
    let rotation_speed = config.globe.rotation_speed;
    let background = config.globe.background.to_linear();

    let mut scene = GpuScene::new(&context, &config);
    let mut camera = new_camera(window.viewport(), radius);
    let mut flight_paths = FlightPathSet::new(config.flight_path_settings());
    let mut frame = install(&mut flight_paths, &routes, &mut scene);
    let mut source = RouteSource::new(routes_file);

    // Monotonic clock; every visual derives its phase from this
    let clock = Instant::now();

    window.render_loop(move |frame_input| {
        let now = clock.elapsed().as_secs_f64();

        if let Some(routes) = source.poll(now) {
            if let Some(handle) = install(&mut flight_paths, &routes, &mut scene) {
                frame = Some(handle);
            }
        }

        if let Some(handle) = frame {
            match flight_paths.tick(handle, now) {
                Ok(report) if report.time_jump => {
                    info!("Resumed after a pause, reset {} trails", report.resets);
                }
                Ok(_) => {}
                Err(FlightPathError::StaleFrameHandle(_)) => {
                    frame = flight_paths.frame_handle();
                }
            }
        }
        scene.sync(flight_paths.visuals());

        camera.set_viewport(frame_input.viewport);
        orbit(&mut camera, radius, now as f32 * rotation_speed);

        frame_input.screen().clear(ClearState::color_and_depth(
            background[0],
            background[1],
            background[2],
            1.0,
            1.0,
        ));
        scene.render(&camera);

        FrameOutput::default()
    });

    Ok(())
}

/// Tick the set up to `time` at 60 fps so trails are populated
fn warm_up(flight_paths: &mut FlightPathSet, handle: FrameHandle, time: f64) -> Result<(), FlightPathError> {
    let start = (time - SNAPSHOT_WARM_UP).max(0.0);
    let frames = ((time - start) * 60.0).round() as usize;
    for i in 0..frames {
        flight_paths.tick(handle, start + i as f64 / 60.0)?;
    }
    flight_paths.tick(handle, time)?;
    Ok(())
}

/// Render one frame at animation time `time` and save it as a PNG
pub fn snapshot(config: Config, routes: Vec<Route>, time: f64, size: u32, output: &Path) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let window = Window::new(WindowSettings {
        title: format!("{} - snapshot", config.window.title),
        max_size: Some((size, size)),
        min_size: (size, size),
        ..Default::default()
    })?;
    let context = window.gl();

    let radius = config.globe.radius as f32;
    let background = config.globe.background.to_linear();

    let mut scene = GpuScene::new(&context, &config);
    let mut flight_paths = FlightPathSet::new(config.flight_path_settings());
    if let Some(handle) = install(&mut flight_paths, &routes, &mut scene) {
        warm_up(&mut flight_paths, handle, time)?;
    }
    scene.sync(flight_paths.visuals());
    let route_count = flight_paths.len();

    let mut camera = new_camera(window.viewport(), radius);
    orbit(&mut camera, radius, time as f32 * config.globe.rotation_speed);
    let output = output.to_path_buf();

    window.render_loop(move |frame_input| {
        camera.set_viewport(frame_input.viewport);
        frame_input.screen().clear(ClearState::color_and_depth(
            background[0],
            background[1],
            background[2],
            1.0,
            1.0,
        ));
        scene.render(&camera);

        let vp = frame_input.viewport;
        let pixels: Vec<[u8; 4]> = frame_input.screen().read_color();
        let flat: Vec<u8> = pixels.iter().flat_map(|p| p.iter().copied()).collect();

        match image::RgbaImage::from_raw(vp.width, vp.height, flat) {
            Some(img) => match img.save(&output) {
                Ok(()) => {
                    info!("Saved {}", output.display());
                    let meta = serde_json::json!({
                        "generated": chrono::Local::now().to_rfc3339(),
                        "time": time,
                        "routes": route_count,
                        "width": vp.width,
                        "height": vp.height,
                    });
                    let meta_path = output.with_extension("json");
                    if let Err(e) = std::fs::write(&meta_path, serde_json::to_string_pretty(&meta).unwrap_or_default()) {
                        warn!("Failed to write {}: {}", meta_path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to save {}: {}", output.display(), e),
            },
            None => warn!("Screen read returned an unexpected buffer size"),
        }

        FrameOutput {
            exit: true,
            ..Default::default()
        }
    });

    Ok(())
}
