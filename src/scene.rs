//! The aggregate scene container (SPEC_FULL.md §3/§4.4): owns the octree
//! pair, the triangle-entity BVHs, the palette, the shading inputs, and the
//! sample/preview buffers, plus the render-state machine that governs
//! whether accumulated samples are still valid.

use log::info;

use crate::bvh::Bvh;
use crate::camera::Camera;
use crate::error::{RenderError, Result};
use crate::fog::Fog;
use crate::material::Palette;
use crate::octree::Octree;
use crate::sample_buffer::{PreviewFramebuffer, SampleBuffer};
use crate::sky::Sky;
use crate::sun::Sun;
use crate::tracer::EmitterGrid;

/// SPEC_FULL.md §3's render-state machine. Transitions are enforced by
/// [`Scene::start_render`] / [`Scene::pause_render`] / [`Scene::stop_render`]
/// / [`Scene::target_reached`] — exactly the set named there, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Preview,
    Rendering,
    Paused,
}

/// Why the next pass must discard accumulated samples. `SceneLoaded` is
/// sticky: [`Scene::refresh`] won't downgrade it to a lesser reason until a
/// pass actually consumes it via [`Scene::take_pending_reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    None,
    SettingsChanged,
    MaterialsChanged,
    ModeChange,
    SceneLoaded,
}

/// The scene's world-space-to-octree-space translation (SPEC_FULL.md §3,
/// "Voxel coordinates").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Origin {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Aggregate of everything a render pass needs. Exclusively owns its
/// palette, octree pair, BVHs, sample buffer, and preview framebuffers
/// (SPEC_FULL.md §3, "Ownership").
#[derive(Debug)]
pub struct Scene {
    origin: Origin,
    palette: Palette,
    solid: Octree,
    water: Octree,
    bvhs: Vec<Bvh>,
    camera: Camera,
    sun: Sun,
    sky: Sky,
    fog: Fog,
    emitter_grid: EmitterGrid,
    emitters_enabled: bool,
    ray_depth: u32,
    spp_target: u32,
    dump_frequency: u32,
    sample_buffer: SampleBuffer,
    preview: PreviewFramebuffer,
    render_state: RenderState,
    reset_reason: ResetReason,
    render_time_ms: i64,
}

/// A read-only borrow of everything a ray needs except the sample/preview
/// buffers, so a render pass can hold this immutably while mutably
/// borrowing the sample buffer at the same time (SPEC_FULL.md §5's
/// "palette, octrees, BVHs, textures, camera are immutable during a
/// RENDERING pass").
pub struct SceneView<'a> {
    pub camera: &'a Camera,
    pub solid: &'a Octree,
    pub water: &'a Octree,
    pub bvhs: &'a [Bvh],
    pub palette: &'a Palette,
    pub sun: &'a Sun,
    pub sky: &'a Sky,
    pub fog: &'a Fog,
    pub emitter_grid: &'a EmitterGrid,
    pub emitters_enabled: bool,
    pub ray_depth: u32,
}

impl Scene {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        width: u32,
        height: u32,
        origin: Origin,
        palette: Palette,
        solid: Octree,
        water: Octree,
        bvhs: Vec<Bvh>,
        camera: Camera,
        sun: Sun,
        sky: Sky,
        fog: Fog,
    ) -> Self {
        Scene {
            origin,
            palette,
            solid,
            water,
            bvhs,
            camera,
            sun,
            sky,
            fog,
            emitter_grid: EmitterGrid::empty(),
            emitters_enabled: true,
            ray_depth: 5,
            spp_target: 1024,
            dump_frequency: 100,
            sample_buffer: SampleBuffer::new(width, height),
            preview: PreviewFramebuffer::new(width, height),
            render_state: RenderState::Preview,
            reset_reason: ResetReason::SceneLoaded,
            render_time_ms: 0,
        }
    }

    pub fn view(&self) -> SceneView<'_> {
        SceneView {
            camera: &self.camera,
            solid: &self.solid,
            water: &self.water,
            bvhs: &self.bvhs,
            palette: &self.palette,
            sun: &self.sun,
            sky: &self.sky,
            fog: &self.fog,
            emitter_grid: &self.emitter_grid,
            emitters_enabled: self.emitters_enabled,
            ray_depth: self.ray_depth,
        }
    }

    /// Runs one sample pass (SPEC_FULL.md §4.5 steps 2-4): generates a
    /// primary ray per pixel through the camera and traces it with
    /// [`crate::tracer::trace_sample`], parallelized across `threads` OS
    /// threads by [`SampleBuffer::accumulate_pass`]. Scene fields other than
    /// the sample buffer are borrowed immutably for the whole pass, matching
    /// the "immutable during RENDERING" shared-resource policy.
    pub fn accumulate_render_pass(&mut self, threads: usize, base_seed: u64) {
        let width = self.sample_buffer.width();
        let height = self.sample_buffer.height().max(1);
        let aspect = width as f32 / height as f32;

        let view = SceneView {
            camera: &self.camera,
            solid: &self.solid,
            water: &self.water,
            bvhs: &self.bvhs,
            palette: &self.palette,
            sun: &self.sun,
            sky: &self.sky,
            fog: &self.fog,
            emitter_grid: &self.emitter_grid,
            emitters_enabled: self.emitters_enabled,
            ray_depth: self.ray_depth,
        };

        self.sample_buffer.accumulate_pass(threads, base_seed, move |x, y, rng| {
            let u = ((x as f32 + 0.5) / width as f32 * 2.0 - 1.0) * aspect;
            let v = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
            let ray = view.camera.view_ray(u, v, rng);
            crate::tracer::trace_sample(&view, ray, rng)
        });
    }

    pub fn width(&self) -> u32 {
        self.sample_buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.sample_buffer.height()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn palette_mut(&mut self) -> &mut Palette {
        &mut self.palette
    }

    pub fn solid_octree(&self) -> &Octree {
        &self.solid
    }

    pub fn solid_octree_mut(&mut self) -> &mut Octree {
        &mut self.solid
    }

    pub fn water_octree(&self) -> &Octree {
        &self.water
    }

    pub fn water_octree_mut(&mut self) -> &mut Octree {
        &mut self.water
    }

    pub fn bvhs(&self) -> &[Bvh] {
        &self.bvhs
    }

    pub fn set_bvhs(&mut self, bvhs: Vec<Bvh>) {
        self.bvhs = bvhs;
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn sun(&self) -> &Sun {
        &self.sun
    }

    pub fn set_sun(&mut self, sun: Sun) {
        self.sun = sun;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn sky(&self) -> &Sky {
        &self.sky
    }

    pub fn set_sky(&mut self, sky: Sky) {
        self.sky = sky;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn fog(&self) -> &Fog {
        &self.fog
    }

    pub fn set_fog(&mut self, fog: Fog) {
        self.fog = fog;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn emitter_grid(&self) -> &EmitterGrid {
        &self.emitter_grid
    }

    pub fn set_emitter_grid(&mut self, grid: EmitterGrid) {
        self.emitter_grid = grid;
    }

    pub fn emitters_enabled(&self) -> bool {
        self.emitters_enabled
    }

    pub fn set_emitters_enabled(&mut self, enabled: bool) {
        self.emitters_enabled = enabled;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn ray_depth(&self) -> u32 {
        self.ray_depth
    }

    pub fn set_ray_depth(&mut self, depth: u32) {
        self.ray_depth = depth;
        self.refresh(ResetReason::SettingsChanged);
    }

    pub fn spp_target(&self) -> u32 {
        self.spp_target
    }

    pub fn set_spp_target(&mut self, target: u32) {
        self.spp_target = target;
    }

    pub fn dump_frequency(&self) -> u32 {
        self.dump_frequency
    }

    pub fn set_dump_frequency(&mut self, frequency: u32) {
        self.dump_frequency = frequency.max(1);
    }

    pub fn sample_buffer(&self) -> &SampleBuffer {
        &self.sample_buffer
    }

    pub fn sample_buffer_mut(&mut self) -> &mut SampleBuffer {
        &mut self.sample_buffer
    }

    pub fn preview(&self) -> &PreviewFramebuffer {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut PreviewFramebuffer {
        &mut self.preview
    }

    pub fn spp(&self) -> u32 {
        self.sample_buffer.spp()
    }

    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    pub fn render_time_ms(&self) -> i64 {
        self.render_time_ms
    }

    pub fn add_render_time_ms(&mut self, delta: i64) {
        self.render_time_ms += delta;
    }

    /// Raises the reset flag, unless it's already the sticky
    /// [`ResetReason::SceneLoaded`] (SPEC_FULL.md §4.4).
    pub fn refresh(&mut self, reason: ResetReason) {
        if self.reset_reason == ResetReason::SceneLoaded {
            return;
        }
        self.reset_reason = reason;
    }

    pub fn pending_reset(&self) -> ResetReason {
        self.reset_reason
    }

    /// Called by the manager at the start of a pass: if a reset is pending,
    /// clears `spp`, `renderTime`, and the sample buffer, and consumes the
    /// flag. Returns whether a reset was applied.
    pub fn take_pending_reset(&mut self) -> bool {
        if self.reset_reason == ResetReason::None {
            return false;
        }
        info!("scene reset applied: {:?}", self.reset_reason);
        self.sample_buffer.clear();
        self.render_time_ms = 0;
        self.reset_reason = ResetReason::None;
        true
    }

    /// External `startRender`: `PREVIEW -> RENDERING` (full reset) or
    /// `PAUSED -> RENDERING` (resume, no forced reset — a reset only
    /// happens if one is already pending).
    pub fn start_render(&mut self) -> Result<()> {
        match self.render_state {
            RenderState::Preview => {
                self.refresh(ResetReason::ModeChange);
                self.render_state = RenderState::Rendering;
                info!("render state: PREVIEW -> RENDERING");
                Ok(())
            }
            RenderState::Paused => {
                self.render_state = RenderState::Rendering;
                info!("render state: PAUSED -> RENDERING");
                Ok(())
            }
            RenderState::Rendering => Err(RenderError::IllegalTransition {
                from: self.render_state,
                attempted: RenderState::Rendering,
            }),
        }
    }

    /// External `pauseRender`: `RENDERING -> PAUSED` only.
    pub fn pause_render(&mut self) -> Result<()> {
        if self.render_state != RenderState::Rendering {
            return Err(RenderError::IllegalTransition {
                from: self.render_state,
                attempted: RenderState::Paused,
            });
        }
        self.render_state = RenderState::Paused;
        info!("render state: RENDERING -> PAUSED");
        Ok(())
    }

    /// External `stopRender`: `* -> PREVIEW`, always forcing a reset.
    pub fn stop_render(&mut self) {
        self.render_state = RenderState::Preview;
        self.refresh(ResetReason::ModeChange);
        info!("render state: -> PREVIEW (stop)");
    }

    /// Internal `targetReached`: `RENDERING -> PAUSED` once `spp >=
    /// sppTarget`. A no-op (returns `false`) if the target hasn't been
    /// reached or the scene isn't currently rendering.
    pub fn target_reached(&mut self) -> bool {
        if self.render_state == RenderState::Rendering && self.spp() >= self.spp_target {
            self.render_state = RenderState::Paused;
            info!("render state: RENDERING -> PAUSED (target reached at spp={})", self.spp());
            true
        } else {
            false
        }
    }

    /// Single-owner handoff (SPEC_FULL.md §4.4's override of the teacher's
    /// buffer-aliasing `copyState`): scalar fields are deep-copied; the
    /// sample buffer and preview framebuffers are *moved* out of `other`
    /// when dimensions match (leaving `other` with freshly allocated
    /// buffers of the same size), never shared by reference between two
    /// live scenes.
    pub fn copy_state(&mut self, other: &mut Scene) {
        self.camera = other.camera.clone();
        self.sun = other.sun.clone();
        self.sky = other.sky.clone();
        self.fog = other.fog.clone();
        self.emitter_grid = other.emitter_grid.clone();
        self.emitters_enabled = other.emitters_enabled;
        self.ray_depth = other.ray_depth;
        self.spp_target = other.spp_target;
        self.dump_frequency = other.dump_frequency;
        self.render_time_ms = other.render_time_ms;

        let (w, h) = (other.width(), other.height());
        if (self.width(), self.height()) == (w, h) {
            self.sample_buffer = std::mem::replace(&mut other.sample_buffer, SampleBuffer::new(w, h));
            self.preview = std::mem::replace(&mut other.preview, PreviewFramebuffer::new(w, h));
        } else {
            self.sample_buffer = SampleBuffer::new(w, h);
            self.preview = PreviewFramebuffer::new(w, h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Projection;
    use crate::ray::Vec3;

    fn test_scene(w: u32, h: u32) -> Scene {
        Scene::new(
            w,
            h,
            Origin::default(),
            Palette::new(),
            Octree::empty_packed(4),
            Octree::empty_packed(4),
            Vec::new(),
            Camera::new(Vec3::ZERO, 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            Sun::default(),
            Sky::default(),
            Fog::default(),
        )
    }

    #[test]
    fn new_scene_starts_in_preview_with_scene_loaded_pending() {
        let scene = test_scene(4, 4);
        assert_eq!(scene.render_state(), RenderState::Preview);
        assert_eq!(scene.pending_reset(), ResetReason::SceneLoaded);
    }

    #[test]
    fn start_render_from_preview_transitions_to_rendering() {
        let mut scene = test_scene(4, 4);
        scene.start_render().unwrap();
        assert_eq!(scene.render_state(), RenderState::Rendering);
    }

    #[test]
    fn pause_then_resume_does_not_force_a_fresh_reset() {
        let mut scene = test_scene(2, 2);
        scene.start_render().unwrap();
        scene.take_pending_reset();
        scene.sample_buffer_mut().add_sample(0, 0, [1.0, 1.0, 1.0]);
        scene.sample_buffer_mut().complete_pass();

        scene.pause_render().unwrap();
        scene.start_render().unwrap();
        assert_eq!(scene.pending_reset(), ResetReason::None);
        assert_eq!(scene.spp(), 1);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut scene = test_scene(2, 2);
        let err = scene.pause_render().unwrap_err();
        assert!(matches!(err, RenderError::IllegalTransition { .. }));
    }

    #[test]
    fn stop_render_forces_preview_and_pending_reset_from_any_state() {
        let mut scene = test_scene(2, 2);
        scene.start_render().unwrap();
        scene.take_pending_reset();
        scene.stop_render();
        assert_eq!(scene.render_state(), RenderState::Preview);
        assert_ne!(scene.pending_reset(), ResetReason::None);
    }

    #[test]
    fn target_reached_pauses_once_spp_meets_target() {
        let mut scene = test_scene(1, 1);
        scene.set_spp_target(2);
        scene.start_render().unwrap();
        scene.take_pending_reset();
        assert!(!scene.target_reached());
        scene.sample_buffer_mut().complete_pass();
        scene.sample_buffer_mut().complete_pass();
        assert!(scene.target_reached());
        assert_eq!(scene.render_state(), RenderState::Paused);
    }

    #[test]
    fn scene_loaded_reset_is_sticky_against_lesser_reasons() {
        let mut scene = test_scene(2, 2);
        scene.refresh(ResetReason::SettingsChanged);
        assert_eq!(scene.pending_reset(), ResetReason::SceneLoaded);
    }

    #[test]
    fn copy_state_moves_buffers_when_dimensions_match() {
        let mut src = test_scene(2, 2);
        src.sample_buffer_mut().add_sample(0, 0, [5.0, 0.0, 0.0]);
        src.sample_buffer_mut().complete_pass();

        let mut dst = test_scene(2, 2);
        dst.copy_state(&mut src);

        assert_eq!(dst.spp(), 1);
        assert_eq!(dst.sample_buffer().mean_at(0, 0), [5.0, 0.0, 0.0]);
        // `src`'s buffer was left freshly reallocated, not aliased.
        assert_eq!(src.spp(), 0);
    }

    #[test]
    fn copy_state_reallocates_on_dimension_mismatch() {
        let mut src = test_scene(3, 3);
        let mut dst = test_scene(2, 2);
        dst.copy_state(&mut src);
        assert_eq!(dst.width(), 3);
        assert_eq!(dst.height(), 3);
    }
}
