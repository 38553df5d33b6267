//! The render scheduler (SPEC_FULL.md §4.5): drives sample passes against a
//! shared [`Scene`], handling pause/resume/stop commands between passes and
//! dispatching snapshot/dump callbacks at the host's configured cadence.
//!
//! Grounded in the teacher's own concurrency idiom (`ws.rs`'s
//! `Arc<Mutex<_>>` + `std::thread::spawn` + `crossbeam_channel`, never
//! async): the manager owns a command channel instead of the condition
//! variable the distilled spec describes, per REDESIGN FLAGS §9's
//! "background scene manager thread -> message-passing channel".

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use log::{info, warn};

use crate::scene::Scene;

/// A request to change the render state, consumed between passes — workers
/// (and the pass loop itself) never block mid-trace (SPEC_FULL.md §4.5
/// "Suspension points").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Stop,
}

/// Policy hook deciding when the manager should persist a snapshot image or
/// a `.dump` file, consulted once per completed pass (SPEC_FULL.md §4.5
/// "Snapshot dispatch" / §6 "Scheduling callbacks").
pub trait SnapshotControl: Send + Sync {
    fn should_save_snapshot(&self, scene: &Scene, spp: u32) -> bool;
    fn should_save_dump(&self, scene: &Scene, spp: u32) -> bool;
}

/// The default policy: fire every `scene.dump_frequency()` samples, for both
/// snapshots and dumps alike (SPEC_FULL.md §8 scenario 6).
pub struct DumpFrequencyControl;

impl SnapshotControl for DumpFrequencyControl {
    fn should_save_snapshot(&self, scene: &Scene, spp: u32) -> bool {
        spp > 0 && spp % scene.dump_frequency() == 0
    }

    fn should_save_dump(&self, scene: &Scene, spp: u32) -> bool {
        spp > 0 && spp % scene.dump_frequency() == 0
    }
}

type FrameCallback = dyn Fn(&Scene, u32) + Send + Sync;
type CompletionCallback = dyn Fn(i64, f64) + Send + Sync;

/// Host-supplied callbacks (SPEC_FULL.md §6): `onFrameCompleted` after every
/// pass, `onRenderCompleted` once the run stops rendering.
#[derive(Default)]
pub struct Callbacks {
    pub on_frame_completed: Option<Box<FrameCallback>>,
    pub on_render_completed: Option<Box<CompletionCallback>>,
}

/// Drives [`Scene::accumulate_render_pass`] in a loop, gated by the scene's
/// own render-state machine and an explicit command channel.
pub struct RenderManager {
    scene: Arc<Mutex<Scene>>,
    threads: usize,
    command_tx: Sender<Command>,
    command_rx: Receiver<Command>,
}

impl RenderManager {
    pub fn new(scene: Arc<Mutex<Scene>>, threads: usize) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        RenderManager {
            scene,
            threads: threads.max(1),
            command_tx,
            command_rx,
        }
    }

    /// A cloneable handle external callers use to request pause/resume/stop
    /// without touching the scene lock directly.
    pub fn commands(&self) -> Sender<Command> {
        self.command_tx.clone()
    }

    fn apply_pending_commands(&self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            let mut scene = self.scene.lock().expect("scene mutex poisoned");
            let result = match cmd {
                Command::Start => scene.start_render(),
                Command::Pause => scene.pause_render(),
                Command::Stop => {
                    scene.stop_render();
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!("ignoring illegal render-manager command {cmd:?}: {err}");
            }
        }
    }

    /// Runs passes until the scene leaves `RENDERING` (target reached, an
    /// explicit pause, or a stop), applying any pending reset at the start
    /// of each pass and consulting `snapshot_control` after each one.
    pub fn run(&self, snapshot_control: &dyn SnapshotControl, callbacks: &Callbacks) {
        self.apply_pending_commands();

        loop {
            let is_rendering = {
                let scene = self.scene.lock().expect("scene mutex poisoned");
                scene.render_state() == crate::scene::RenderState::Rendering
            };
            if !is_rendering {
                break;
            }

            self.run_one_pass();
            self.apply_pending_commands();

            let (spp, target_reached) = {
                let mut scene = self.scene.lock().expect("scene mutex poisoned");
                let reached = scene.target_reached();
                (scene.spp(), reached)
            };

            {
                let scene = self.scene.lock().expect("scene mutex poisoned");
                if snapshot_control.should_save_dump(&scene, spp) {
                    info!("dump milestone reached at spp={spp}");
                }
                if snapshot_control.should_save_snapshot(&scene, spp) {
                    info!("snapshot milestone reached at spp={spp}");
                }
                if let Some(on_frame) = &callbacks.on_frame_completed {
                    on_frame(&scene, spp);
                }
            }

            if target_reached {
                break;
            }
        }

        if let Some(on_complete) = &callbacks.on_render_completed {
            let scene = self.scene.lock().expect("scene mutex poisoned");
            let elapsed_ms = scene.render_time_ms();
            let samples_per_second = if elapsed_ms > 0 {
                scene.spp() as f64 * scene.width() as f64 * scene.height() as f64 / (elapsed_ms as f64 / 1000.0)
            } else {
                0.0
            };
            on_complete(elapsed_ms, samples_per_second);
        }
    }

    fn run_one_pass(&self) {
        let mut scene = self.scene.lock().expect("scene mutex poisoned");
        scene.take_pending_reset();
        let seed = 0x9E37_79B9_7F4A_7C15_u64 ^ (scene.spp() as u64).wrapping_mul(0x1000_0001);

        let started = Instant::now();
        scene.accumulate_render_pass(self.threads, seed);
        let elapsed_ms = started.elapsed().as_millis() as i64;
        scene.add_render_time_ms(elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, Projection};
    use crate::fog::Fog;
    use crate::material::Palette;
    use crate::octree::Octree;
    use crate::ray::Vec3;
    use crate::scene::Origin;
    use crate::sky::Sky;
    use crate::sun::Sun;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tiny_scene() -> Scene {
        let mut scene = Scene::new(
            2,
            2,
            Origin::default(),
            Palette::new(),
            Octree::empty_packed(2),
            Octree::empty_packed(2),
            Vec::new(),
            Camera::new(Vec3::new(0.0, 0.0, 5.0), 0.0, 0.0, Projection::Pinhole { fov: 1.0 }),
            Sun::default(),
            Sky::default(),
            Fog::default(),
        );
        scene.set_spp_target(3);
        scene
    }

    #[test]
    fn run_stops_once_target_spp_is_reached() {
        let scene = Arc::new(Mutex::new(tiny_scene()));
        scene.lock().unwrap().start_render().unwrap();
        let manager = RenderManager::new(Arc::clone(&scene), 2);

        manager.run(&DumpFrequencyControl, &Callbacks::default());

        let scene = scene.lock().unwrap();
        assert_eq!(scene.spp(), 3);
        assert_eq!(scene.render_state(), crate::scene::RenderState::Paused);
    }

    #[test]
    fn run_is_a_no_op_when_scene_is_in_preview() {
        let scene = Arc::new(Mutex::new(tiny_scene()));
        let manager = RenderManager::new(Arc::clone(&scene), 2);
        manager.run(&DumpFrequencyControl, &Callbacks::default());
        assert_eq!(scene.lock().unwrap().spp(), 0);
    }

    #[test]
    fn stop_command_halts_before_target_is_reached() {
        let mut seed_scene = tiny_scene();
        seed_scene.set_spp_target(1_000_000);
        let scene = Arc::new(Mutex::new(seed_scene));
        scene.lock().unwrap().start_render().unwrap();
        let manager = RenderManager::new(Arc::clone(&scene), 1);
        manager.commands().send(Command::Stop).unwrap();

        manager.run(&DumpFrequencyControl, &Callbacks::default());

        assert_eq!(scene.lock().unwrap().render_state(), crate::scene::RenderState::Preview);
    }

    #[test]
    fn frame_completed_callback_fires_once_per_pass() {
        let scene = Arc::new(Mutex::new(tiny_scene()));
        scene.lock().unwrap().start_render().unwrap();
        let manager = RenderManager::new(Arc::clone(&scene), 2);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let callbacks = Callbacks {
            on_frame_completed: Some(Box::new(move |_scene, _spp| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })),
            on_render_completed: None,
        };

        manager.run(&DumpFrequencyControl, &callbacks);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
