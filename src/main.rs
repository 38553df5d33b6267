//! The `render` binary (SPEC_FULL.md §6 "External interfaces"): a
//! hand-rolled CLI, in the teacher's `parse_cli` style (no argument-parsing
//! crate appears anywhere in the corpus), exposing two subcommands —
//! `render <sceneName>` drives a scene to its configured sample-per-pixel
//! target and persists dumps/snapshots along the way; `snapshot <sceneName>
//! [outfile]` tonemaps an existing `.dump` to an image without rendering
//! anything.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};

use voxel_path_tracer::config::{self, OutputMode, SceneDescription, SceneGeometry};
use voxel_path_tracer::dump::{self, Dump};
use voxel_path_tracer::image_io::{self, LdrImage};
use voxel_path_tracer::manager::{Callbacks, DumpFrequencyControl, RenderManager};
use voxel_path_tracer::postprocess::{self, TonemapOperator};
use voxel_path_tracer::scene::Scene;

#[derive(Debug, Clone, PartialEq)]
enum CliCommand {
    Render { scene_name: String, target: Option<u32>, threads: Option<usize>, force: bool },
    Snapshot { scene_name: String, outfile: Option<PathBuf> },
}

fn parse_cli(args: &[String]) -> Result<CliCommand> {
    let Some(command) = args.first() else {
        bail!("missing command (expected \"render <sceneName>\" or \"snapshot <sceneName> [outfile]\")");
    };

    match command.as_str() {
        "render" => {
            let Some(scene_name) = args.get(1) else {
                bail!("render requires a scene name");
            };
            let mut target = None;
            let mut threads = None;
            let mut force = false;
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--target" => {
                        let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --target"))?;
                        target = Some(v.parse::<u32>().map_err(|e| anyhow!("invalid --target value {v}: {e}"))?);
                        i += 2;
                    }
                    "--threads" => {
                        let v = args.get(i + 1).ok_or_else(|| anyhow!("missing value for --threads"))?;
                        threads = Some(v.parse::<usize>().map_err(|e| anyhow!("invalid --threads value {v}: {e}"))?);
                        i += 2;
                    }
                    "--force" => {
                        force = true;
                        i += 1;
                    }
                    other => bail!("unknown argument: {other} (supported: --target <spp>, --threads <n>, --force)"),
                }
            }
            Ok(CliCommand::Render { scene_name: scene_name.clone(), target, threads, force })
        }
        "snapshot" => {
            let Some(scene_name) = args.get(1) else {
                bail!("snapshot requires a scene name");
            };
            let outfile = args.get(2).map(PathBuf::from);
            if let Some(other) = args.get(3) {
                bail!("unknown argument: {other}");
            }
            Ok(CliCommand::Snapshot { scene_name: scene_name.clone(), outfile })
        }
        other => bail!("unknown command: {other} (expected \"render\" or \"snapshot\")"),
    }
}

/// Distinguishes an input-data problem (exit 1) from everything else that
/// aborts a render (exit 2), per SPEC_FULL.md §6's exit-code contract.
enum CliFailure {
    Load(anyhow::Error),
    Internal(anyhow::Error),
}

fn scene_json_path(scene_name: &str) -> PathBuf {
    PathBuf::from(format!("{scene_name}.json"))
}
fn scene_geometry_path(scene_name: &str) -> PathBuf {
    PathBuf::from(format!("{scene_name}.octree2"))
}
fn scene_dump_path(scene_name: &str) -> PathBuf {
    PathBuf::from(format!("{scene_name}.dump"))
}

/// Writes `bytes` to `path` via a temp file plus rename so a reader never
/// observes a half-written dump or image (SPEC_FULL.md §4.5 "Dumps are
/// written atomically").
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_name = match path.file_name() {
        Some(name) => format!("{}.tmp", name.to_string_lossy()),
        None => bail!("output path has no file name: {}", path.display()),
    };
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, bytes).with_context(|| format!("writing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))
}

/// Persists `<sceneName>.dump`, first preserving the previous dump (if any)
/// as `<sceneName>.dump.backup` so a crash mid-write never loses the last
/// known-good accumulation (SPEC_FULL.md §6 "Render dumps").
fn persist_dump(scene: &Scene, scene_name: &str) -> Result<()> {
    let snapshot = Dump::from_sample_buffer(scene.sample_buffer(), scene.render_time_ms());
    let bytes = dump::serialize(&snapshot);

    let dump_path = scene_dump_path(scene_name);
    if dump_path.exists() {
        let backup_path = PathBuf::from(format!("{scene_name}.dump.backup"));
        if let Err(err) = std::fs::copy(&dump_path, &backup_path) {
            warn!("could not back up {} to {}: {err}", dump_path.display(), backup_path.display());
        }
    }
    write_atomic(&dump_path, &bytes)
}

/// `<sceneName>-<spp>.<ext>` under a `snapshots/` subdirectory alongside the
/// scene, matching SPEC_FULL.md §6's "snapshots (under a `snapshots/`
/// subdir when auto-saved)".
fn auto_snapshot_path(scene_name: &str, spp: u32, output_mode: OutputMode) -> PathBuf {
    let scene_path = Path::new(scene_name);
    let stem = scene_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| scene_name.to_string());
    let file_name = format!("{stem}-{spp}.{}", output_mode.extension());
    match scene_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("snapshots").join(file_name),
        _ => PathBuf::from("snapshots").join(file_name),
    }
}

/// Collects the sample buffer's current per-pixel means, in row-major
/// order, the same way `Dump::from_sample_buffer` does — `accum()` holds
/// running sums, not means, and must never be fed to a tonemapper directly.
fn collect_means(scene: &Scene) -> Vec<[f64; 3]> {
    let buffer = scene.sample_buffer();
    (0..buffer.height())
        .flat_map(|y| (0..buffer.width()).map(move |x| (x, y)))
        .map(|(x, y)| buffer.mean_at(x, y))
        .collect()
}

/// Tonemaps the sample buffer's current means and writes an auto-saved
/// snapshot (SPEC_FULL.md §6 "Image outputs").
fn persist_snapshot(scene: &Scene, scene_name: &str, spp: u32, output_mode: OutputMode) -> Result<()> {
    let width = scene.width();
    let height = scene.height();
    let means = collect_means(scene);
    let path = auto_snapshot_path(scene_name, spp, output_mode);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    write_image(&means, width, height, scene, output_mode, &path)
}

fn write_image(means: &[[f64; 3]], width: u32, height: u32, scene: &Scene, output_mode: OutputMode, path: &Path) -> Result<()> {
    match output_mode {
        OutputMode::Png => {
            let view = scene.view();
            let rgb = means.iter().map(|m| postprocess::tonemap_pixel(TonemapOperator::Gamma, *m)).collect();
            let alpha = (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| {
                    let occlusion = postprocess::alpha_via_sky_occlusion(&view, x, y, width, height);
                    (occlusion * 255.0).round() as u8
                })
                .collect();
            let image = LdrImage { width, height, rgb, alpha: Some(alpha) };
            image_io::write_png(&image, path, false)
        }
        OutputMode::Tiff32 => image_io::write_tiff32(means, width, height, path),
        OutputMode::Pfm => image_io::write_pfm(means, width, height, path),
    }
}

/// Brings a freshly built scene into `RENDERING`, resuming an existing
/// `.dump` without forcing the full reset that a bare `start_render` applies
/// from `PREVIEW` — the scene is walked through `PREVIEW` -> `RENDERING` ->
/// `PAUSED`, the pending `SceneLoaded` reset is consumed while the buffer is
/// still empty, the dump's samples are written in, and only then does the
/// scene resume from `PAUSED` -> `RENDERING`, a transition that carries no
/// forced reset (SPEC_FULL.md §3's render-state machine).
fn enter_rendering(scene: &mut Scene, dump: Option<Dump>) -> Result<()> {
    match dump {
        None => {
            scene.start_render().context("starting render")?;
        }
        Some(dump) => {
            scene.start_render().context("starting render")?;
            scene.pause_render().context("pausing before dump resume")?;
            scene.take_pending_reset();
            dump.write_into(scene.sample_buffer_mut()).context("applying resumed dump")?;
            scene.add_render_time_ms(dump.render_time_ms);
            scene.start_render().context("resuming render")?;
        }
    }
    Ok(())
}

fn load_resume_dump(scene_name: &str, width: u32, height: u32) -> Result<Option<Dump>> {
    let dump_path = scene_dump_path(scene_name);
    if !dump_path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&dump_path).with_context(|| format!("reading {}", dump_path.display()))?;
    let loaded = dump::deserialize(&bytes).with_context(|| format!("parsing {}", dump_path.display()))?;
    if (loaded.width, loaded.height) != (width, height) {
        warn!(
            "ignoring {}: dimensions {}x{} do not match scene {}x{}",
            dump_path.display(),
            loaded.width,
            loaded.height,
            width,
            height
        );
        return Ok(None);
    }
    Ok(Some(loaded))
}

fn run_render(scene_name: &str, target: Option<u32>, threads: Option<usize>, force: bool) -> Result<(), CliFailure> {
    let desc_path = scene_json_path(scene_name);
    let desc = SceneDescription::load(&desc_path).map_err(CliFailure::Load)?;

    let geometry_path = scene_geometry_path(scene_name);
    let geometry = match SceneGeometry::load(&geometry_path) {
        Ok(geometry) => geometry,
        Err(err) if force => {
            warn!("--force: proceeding without geometry ({err:#})");
            SceneGeometry {
                origin: voxel_path_tracer::scene::Origin::default(),
                palette: voxel_path_tracer::material::Palette::new(),
                solid: voxel_path_tracer::octree::Octree::empty_packed(1),
                water: voxel_path_tracer::octree::Octree::empty_packed(1),
            }
        }
        Err(err) => return Err(CliFailure::Load(err)),
    };

    let mut scene = config::build_scene(&desc, geometry);
    if let Some(target) = target {
        scene.set_spp_target(target);
    }
    let threads = threads.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4));

    let resume = load_resume_dump(scene_name, scene.width(), scene.height()).map_err(CliFailure::Internal)?;
    if resume.is_some() {
        info!("resuming {scene_name} from existing dump");
    }
    enter_rendering(&mut scene, resume).map_err(CliFailure::Internal)?;

    let output_mode = desc.output_mode;
    let scene_name_owned = scene_name.to_string();
    let scene = Arc::new(Mutex::new(scene));
    let manager = RenderManager::new(Arc::clone(&scene), threads);

    let callbacks = Callbacks {
        on_frame_completed: Some(Box::new(move |scene: &Scene, spp: u32| {
            if spp > 0 && spp % scene.dump_frequency() == 0 {
                if let Err(err) = persist_dump(scene, &scene_name_owned) {
                    warn!("failed to persist dump for {scene_name_owned} at spp={spp}: {err:#}");
                }
                if let Err(err) = persist_snapshot(scene, &scene_name_owned, spp, output_mode) {
                    warn!("failed to persist snapshot for {scene_name_owned} at spp={spp}: {err:#}");
                }
            }
        })),
        on_render_completed: Some(Box::new(|elapsed_ms, samples_per_second| {
            info!("render completed in {elapsed_ms}ms ({samples_per_second:.0} samples/s)");
        })),
    };

    manager.run(&DumpFrequencyControl, &callbacks);

    let scene = scene.lock().expect("scene mutex poisoned");
    persist_dump(&scene, scene_name).map_err(CliFailure::Internal)?;
    let spp = scene.spp();
    let final_path = PathBuf::from(format!("{scene_name}.{}", output_mode.extension()));
    let means = collect_means(&scene);
    write_image(&means, scene.width(), scene.height(), &scene, output_mode, &final_path)
        .map_err(CliFailure::Internal)?;
    info!("{scene_name} reached spp={spp}, wrote {}", final_path.display());
    Ok(())
}

fn run_snapshot(scene_name: &str, outfile: Option<PathBuf>) -> Result<(), CliFailure> {
    let dump_path = scene_dump_path(scene_name);
    let bytes = std::fs::read(&dump_path)
        .with_context(|| format!("reading {}", dump_path.display()))
        .map_err(CliFailure::Load)?;
    let loaded = dump::deserialize(&bytes)
        .with_context(|| format!("parsing {}", dump_path.display()))
        .map_err(CliFailure::Load)?;

    let (output_mode, out_path) = match outfile {
        Some(path) => (output_mode_from_extension(&path), path),
        None => (OutputMode::Png, PathBuf::from(format!("{scene_name}.png"))),
    };

    match output_mode {
        OutputMode::Png => {
            let rgb = loaded.means.iter().map(|m| postprocess::tonemap_pixel(TonemapOperator::Gamma, *m)).collect();
            let image = LdrImage { width: loaded.width, height: loaded.height, rgb, alpha: None };
            image_io::write_png(&image, &out_path, false).map_err(CliFailure::Internal)?;
        }
        OutputMode::Tiff32 => {
            image_io::write_tiff32(&loaded.means, loaded.width, loaded.height, &out_path).map_err(CliFailure::Internal)?;
        }
        OutputMode::Pfm => {
            image_io::write_pfm(&loaded.means, loaded.width, loaded.height, &out_path).map_err(CliFailure::Internal)?;
        }
    }
    info!("wrote {}", out_path.display());
    Ok(())
}

fn output_mode_from_extension(path: &Path) -> OutputMode {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tiff") | Some("tif") => OutputMode::Tiff32,
        Some("pfm") => OutputMode::Pfm,
        _ => OutputMode::Png,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let command = match parse_cli(&argv) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(1);
        }
    };

    let result = match command {
        CliCommand::Render { scene_name, target, threads, force } => run_render(&scene_name, target, threads, force),
        CliCommand::Snapshot { scene_name, outfile } => run_snapshot(&scene_name, outfile),
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(CliFailure::Load(err)) => {
            eprintln!("load error: {err:#}");
            ExitCode::from(1)
        }
        Err(CliFailure::Internal(err)) => {
            eprintln!("internal error: {err:#}");
            ExitCode::from(2)
        }
    }
}
