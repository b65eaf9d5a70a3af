use std::{env, path::PathBuf, process::ExitCode, sync::Arc};

use photon_mapper::{
    GatherStrategy, PhotonMapConfig, Result,
    camera::{Camera, SphericalCamera},
    render_system::{photon_rendering::Renderer, scene::Scene, scene::SceneProvider},
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage: photon-mapper <scene.json> <output.png> [options]

Options:
  --config <file>      photon map configuration (JSON)
  --frames <n>         frames to render, default 1
  --strategy <name>    gather strategy: pixel or photon
  --orbit <degrees>    orbit the camera around its target by this much per frame
  -v, --verbose        debug logging
  -q, --quiet          errors only";

struct Args {
    scene: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    frames: u32,
    strategy: Option<GatherStrategy>,
    orbit: f32,
    log_level: &'static str,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut positional = vec![];
    let mut config = None;
    let mut frames: u32 = 1;
    let mut strategy = None;
    let mut orbit: f32 = 0.0;
    let mut log_level = "info";

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().ok_or(format!("{name} needs a value"));
        match arg.as_str() {
            "-h" | "--help" => return Err(String::new()),
            "-v" | "--verbose" => log_level = "debug",
            "-q" | "--quiet" => log_level = "error",
            "--config" => config = Some(PathBuf::from(value("--config")?)),
            "--frames" => {
                frames = value("--frames")?
                    .parse()
                    .map_err(|e| format!("bad --frames: {e}"))?;
            }
            "--strategy" => {
                let name = value("--strategy")?;
                strategy = Some(
                    name.parse::<GatherStrategy>()
                        .map_err(|e| e.to_string())?,
                );
            }
            "--orbit" => {
                orbit = value("--orbit")?
                    .parse()
                    .map_err(|e| format!("bad --orbit: {e}"))?;
            }
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [scene, output] = <[PathBuf; 2]>::try_from(positional)
        .map_err(|_| "expected a scene file and an output file".to_string())?;
    Ok(Args {
        scene,
        output,
        config,
        frames: frames.max(1),
        strategy,
        orbit,
        log_level,
    })
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PhotonMapConfig::load(path)?,
        None => PhotonMapConfig::default(),
    };
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }

    let scene = Arc::new(Scene::load(&args.scene)?);
    let start = scene.camera();
    let mut camera = SphericalCamera::looking_at(
        start.eye,
        start.eye + start.front,
        start.fov.to_degrees(),
    );

    let mut renderer = Renderer::with_thread_pool(config)?;
    renderer.set_scene(scene);

    let mut image = None;
    for frame in 0..args.frames {
        let started = std::time::Instant::now();
        image = Some(renderer.render_with_camera(camera.snapshot())?);
        tracing::info!(
            frame,
            builds = renderer.builds(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "frame done"
        );
        camera.orbit(args.orbit.to_radians(), 0.0);
    }

    if let Some(image) = image {
        image.save(&args.output)?;
        tracing::info!(path = %args.output.display(), "image written");
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
            }
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "render failed");
            ExitCode::FAILURE
        }
    }
}
