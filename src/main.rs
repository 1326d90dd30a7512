use std::env;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::Sender;
use facecam::annotate::{AnnotationLoop, Command};
use facecam::snapshot::{self, SnapshotExporter};
use facecam::{config, FrameSource, OnnxAnalyzer};
use facecam_vision::video::{Camera, StillImage};
use facecam_vision::ModelStore;
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facecam")]
#[command(
    version,
    about = "Webcam face annotation - boxes, age, gender and mood, with face snapshots"
)]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the camera and annotate faces. Type `s` to save the first face, `q` to quit.
    Run {
        /// Camera device (defaults to the configured one)
        #[arg(short, long)]
        camera: Option<String>,
        /// Milliseconds between tick starts
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
        /// Write the annotated display to this PNG after every tick
        #[arg(long)]
        preview: Option<PathBuf>,
        /// Directory for saved faces
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    /// Annotate a single image. Labels are printed to the log; the image only marks where they go.
    Analyze {
        image: PathBuf,
        /// Write the image with face boxes and label markers here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also save the first face
        #[arg(long)]
        save_face: bool,
        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download any missing model files
    FetchModels,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let mut cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Run {
            camera,
            interval_ms,
            ticks,
            preview,
            snapshot_dir,
        } => {
            if let Some(camera) = camera {
                cfg.camera = camera;
            }
            if let Some(ms) = interval_ms {
                cfg.interval_ms = ms;
            }
            if preview.is_some() {
                cfg.preview_path = preview;
            }
            if let Some(dir) = snapshot_dir {
                cfg.snapshot_dir = dir;
            }
            run(&cfg, ticks)
        }
        Commands::Analyze {
            image,
            output,
            save_face,
            json,
        } => analyze(&cfg, &image, output.as_deref(), save_face, json),
        Commands::FetchModels => fetch_models(&cfg),
        Commands::Config => open_config(&cfg, config_path),
    }
}

fn load_analyzer(cfg: &config::Config) -> Result<OnnxAnalyzer> {
    let store = ModelStore::user(cfg.model_dir.clone())?;
    OnnxAnalyzer::load(&store, &cfg.models, cfg.score_threshold, cfg.nms_threshold)
        .context("Failed to load face models")
}

fn run(cfg: &config::Config, ticks: Option<u64>) -> Result<()> {
    info!("Opening camera: {}", cfg.camera);
    let camera = Camera::open(&cfg.camera).context("Failed to open camera")?;
    let analyzer = load_analyzer(cfg)?;

    let display = cfg.display_size(camera.dimensions());
    info!("Display surface: {}x{}", display.0, display.1);

    let mut annotator = AnnotationLoop::new(camera, analyzer, display, cfg.interval());
    if let Some(path) = &cfg.preview_path {
        annotator = annotator.with_preview(path.clone());
    }
    let exporter = SnapshotExporter::new(&cfg.snapshot_dir);

    let (tx, rx) = crossbeam_channel::bounded(8);
    std::thread::spawn(move || read_commands(tx));

    info!("Type `s` + Enter to save the first face, `q` + Enter to quit.");
    annotator.run(&rx, &exporter, ticks)
}

fn read_commands(tx: Sender<Command>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let command = match line.trim() {
            "" | "s" | "save" => Command::Save,
            "q" | "quit" => Command::Quit,
            other => {
                warn!("Unknown command {:?} (use `s` or `q`)", other);
                continue;
            }
        };
        if tx.send(command).is_err() || command == Command::Quit {
            break;
        }
    }
}

fn analyze(
    cfg: &config::Config,
    image: &Path,
    output: Option<&Path>,
    save_face: bool,
    json: bool,
) -> Result<()> {
    let source = StillImage::open(image)?;
    let analyzer = load_analyzer(cfg)?;
    let display = cfg.display_size(source.dimensions());

    let mut annotator = AnnotationLoop::new(source, analyzer, display, cfg.interval());
    annotator.tick()?;
    info!("{}", annotator.status());
    for label in annotator.overlay().labels() {
        info!("{}", label);
    }

    let reader = annotator.reader();
    if json {
        println!("{}", serde_json::to_string_pretty(&*reader.detections())?);
    }

    if let Some(output) = output {
        let (frame, _) = reader
            .current()
            .ok_or_else(|| anyhow::anyhow!("image was not analyzed"))?;
        snapshot::write_png_atomic(&annotator.render(&frame), output)
            .with_context(|| format!("writing {}", output.display()))?;
        info!("Annotated image written to {}", output.display());
    }

    if save_face {
        match SnapshotExporter::new(&cfg.snapshot_dir).save(&reader) {
            Ok(path) => info!("Saved face to {}", path.display()),
            Err(e) => snapshot::alert(&e),
        }
    }
    Ok(())
}

fn fetch_models(cfg: &config::Config) -> Result<()> {
    let store = ModelStore::user(cfg.model_dir.clone())?;
    info!("Model cache: {}", store.cache_dir().display());
    for asset in cfg.models.assets() {
        let path = store
            .resolve(asset)
            .with_context(|| format!("Failed to fetch {}", asset.name))?;
        println!("{}", path.display());
    }
    Ok(())
}

fn open_config(cfg: &config::Config, path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(cfg, Some(config_path))
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
