use ab_glyph::FontArc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facescope_core::consistency::{draw_history_chart, ChartLayout};
use facescope_core::render::{OverlayOptions, Paint, RED, WHITE};
use facescope_core::{ConsistencyHistory, FrameReport, GrayImage};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

mod config;
mod engine;

use config::Config;

#[derive(Parser)]
#[command(name = "facescope", about = "Live face preview with background consistency analysis")]
struct Cli {
    /// TOML config file (defaults to $FACESCOPE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live camera preview until Ctrl-C
    Preview {
        /// Override the camera device
        #[arg(short, long)]
        device: Option<String>,
        /// Write an overlay PNG every N frames
        #[arg(long)]
        snapshot_every: Option<u64>,
        /// Directory for overlay snapshots
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    /// Run the pipeline over still images in order, one JSON line per frame
    Analyze {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Write the final frame's overlay to this PNG
        #[arg(long)]
        overlay: Option<PathBuf>,
        /// Skip face detection
        #[arg(long)]
        no_detector: bool,
        /// Save each recognition-resolution frame as PNG into this directory
        #[arg(long)]
        recognition_dir: Option<PathBuf>,
    },
    /// List video capture devices
    Devices,
    /// Render a consistency chart from a JSON array of values
    Chart {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Preview {
            device,
            snapshot_every,
            snapshot_dir,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(n) = snapshot_every {
                config.snapshot_every = n;
            }
            if let Some(dir) = snapshot_dir {
                config.snapshot_dir = dir;
            }
            run_preview(config).await?;
        }
        Commands::Analyze {
            paths,
            overlay,
            no_detector,
            recognition_dir,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if no_detector {
                config.detector_enabled = false;
            }
            run_analyze(&config, &paths, overlay.as_deref(), recognition_dir.as_deref())?;
        }
        Commands::Devices => {
            let devices = facescope_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Chart {
            input,
            output,
            width,
            height,
        } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let values: Vec<f32> = serde_json::from_str(&raw).context("expected a JSON array of numbers")?;
            let mut history = ConsistencyHistory::new(values.len().max(1));
            for v in values {
                history.push(v);
            }
            let mut canvas = RgbaImage::from_pixel(width, height, WHITE);
            let paint = Paint::default().with_color(RED).with_stroke_width(2);
            draw_history_chart(&mut canvas, &history, &ChartLayout::default(), &paint);
            canvas
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Chart written to {}", output.display());
        }
    }

    Ok(())
}

fn overlay_options(config: &Config) -> Result<OverlayOptions> {
    let font = match &config.font_path {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
            let font = FontArc::try_from_vec(bytes)
                .with_context(|| format!("parsing font {}", path.display()))?;
            Some(font)
        }
        None => None,
    };
    Ok(OverlayOptions {
        mirror: config.mirror,
        font,
        ..OverlayOptions::default()
    })
}

async fn run_preview(config: Config) -> Result<()> {
    let handle = engine::spawn_engine(&config)?;
    let mut reports = handle.subscribe();
    let options = overlay_options(&config)?;
    let surface_dims = (handle.frame_width, handle.frame_height);
    if config.snapshot_every > 0 {
        std::fs::create_dir_all(&config.snapshot_dir)
            .with_context(|| format!("creating {}", config.snapshot_dir.display()))?;
    }

    tracing::info!(device = %config.camera_device, "preview running, Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping preview");
                break;
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    tracing::warn!("engine stopped publishing frames");
                    break;
                }
                let Some(report) = reports.borrow_and_update().clone() else {
                    continue;
                };
                tracing::debug!(tick = report.summary.tick, status = %report.summary.status_text(), "frame");

                let tick = report.summary.tick;
                if config.snapshot_every > 0 && tick % config.snapshot_every == 0 {
                    let path = config.snapshot_dir.join(format!("facescope-{tick:06}.png"));
                    let options = options.clone();
                    tokio::task::spawn_blocking(move || {
                        let mut canvas = RgbaImage::new(surface_dims.0, surface_dims.1);
                        report.render(&mut canvas, &options);
                        match canvas.save(&path) {
                            Ok(()) => tracing::info!(path = %path.display(), status = %report.summary.status_text(), "snapshot written"),
                            Err(e) => tracing::warn!(path = %path.display(), error = %e, "snapshot failed"),
                        }
                    });
                }
            }
        }
    }

    drop(reports);
    let frames = handle.shutdown().await?;
    tracing::info!(frames, "preview stopped");
    Ok(())
}

fn run_analyze(
    config: &Config,
    paths: &[PathBuf],
    overlay: Option<&Path>,
    recognition_dir: Option<&Path>,
) -> Result<()> {
    let mut pipeline = engine::build_pipeline(config)?;
    let options = overlay_options(config)?;

    let recognition_rx = match recognition_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
            let (tx, rx) = mpsc::channel::<GrayImage>();
            pipeline.set_frame_callback(Some(Box::new(move |frame: &GrayImage| {
                let _ = tx.send(frame.clone());
            })));
            Some(rx)
        }
        None => None,
    };

    let mut last: Option<(FrameReport, RgbaImage)> = None;
    for path in paths {
        let decoded = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        let luma = decoded.to_luma8();
        let (width, height) = luma.dimensions();

        let report = match pipeline.process_frame(luma.as_raw(), width, height) {
            Ok(report) => report,
            Err(e) if e.is_transient() => {
                tracing::warn!(path = %path.display(), error = %e, "frame skipped");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("processing {}", path.display())),
        };
        println!("{}", serde_json::to_string(&report.summary)?);

        if let (Some(rx), Some(dir)) = (&recognition_rx, recognition_dir) {
            for frame in rx.try_iter() {
                let out = dir.join(format!("recognition-{:06}.png", report.summary.tick));
                let packed = image::GrayImage::from_raw(frame.width(), frame.height(), frame.to_packed())
                    .context("recognition frame has inconsistent size")?;
                packed.save(&out).with_context(|| format!("writing {}", out.display()))?;
            }
        }

        if overlay.is_some() {
            last = Some((report, decoded.to_rgba8()));
        }
    }

    if let (Some(out), Some((report, mut canvas))) = (overlay, last) {
        report.render(&mut canvas, &options);
        canvas.save(out).with_context(|| format!("writing {}", out.display()))?;
        tracing::info!(path = %out.display(), status = %report.summary.status_text(), "overlay written");
    }

    let stats = pipeline.stats();
    tracing::info!(
        processed = stats.frames_processed,
        skipped = stats.frames_skipped,
        faces = stats.faces_found,
        "analysis complete"
    );
    Ok(())
}
