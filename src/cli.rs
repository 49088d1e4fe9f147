//! Command-line front end.
//!
//! Each subcommand wires the same pieces a UI would: a coordinator task on
//! the inbox, a page host for the selector, and a surface over the handoff
//! store at `Config::store_path`.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureCoordinator, XcapViewport};
use crate::config::Config;
use crate::editor::raster::Point;
use crate::editor::session::{parse_hex_color, EditorSession, ToolKind};
use crate::editor::AnnotationEngine;
use crate::error::ErrorKind;
use crate::export::{ArboardClipboard, ExportSink, FsDownloader, ImageFormat};
use crate::handoff::store::FileStore;
use crate::handoff::{Channel, Delivery, HandoffEntry, HandoffStore};
use crate::messaging::{CoordinatorHandle, Message, UiBus};
use crate::selector::{PageEvent, PageHost, SelectorOutcome};
use crate::surface::{EditorSurface, Notice, SurfaceKind};

const INBOX_CAPACITY: usize = 32;
/// Upper bound on waiting for the coordinator to publish an area capture.
const AREA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "shotmark",
    version,
    about = "Capture the screen or a region of it, annotate, and export"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture the whole viewport and save it
    Capture(CaptureArgs),
    /// Capture a region and leave it in the handoff store for the editor
    Area(AreaArgs),
    /// Pick up whatever capture is waiting in the handoff store
    Pending(PendingArgs),
    /// Replay a JSON list of editor operations against an image
    Annotate(AnnotateArgs),
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Output path (default: screenshot.png in the download directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AreaArgs {
    #[arg(long)]
    pub x: f64,
    #[arg(long)]
    pub y: f64,
    #[arg(long)]
    pub width: f64,
    #[arg(long)]
    pub height: f64,
    /// Device pixel ratio of the page
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,
    /// Address of the page being captured
    #[arg(long, default_value = "https://localhost/")]
    pub url: String,
}

#[derive(Args, Debug)]
pub struct PendingArgs {
    /// Output path (default: edited-screenshot.png in the download directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Image to edit
    #[arg(long)]
    pub input: PathBuf,
    /// JSON array of operations
    #[arg(long)]
    pub script: PathBuf,
    /// Output path (default: edited-screenshot.png in the download directory)
    #[arg(long)]
    pub out: Option<PathBuf>,
    /// Output format (default: from the output extension)
    #[arg(long, value_enum)]
    pub format: Option<ImageFormat>,
}

/// One editor operation in an `annotate` script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ScriptOp {
    Tool {
        tool: ToolKind,
    },
    #[serde(rename_all = "camelCase")]
    Style {
        color: Option<String>,
        line_width: Option<f32>,
        font_size: Option<f32>,
        fill: Option<bool>,
        text: Option<String>,
    },
    Down {
        x: f32,
        y: f32,
    },
    Move {
        x: f32,
        y: f32,
    },
    Up {
        x: f32,
        y: f32,
    },
    Leave,
    ApplyCrop,
}

pub fn parse_script(json: &str) -> Result<Vec<ScriptOp>, CliError> {
    serde_json::from_str(json).map_err(|e| CliError::Script(e.to_string()))
}

/// Applies `ops` in order, stopping at the first rejected one.
pub fn replay(engine: &mut AnnotationEngine, ops: &[ScriptOp]) -> Result<(), CliError> {
    for (index, op) in ops.iter().enumerate() {
        let step = |e: crate::editor::EditorError| CliError::Step {
            index,
            kind: e.kind(),
            message: e.to_string(),
        };
        match op {
            ScriptOp::Tool { tool } => engine.set_tool(*tool),
            ScriptOp::Style {
                color,
                line_width,
                font_size,
                fill,
                text,
            } => {
                let style = &mut engine.session_mut().style;
                if let Some(color) = color {
                    style.color = parse_hex_color(color)
                        .ok_or_else(|| CliError::Script(format!("step {}: bad color {:?}", index, color)))?;
                }
                if let Some(width) = line_width {
                    style.line_width = *width;
                }
                if let Some(size) = font_size {
                    style.font_size = *size;
                }
                if let Some(fill) = fill {
                    style.fill = *fill;
                }
                if let Some(text) = text {
                    style.text = text.clone();
                }
            }
            ScriptOp::Down { x, y } => engine.pointer_down(Point::new(*x, *y)).map_err(step)?,
            ScriptOp::Move { x, y } => engine.pointer_move(Point::new(*x, *y)).map_err(step)?,
            ScriptOp::Up { x, y } => engine.pointer_up(Point::new(*x, *y)).map_err(step)?,
            ScriptOp::Leave => engine.pointer_leave(),
            ScriptOp::ApplyCrop => engine.apply_crop().map_err(step)?,
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{message}")]
    Failed { kind: ErrorKind, message: String },

    #[error("Invalid script: {0}")]
    Script(String),

    #[error("Script step {index} failed: {message}")]
    Step {
        index: usize,
        kind: ErrorKind,
        message: String,
    },

    #[error("Timed out waiting for the area capture")]
    Timeout,
}

fn open_delivery(config: &Config) -> Delivery {
    let kv = Arc::new(FileStore::new(&config.store_path));
    Delivery::new(Arc::new(HandoffStore::new(kv)), UiBus::default())
}

fn export_sink(config: &Config) -> ExportSink {
    ExportSink::new(
        Arc::new(FsDownloader::new(&config.download_dir)),
        Arc::new(ArboardClipboard),
    )
}

fn new_engine(config: &Config) -> AnnotationEngine {
    let mut engine = AnnotationEngine::new(EditorSession::new(config.style.clone()));
    engine.set_font(config.load_font());
    engine
}

fn new_surface(kind: SurfaceKind, config: &Config, delivery: &Delivery) -> EditorSurface {
    EditorSurface::new(kind, new_engine(config), delivery.clone(), export_sink(config))
}

/// Spawns a coordinator on the real screen and returns its inbox handle.
fn spawn_coordinator(delivery: &Delivery, url: &str, scale: f64) -> (CoordinatorHandle, Arc<PageHost>, u64) {
    let (handle, inbox) = CoordinatorHandle::channel(INBOX_CAPACITY);
    let host = Arc::new(PageHost::new(handle.clone()));
    let page = host.open_page(url, scale);
    let coordinator = Arc::new(CaptureCoordinator::new(
        Arc::new(XcapViewport),
        host.clone(),
        host.clone(),
        delivery.clone(),
    ));
    tokio::spawn(coordinator.serve(inbox));
    (handle, host, page.id)
}

fn into_result(notice: Notice) -> Result<Notice, CliError> {
    match notice {
        Notice::Failed { kind, message } => Err(CliError::Failed { kind, message }),
        other => Ok(other),
    }
}

/// Writes the committed image to `out`, or saves it the surface's way.
async fn write_output(
    surface: &mut EditorSurface,
    out: Option<&Path>,
    format: Option<ImageFormat>,
) -> Result<PathBuf, Box<dyn Error>> {
    match out {
        Some(path) => {
            let format = format.unwrap_or_else(|| ImageFormat::from_filename(&path.to_string_lossy()));
            let bytes = surface.export_as(format)?;
            let target = path.to_path_buf();
            tokio::task::spawn_blocking(move || std::fs::write(&target, bytes)).await??;
            log::info!("[EXPORT] Wrote {}", path.display());
            Ok(path.to_path_buf())
        }
        None => match into_result(surface.save().await)? {
            Notice::Saved(path) => Ok(path),
            other => Err(format!("unexpected save result: {:?}", other).into()),
        },
    }
}

pub async fn execute(cli: Cli, config: Config) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Capture(args) => command_capture(args, &config).await,
        Command::Area(args) => command_area(args, &config).await,
        Command::Pending(args) => command_pending(args, &config).await,
        Command::Annotate(args) => command_annotate(args, &config).await,
    }
}

async fn command_capture(args: CaptureArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    let delivery = open_delivery(config);
    let (handle, _host, _) = spawn_coordinator(&delivery, "https://localhost/", 1.0);
    let mut popup = new_surface(SurfaceKind::Popup, config, &delivery);

    into_result(popup.request_full_capture(&handle).await)?;
    let path = write_output(&mut popup, args.out.as_deref(), None).await?;
    println!("{}", path.display());
    Ok(())
}

async fn command_area(args: AreaArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    let delivery = open_delivery(config);
    let mut hints = delivery.bus().subscribe();
    let (handle, host, page_id) = spawn_coordinator(&delivery, &args.url, args.scale);

    // Ask for the selector, then drive it the way a drag would.
    handle.initiate_area_capture().await?;
    let (x2, y2) = (args.x + args.width, args.y + args.height);
    let mut outcome = None;
    for event in [
        PageEvent::PointerDown { x: args.x, y: args.y },
        PageEvent::PointerMove { x: x2, y: y2 },
        PageEvent::PointerUp { x: x2, y: y2 },
    ] {
        outcome = host.dispatch(page_id, &event);
    }
    if !matches!(outcome, Some(SelectorOutcome::Selected(_))) {
        return Err(Box::new(CliError::Failed {
            kind: ErrorKind::EmptyInput,
            message: "Selection is smaller than the minimum area".to_string(),
        }));
    }

    if !wait_for_outcome(&mut hints).await? {
        return Err("coordinator stopped before publishing".into());
    }
    match delivery.store().peek(Channel::CaptureError)? {
        Some(HandoffEntry { error: Some(error), .. }) => Err(Box::new(CliError::Failed {
            kind: error.kind,
            message: error.message,
        })),
        _ => {
            println!("stored in {}", config.store_path.display());
            Ok(())
        }
    }
}

/// Waits for the coordinator's hint. `false` when no outcome will come.
async fn wait_for_outcome(hints: &mut tokio::sync::broadcast::Receiver<Message>) -> Result<bool, CliError> {
    let wait = async {
        loop {
            match hints.recv().await {
                Ok(Message::AreaCaptured { .. }) | Ok(Message::AreaCaptureFailed { .. }) => return true,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(AREA_TIMEOUT, wait)
        .await
        .map_err(|_| CliError::Timeout)
}

async fn command_pending(args: PendingArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    let delivery = open_delivery(config);
    let mut editor = new_surface(SurfaceKind::Tab, config, &delivery);
    match into_result(editor.start())? {
        Notice::NoImage => {
            println!("no image");
            Ok(())
        }
        _ => {
            let path = write_output(&mut editor, args.out.as_deref(), None).await?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn command_annotate(args: AnnotateArgs, config: &Config) -> Result<(), Box<dyn Error>> {
    let input = args.input.clone();
    let image = tokio::task::spawn_blocking(move || image::open(&input)).await??;
    let script = tokio::fs::read_to_string(&args.script).await?;
    let ops = parse_script(&script)?;

    let delivery = open_delivery(config);
    let mut editor = new_surface(SurfaceKind::Tab, config, &delivery);
    editor.load_image(image.to_rgba8());
    replay(editor.engine_mut(), &ops)?;

    let path = write_output(&mut editor, args.out.as_deref(), args.format).await?;
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn parses_script_ops() {
        let ops = parse_script(
            r##"[
                {"op": "tool", "tool": "circle"},
                {"op": "style", "color": "#00ff00", "lineWidth": 2, "fill": true},
                {"op": "down", "x": 1, "y": 2},
                {"op": "move", "x": 3.5, "y": 4},
                {"op": "up", "x": 5, "y": 6},
                {"op": "leave"},
                {"op": "applyCrop"}
            ]"##,
        )
        .unwrap();
        assert_eq!(ops.len(), 7);
        assert_eq!(ops[0], ScriptOp::Tool { tool: ToolKind::Ellipse });
        assert!(matches!(ops[1], ScriptOp::Style { line_width: Some(w), fill: Some(true), .. } if w == 2.0));
        assert_eq!(ops[6], ScriptOp::ApplyCrop);
        assert!(parse_script(r#"[{"op": "explode"}]"#).is_err());
    }

    #[test]
    fn replay_draws_and_crops() {
        let mut engine = AnnotationEngine::new(EditorSession::default());
        engine.load_image(RgbaImage::from_pixel(100, 80, Rgba([255, 255, 255, 255])));
        let ops = parse_script(
            r#"[
                {"op": "down", "x": 10, "y": 10},
                {"op": "move", "x": 60, "y": 10},
                {"op": "up", "x": 60, "y": 10},
                {"op": "tool", "tool": "crop"},
                {"op": "down", "x": 0, "y": 0},
                {"op": "up", "x": 70, "y": 40},
                {"op": "applyCrop"}
            ]"#,
        )
        .unwrap();
        replay(&mut engine, &ops).unwrap();
        assert_eq!(engine.dimensions(), (70, 40));
        assert_ne!(*engine.baseline().get_pixel(30, 10), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn replay_reports_failing_step() {
        let mut engine = AnnotationEngine::new(EditorSession::default());
        engine.load_image(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])));
        let ops = parse_script(r#"[{"op": "tool", "tool": "text"}, {"op": "down", "x": 1, "y": 1}]"#).unwrap();
        match replay(&mut engine, &ops) {
            Err(CliError::Step { index, kind, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(kind, ErrorKind::EmptyInput);
            }
            other => panic!("expected step failure, got {:?}", other),
        }
    }

    #[test]
    fn cli_parses_area_arguments() {
        let cli = Cli::try_parse_from([
            "shotmark", "area", "--x", "100", "--y", "50", "--width", "200", "--height", "150", "--scale", "2",
        ])
        .unwrap();
        match cli.command {
            Command::Area(args) => {
                assert_eq!((args.x, args.y, args.width, args.height, args.scale), (100.0, 50.0, 200.0, 150.0, 2.0));
                assert_eq!(args.url, "https://localhost/");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
