//! spatial - ask a multimodal model to find objects in an image and overlay
//! their bounding boxes
//!
//! This tool:
//! 1. Decodes the selected image
//! 2. Sends it with the prompt to the model (or replays a saved reply)
//! 3. Parses the returned detections
//! 4. Maps them onto the display surface and optionally writes an annotated PNG

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use spatial_overlay::ui::Ui;
use spatial_overlay::{
    map_overlay, render_overlay, AnalysisResult, Analyzer, BoxPolicy, ModelClient, OverlayConfig,
    OverlayItem, OverlayStyle, Size, SourceImage, StubClient,
};

const DEFAULT_PROMPT: &str = "Find the cars";

#[derive(Clone, Copy, Debug)]
struct SurfaceArg {
    width: u32,
    height: u32,
}

fn parse_surface(value: &str) -> Result<SurfaceArg, String> {
    let (w, h) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width: u32 = w.trim().parse().map_err(|_| format!("invalid width '{}'", w))?;
    let height: u32 = h.trim().parse().map_err(|_| format!("invalid height '{}'", h))?;
    if width == 0 || height == 0 {
        return Err("surface dimensions must be > 0".to_string());
    }
    Ok(SurfaceArg { width, height })
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyze (JPEG, PNG, WebP, GIF or BMP).
    #[arg(long)]
    image: PathBuf,
    /// Objects to look for.
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,
    /// Display surface size as WIDTHxHEIGHT (defaults to the image size).
    #[arg(long, value_parser = parse_surface)]
    surface: Option<SurfaceArg>,
    /// Write the annotated surface as an image (format from extension).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Use a saved model reply instead of calling the model.
    #[arg(long)]
    reply_file: Option<PathBuf>,
    /// Print overlay items as JSON.
    #[arg(long)]
    json: bool,
    /// Clamp boxes to the image and fix inverted edges.
    #[arg(long)]
    clamp: bool,
    /// TOML configuration file.
    #[arg(long, env = "SPATIAL_CONFIG")]
    config: Option<PathBuf>,
    /// Progress output: auto, plain or pretty.
    #[arg(long, value_parser = ["auto", "plain", "pretty"])]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = OverlayConfig::load_from(args.config.as_deref())?;
    if args.clamp {
        cfg.overlay.policy = BoxPolicy::Clamp;
    }
    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());

    let image = {
        let _stage = ui.stage("decode image");
        SourceImage::open(&args.image)?
    };
    log::info!(
        "{}: {}x{} {}",
        args.image.display(),
        image.width(),
        image.height(),
        image.mime_type()
    );

    let client = build_client(&args, &cfg)?;
    let analyzer = Analyzer::with_shared_client(client);

    let stage = ui.stage("analyze image");
    let handle = analyzer.analyze(&args.prompt, &image)?;
    let detections = match handle.wait()? {
        AnalysisResult::Ready(detections) => {
            drop(stage);
            detections
        }
        AnalysisResult::Failed(reason) => {
            stage.fail(&reason);
            return Err(anyhow!("analysis failed: {}", reason));
        }
        other => return Err(anyhow!("analysis ended in unexpected state {:?}", other)),
    };

    let surface = args.surface.unwrap_or(SurfaceArg {
        width: image.width(),
        height: image.height(),
    });
    let items = map_overlay(
        image.size(),
        Size::from_pixels(surface.width, surface.height),
        &detections,
        cfg.overlay.policy,
    )?;
    print_items(&items, args.json)?;

    if let Some(out) = &args.out {
        let _stage = ui.stage("render overlay");
        let style = OverlayStyle::from_config(&cfg);
        let canvas = render_overlay(image.decoded(), surface.width, surface.height, &items, &style)?;
        canvas
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        log::info!("annotated image written to {}", out.display());
    }

    Ok(())
}

fn build_client(args: &Args, cfg: &OverlayConfig) -> Result<Arc<Mutex<dyn ModelClient>>> {
    if let Some(path) = &args.reply_file {
        let reply = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read reply file {}", path.display()))?;
        log::info!("replaying model reply from {}", path.display());
        return Ok(Arc::new(Mutex::new(StubClient::with_replies([reply]))));
    }
    remote_client(cfg)
}

#[cfg(feature = "gemini")]
fn remote_client(cfg: &OverlayConfig) -> Result<Arc<Mutex<dyn ModelClient>>> {
    use spatial_overlay::{GeminiClient, GeminiConfig};

    let gemini = GeminiConfig::from_settings(&cfg.model)?;
    log::info!("using model {} at {}", gemini.model, gemini.endpoint);
    Ok(Arc::new(Mutex::new(GeminiClient::new(gemini)?)))
}

#[cfg(not(feature = "gemini"))]
fn remote_client(_cfg: &OverlayConfig) -> Result<Arc<Mutex<dyn ModelClient>>> {
    Err(anyhow!(
        "built without the `gemini` feature; pass --reply-file to replay a saved reply"
    ))
}

fn print_items(items: &[OverlayItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("no objects found");
    }
    for item in items {
        let r = item.rect;
        println!(
            "{}\tx={:.1} y={:.1} w={:.1} h={:.1}",
            item.label, r.x, r.y, r.width, r.height
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_parses_width_and_height() {
        let s = parse_surface("800x600").unwrap();
        assert_eq!((s.width, s.height), (800, 600));
        let s = parse_surface("1080X1920").unwrap();
        assert_eq!((s.width, s.height), (1080, 1920));
    }

    #[test]
    fn surface_rejects_bad_input() {
        assert!(parse_surface("800").is_err());
        assert!(parse_surface("0x600").is_err());
        assert!(parse_surface("wide x tall").is_err());
    }
}
