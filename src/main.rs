use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use log::info;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

use rfmap::registry::{self, LogLevel};
use rfmap::{BBox, Color, LayerPolicy, LayerStatus, MapConfig, RenderOpts};

#[derive(Parser)]
#[command(name = "rfmap", version, about = "Render maps from XML stylesheets")]
struct Cli {
    /// none, debug, warn or error (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Register a font file or directory
    #[arg(long = "fonts", global = true)]
    fonts: Vec<PathBuf>,

    /// Register a datasource search directory
    #[arg(long = "datasources", global = true)]
    datasources: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a stylesheet to a file or stdout
    Render(RenderArgs),
    /// List the layers of a stylesheet with their status
    Layers { stylesheet: PathBuf },
    /// Re-encode an image file into another format
    Encode {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "png256")]
        format: String,
    },
}

#[derive(Args)]
struct RenderArgs {
    stylesheet: PathBuf,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with a MapConfig; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    size: Option<(u32, u32)>,

    /// minx,miny,maxx,maxy in map units; zooms to all layers when omitted
    #[arg(long)]
    bbox: Option<BBox>,

    #[arg(long)]
    srs: Option<String>,

    #[arg(short, long, default_value = "")]
    format: String,

    #[arg(long, default_value_t = 0.0)]
    scale: f64,

    #[arg(long, default_value_t = 0.0)]
    scale_factor: f64,

    /// Force a layer on (repeatable)
    #[arg(long)]
    include: Vec<String>,

    /// Force a layer off (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Turn off every layer not passed with --include
    #[arg(long)]
    only: bool,

    #[arg(long)]
    background: Option<Color>,

    /// Buffer around the frame, in pixels
    #[arg(long)]
    buffer: Option<u32>,

    /// Print the SHA-256 of the output instead of the bytes
    #[arg(long, conflicts_with = "base64")]
    digest: bool,

    /// Print the output base64-encoded
    #[arg(long)]
    base64: bool,
}

fn parse_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {}", e))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {}", e))?;
    Ok((w, h))
}

fn load_config(path: Option<&Path>) -> Result<MapConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(MapConfig::default()),
    }
}

fn render(args: RenderArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some((w, h)) = args.size {
        config.width = w;
        config.height = h;
    }
    if args.srs.is_some() {
        config.srs = args.srs.clone();
    }
    if args.background.is_some() {
        config.background = args.background;
    }
    if let Some(buffer) = args.buffer {
        config.buffer_size = buffer;
    }

    let mut map = rfmap::new_map(config)?;
    map.load(&args.stylesheet)?;

    let mut policy = if args.only {
        LayerPolicy::new().otherwise(LayerStatus::Exclude)
    } else {
        LayerPolicy::new()
    };
    for name in &args.include {
        policy = policy.include(name.as_str());
    }
    for name in &args.exclude {
        policy = policy.exclude(name.as_str());
    }
    if !policy.is_empty() {
        map.select_layers(policy)?;
    }

    match args.bbox {
        Some(bbox) => map.zoom_to_box(bbox)?,
        None => map.zoom_all()?,
    }

    let opts = RenderOpts {
        scale: args.scale,
        scale_factor: args.scale_factor,
        format: args.format,
    };

    if let Some(output) = &args.output {
        if !args.digest && !args.base64 {
            map.render_to_file(&opts, output)?;
            return Ok(());
        }
    }

    let bytes = map.render(&opts)?;
    info!("rendered {} bytes", bytes.len());
    let text = if args.digest {
        Some(hex::encode(Sha256::digest(&bytes)))
    } else if args.base64 {
        Some(base64::engine::general_purpose::STANDARD.encode(&bytes))
    } else {
        None
    };

    match (text, &args.output) {
        (Some(text), Some(path)) => std::fs::write(path, text + "\n")
            .with_context(|| format!("writing {}", path.display()))?,
        (Some(text), None) => println!("{}", text),
        (None, _) => std::io::stdout().lock().write_all(&bytes)?,
    }
    Ok(())
}

fn list_layers(stylesheet: &Path) -> Result<()> {
    let mut map = rfmap::new_map(MapConfig::default())?;
    map.load(stylesheet)?;
    for (name, active) in map.layers()? {
        println!("{}\t{}", if active { "on" } else { "off" }, name);
    }
    Ok(())
}

fn encode(input: &Path, output: &Path, format: &str) -> Result<()> {
    if format == "raw" {
        bail!("raw is not a file format");
    }
    let img = image::open(input)
        .with_context(|| format!("decoding {}", input.display()))?
        .to_rgba8();
    let bytes = rfmap::encode(&img, format)?;
    std::fs::write(output, &bytes).with_context(|| format!("writing {}", output.display()))?;
    info!("wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

/// `--log-level` wins over `RUST_LOG`, which wins over "warn"
fn logger(level: Option<LogLevel>) -> env_logger::Builder {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.filter_level(level.level_filter());
    }
    builder
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger(cli.log_level).init();

    for path in &cli.datasources {
        registry::register_datasources(path)?;
    }
    for path in &cli.fonts {
        registry::register_fonts(path)?;
    }

    match cli.command {
        Command::Render(args) => render(args),
        Command::Layers { stylesheet } => list_layers(&stylesheet),
        Command::Encode {
            input,
            output,
            format,
        } => encode(&input, &output, &format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::LevelFilter;

    #[test]
    fn log_level_flag_sets_the_logger_filter() {
        assert_eq!(logger(Some(LogLevel::Debug)).build().filter(), LevelFilter::Debug);
        assert_eq!(logger(Some(LogLevel::None)).build().filter(), LevelFilter::Off);
    }

    #[test]
    fn size_parses_width_by_height() {
        assert_eq!(parse_size("256x128"), Ok((256, 128)));
        assert!(parse_size("256").is_err());
    }
}
