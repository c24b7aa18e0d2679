use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use walkdir::WalkDir;

use pixmill_codec::RasterCodec;
use pixmill_core::{
    matte, process_with_telemetry, Codec, OutputFormat, ProcessRequest, Surface, Transform,
};
use pixmill_image::{estimate_rgba_bytes, format_file_size, ResizePreset, SizeSpec};
use pixmill_telemetry::sink_from_env;

#[derive(Parser, Debug)]
#[command(name = "pixmill", version, about = "Local image transform toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drop the background by corner-sampled color distance.
    #[command(name = "remove-bg")]
    RemoveBg(RemoveBgArgs),
    /// Scale to a fixed size, a percentage of the original, or a preset.
    Resize(ResizeArgs),
    /// Re-encode in another format.
    Convert(ConvertArgs),
    /// Find the lossy quality that lands nearest a target byte size.
    Compress(CompressArgs),
    /// Show dimensions and size information.
    Info(InfoArgs),
    /// List the built-in resize presets.
    Presets,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Input file, directory, or regex over file names.
    #[arg(long, short = 'i')]
    input: String,
    /// Root directory for regex input matching (defaults to current directory).
    #[arg(long, short = 'r')]
    input_root: Option<PathBuf>,
    /// Recurse when scanning directories / regex matches.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,
    /// If set, abort the whole run on the first input error.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    strict: bool,
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Output directory used when processing multiple inputs.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Args, Debug)]
struct RemoveBgArgs {
    #[command(flatten)]
    io: InputArgs,
    /// Color-distance threshold; pixels closer than this to the corner
    /// average become fully transparent.
    #[arg(long, default_value_t = matte::DEFAULT_THRESHOLD)]
    threshold: u8,
}

#[derive(Args, Debug)]
struct ResizeArgs {
    #[command(flatten)]
    io: InputArgs,
    #[arg(long, short = 'W', conflicts_with_all = ["percent", "preset"], requires = "height")]
    width: Option<u32>,
    #[arg(long, short = 'H')]
    height: Option<u32>,
    /// Scale both dimensions to this percentage of the original upload.
    #[arg(long, conflicts_with = "preset")]
    percent: Option<f32>,
    /// Named preset, e.g. instagram-square or full-hd.
    #[arg(long)]
    preset: Option<String>,
    #[arg(long, short = 'f', default_value = "png")]
    format: String,
    #[arg(long, short = 'q')]
    quality: Option<u8>,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    #[command(flatten)]
    io: InputArgs,
    #[arg(long, short = 'f')]
    format: String,
    #[arg(long, short = 'q')]
    quality: Option<u8>,
}

#[derive(Args, Debug)]
struct CompressArgs {
    #[command(flatten)]
    io: InputArgs,
    /// Target output size in kilobytes (1 KB = 1024 bytes).
    #[arg(long, short = 't')]
    target_kb: u64,
    /// Lossy output format; size targeting is undefined for png.
    #[arg(long, short = 'f', default_value = "jpeg")]
    format: String,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Input file, directory, or regex over file names.
    #[arg(long, short = 'i')]
    input: String,
    #[arg(long, short = 'r')]
    input_root: Option<PathBuf>,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    recursive: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let codec = RasterCodec;

    match cli.command {
        Command::RemoveBg(args) => {
            if let Some(output) = &args.io.output {
                validate_png_extension(output)?;
            }
            let threshold = args.threshold;
            run_transform(&codec, &args.io, "nobg", move |_| {
                Ok(Transform::RemoveBackground { threshold })
            })
        }
        Command::Resize(args) => {
            let spec = resolve_size_spec(&args)?;
            let format = OutputFormat::parse(&args.format)?;
            let quality = args.quality;
            let codec_for_dims = codec;
            run_transform(&codec, &args.io, "resized", move |source_bytes| {
                let original = codec_for_dims.decode(source_bytes)?;
                let (width, height) = spec.resolve(original.width(), original.height());
                Ok(Transform::Resize {
                    width,
                    height,
                    format,
                    quality,
                })
            })
        }
        Command::Convert(args) => {
            let format = OutputFormat::parse(&args.format)?;
            let quality = args.quality;
            run_transform(&codec, &args.io, "converted", move |_| {
                Ok(Transform::Convert { format, quality })
            })
        }
        Command::Compress(args) => {
            let format = OutputFormat::parse(&args.format)?;
            if !format.is_lossy() {
                return Err(anyhow!(
                    "compress requires a lossy format (jpeg or webp), not {}",
                    format.as_str()
                ));
            }
            let target_bytes = args
                .target_kb
                .checked_mul(1024)
                .ok_or_else(|| anyhow!("target size too large"))?;
            run_transform(&codec, &args.io, "compressed", move |_| {
                Ok(Transform::CompressToSize {
                    target_bytes,
                    format,
                })
            })
        }
        Command::Info(args) => run_info(&codec, &args),
        Command::Presets => {
            let presets: Vec<_> = pixmill_image::RESIZE_PRESETS
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "name": p.name,
                        "width": p.width,
                        "height": p.height,
                        "category": p.category,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&presets)?);
            Ok(())
        }
    }
}

/// Shared driver: resolve inputs, build a transform per file, run the
/// pipeline, write the output, and print a JSON summary. Bulk runs collect
/// per-file errors unless --strict is set.
fn run_transform(
    codec: &dyn Codec,
    io: &InputArgs,
    suffix: &str,
    build: impl Fn(&[u8]) -> Result<Transform, pixmill_core::CoreError>,
) -> Result<()> {
    let inputs = resolve_inputs(&io.input, io.input_root.as_deref(), io.recursive)?;
    if inputs.is_empty() {
        return Err(anyhow!("no input images matched"));
    }
    let bulk_mode = inputs.len() > 1;
    if let (Some(output), true) = (&io.output, !bulk_mode) {
        if output.exists() && output.is_dir() {
            return Err(anyhow!(
                "-o points at a directory; use --output-dir or a file path"
            ));
        }
    }

    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());

    let mut results = Vec::with_capacity(inputs.len());
    for input_path in inputs {
        let read_start = Instant::now();
        let source_bytes = match std::fs::read(&input_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                if bulk_mode && !io.strict {
                    results.push(serde_json::json!({
                        "input": input_path,
                        "error": format!("failed to read input: {}", err),
                    }));
                    continue;
                }
                return Err(anyhow!(
                    "failed to read input {}: {}",
                    input_path.display(),
                    err
                ));
            }
        };
        let read_done = Instant::now();

        let outcome = build(&source_bytes).and_then(|transform| {
            let request = ProcessRequest {
                source_bytes,
                transform,
            };
            process_with_telemetry(codec, &request, Surface::Cli, telemetry_ref)
        });
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                if bulk_mode && !io.strict {
                    results.push(serde_json::json!({
                        "input": input_path,
                        "error": err.as_error_info(),
                    }));
                    continue;
                }
                return Err(anyhow!("{}: {}", input_path.display(), err));
            }
        };
        let transform_done = Instant::now();

        let output_path = resolve_output_path(io, &input_path, bulk_mode, suffix, result.image.format)?;
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&output_path, &result.image.bytes)?;
        let write_done = Instant::now();

        let mut record = serde_json::json!({
            "input": input_path,
            "output": output_path,
            "format": result.image.format.as_str(),
            "width": result.width,
            "height": result.height,
            "size": format_file_size(result.image.len()),
            "sizeBytes": result.image.len(),
        });
        if let Some(found) = result.quality {
            record["quality"] = serde_json::json!(found.quality);
            record["actualSize"] = serde_json::json!(found.actual_size);
            record["isExact"] = serde_json::json!(found.is_exact);
        }
        if io.profile {
            record["timingsMs"] = serde_json::json!({
                "readInput": read_done.duration_since(read_start).as_millis(),
                "transform": transform_done.duration_since(read_done).as_millis(),
                "writeOutput": write_done.duration_since(transform_done).as_millis(),
            });
        }
        results.push(record);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "results": results }))?
    );
    Ok(())
}

fn run_info(codec: &dyn Codec, args: &InfoArgs) -> Result<()> {
    let inputs = resolve_inputs(&args.input, args.input_root.as_deref(), args.recursive)?;
    if inputs.is_empty() {
        return Err(anyhow!("no input images matched"));
    }
    let mut results = Vec::with_capacity(inputs.len());
    for input_path in inputs {
        let bytes = std::fs::read(&input_path)?;
        match codec.decode(&bytes) {
            Ok(buffer) => results.push(serde_json::json!({
                "input": input_path,
                "width": buffer.width(),
                "height": buffer.height(),
                "pixels": buffer.width() as u64 * buffer.height() as u64,
                "fileSize": format_file_size(bytes.len() as u64),
                "fileSizeBytes": bytes.len(),
                "decodedRgba": format_file_size(estimate_rgba_bytes(buffer.width(), buffer.height())),
            })),
            Err(err) => results.push(serde_json::json!({
                "input": input_path,
                "error": err.as_error_info(),
            })),
        }
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn resolve_size_spec(args: &ResizeArgs) -> Result<SizeSpec> {
    if let Some(name) = &args.preset {
        let preset = ResizePreset::get(name).ok_or_else(|| {
            anyhow!(
                "unknown preset '{}'; run `pixmill presets` for the list",
                name
            )
        })?;
        return Ok(preset.size_spec());
    }
    if let Some(percent) = args.percent {
        if percent <= 0.0 {
            return Err(anyhow!("--percent must be positive"));
        }
        return Ok(SizeSpec::Percent {
            width_pct: percent,
            height_pct: percent,
        });
    }
    match (args.width, args.height) {
        (Some(width), Some(height)) => Ok(SizeSpec::Pixels { width, height }),
        _ => Err(anyhow!(
            "resize needs --width and --height, --percent, or --preset"
        )),
    }
}

fn resolve_inputs(input: &str, input_root: Option<&Path>, recursive: bool) -> Result<Vec<PathBuf>> {
    let candidate = PathBuf::from(input);
    if candidate.exists() {
        if candidate.is_dir() {
            return collect_images(&candidate, recursive, None);
        }
        return Ok(vec![candidate]);
    }
    // Treat as regex matching file names under input_root.
    let root = match input_root {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let re = Regex::new(input).map_err(|e| anyhow!("invalid regex: {}", e))?;
    collect_images(&root, recursive, Some(&re))
}

fn collect_images(root: &Path, recursive: bool, filter: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let walker = if recursive {
        WalkDir::new(root)
    } else {
        WalkDir::new(root).max_depth(1)
    };
    let mut out = Vec::new();
    for entry in walker.into_iter().filter_map(std::result::Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        if !is_supported_image(&path) {
            continue;
        }
        if let Some(re) = filter {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !re.is_match(name) {
                continue;
            }
        }
        out.push(path);
    }
    out.sort();
    Ok(out)
}

fn is_supported_image(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp")
}

/// Single input: -o wins, falling back to a suffixed sibling of the input.
/// Bulk input: -o / --output-dir name a directory for suffixed file names.
fn resolve_output_path(
    io: &InputArgs,
    input_path: &Path,
    bulk_mode: bool,
    suffix: &str,
    format: OutputFormat,
) -> Result<PathBuf> {
    let filename = default_output_name(input_path, suffix, format)?;
    if bulk_mode {
        let dir = io
            .output_dir
            .clone()
            .or_else(|| io.output.clone())
            .unwrap_or_else(|| {
                input_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default()
            });
        return Ok(dir.join(filename));
    }
    if let Some(output) = &io.output {
        return Ok(output.clone());
    }
    if let Some(dir) = &io.output_dir {
        return Ok(dir.join(filename));
    }
    let out = match input_path.parent() {
        Some(parent) => parent.join(filename),
        None => PathBuf::from(filename),
    };
    Ok(out)
}

/// Transparent output has to stay PNG; reject explicit file paths that would
/// tag the bytes with another extension. Extensionless paths (directories in
/// bulk mode) pass through.
fn validate_png_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        None => Ok(()),
        Some(ext) if ext.eq_ignore_ascii_case("png") => Ok(()),
        Some(_) => Err(anyhow!(
            "background removal output must be a .png file (received: '{}')",
            path.display()
        )),
    }
}

fn default_output_name(input: &Path, suffix: &str, format: OutputFormat) -> Result<String> {
    let stem = input
        .file_stem()
        .ok_or_else(|| anyhow!("input file must include a valid file name"))?
        .to_string_lossy();
    Ok(format!("{}_{}.{}", stem, suffix, format.extension()))
}
