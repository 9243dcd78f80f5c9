//! wzkit CLI - Command-line tool for inspecting and extracting WZ archives.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use wzkit::prelude::*;

/// wzkit - WZ archive inspection and extraction tool
#[derive(Parser)]
#[command(name = "wzkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug diagnostics (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that opens an archive.
#[derive(Args)]
struct ArchiveArgs {
    /// Path to the WZ file
    #[arg(short, long, env = "WZ_FILE")]
    file: PathBuf,

    /// Archive variant: kms, gms or classic (regional aliases accepted)
    #[arg(long, env = "WZ_VARIANT", default_value = "gms")]
    variant: Variant,

    /// Expand the key stream with plain ECB instead of block chaining
    #[arg(long)]
    ecb: bool,

    /// Directory entry names are stored without encryption
    #[arg(long)]
    plain_names: bool,

    /// Parse every image and decode every value while opening
    #[arg(long)]
    eager: bool,
}

impl ArchiveArgs {
    fn open(&self) -> Result<Archive> {
        let mut options = OpenOptions::new(self.variant).encrypted_names(!self.plain_names);
        if self.ecb {
            options = options.key_mode(KeyStreamMode::Ecb);
        }
        if self.eager {
            options = options.selection(ReadSelection::EAGER);
        }

        let start = Instant::now();
        let archive = Archive::open(&self.file, options)
            .with_context(|| format!("Failed to open WZ archive {}", self.file.display()))?;
        debug!(elapsed = ?start.elapsed(), "archive opened");
        Ok(archive)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, version and tree statistics
    Info {
        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// List the tree below a path
    Ls {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Path to list
        #[arg(default_value = "/")]
        path: String,

        /// Maximum depth below the path
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
    },

    /// Print the value of a node
    Get {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Path of the node
        path: String,

        /// Follow UOL links to their final target
        #[arg(long)]
        follow: bool,
    },

    /// Dump the tree below a path as JSON
    Dump {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Path to dump
        #[arg(default_value = "/")]
        path: String,

        /// Output JSON file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export every canvas below a path as PNG
    ExtractCanvas {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Path to export from
        #[arg(default_value = "/")]
        path: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Export every audio payload below a path
    ExtractAudio {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Path to export from
        #[arg(default_value = "/")]
        path: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Info { archive } => cmd_info(&archive)?,
        Commands::Ls {
            archive,
            path,
            depth,
        } => cmd_ls(&archive, &path, depth)?,
        Commands::Get {
            archive,
            path,
            follow,
        } => cmd_get(&archive, &path, follow)?,
        Commands::Dump {
            archive,
            path,
            output,
        } => cmd_dump(&archive, &path, output.as_deref())?,
        Commands::ExtractCanvas {
            archive,
            path,
            output,
        } => cmd_extract_canvas(&archive, &path, &output)?,
        Commands::ExtractAudio {
            archive,
            path,
            output,
        } => cmd_extract_audio(&archive, &path, &output)?,
    }

    Ok(())
}

fn cmd_info(args: &ArchiveArgs) -> Result<()> {
    let start = Instant::now();
    let archive = args.open()?;
    let header = archive.header();

    println!("File:        {}", args.file.display());
    println!("Description: {}", header.description);
    println!("Size:        {} bytes (header says {})", archive.len(), header.file_size);
    println!("Data start:  {:#x}", header.fstart);
    println!("Variant:     {}", archive.variant());
    println!(
        "Version:     {} (hash {:#010x})",
        archive.version(),
        archive.version_hash()
    );
    println!("Directories: {}", archive.directory_count());
    println!("Images:      {}", archive.image_count());
    println!("Opened in {:?}", start.elapsed());

    Ok(())
}

fn cmd_ls(args: &ArchiveArgs, path: &str, max_depth: usize) -> Result<()> {
    let archive = args.open()?;
    let node = archive
        .resolve_path(path)
        .with_context(|| format!("Failed to resolve {path}"))?;

    let mut count = 0;
    node.walk(|child, depth| {
        if depth > 0 {
            println!(
                "{}{}  [{}]{}",
                "  ".repeat(depth - 1),
                child.name(),
                child.kind().as_str(),
                summary(&child)
            );
            count += 1;
        }
        depth < max_depth
    })
    .with_context(|| format!("Failed to list {path}"))?;

    println!("\nTotal: {} nodes", count);

    Ok(())
}

fn cmd_get(args: &ArchiveArgs, path: &str, follow: bool) -> Result<()> {
    let archive = args.open()?;
    let mut node = archive
        .resolve_path(path)
        .with_context(|| format!("Failed to resolve {path}"))?;

    if follow {
        node = node
            .resolve_uol_fully()
            .with_context(|| format!("Failed to follow links from {path}"))?;
    }

    if node.kind().is_property() {
        let value = node
            .value()
            .with_context(|| format!("Failed to read {}", node.path()))?;
        println!("{} [{}] = {}", node.path(), node.kind().as_str(), value);
    } else {
        let children = node.child_count().context("Failed to read children")?;
        println!("{} [{}] {} children", node.path(), node.kind().as_str(), children);
    }

    Ok(())
}

#[derive(Serialize)]
struct DumpNode {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<DumpNode>,
}

fn cmd_dump(args: &ArchiveArgs, path: &str, output: Option<&Path>) -> Result<()> {
    let archive = args.open()?;
    let node = archive
        .resolve_path(path)
        .with_context(|| format!("Failed to resolve {path}"))?;

    let dump = dump_node(node)?;
    let text = serde_json::to_string_pretty(&dump).context("Failed to serialize JSON")?;

    match output {
        Some(output) => {
            fs::write(output, text)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
        None => println!("{text}"),
    }

    Ok(())
}

fn dump_node(node: Node<'_>) -> Result<DumpNode> {
    let value = match node.kind() {
        NodeKind::Directory | NodeKind::Image | NodeKind::SubProperty | NodeKind::Convex => None,
        // Pixels and payloads are left encoded; only their metadata is dumped.
        NodeKind::Canvas => node.canvas_info().map(|info| {
            json!({
                "width": info.width,
                "height": info.height,
                "format": info.format.to_string(),
            })
        }),
        NodeKind::Audio => node.audio_info().map(|info| {
            json!({
                "duration": info.duration,
                "bytes": info.payload_len,
            })
        }),
        _ => {
            let value = node
                .value()
                .with_context(|| format!("Failed to read {}", node.path()))?;
            Some(value_json(&value))
        }
    };

    let children = node
        .children()
        .with_context(|| format!("Failed to read children of {}", node.path()))?
        .map(dump_node)
        .collect::<Result<Vec<_>>>()?;

    Ok(DumpNode {
        name: node.name().to_string(),
        kind: node.kind().as_str(),
        value,
        children,
    })
}

fn value_json(value: &Value<'_>) -> serde_json::Value {
    match value {
        Value::Null | Value::SubProperty | Value::Convex => serde_json::Value::Null,
        Value::UInt16(v) => json!(v),
        Value::Int32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::Single(v) => json!(v),
        Value::Double(v) => json!(v),
        Value::String(s) => json!(s),
        Value::Point(p) => json!({ "x": p.x, "y": p.y }),
        Value::Uol(link) => json!({ "uol": link }),
        Value::Canvas(Some(image)) => json!({ "width": image.width(), "height": image.height() }),
        Value::Canvas(None) => json!({ "unsupported": true }),
        Value::Audio(audio) => json!({ "duration": audio.duration, "bytes": audio.payload.len() }),
    }
}

/// One-line value preview for listings.
fn summary(node: &Node<'_>) -> String {
    match node.kind() {
        NodeKind::Canvas => node
            .canvas_info()
            .map(|info| format!(" {}x{} {}", info.width, info.height, info.format))
            .unwrap_or_default(),
        NodeKind::Audio => node
            .audio_info()
            .map(|info| format!(" {} ms", info.duration))
            .unwrap_or_default(),
        kind if kind.is_property() => match node.value() {
            Ok(Value::SubProperty | Value::Convex) => String::new(),
            Ok(value) => format!(" = {value}"),
            Err(e) => format!(" <error: {e}>"),
        },
        _ => String::new(),
    }
}

/// Collect every node of `kind` below `root`.
fn collect<'a>(root: Node<'a>, kind: NodeKind) -> Result<Vec<Node<'a>>> {
    let mut found = Vec::new();
    root.walk(|node, _| {
        if node.kind() == kind {
            found.push(node);
        }
        true
    })?;
    Ok(found)
}

fn progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Map a node to a file below `output`, one directory per ancestor.
fn output_path(output: &Path, node: &Node<'_>, extension: &str) -> Result<PathBuf> {
    let mut names = Vec::new();
    let mut current = *node;
    while let Some(parent) = current.parent() {
        names.push(current.name());
        current = parent;
    }
    names.reverse();
    join_names(output, &names, extension)
}

/// Join archive names below `output`, refusing names that would leave it.
fn join_names(output: &Path, names: &[&str], extension: &str) -> Result<PathBuf> {
    let Some((last, parents)) = names.split_last() else {
        anyhow::bail!("cannot export the root node");
    };

    let mut path = output.to_path_buf();
    for name in names {
        if name.is_empty() || *name == "." || *name == ".." || name.contains(['/', '\\']) {
            anyhow::bail!("refusing unsafe node name {name:?}");
        }
    }
    for name in parents {
        path.push(name);
    }
    path.push(format!("{last}.{extension}"));
    Ok(path)
}

fn cmd_extract_canvas(args: &ArchiveArgs, path: &str, output: &Path) -> Result<()> {
    let archive = args.open()?;
    let root = archive
        .resolve_path(path)
        .with_context(|| format!("Failed to resolve {path}"))?;

    let canvases = collect(root, NodeKind::Canvas).context("Failed to walk tree")?;
    println!("Extracting {} canvases...", canvases.len());

    fs::create_dir_all(output)?;
    let pb = progress_bar(canvases.len())?;

    let start = Instant::now();
    let mut exported = 0;
    let mut skipped = 0;

    for node in &canvases {
        match node.canvas() {
            Ok(Some(image)) => {
                let target = match output_path(output, node, "png") {
                    Ok(target) => target,
                    Err(e) => {
                        eprintln!("Skipping {}: {}", node.path(), e);
                        skipped += 1;
                        pb.inc(1);
                        continue;
                    }
                };
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                image
                    .to_rgba()
                    .save(&target)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                exported += 1;
            }
            Ok(None) => {
                warn!(path = %node.path(), "skipping canvas with unsupported pixel format");
                skipped += 1;
            }
            Err(e) => {
                eprintln!("Error decoding {}: {}", node.path(), e);
                skipped += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!(
        "Exported {} canvases in {:?} ({} skipped)",
        exported,
        start.elapsed(),
        skipped
    );

    Ok(())
}

fn cmd_extract_audio(args: &ArchiveArgs, path: &str, output: &Path) -> Result<()> {
    let archive = args.open()?;
    let root = archive
        .resolve_path(path)
        .with_context(|| format!("Failed to resolve {path}"))?;

    let sounds = collect(root, NodeKind::Audio).context("Failed to walk tree")?;
    println!("Extracting {} sounds...", sounds.len());

    fs::create_dir_all(output)?;
    let pb = progress_bar(sounds.len())?;

    let start = Instant::now();
    let mut exported = 0;
    let mut errors = 0;

    for node in &sounds {
        match node.audio() {
            Ok(Some(audio)) => {
                let extension = if audio.payload.starts_with(b"RIFF") {
                    "wav"
                } else {
                    "mp3"
                };
                let target = match output_path(output, node, extension) {
                    Ok(target) => target,
                    Err(e) => {
                        eprintln!("Skipping {}: {}", node.path(), e);
                        errors += 1;
                        pb.inc(1);
                        continue;
                    }
                };
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, &audio.payload)
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                exported += 1;
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("Error decoding {}: {}", node.path(), e);
                errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    println!(
        "Exported {} sounds in {:?} ({} errors)",
        exported,
        start.elapsed(),
        errors
    );

    Ok(())
}
