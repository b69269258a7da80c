// ============================================================================
// Colorbook CLI: headless coloring via command-line arguments
// ============================================================================
//
// Usage examples:
//   colorbook paint -i pages/*.png --story story.txt --theme forest --tap 120,80 --color #e63c3c
//   colorbook paint -i p1.png p2.png --story story.txt --theme forest --page 2 \
//                   --display 0,0,512,384 --tap 200,150 --output page2.png
//   colorbook hash --story story.txt --theme forest
//   colorbook status --story story.txt --theme forest
//   colorbook export --story story.txt --theme forest --page 1 -o page1.png --thumbnail
//
// Everything runs synchronously on the current thread. Saved progress lives
// in the file store (settings `store_dir`, or `--store`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use image::Rgb;

use crate::canvas::{DisplayRect, PointerEvent};
use crate::components::page_canvas::{LoadStatus, PageCanvas};
use crate::io::{ColoringStore, FileStore};
use crate::ops::flood_fill::FillOutcome;
use crate::project::{Page, PageId, StorySession};
use crate::settings::AppSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Colorbook headless coloring tool.
#[derive(Parser, Debug)]
#[command(
    name = "colorbook",
    about = "Flood-fill coloring for storybook line art",
    long_about = "Color storybook line-art pages from the command line. Progress is\n\
                  saved per story and theme, so a later run continues where the\n\
                  previous one stopped.\n\n\
                  Example:\n  \
                  colorbook paint -i pages/*.png --story story.txt --theme forest --tap 120,80"
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Echo warnings and errors to stderr and print per-tap results.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a page, apply taps as flood fills, and save the result.
    Paint(PaintArgs),
    /// Print the persistence hash of a story and theme.
    Hash(StoryArgs),
    /// List the saved pages of a story.
    Status(StatusArgs),
    /// Write a saved page snapshot to a PNG file.
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StoryArgs {
    /// Text file holding the full story.
    #[arg(long, value_name = "FILE")]
    pub story: PathBuf,

    /// Theme key the pages were generated with.
    #[arg(long, value_name = "KEY")]
    pub theme: String,
}

#[derive(Args, Debug)]
pub struct PaintArgs {
    /// Line-art image(s), one page each in order. Glob patterns accepted.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    #[command(flatten)]
    pub story: StoryArgs,

    /// Page to color (1-based).
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub page: PageId,

    /// Tap position in display coordinates. Repeat for several fills.
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    pub tap: Vec<(f64, f64)>,

    /// Rectangle the canvas is displayed in. Defaults to the canvas itself.
    #[arg(long, value_name = "L,T,W,H", value_parser = parse_rect)]
    pub display: Option<DisplayRect>,

    /// Fill color as #rrggbb or r,g,b.
    #[arg(short, long, default_value = "#e63c3c", value_parser = parse_color)]
    pub color: Rgb<u8>,

    /// Per-channel tolerance (0-255). Defaults to the configured value.
    #[arg(short, long, value_name = "0-255")]
    pub tolerance: Option<u8>,

    /// Write the colored page here as PNG.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Do not persist the coloring.
    #[arg(long)]
    pub no_save: bool,

    /// Store directory (overrides the configured one).
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub story: StoryArgs,

    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub story: StoryArgs,

    #[arg(long, value_name = "N")]
    pub page: PageId,

    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Write a thumbnail (longest edge = configured `thumbnail_edge`).
    #[arg(long)]
    pub thumbnail: bool,

    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one subcommand and return an OS exit code.
pub fn run(args: CliArgs, settings: &AppSettings) -> ExitCode {
    let verbose = args.verbose;
    let result = match &args.command {
        Command::Paint(paint) => run_paint(paint, settings, verbose),
        Command::Hash(story) => run_hash(story),
        Command::Status(status) => run_status(status, settings),
        Command::Export(export) => run_export(export, settings),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("CLI: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_paint(args: &PaintArgs, settings: &AppSettings, verbose: bool) -> Result<(), String> {
    let start = Instant::now();

    // -- Step 1: Session -------------------------------------------------
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        return Err("no input files matched the given pattern(s)".to_string());
    }
    let mut session = build_session(&args.story, &inputs)?;
    let hash = session.story_hash();

    let mut store = open_store(args.store.as_deref(), settings);
    let restored = store.restore_session(&mut session);
    if verbose {
        println!(
            "{}: restored {} saved page(s) for story {}",
            session.log_tag(),
            restored,
            hash
        );
    }

    if !session.select_page(args.page) {
        return Err(format!(
            "page {} does not exist (story has {} page(s))",
            args.page,
            session.pages().len()
        ));
    }
    let page = session
        .selected_page()
        .cloned()
        .ok_or_else(|| "no page selected".to_string())?;

    // -- Step 2: Load ----------------------------------------------------
    let mut tuned = settings.clone();
    if let Some(t) = args.tolerance {
        tuned.tolerance = t;
    }
    let mut canvas = PageCanvas::new(&tuned);
    canvas.attach(page.id);

    let (snap_tx, snap_rx) = mpsc::channel();
    canvas.on_snapshot_ready(move |id, snapshot| {
        let _ = snap_tx.send((id, snapshot.clone()));
    });

    match canvas.load_page(&page) {
        LoadStatus::Applied { .. } => {}
        LoadStatus::Failed { error, .. } => {
            return Err(format!("page {} could not be loaded: {}", page.id, error));
        }
        LoadStatus::Stale { .. } => {
            return Err(format!("page {} load was superseded", page.id));
        }
    }

    // -- Step 3: Taps ----------------------------------------------------
    let rect = match (args.display, canvas.buffer()) {
        (Some(rect), _) => rect,
        (None, Some(buffer)) => DisplayRect::identity(buffer),
        (None, None) => return Err("canvas has no buffer".to_string()),
    };

    for (idx, &(client_x, client_y)) in args.tap.iter().enumerate() {
        let event = PointerEvent::Mouse { client_x, client_y };
        let outcome = canvas.paint_at(&event, &rect, args.color);
        if verbose {
            println!(
                "[{}/{}] tap {},{}: {}",
                idx + 1,
                args.tap.len(),
                client_x,
                client_y,
                describe(outcome)
            );
        }
    }

    // Observer snapshots → session. The last one per page wins.
    for (id, snapshot) in snap_rx.try_iter() {
        session.apply_snapshot(id, snapshot);
    }

    // -- Step 4: Output --------------------------------------------------
    if let Some(out) = &args.output {
        let snapshot = canvas
            .export()
            .map_err(|e| format!("export failed: {}", e))?;
        std::fs::write(out, snapshot.as_bytes())
            .map_err(|e| format!("could not write '{}': {}", out.display(), e))?;
        if verbose {
            println!("  → {}", out.display());
        }
    }

    if !args.no_save && !store.save_session(&session) {
        eprintln!("warning: coloring could not be saved; see the session log.");
    }

    if verbose {
        println!("Done in {:.0}ms", start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(())
}

fn run_hash(args: &StoryArgs) -> Result<(), String> {
    let story = read_story(&args.story)?;
    println!("{}", crate::io::story_hash(&story, &args.theme));
    Ok(())
}

fn run_status(args: &StatusArgs, settings: &AppSettings) -> Result<(), String> {
    let story = read_story(&args.story.story)?;
    let hash = crate::io::story_hash(&story, &args.story.theme);
    let store = open_store(args.store.as_deref(), settings);

    let Some(saved) = store.load(&hash) else {
        println!("No saved coloring for story {}", hash);
        return Ok(());
    };

    println!(
        "Story {}: {} colored page(s), updated at {} ms",
        hash,
        saved.images.len(),
        saved.updated_at
    );
    for (id, snapshot) in &saved.images {
        println!("  page {:>3}  {:>8} bytes", id, snapshot.len());
    }
    Ok(())
}

fn run_export(args: &ExportArgs, settings: &AppSettings) -> Result<(), String> {
    let story = read_story(&args.story.story)?;
    let hash = crate::io::story_hash(&story, &args.story.theme);
    let store = open_store(args.store.as_deref(), settings);

    let saved = store
        .load(&hash)
        .ok_or_else(|| format!("no saved coloring for story {}", hash))?;
    let snapshot = saved
        .images
        .get(&args.page)
        .ok_or_else(|| format!("page {} has no saved coloring", args.page))?;

    if args.thumbnail {
        let thumb = snapshot
            .thumbnail(settings.thumbnail_edge)
            .map_err(|e| format!("thumbnail failed: {}", e))?;
        thumb
            .save_with_format(&args.output, image::ImageFormat::Png)
            .map_err(|e| format!("could not write '{}': {}", args.output.display(), e))?;
    } else {
        std::fs::write(&args.output, snapshot.as_bytes())
            .map_err(|e| format!("could not write '{}': {}", args.output.display(), e))?;
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn describe(outcome: FillOutcome) -> String {
    match outcome {
        FillOutcome::Filled { pixels } => format!("filled {} px", pixels),
        FillOutcome::HitLine => "on a line, nothing filled".to_string(),
        FillOutcome::OutOfBounds => "outside the page".to_string(),
    }
}

fn read_story(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("could not read story '{}': {}", path.display(), e))
}

fn open_store(dir: Option<&Path>, settings: &AppSettings) -> ColoringStore<FileStore> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| settings.store_path());
    ColoringStore::new(FileStore::new(dir))
}

/// One page per input file; ids start at 1, titles are the file stems.
fn build_session(story: &StoryArgs, inputs: &[PathBuf]) -> Result<StorySession, String> {
    let text = read_story(&story.story)?;
    let pages = inputs
        .iter()
        .zip(1..)
        .map(|(path, id)| {
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("Page {}", id));
            Page::new(id, title).with_line_art(path.to_string_lossy().into_owned())
        })
        .collect();
    Ok(StorySession::new(text, story.theme.clone(), pages))
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn parse_f64_list(s: &str, n: usize, what: &str) -> Result<Vec<f64>, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != n {
        return Err(format!("expected {} as {} comma-separated numbers", what, n));
    }
    parts
        .iter()
        .map(|p| p.parse::<f64>().map_err(|_| format!("'{}' is not a number", p)))
        .collect()
}

fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let v = parse_f64_list(s, 2, "X,Y")?;
    Ok((v[0], v[1]))
}

fn parse_rect(s: &str) -> Result<DisplayRect, String> {
    let v = parse_f64_list(s, 4, "L,T,W,H")?;
    if v[2] <= 0.0 || v[3] <= 0.0 {
        return Err("display width and height must be positive".to_string());
    }
    Ok(DisplayRect::new(v[0], v[1], v[2], v[3]))
}

/// `#rrggbb`, `rrggbb` or `r,g,b`.
fn parse_color(s: &str) -> Result<Rgb<u8>, String> {
    let s = s.trim();
    if s.contains(',') {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err("expected r,g,b".to_string());
        }
        let mut rgb = [0u8; 3];
        for (slot, part) in rgb.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| format!("'{}' is not a channel value (0-255)", part))?;
        }
        return Ok(Rgb(rgb));
    }

    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(format!("'{}' is not a #rrggbb color", s));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| format!("'{}' is not a #rrggbb color", s))
    };
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}
