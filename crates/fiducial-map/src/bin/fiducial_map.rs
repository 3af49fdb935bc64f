//! fiducial-map CLI: cursor transfer and board pose over replayed detections.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use fiducial_map::core::{CursorSlot, DuplicatePolicy};
use fiducial_map::io::{load_board_spec, load_calibration, load_reference, BoardLayoutReport};
use fiducial_map::pipeline::{
    parse_cursor, run_cursor_loop, run_pose_loop, spawn_cursor_reader, BoardPoseEstimator,
    CursorMapper, JsonLinesSink, JsonLinesSource, LoopOptions,
};
use fiducial_map::Board;
use log::LevelFilter;
use nalgebra::Point2;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "fiducial-map")]
#[command(about = "Map a reference cursor and board pose into live fiducial marker detections")]
#[command(version)]
struct Cli {
    /// Log verbosity (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transfer a reference-view cursor into every frame.
    Cursor(CursorArgs),

    /// Estimate the board pose in every frame.
    Pose(PoseArgs),

    /// Print the object points of a board as JSON.
    Board {
        /// Board spec (JSON). Defaults to the 3x2 reference board.
        #[arg(long)]
        board: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DuplicatesArg {
    /// Skip frames that contain the same id twice.
    Reject,
    /// Keep the last detection of a repeated id.
    LastWins,
}

impl From<DuplicatesArg> for DuplicatePolicy {
    fn from(arg: DuplicatesArg) -> Self {
        match arg {
            DuplicatesArg::Reject => DuplicatePolicy::Reject,
            DuplicatesArg::LastWins => DuplicatePolicy::LastWins,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct StreamArgs {
    /// Detection stream: one JSON frame per line.
    #[arg(long)]
    frames: PathBuf,

    /// Write reports here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// How to treat repeated marker ids within one frame.
    #[arg(long, value_enum, default_value_t = DuplicatesArg::Reject)]
    duplicates: DuplicatesArg,
}

impl StreamArgs {
    fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            max_frames: self.max_frames,
            duplicate_policy: self.duplicates.into(),
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CursorArgs {
    /// Reference layout (JSON).
    #[arg(long)]
    reference: PathBuf,

    /// Initial cursor position in the reference view, "X,Y".
    #[arg(long, value_parser = cursor_arg, allow_hyphen_values = true)]
    cursor: Option<Point2<f64>>,

    /// Read further cursor positions ("X Y" or "X,Y" per line) from stdin.
    #[arg(long)]
    cursor_stdin: bool,

    /// Side of the box drawn at the mapped cursor, in pixels.
    #[arg(long, default_value = "10.0")]
    box_size: f64,

    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Debug, Clone, Args)]
struct PoseArgs {
    /// Camera calibration (JSON with camera_matrix and distortion_coefficients).
    #[arg(long)]
    calibration: PathBuf,

    /// Board spec (JSON). Defaults to the 3x2 reference board.
    #[arg(long)]
    board: Option<PathBuf>,

    /// Length of the projected board axes, in board units.
    #[arg(long, default_value = "0.1")]
    axis_length: f64,

    #[command(flatten)]
    stream: StreamArgs,
}

fn cursor_arg(s: &str) -> Result<Point2<f64>, String> {
    parse_cursor(s).ok_or_else(|| format!("expected \"X,Y\", got {s:?}"))
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.command {
        Commands::Cursor(args) => run_cursor(&args),
        Commands::Pose(args) => run_pose(&args),
        Commands::Board { board } => run_board(board.as_deref()),
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(level: LevelFilter) -> CliResult<()> {
    fiducial_map::core::init_with_level(level)?;
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(level: LevelFilter) -> CliResult<()> {
    let directive = level.to_string().to_lowercase();
    fiducial_map::init_tracing(false, &directive);
    Ok(())
}

fn open_output(path: Option<&Path>) -> CliResult<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
        None => Box::new(io::stdout().lock()),
    })
}

// ── cursor ────────────────────────────────────────────────────────────

fn run_cursor(args: &CursorArgs) -> CliResult<()> {
    let layout = load_reference(&args.reference)?;
    log::info!(
        "reference layout: {} markers, {} required corners",
        layout.markers.len(),
        layout.required.len()
    );
    let mapper = CursorMapper::from_layout(layout)?.with_box_size(args.box_size);

    let slot = match args.cursor {
        Some(p) => CursorSlot::with_position(p),
        None => CursorSlot::new(),
    };
    if args.cursor_stdin {
        // Detached: the reader ends with stdin, the loop with the stream.
        let _reader = spawn_cursor_reader(BufReader::new(io::stdin()), slot.clone());
    }

    let mut source = JsonLinesSource::open(&args.stream.frames)?;
    let mut sink = JsonLinesSink::new(open_output(args.stream.out.as_deref())?);
    run_cursor_loop(
        &mut source,
        &mapper,
        &slot,
        &mut sink,
        &args.stream.loop_options(),
    )?;
    Ok(())
}

// ── pose ──────────────────────────────────────────────────────────────

fn run_pose(args: &PoseArgs) -> CliResult<()> {
    let camera = load_calibration(&args.calibration)?;
    let board = Board::from_grid(&load_board_spec(args.board.as_deref())?)?;
    log::info!("board: {} markers", board.marker_count());
    let estimator = BoardPoseEstimator::new(board, camera).with_axis_length(args.axis_length);

    let mut source = JsonLinesSource::open(&args.stream.frames)?;
    let mut sink = JsonLinesSink::new(open_output(args.stream.out.as_deref())?);
    run_pose_loop(&mut source, &estimator, &mut sink, &args.stream.loop_options())?;
    Ok(())
}

// ── board ─────────────────────────────────────────────────────────────

fn run_board(path: Option<&Path>) -> CliResult<()> {
    let spec = load_board_spec(path)?;
    let board = Board::from_grid(&spec)?;
    let report = BoardLayoutReport::new(spec, &board);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
