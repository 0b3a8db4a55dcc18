#![warn(unused_extern_crates)]
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use facecensor::config::{PipelineConfig, DEFAULT_QUEUE_DEPTH};
use facecensor::export::{censored_file_name, save};
use facecensor::overlay::draw_faces;
use facecensor::redaction::{encode_jpeg, Redactor};
use facecensor::session::Selection;
use facecensor::worker::Worker;
use tracing::{debug, error, info, span, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Blur faces classified as children
    Children,
    /// Blur every detected face
    All,
    /// Only report detections
    Report,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Photos to process, in order
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Face detection model
    #[arg(long, value_name = "FILE")]
    detector_model: Option<PathBuf>,

    /// Age classification model
    #[arg(long, value_name = "FILE")]
    age_model: Option<PathBuf>,

    /// Cap on inference threads
    #[arg(short, long)]
    max_threads: Option<usize>,

    /// Jobs allowed to wait behind the running one
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Give up on a job after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Which faces to blur
    #[arg(short, long, value_enum, default_value_t = Policy::Children)]
    redact: Policy,

    /// Base directory for censored copies
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Also write an annotated preview next to each censored copy
    #[arg(long)]
    trace: bool,

    /// Print the censored file name instead of saving
    #[arg(long)]
    share: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();

    let mut config = PipelineConfig::default();
    let total_threads = config.threads;
    config.threads = args.max_threads.unwrap_or(total_threads).min(total_threads);
    config.queue_depth = args.queue_depth;
    config.job_timeout = args.timeout_ms.map(Duration::from_millis);
    if let Some(p) = args.detector_model.clone() {
        config.detector_model = p;
    }
    if let Some(p) = args.age_model.clone() {
        config.age_model = p;
    }

    let start = Instant::now();
    let worker = Worker::start(&config).context("failed to start inference worker")?;
    debug!("Worker ready after {:?}", start.elapsed());

    let redactor = Redactor {
        detector_width: config.detector_width,
        ..Default::default()
    };
    let mut selection = Selection::default();

    for path in &args.images {
        let span = span!(Level::INFO, "image", path = %path.display());
        let _guard = span.enter();

        if let Err(e) = process_image(path, &args, &worker, &redactor, &mut selection) {
            error!("Failed to process {}: {e:?}", path.display());
        }
    }

    worker.shutdown();
    Ok(())
}

fn process_image(
    path: &Path,
    args: &CmdArgs,
    worker: &Worker,
    redactor: &Redactor,
    selection: &mut Selection,
) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let ticket = worker.submit(bytes.clone())?;
    let job = ticket.id();
    selection.begin(job);

    let outcome = worker.wait(ticket);
    if !selection.apply(job, outcome)? {
        warn!("Result of job {job} arrived after a newer image was picked");
        return Ok(());
    }

    match args.redact {
        Policy::Children => selection.select_children(),
        Policy::All => selection.select_all(),
        Policy::Report => {}
    }

    let Some(result) = selection.result() else {
        return Ok(());
    };

    for (idx, face) in result.faces.iter().enumerate() {
        let b = face.original_bounds(result.image.width(), result.detector_width);
        println!(
            "{}\t{idx}\t({:.0}, {:.0}, {:.0}, {:.0})\t{:?}\t{:.3}{}",
            path.display(),
            b.x1,
            b.y1,
            b.x2,
            b.y2,
            face.age.label(),
            face.age.confidence(),
            if selection.selected().contains(&idx) { "\tblurred" } else { "" },
        );
    }
    if result.faces.is_empty() {
        info!("No faces found");
    }

    if args.redact == Policy::Report {
        return Ok(());
    }

    let censored = redactor
        .spawn(bytes, result.faces.clone(), selection.selected().clone())?
        .wait()?;
    let name = censored_file_name(Some(path));

    if args.share {
        println!("{name}\t{} bytes", censored.len());
        return Ok(());
    }

    save(&args.output_dir, &name, &censored)?;

    if args.trace {
        let mut preview = result.image.clone();
        draw_faces(&mut preview, &result.faces, result.detector_width, selection.selected());
        let preview_name = name.replacen("censored_", "preview_", 1);
        save(&args.output_dir, &preview_name, &encode_jpeg(&preview, 80)?)?;
    }

    Ok(())
}
