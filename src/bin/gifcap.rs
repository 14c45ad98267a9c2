use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{Context as _, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gifcap::{
    CanvasSize, CaptureSource, GifEncoder, GifFileSink, GifcapError, GpuContext,
    TestPatternSource,
};

#[derive(Parser, Debug)]
#[command(name = "gifcap", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a capture source into an animated GIF.
    Record(RecordArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Output GIF path.
    #[arg(long)]
    out: PathBuf,

    /// Canvas width in pixels.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Canvas height in pixels.
    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Recording length in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// Capture source to record.
    #[arg(long, value_enum, default_value_t = SourceChoice::TestPattern)]
    source: SourceChoice,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceChoice {
    TestPattern,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Record(args) => cmd_record(args),
    }
}

fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let size = CanvasSize::new(args.width, args.height);
    let context = Arc::new(GpuContext::new()?);

    let sink = GifFileSink::create(&args.out)?;
    let encoder = Arc::new(Mutex::new(GifEncoder::new(
        context.clone(),
        size,
        Box::new(sink),
    )?));

    let mut source = match args.source {
        SourceChoice::TestPattern => TestPatternSource::new(context.clone(), size),
    };

    // The callback runs on the capture thread; the pipeline is synchronous,
    // so the mutex only serializes against the finalize below.
    let failure: Arc<Mutex<Option<GifcapError>>> = Arc::new(Mutex::new(None));
    let cb_encoder = encoder.clone();
    let cb_failure = failure.clone();
    source.start(Box::new(move |frame| {
        let Ok(mut failure) = cb_failure.lock() else {
            return;
        };
        if failure.is_some() {
            return;
        }
        let Ok(mut encoder) = cb_encoder.lock() else {
            return;
        };
        if let Err(e) = encoder.process_frame(&frame) {
            *failure = Some(e);
        }
    }))?;

    info!(seconds = args.seconds, out = %args.out.display(), "recording");
    thread::sleep(Duration::from_secs(args.seconds));

    // Acknowledged stop: no further callback fires after this returns.
    source.stop()?;

    if let Some(e) = failure
        .lock()
        .map_err(|_| anyhow!("capture failure slot poisoned"))?
        .take()
    {
        return Err(e.into());
    }

    encoder
        .lock()
        .map_err(|_| anyhow!("encoder mutex poisoned"))?
        .finalize()
        .with_context(|| format!("failed to finalize '{}'", args.out.display()))?;

    info!(out = %args.out.display(), "done");
    Ok(())
}
