//! jobpipe - run job trees through a configured pipeline
//!
//! Reads one or more job tree XML files, pushes them through the stages
//! described by the pipeline config and writes every finished tree to the
//! output directory as `{source id}.xml`.

use anyhow::{Context, Result};
use clap::Parser;
use jobpipe::config::{default_config_path, PipelineConfig};
use jobpipe::tree::attrs;
use jobpipe::{JobPipeError, JobTree, Pipeline, PipelineError, PipelineEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Run job trees through a level-routed processing pipeline.
#[derive(Parser, Debug)]
#[command(name = "jobpipe", version, about, long_about = None)]
struct Cli {
    /// Pipeline config (TOML or JSON). Defaults to the user config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory finished trees are written to.
    #[arg(short, long, default_value = "out")]
    output: PathBuf,

    /// Give up waiting for the next finished tree after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Also log to a daily rolling file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Job tree XML files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,jobpipe=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "jobpipe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading pipeline config {:?}", path)),
        None => Ok(default_config_path()
            .map(PipelineConfig::load_or_default)
            .unwrap_or_default()),
    }
}

/// Parse a job file and stamp a `created` time on it if it has none.
fn read_job(path: &Path) -> Result<JobTree> {
    let xml = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let mut tree = JobTree::from_xml(&xml)
        .map_err(JobPipeError::from)
        .with_context(|| format!("parsing {:?}", path))?;
    if tree.root().get(attrs::CREATED).is_none() {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        tree.root_mut().set(attrs::CREATED, stamp);
    }
    Ok(tree)
}

fn output_name(tree: &JobTree, index: usize) -> String {
    match tree.source_id().or_else(|| tree.id()) {
        Some(id) => format!("{id}.xml"),
        None => format!("job-{index}.xml"),
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::StageStarted { .. } => tracing::trace!("{:?}", event),
        PipelineEvent::Pending { .. } => tracing::debug!("{:?}", event),
        PipelineEvent::Dropped { .. } | PipelineEvent::Undeliverable { .. } => {
            tracing::warn!("{:?}", event)
        }
        PipelineEvent::StageFailed { .. } => tracing::error!("{:?}", event),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    let config = load_config(cli.config.as_deref())?;
    tracing::info!("Starting jobpipe: {}", config);

    let jobs = cli
        .inputs
        .iter()
        .map(|path| read_job(path))
        .collect::<Result<Vec<_>>>()?;
    let expected = jobs.len();

    let mut pipeline = Pipeline::from_config(&config).context("building pipeline")?;
    let handle = pipeline.handle();

    let producer = std::thread::spawn(move || -> std::result::Result<(), PipelineError> {
        for tree in jobs {
            handle.submit(tree)?;
        }
        Ok(())
    });

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating output directory {:?}", cli.output))?;

    let timeout = Duration::from_secs(cli.timeout_secs);
    let consumer = pipeline.handle();
    let mut written = 0;
    for index in 0..expected {
        match consumer.retrieve(Some(timeout)) {
            Ok(tree) => {
                let path = cli.output.join(output_name(&tree, index));
                std::fs::write(&path, tree.to_xml()?)
                    .with_context(|| format!("writing {:?}", path))?;
                tracing::info!("Wrote {:?}", path);
                written += 1;
            }
            Err(PipelineError::Timeout(waited)) => {
                tracing::warn!(
                    "No output within {:?}, {} of {} trees finished",
                    waited,
                    written,
                    expected
                );
                break;
            }
            Err(e) => return Err(e.into()),
        }
        for event in consumer.drain_events() {
            log_event(&event);
        }
    }

    for event in consumer.drain_events() {
        log_event(&event);
    }

    // Closing first releases a producer still blocked on a full entry queue.
    pipeline.close();
    match producer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Submission stopped early: {}", e),
        Err(_) => tracing::error!("Producer thread panicked"),
    }

    tracing::info!("Finished: {} of {} trees written", written, expected);
    Ok(())
}
