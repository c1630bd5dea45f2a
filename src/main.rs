//! Work-queue runner - Main Entry Point
//!
//! `--queue`, `--process` and `--finalize` are independent; when several are
//! given they run in that order and the first failure stops the run. A failed
//! run escalates its fault to the operator and exits non-zero.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;
use workqueue_runner::config::RunnerConfig;
use workqueue_runner::error::{RunnerError, RunnerResult};
use workqueue_runner::finalize::{finalize, Finalizer, HttpFinalizer, NoopFinalizer};
use workqueue_runner::lifecycle_span;
use workqueue_runner::notify::{
    CommandScreenCapture, EmailNotifier, EmailSettings, FaultAlerts, LogNotifier, Notifier,
};
use workqueue_runner::observability::init_default_logging;
use workqueue_runner::population::{
    populate_queue, CandidateSource, EmptySource, HttpCandidateSource,
};
use workqueue_runner::processing::{
    AcceptAllProcessor, CommandEnvironment, HttpItemProcessor, ItemProcessor, ProcessingConfig,
    ProcessingLoop,
};
use workqueue_runner::queue::{AtsWorkQueue, WorkQueue};
use workqueue_runner::run::{finish, EXIT_FAILED, EXIT_OK};

/// Populate, process and finalize an Automation Server work queue
#[derive(Parser)]
#[command(name = "workqueue-runner")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Populate the work queue from the candidate source
    #[arg(long)]
    queue: bool,

    /// Process the work queue
    #[arg(long)]
    process: bool,

    /// Run the finalize step
    #[arg(long)]
    finalize: bool,

    /// Print the effective configuration
    #[arg(long)]
    show_config: bool,
}

impl Cli {
    fn any_phase(&self) -> bool {
        self.queue || self.process || self.finalize
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_default_logging();

    let run_id = Uuid::new_v4();
    let code = run(cli)
        .instrument(lifecycle_span!(run_id = %run_id))
        .await;
    process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    info!("Starting workqueue-runner v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return EXIT_FAILED;
        }
    };

    if cli.show_config {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!("Failed to render configuration: {}", e),
        }
    }

    if !cli.any_phase() {
        if !cli.show_config {
            warn!("No phase selected, pass --queue, --process and/or --finalize");
        }
        return EXIT_OK;
    }

    let alerts = match build_alerts(&config) {
        Ok(alerts) => alerts,
        Err(e) => {
            error!("Failed to set up notifications: {}", e);
            return EXIT_FAILED;
        }
    };

    let result = run_phases(&cli, &config, &alerts).await;
    finish(result, &alerts).await
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<RunnerConfig, RunnerError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RunnerConfig::load_from_file(path)?);
    }

    for path_str in ["workqueue.toml", "config/workqueue.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RunnerConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(RunnerConfig::from_env()?)
}

fn build_alerts(config: &RunnerConfig) -> RunnerResult<FaultAlerts> {
    let section = &config.notification;
    let notifier: Arc<dyn Notifier> = match &section.smtp_host {
        Some(host) => Arc::new(EmailNotifier::new(EmailSettings {
            smtp_host: host.clone(),
            smtp_port: section.smtp_port,
            starttls: section.starttls,
            username: config.get_smtp_username(),
            password: config.get_smtp_password(),
            sender: section.sender.clone(),
            recipients: section.recipients.clone(),
        })?),
        None => {
            warn!("No SMTP host configured, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let alerts = FaultAlerts::new(notifier, section.process_name.clone());
    Ok(match &section.screenshot_command {
        Some(command) => alerts.with_screen_capture(Arc::new(CommandScreenCapture::new(command))),
        None => alerts,
    })
}

async fn run_phases(cli: &Cli, config: &RunnerConfig, alerts: &FaultAlerts) -> RunnerResult<()> {
    if cli.queue || cli.process {
        let queue: Arc<dyn WorkQueue> = Arc::new(AtsWorkQueue::new(config.ats_client()?)?);

        if cli.queue {
            let source = build_source(config)?;
            populate_queue(
                queue.as_ref(),
                source.as_ref(),
                &config.submitter()?,
                config.population.page_size,
            )
            .await?;
        }

        if cli.process {
            let environment = CommandEnvironment::new(
                config.environment.startup_command.clone(),
                config.environment.soft_shutdown_command.clone(),
                config.environment.hard_shutdown_command.clone(),
            );
            ProcessingLoop::new(
                queue,
                build_processor(config)?,
                environment,
                alerts.clone(),
                ProcessingConfig {
                    max_retry: config.processing.max_retry,
                    item_timeout: config.item_timeout(),
                    notify_on_process_fault: config.processing.notify_on_process_fault,
                },
            )
            .run()
            .await?;
        }
    }

    if cli.finalize {
        let finalizer: Box<dyn Finalizer> = match &config.finalize.url {
            Some(url) => Box::new(HttpFinalizer::new(url, config.finalize.timeout())?),
            None => Box::new(NoopFinalizer),
        };
        finalize(finalizer.as_ref(), alerts).await?;
    }

    Ok(())
}

fn build_source(config: &RunnerConfig) -> RunnerResult<Box<dyn CandidateSource>> {
    Ok(match &config.source.url {
        Some(url) => Box::new(HttpCandidateSource::new(url, config.source.timeout())?),
        None => {
            warn!("No candidate source configured, nothing will be queued");
            Box::new(EmptySource)
        }
    })
}

fn build_processor(config: &RunnerConfig) -> RunnerResult<Arc<dyn ItemProcessor>> {
    Ok(match &config.processor.url {
        Some(url) => Arc::new(HttpItemProcessor::new(url, config.processor.timeout())?),
        None => {
            warn!("No item processor configured, items are accepted as-is");
            Arc::new(AcceptAllProcessor)
        }
    })
}
