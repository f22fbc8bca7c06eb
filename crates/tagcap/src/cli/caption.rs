//! The `tagcap caption` command: run the refinement engine over images.

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tagcap_core::{
    CancelFlag, CaptionError, Config, CoverageValidator, DispatchOptions, Dispatcher,
    GeminiService, PoolOptions, RefineOptions, RefineOutcome, RefinementController, ResourcePool,
    RunStats, SkipPolicy, TaskDiscovery,
};

/// Arguments for the `caption` command.
#[derive(Args, Debug)]
pub struct CaptionArgs {
    /// Image file, directory, or list file (.txt/.json) of image paths
    #[arg(required = true)]
    pub input: PathBuf,

    /// Config file path (defaults to the platform config location)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Credentials file, one API key per line
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Single API key, used when no credentials file is given
    #[arg(long, env = "TAGCAP_API_KEY")]
    pub api_key: Option<String>,

    /// Candidates generated per attempt
    #[arg(long)]
    pub repeat_count: Option<usize>,

    /// Additional attempts after the first
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Worker pool size
    #[arg(long)]
    pub max_threads: Option<usize>,

    /// Stagger unit between submissions in seconds
    #[arg(long)]
    pub sleep_time: Option<f64>,

    /// Per-credential cooldown in seconds
    #[arg(long)]
    pub cooldown: Option<f64>,

    /// Skip policy for images whose output already exists
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Do not refine existing captions (skip those images instead)
    #[arg(long)]
    pub no_refine: bool,

    /// HTTP proxy URL
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy credentials as user:password
    #[arg(long)]
    pub proxy_auth: Option<String>,

    /// Probe every credential before the run and drop dead ones
    #[arg(long)]
    pub health_check: bool,
}

/// CLI-facing mirror of `SkipPolicy`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyArg {
    Default,
    SkipExisting,
}

impl From<PolicyArg> for SkipPolicy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::Default => SkipPolicy::Default,
            PolicyArg::SkipExisting => SkipPolicy::SkipExisting,
        }
    }
}

/// Fold CLI flags into the loaded config; flags win.
fn apply_overrides(config: &mut Config, args: &CaptionArgs) {
    if let Some(repeat_count) = args.repeat_count {
        config.processing.repeat_count = repeat_count;
    }
    if let Some(max_retries) = args.max_retries {
        config.processing.max_retries = max_retries;
    }
    if let Some(max_threads) = args.max_threads {
        config.processing.max_threads = max_threads;
    }
    if let Some(sleep_time) = args.sleep_time {
        config.processing.sleep_time_secs = sleep_time;
    }
    if let Some(cooldown) = args.cooldown {
        config.pool.cooldown_secs = cooldown;
    }
    if let Some(policy) = args.policy {
        config.processing.policy = policy.into();
    }
    if args.no_refine {
        config.processing.refine = false;
    }
    if args.proxy.is_some() {
        config.service.proxy = args.proxy.clone();
    }
    if args.proxy_auth.is_some() {
        config.service.proxy_auth = args.proxy_auth.clone();
    }
    if args.credentials.is_some() {
        config.pool.credentials_file = args.credentials.clone();
    }
}

fn build_pool(
    config: &Config,
    api_key: Option<&str>,
    options: PoolOptions,
) -> anyhow::Result<ResourcePool> {
    if let Some(path) = config.credentials_file() {
        let pool = ResourcePool::from_file(&path, options)?;
        tracing::info!("Loaded {} credential(s) from {:?}", pool.len(), path);
        return Ok(pool);
    }
    if let Some(key) = api_key {
        return Ok(ResourcePool::new(
            vec![tagcap_core::Credential::new(key)],
            options,
        ));
    }
    anyhow::bail!(
        "No credentials given. Pass --credentials <file>, --api-key <key>, \
         or set TAGCAP_API_KEY."
    )
}

/// Execute the caption command.
pub async fn execute(args: CaptionArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &args);

    let service = Arc::new(GeminiService::new(&config.service)?);
    let pool = Arc::new(build_pool(
        &config,
        args.api_key.as_deref(),
        config.pool.pool_options(),
    )?);

    if args.health_check {
        let survivors = pool.health_check(service.as_ref()).await?;
        tracing::info!("Health check passed for {survivors} credential(s)");
    }

    let controller = Arc::new(RefinementController::new(
        service,
        pool,
        CoverageValidator::new(config.coverage.clone()),
        config.templates.clone(),
        RefineOptions::from_config(&config.processing, &config.service),
    )?);

    let input = expand_path(&args.input);
    let tasks = TaskDiscovery::new(config.processing.extensions.clone()).discover(&input)?;
    if tasks.is_empty() {
        tracing::warn!("No image tasks found at {:?}", input);
        return Ok(());
    }

    // Ctrl-C raises the shared cancellation flag; workers notice it at the
    // next attempt or cooldown boundary.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping new work");
                cancel.cancel();
            }
        });
    }

    if tasks.len() == 1 && is_single_image(&input) {
        return run_single(&controller, &tasks[0], &cancel).await;
    }

    tracing::info!("Found {} image task(s)", tasks.len());
    run_batch(controller, &config, tasks, &cancel).await
}

/// One image, no dispatcher.
async fn run_single(
    controller: &RefinementController,
    image: &std::path::Path,
    cancel: &CancelFlag,
) -> anyhow::Result<()> {
    match controller.refine_image(image, cancel).await {
        Ok(RefineOutcome::Accepted { attempts, .. }) => {
            tracing::info!("Accepted caption for {:?} after {attempts} attempt(s)", image);
            Ok(())
        }
        Ok(RefineOutcome::Exhausted { score, attempts }) => {
            tracing::warn!(
                "Kept best caption for {:?} with {score} missing tag(s) after {attempts} attempt(s)",
                image
            );
            Ok(())
        }
        Err(CaptionError::AlreadySatisfied { .. }) => {
            tracing::info!("Skipping {:?}: caption already exists", image);
            Ok(())
        }
        Err(e) => anyhow::bail!("Failed to caption {:?}: {e}", image),
    }
}

async fn run_batch(
    controller: Arc<RefinementController>,
    config: &Config,
    tasks: Vec<PathBuf>,
    cancel: &CancelFlag,
) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new(
        controller,
        DispatchOptions {
            max_workers: config.processing.max_threads,
            stagger: config.processing.stagger(),
            policy: config.processing.policy,
        },
    );

    let progress = create_progress_bar(tasks.len() as u64);
    let progress_cb = progress.clone();
    let start_time = std::time::Instant::now();

    let result = dispatcher
        .run(tasks, cancel, move |task| {
            match &task.outcome {
                Ok(RefineOutcome::Accepted { attempts, .. }) => {
                    tracing::debug!("Accepted {:?} after {attempts} attempt(s)", task.path);
                }
                Ok(RefineOutcome::Exhausted { score, attempts }) => {
                    tracing::debug!(
                        "Budget spent for {:?}: {score} missing after {attempts} attempt(s)",
                        task.path
                    );
                }
                Err(CaptionError::AlreadySatisfied { .. }) => {
                    tracing::debug!("Skipping {:?}: output exists", task.path);
                }
                Err(CaptionError::MissingTags { .. }) => {
                    tracing::warn!("Skipping {:?}: tag file not found", task.path);
                }
                Err(CaptionError::Cancelled) => {
                    tracing::debug!("Cancelled {:?}", task.path);
                }
                Err(e) => {
                    tracing::error!("Failed {:?}: {e}", task.path);
                }
            }
            progress_cb.inc(1);
        })
        .await;

    progress.finish_and_clear();

    match result {
        Ok(stats) => {
            print_summary(&stats, start_time.elapsed());
            if cancel.is_cancelled() {
                anyhow::bail!("Run interrupted");
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("Run aborted: {e}"),
    }
}

fn is_single_image(input: &std::path::Path) -> bool {
    input.is_file()
        && !matches!(
            input.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("json")
        )
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    let binding = path.to_string_lossy().into_owned();
    let expanded = shellexpand::tilde(&binding);
    PathBuf::from(expanded.into_owned())
}

/// Create a progress bar for batch processing.
fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap()
            .progress_chars("##-"),
    );
    pb.set_message("captioning...");
    pb
}

/// Print a formatted summary table after a batch run.
fn print_summary(stats: &RunStats, elapsed: Duration) {
    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Accepted:     {:>8}", stats.accepted);
    if stats.exhausted > 0 {
        eprintln!("    Exhausted:    {:>8}", stats.exhausted);
    }
    if stats.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", stats.skipped);
    }
    if stats.failed > 0 {
        eprintln!("    Failed:       {:>8}", stats.failed);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", stats.total());
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("  ====================================");
}
