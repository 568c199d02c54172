use std::{path::Path, process::ExitCode};

use pagecache::{
    application::{
        PageCacheService,
        error::{AppError, ErrorReport},
    },
    cache::{
        CacheConfig, CacheError, PageCache, RequestContext, StoreOutcome, SweepReport, derive_path,
    },
    config,
    infra::{error::InfraError, telemetry},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            report_application_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error(error);
    let emit = || {
        error!(
            error = %error,
            kind = error.presentation_message(),
            chain = %report.summary(),
            "application error"
        );
    };

    if dispatcher::has_been_set() {
        emit();
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, emit);
}

async fn run() -> Result<ExitCode, AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| {
            InfraError::configuration(format!("failed to load configuration: {err}"))
        })?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let cache = PageCache::new(CacheConfig::from(&settings.cache));

    match cli_args.command {
        config::Command::Get(args) => run_get(&cache, args).await,
        config::Command::Store(args) => run_store(&cache, args).await,
        config::Command::Invalidate(args) => run_invalidate(cache, args),
        config::Command::ClearUrl(args) => run_clear_url(&cache, &args.url),
        config::Command::ClearAll => run_clear_all(&cache),
        config::Command::Path(args) => run_path(&cache, &args.url).await,
        config::Command::Sweep(args) => run_sweep(cache, &settings, args).await,
    }
}

async fn run_get(cache: &PageCache, args: config::GetArgs) -> Result<ExitCode, AppError> {
    let context = RequestContext {
        fragment_request: args.fragment,
        skeletons_disabled: args.no_skeletons,
    };

    match cache.get_with(&args.target.url, &context) {
        Some(content) => {
            write_stdout(content.as_bytes()).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            info!(
                target = "pagecache::cli",
                url = %args.target.url,
                "no cached page"
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_store(cache: &PageCache, args: config::StoreArgs) -> Result<ExitCode, AppError> {
    let content = match args.file.as_deref() {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|err| InfraError::io(path, err))?,
        None => read_stdin().await?,
    };

    let lifetime = args
        .lifetime_minutes
        .unwrap_or(cache.config().default_lifetime_minutes);
    let outcome = cache.store(&args.target.url, &content, lifetime);

    info!(
        target = "pagecache::cli",
        url = %args.target.url,
        lifetime_minutes = lifetime,
        outcome = ?outcome,
        "store finished"
    );

    match outcome {
        StoreOutcome::Stored | StoreOutcome::Disabled => Ok(ExitCode::SUCCESS),
        StoreOutcome::TooDeep | StoreOutcome::TooManyVariants | StoreOutcome::Failed => {
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_invalidate(cache: PageCache, args: config::InvalidateArgs) -> Result<ExitCode, AppError> {
    let service = PageCacheService::new(cache);
    let summary = service.invalidate_page(args.routes.iter().map(String::as_str));

    if summary.failed > 0 {
        return Err(AppError::unexpected(format!(
            "{} of {} routes could not be invalidated",
            summary.failed,
            args.routes.len()
        )));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_clear_url(cache: &PageCache, url: &str) -> Result<ExitCode, AppError> {
    match cache.clear_url(url) {
        Ok(()) => {
            info!(target = "pagecache::cli", url, "cleared cached page");
        }
        Err(CacheError::Missing(_)) => {
            info!(target = "pagecache::cli", url, "nothing cached for url");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(ExitCode::SUCCESS)
}

fn run_clear_all(cache: &PageCache) -> Result<ExitCode, AppError> {
    cache.clear_all()?;
    Ok(ExitCode::SUCCESS)
}

async fn run_path(cache: &PageCache, url: &str) -> Result<ExitCode, AppError> {
    let path = derive_path(url);
    let mut output = format!(
        "{}\n{}\n",
        path.relative(),
        path.entry(cache.root()).display()
    );

    if let Some(expires_at) = cache.expires_at(url) {
        output.push_str(&format_expiry(expires_at));
        output.push('\n');
    }

    write_stdout(output.as_bytes()).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run_sweep(
    cache: PageCache,
    settings: &config::Settings,
    args: config::SweepArgs,
) -> Result<ExitCode, AppError> {
    if !args.watch {
        let report = sweep_once(cache).await?;
        let line = format!(
            "entries={} purged={} failed={}\n",
            report.entries, report.purged, report.failed
        );
        write_stdout(line.as_bytes()).await?;
        return Ok(if report.failed == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let period = settings.cache.sweep_interval;
    info!(
        target = "pagecache::sweep",
        interval_seconds = period.as_secs(),
        root = %cache.root().display(),
        "watching cache"
    );

    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(err) = sweep_once(cache.clone()).await {
                    warn!(target = "pagecache::sweep", error = %err, "sweep failed");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| InfraError::io(Path::new("<signal>"), err))?;
                info!(target = "pagecache::sweep", "shutting down");
                return Ok(ExitCode::SUCCESS);
            }
        }
    }
}

async fn sweep_once(cache: PageCache) -> Result<SweepReport, AppError> {
    tokio::task::spawn_blocking(move || cache.sweep_expired())
        .await
        .map_err(|err| AppError::unexpected(format!("sweep task failed: {err}")))
}

async fn read_stdin() -> Result<String, AppError> {
    let mut content = String::new();
    tokio::io::stdin()
        .read_to_string(&mut content)
        .await
        .map_err(|err| InfraError::io(Path::new("<stdin>"), err))?;
    Ok(content)
}

async fn write_stdout(bytes: &[u8]) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(bytes)
        .await
        .map_err(|err| InfraError::io(Path::new("<stdout>"), err))?;
    stdout
        .flush()
        .await
        .map_err(|err| InfraError::io(Path::new("<stdout>"), err))?;
    Ok(())
}

fn format_expiry(unix_seconds: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix_seconds)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| unix_seconds.to_string())
}
