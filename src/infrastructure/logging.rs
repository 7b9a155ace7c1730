use std::io;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::AppConfig, infrastructure::directories::ResolvedPaths};

const LOG_FILE_PREFIX: &str = "truthy";
const LOG_FILE_SUFFIX: &str = "log";
const FALLBACK_LEVEL: &str = "info";
/// Transport crates are chatty at debug; keep them at warn unless RUST_LOG says otherwise.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn,sqlx=warn";

static GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Filter directives and, when the configured level was rejected, the reason.
#[derive(Debug, PartialEq, Eq)]
struct Directives {
    value: String,
    rejected: Option<String>,
}

fn directives(from_env: Option<&str>, configured: &str) -> Directives {
    if let Some(env) = from_env.filter(|env| EnvFilter::try_new(env).is_ok()) {
        return Directives {
            value: env.to_string(),
            rejected: None,
        };
    }
    match EnvFilter::try_new(configured) {
        Ok(_) => Directives {
            value: format!("{configured},{QUIET_DEPENDENCIES}"),
            rejected: None,
        },
        Err(err) => Directives {
            value: format!("{FALLBACK_LEVEL},{QUIET_DEPENDENCIES}"),
            rejected: Some(format!("LOG_LEVEL {configured:?}: {err}")),
        },
    }
}

/// Installs the global subscriber once. Console output goes to stderr
/// because stdout carries the response stream.
pub fn init_tracing(config: &AppConfig, paths: &ResolvedPaths) -> Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let Directives { value, rejected } = directives(from_env.as_deref(), &config.logging.level);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(&paths.logs_dir)
        .with_context(|| format!("failed to open log file in {}", paths.logs_dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&value)?)
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false),
        )
        .try_init()?;
    let _ = GUARD.set(guard);

    if let Some(reason) = rejected {
        tracing::warn!(target: "app", %reason, "invalid log level, using {FALLBACK_LEVEL}");
    }
    tracing::info!(
        target: "app",
        logs = %paths.logs_dir.display(),
        filter = %value,
        "tracing initialized"
    );
    Ok(())
}
