//! `tracing` subscriber setup.
//!
//! Every event in the crate is emitted under one of [`AREAS`] as its target,
//! so the CLI level applies to those areas while webrtc-rs, tungstenite and
//! the rest of the dependency tree stay at `info` or quieter.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Full `EnvFilter` directive string; replaces the level-derived directives.
pub const FILTER_ENV: &str = "RELAYCALL_LOG_FILTER";
/// When truthy, dependencies log at the chosen level too.
pub const DEPS_ENV: &str = "RELAYCALL_LOG_DEPS";

/// Log targets used by this crate. `relaycall` covers untargeted events.
/// Directives match targets by prefix, so none of these may prefix a
/// dependency's crate name (`rtc` would also match `rtcp`).
pub const AREAS: &[&str] = &["relaycall", "signaling", "session", "peer", "media", "orchestrator"];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid {FILTER_ENV}: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber once; later calls return `Ok` untouched.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let filter = build_filter(
        config.level,
        std::env::var(FILTER_ENV).ok(),
        std::env::var(DEPS_ENV).is_ok_and(|value| !value.is_empty() && value != "0"),
    )?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::AlreadyInstalled(err.to_string()))?;

    let _ = GUARD.set(guard);
    Ok(())
}

fn build_filter(
    level: LogLevel,
    custom: Option<String>,
    with_deps: bool,
) -> Result<EnvFilter, InitError> {
    let directives = match custom {
        Some(custom) if !custom.trim().is_empty() => custom,
        _ => directives(level, with_deps),
    };
    Ok(EnvFilter::try_new(directives)?)
}

/// Default directive for everything else, then one directive per area.
fn directives(level: LogLevel, with_deps: bool) -> String {
    let fallback = if with_deps {
        level
    } else {
        level.min(LogLevel::Info)
    };
    AREAS.iter().fold(fallback.directive().to_string(), |mut out, area| {
        out.push(',');
        out.push_str(area);
        out.push('=');
        out.push_str(level.directive());
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_levels_apply_to_crate_areas_only() {
        let debug = directives(LogLevel::Debug, false);
        assert!(debug.starts_with("info,"));
        for area in AREAS {
            assert!(debug.contains(&format!("{area}=debug")), "{debug}");
        }

        assert!(directives(LogLevel::Trace, true).starts_with("trace,"));
        assert_eq!(
            directives(LogLevel::Warn, false),
            "warn,relaycall=warn,signaling=warn,session=warn,peer=warn,media=warn,orchestrator=warn"
        );
    }

    #[test]
    fn areas_do_not_shadow_dependency_targets() {
        for dependency in ["webrtc", "webrtc_ice", "rtcp", "rtp", "interceptor", "tungstenite", "tokio_tungstenite"] {
            assert!(
                !AREAS.iter().any(|area| dependency.starts_with(area)),
                "{dependency}"
            );
        }
    }

    #[test]
    fn custom_filter_replaces_defaults_and_is_validated() {
        assert!(build_filter(LogLevel::Warn, Some("signaling=trace".into()), false).is_ok());
        assert!(build_filter(LogLevel::Warn, Some("  ".into()), false).is_ok());
        assert!(matches!(
            build_filter(LogLevel::Warn, Some("signaling=loud".into()), false),
            Err(InitError::Filter(_))
        ));
    }

    #[test]
    fn cli_level_names_parse() {
        assert_eq!(LogLevel::from_str("debug", true).unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::default(), LogLevel::Warn);
    }
}
