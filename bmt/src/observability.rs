use std::env;
use std::io::IsTerminal;

use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry.dsn.as_deref()?;
    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.parse().ok(),
        environment: config.sentry.environment.clone(),
        enable_logs: true,
        sample_rate: config.sentry.sample_rate,
        ..Default::default()
    }))
}

pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and also sends everything at or above INFO as logs instead of breadcrumbs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let format_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .boxed(),
        LogFormat::Simplified => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty | LogFormat::Auto => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format_layer.with_filter(config.logging.level))
        .with(sentry_layer)
        .with(env_filter())
        .init();
}

fn env_filter() -> EnvFilter {
    // Use RUST_LOG literally if the user knows which overrides they want to run. Plain levels
    // are already covered by `logging.level`.
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) if value.parse::<Level>().is_err() => EnvFilter::new(value),
        _ => EnvFilter::new("INFO,bmt=TRACE,bmt_scribe=TRACE"),
    }
}
