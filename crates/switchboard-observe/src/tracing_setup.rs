//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! // Structured logging, filtered by RUST_LOG (default "info")
//! switchboard_observe::tracing_setup::init_tracing(false).unwrap();
//!
//! // Explicit default filter plus OpenTelemetry export to stdout
//! switchboard_observe::tracing_setup::init_tracing_with("switchboard=debug", true).unwrap();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const TRACER_NAME: &str = "switchboard";

/// Kept so `shutdown_tracing` can flush it on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Initialize the global subscriber with an `info` default filter.
pub fn init_tracing(enable_otel: bool) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing_with("info", enable_otel)
}

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. The fmt layer prints
/// targets and span close timing. With `enable_otel`, spans are also
/// bridged to OpenTelemetry through a stdout exporter.
///
/// # Errors
///
/// Fails if `default_filter` does not parse or a global subscriber is
/// already installed.
pub fn init_tracing_with(
    default_filter: &str,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let otel_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME));

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

/// Map CLI verbosity flags to a default filter directive.
pub fn verbosity_filter(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "switchboard=debug,info",
        _ => "trace",
    }
}

/// Flush pending spans and shut down the tracer provider. A no-op when
/// OpenTelemetry was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("warning: tracer provider shutdown failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(verbosity_filter(0, false), "info");
        assert_eq!(verbosity_filter(1, false), "switchboard=debug,info");
        assert_eq!(verbosity_filter(3, false), "trace");
        assert_eq!(verbosity_filter(2, true), "error");
    }

    #[test]
    fn every_verbosity_filter_parses() {
        for v in 0..3 {
            assert!(EnvFilter::try_new(verbosity_filter(v, false)).is_ok());
        }
    }

    #[test]
    fn shutdown_without_otel_is_noop() {
        shutdown_tracing();
    }
}
