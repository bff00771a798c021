//! Tracing subscriber setup.
//!
//! The `bcn_*` macros attach a `domain` field to every event; plain output
//! lifts that field into a `[domain]` prefix so a subsystem can be scanned
//! by eye, while JSON output keeps it as a structured field for log
//! queries. An optional file sink writes through a non-blocking appender.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use beacon_config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

// ---------------------------------------------------------------------------
// PrefixedLine — plain one-line format
// ---------------------------------------------------------------------------

/// Renders `<timestamp> <LEVEL> [domain] message key=value ...`.
///
/// Events without a `domain` field (third-party crates) print without the
/// bracket prefix.
struct PrefixedLine;

impl<S, N> FormatEvent<S, N> for PrefixedLine
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut parts = LineParts::default();
        event.record(&mut parts);

        if SystemTime.format_time(&mut writer).is_err() {
            writer.write_str("-")?;
        }
        write!(writer, " {:>5} ", event.metadata().level())?;
        if let Some(domain) = parts.domain {
            write!(writer, "[{domain}] ")?;
        }
        writer.write_str(&parts.message)?;
        for (name, value) in parts.fields {
            write!(writer, " {name}={value}")?;
        }
        writeln!(writer)
    }
}

/// Splits an event into domain, message, and the remaining fields.
///
/// Every `Visit` method defaults through `record_debug`, so one rendering
/// path covers all field types; strings get an override that drops the
/// surrounding quotes.
#[derive(Default)]
struct LineParts {
    domain: Option<String>,
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl LineParts {
    fn store(&mut self, field: &Field, rendered: String) {
        match field.name() {
            "domain" => self.domain = Some(rendered),
            "message" => self.message = rendered,
            name => self.fields.push((name, rendered)),
        }
    }
}

impl Visit for LineParts {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut rendered = String::new();
        let _ = write!(rendered, "{value:?}");
        self.store(field, rendered);
    }
}

// ---------------------------------------------------------------------------
// Layer construction
// ---------------------------------------------------------------------------

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(PrefixedLine)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer(writer: NonBlocking, format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Plain => fmt::layer()
            .event_format(PrefixedLine)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Resolve the configured log file against the config directory, create
/// missing parents, and open a non-blocking appender for it.
fn open_log_file(path: &Path, base_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let resolved = if path.is_relative() {
        base_dir.join(path)
    } else {
        path.to_path_buf()
    };
    let name = resolved
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file {} has no file name", resolved.display()))?
        .to_os_string();
    let dir = match resolved.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    std::fs::create_dir_all(&dir)?;
    let appender = tracing_appender::rolling::never(dir, name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Level directives from config; `RUST_LOG` wins when set.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(EnvFilter::from_default_env());
    }
    let directives = std::iter::once(config.level.clone())
        .chain(config.modules.iter().map(|(module, level)| format!("{module}={level}")))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives)
        .map_err(|e| anyhow::anyhow!("invalid log filter {directives:?}: {e}"))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Install the process-wide subscriber from the `[logging]` section.
///
/// The returned guard owns the non-blocking file writer; hold it until the
/// process exits so buffered lines flush.
pub fn init_tracing(config: &LoggingConfig, base_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];
    let mut guard = None;
    if let Some(ref path) = config.file {
        let (writer, file_guard) = open_log_file(path, base_dir)?;
        layers.push(file_layer(writer, config.format));
        guard = Some(file_guard);
    }

    // The env filter sits outermost and gates every layer underneath.
    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .init();
    Ok(guard)
}
