use crate::config::LoggingConfig;
use regex::Regex;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

struct RedactingWriter<W> {
    inner: W,
    patterns: Vec<(Regex, String)>,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.patterns.is_empty() {
            self.inner.write_all(buf)?;
            return Ok(buf.len());
        }
        let mut redacted = String::from_utf8_lossy(buf).into_owned();
        for (re, replacement) in &self.patterns {
            redacted = re.replace_all(&redacted, replacement.as_str()).into_owned();
        }
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter {
    patterns: Vec<(Regex, String)>,
}

impl<'a> fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

fn redaction_patterns(config: &LoggingConfig) -> Vec<(Regex, String)> {
    if !config.redaction.enabled {
        return Vec::new();
    }
    config
        .redaction
        .patterns
        .iter()
        .filter_map(|p| match Regex::new(&p.regex) {
            Ok(re) => Some((re, p.placeholder.clone())),
            Err(e) => {
                eprintln!("warning: ignoring redaction pattern '{}': {}", p.name, e);
                None
            }
        })
        .collect()
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// levels; `verbose` raises the configured level to debug.
pub fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.levels.directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let show_file = config.format.location.show_file;
    let show_line = config.format.location.show_line;
    let make_writer = RedactingMakeWriter {
        patterns: redaction_patterns(config),
    };

    let layer = fmt::layer()
        .with_writer(make_writer)
        .with_target(show_file)
        .with_file(show_file)
        .with_line_number(show_line)
        .with_thread_ids(false);

    // Layer::boxed() unifies the four formatter types
    let fmt_layer = match (config.format.json, config.format.show_time) {
        (true, true) => layer.json().boxed(),
        (true, false) => layer.json().without_time().boxed(),
        (false, true) => layer.boxed(),
        (false, false) => layer.without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
