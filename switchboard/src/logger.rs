//! Logger initialization for the binary.

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Once;

use jiff::{Zoned, tz::TimeZone};
use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};

static INIT: Once = Once::new();

/// Stderr layout with UTC timestamps.
#[derive(Debug)]
struct UtcLayout;

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();

        let now = Zoned::now().with_time_zone(TimeZone::UTC);
        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = match record.level() {
            log::Level::Error => format!("\x1b[31m{:>5}\x1b[0m", record.level()),
            log::Level::Warn => format!("\x1b[33m{:>5}\x1b[0m", record.level()),
            log::Level::Info => format!("\x1b[32m{:>5}\x1b[0m", record.level()),
            log::Level::Debug => format!("\x1b[34m{:>5}\x1b[0m", record.level()),
            log::Level::Trace => format!("\x1b[35m{:>5}\x1b[0m", record.level()),
        };
        write!(output, "{level}  {}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Initialize the process logger. Safe to call more than once.
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |d| {
                let filter = EnvFilter::from_str(&log_filter)
                    .unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));

                d.filter(filter).append(Stderr::default().with_layout(UtcLayout))
            })
            .apply();
    });
}
