//! Logger initialization for the gateway binary. Adapted from the server
//! crate's logger, trimmed to the plain-stderr dispatch branch: no fastrace
//! event appender, no OTEL appender, no TUI channel — this gateway only ever
//! runs as a foreground process writing to its own stderr.

use std::str::FromStr;
use std::sync::Once;

use logforth::append::Stderr;
use logforth::filter::EnvFilter;

static INIT: Once = Once::new();

/// `log_filter` is an `EnvFilter` string, e.g. `"info"` or `"gateway=debug"`.
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();
    INIT.call_once(move || {
        let filter = EnvFilter::from_str(&log_filter)
            .unwrap_or_else(|_| EnvFilter::from_str("info").expect("default filter should be valid"));

        logforth::builder()
            .dispatch(|d| d.filter(filter).append(Stderr::default()))
            .apply();
    });
}
