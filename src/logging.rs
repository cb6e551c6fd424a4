use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::util::parse_bool_flag;

const DEFAULT_LOG_FILTER: &str = "info";
const LOG_FILTER_ENV: &str = "AGENTRUN_LOG";
const LOG_PATH_ENV: &str = "AGENTRUN_LOG_PATH";
const DEBUG_PAYLOAD_ENV: &str = "AGENTRUN_DEBUG_PAYLOAD";

/// Installs the global `tracing` subscriber.
///
/// Filter directives come from `AGENTRUN_LOG` (default `info`). When
/// `AGENTRUN_LOG_PATH` is set, output is appended to that file instead of
/// stderr so it does not interleave with streamed run output.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match resolve_log_path() {
        Some(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    tracing::debug!(
        target: "agentrun::payload",
        url = request_url,
        payload = %formatted_payload,
        "request payload"
    );
}

pub fn emit_sse_parse_error(event_type: Option<&str>, data: &str, error: &serde_json::Error) {
    tracing::warn!(
        event_type = event_type.unwrap_or("<none>"),
        %error,
        data,
        "dropping unparseable event frame"
    );
}

fn resolve_log_path() -> Option<String> {
    std::env::var(LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn open_log_file(path: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file '{path}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_payload_enabled_accepts_true_variants() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var(DEBUG_PAYLOAD_ENV, "1");
        assert!(debug_payload_enabled());
        std::env::set_var(DEBUG_PAYLOAD_ENV, "TRUE");
        assert!(debug_payload_enabled());
        std::env::set_var(DEBUG_PAYLOAD_ENV, "nope");
        assert!(!debug_payload_enabled());
        std::env::remove_var(DEBUG_PAYLOAD_ENV);
    }

    #[test]
    fn test_resolve_log_path_ignores_blank_values() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var(LOG_PATH_ENV, "  ");
        assert_eq!(resolve_log_path(), None);
        std::env::set_var(LOG_PATH_ENV, "/tmp/agentrun.log");
        assert_eq!(resolve_log_path().as_deref(), Some("/tmp/agentrun.log"));
        std::env::remove_var(LOG_PATH_ENV);
    }

    #[test]
    fn test_open_log_file_appends() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agentrun.log");
        let path = path.to_str().expect("utf-8 path");

        writeln!(open_log_file(path).expect("first open"), "one").expect("write");
        writeln!(open_log_file(path).expect("second open"), "two").expect("write");

        let contents = std::fs::read_to_string(path).expect("read back");
        assert_eq!(contents, "one\ntwo\n");
    }
}
