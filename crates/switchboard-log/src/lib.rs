// ABOUTME: Tracing setup shared by switchboard host shells, demos and tests.
// ABOUTME: Switchboard crates log at a chosen level, everything else at WARN, RUST_LOG wins.

use std::path::PathBuf;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Crates whose events get the switchboard level rather than WARN.
pub const SWITCHBOARD_CRATES: &[&str] = &[
    "switchboard_core",
    "switchboard_coordinator",
    "switchboard_client",
];

fn filter(level: Level) -> EnvFilter {
    SWITCHBOARD_CRATES.iter().fold(
        EnvFilter::from_default_env().add_directive(Level::WARN.into()),
        |filter, name| {
            let directive: Directive = format!("{name}={level}")
                .parse()
                .unwrap_or_else(|_| level.into());
            filter.add_directive(directive)
        },
    )
}

/// Log to stderr at INFO.
pub fn init() {
    tracing_subscriber::fmt().with_env_filter(filter(Level::INFO)).init();
}

/// Log to `~/.config/switchboard/{app_name}.log` at DEBUG, for hosts whose stderr is not visible.
///
/// Returns the log file path. Falls back to no logging (with a stderr note)
/// if the file cannot be opened.
pub fn init_file(app_name: &str) -> Option<PathBuf> {
    match log_file(app_name) {
        Ok((path, file)) => {
            tracing_subscriber::fmt()
                .with_writer(file)
                .with_env_filter(filter(Level::DEBUG))
                .with_ansi(false)
                .init();
            Some(path)
        }
        Err(e) => {
            eprintln!("Warning: switchboard file logging disabled: {e:#}");
            None
        }
    }
}

fn log_file(app_name: &str) -> anyhow::Result<(PathBuf, std::fs::File)> {
    let dir = dirs::config_dir()
        .context("no config directory on this platform")?
        .join("switchboard");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let path = dir.join(format!("{app_name}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok((path, file))
}

/// Route events through the test harness's captured output. Safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_init() {
        let _ = super::init as fn();
        let _ = super::init_file as fn(&str) -> Option<PathBuf>;
    }

    #[test]
    fn init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::debug!("logging from a test");
    }

    #[test]
    fn filter_names_every_crate() {
        let rendered = filter(Level::INFO).to_string();
        for name in SWITCHBOARD_CRATES {
            assert!(rendered.contains(name), "{rendered} is missing {name}");
        }
    }
}
