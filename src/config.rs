//! Environment configuration.
//!
//! Expands the minimal single-field config the toolkit started with into
//! the full environment-variable contract of the orchestration substrate.
//! Like the original, this struct is constructed directly — no TOML/YAML
//! parsing dependency is introduced.
//!
//! # Example
//!
//! ```rust
//! use timus_orchestrator::config::Config;
//!
//! let config = Config::default();
//! assert_eq!(config.host, "127.0.0.1");
//! assert_eq!(config.port, 5000);
//! ```

use std::path::PathBuf;

/// Global configuration for the orchestration substrate.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host for the HTTP surface. Env: `HOST`.
    pub host: String,
    /// Bind port for the HTTP surface. Env: `PORT`.
    pub port: u16,
    /// Canvas store file path override. Env: `TIMUS_CANVAS_STORE`.
    pub canvas_store_path: Option<PathBuf>,
    /// Auto-create a default canvas on startup if none exists.
    /// Env: `TIMUS_CANVAS_AUTO_CREATE`, default `true`.
    pub canvas_auto_create: bool,
    /// Open the canvas UI on startup. Env: `TIMUS_CANVAS_AUTO_OPEN`,
    /// default `true`. The orchestration substrate itself has no UI to
    /// open (out of scope); this flag is carried through for external
    /// wrappers that do.
    pub canvas_auto_open: bool,
    /// Title used for the auto-created default canvas.
    /// Env: `TIMUS_CANVAS_DEFAULT_TITLE`, default `"Live Canvas"`.
    pub canvas_default_title: String,
    /// Bind unseen session ids to the primary canvas at first event.
    /// Env: `TIMUS_CANVAS_AUTO_ATTACH_SESSIONS`, default `true`.
    pub canvas_auto_attach_sessions: bool,
    /// Whether the canvas mirror worker runs at all.
    /// Env: `TIMUS_CANVAS_MIRROR_LOG`, default `true`.
    pub canvas_mirror_log: bool,
    /// Canvas mirror worker tick interval, in seconds.
    /// Env: `TIMUS_CANVAS_MIRROR_LOG_INTERVAL`, default `1.2`.
    pub canvas_mirror_log_interval: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            canvas_store_path: None,
            canvas_auto_create: true,
            canvas_auto_open: true,
            canvas_default_title: "Live Canvas".to_string(),
            canvas_auto_attach_sessions: true,
            canvas_mirror_log: true,
            canvas_mirror_log_interval: 1.2,
        }
    }
}

impl Config {
    /// Build a [`Config`] by reading the environment, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// # Example
    ///
    /// ```rust
    /// use timus_orchestrator::config::Config;
    ///
    /// std::env::set_var("PORT", "8080");
    /// let config = Config::from_env();
    /// assert_eq!(config.port, 8080);
    /// std::env::remove_var("PORT");
    /// ```
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            canvas_store_path: std::env::var("TIMUS_CANVAS_STORE").ok().map(PathBuf::from),
            canvas_auto_create: is_truthy_env("TIMUS_CANVAS_AUTO_CREATE", defaults.canvas_auto_create),
            canvas_auto_open: is_truthy_env("TIMUS_CANVAS_AUTO_OPEN", defaults.canvas_auto_open),
            canvas_default_title: std::env::var("TIMUS_CANVAS_DEFAULT_TITLE")
                .unwrap_or(defaults.canvas_default_title),
            canvas_auto_attach_sessions: is_truthy_env(
                "TIMUS_CANVAS_AUTO_ATTACH_SESSIONS",
                defaults.canvas_auto_attach_sessions,
            ),
            canvas_mirror_log: is_truthy_env("TIMUS_CANVAS_MIRROR_LOG", defaults.canvas_mirror_log),
            canvas_mirror_log_interval: std::env::var("TIMUS_CANVAS_MIRROR_LOG_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.canvas_mirror_log_interval),
        }
    }

    /// Default canvas store path: `<cwd>/data/canvas_store.json`, or the
    /// configured override if set.
    pub fn canvas_store_path(&self) -> PathBuf {
        self.canvas_store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data").join("canvas_store.json"))
    }
}

/// Parse a boolean-ish environment variable: `1/true/yes/on` (case
/// insensitive) are truthy, anything else present is falsy, unset falls
/// back to `default`.
fn is_truthy_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
