use std::{fs, io, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base: String,
    pub default_host: String,
    pub user_email: Option<String>,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080/api".into(),
            default_host: "local".into(),
            user_email: None,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    api_base: Option<String>,
    default_host: Option<String>,
    user_email: Option<String>,
    log_filter: Option<String>,
}

/// Defaults, then the TOML file, then environment variables.
///
/// An explicitly named file must exist; the default `dashboard.toml` is
/// optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(file) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", file.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && path.is_none() => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config '{}'", file.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file.api_base {
        settings.api_base = v;
    }
    if let Some(v) = file.default_host {
        settings.default_host = v;
    }
    if let Some(v) = file.user_email {
        settings.user_email = Some(v);
    }
    if let Some(v) = file.log_filter {
        settings.log_filter = v;
    }
    Ok(())
}

/// The `APP__` spelling wins over the short one when both are set.
fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("DASHBOARD_API_BASE") {
        settings.api_base = v;
    }
    if let Some(v) = var("APP__API_BASE") {
        settings.api_base = v;
    }

    if let Some(v) = var("DASHBOARD_HOST") {
        settings.default_host = v;
    }
    if let Some(v) = var("APP__DEFAULT_HOST") {
        settings.default_host = v;
    }

    if let Some(v) = var("DASHBOARD_USER") {
        settings.user_email = Some(v);
    }
    if let Some(v) = var("APP__USER_EMAIL") {
        settings.user_email = Some(v);
    }

    if let Some(v) = var("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}
