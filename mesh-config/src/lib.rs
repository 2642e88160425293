//! Configuration, middleware registry, and observability setup for the
//! agent mesh, in a single crate the way the teacher's `config` crate
//! anchors every env/config concern in one place.

mod dotenv;
pub mod metrics_init;
pub mod middleware;
pub mod tracing_init;
mod xdg_toml;

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// In-process override map, highest priority in the four-tier resolution
/// order below. Exists for test injection (spec §4.14): a test can set a
/// key here without touching real env vars or files and reset it afterward.
static RUNTIME_OVERRIDES: Lazy<RwLock<HashMap<String, String>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Installs a runtime override, taking precedence over file and process env.
pub fn set_runtime_override(key: impl Into<String>, value: impl Into<String>) {
    RUNTIME_OVERRIDES
        .write()
        .expect("runtime override lock poisoned")
        .insert(key.into(), value.into());
}

/// Clears all runtime overrides. Intended for test teardown.
pub fn clear_runtime_overrides() {
    RUNTIME_OVERRIDES
        .write()
        .expect("runtime override lock poisoned")
        .clear();
}

/// Resolves a config key through the four-tier precedence: runtime override
/// (highest) > process env > project `.env` > XDG `config.toml` > the
/// supplied default (lowest).
///
/// Grounded on `config::load_and_apply`'s existing-env > .env > XDG chain,
/// with a runtime-override tier added on top.
pub fn resolve(
    app_name: &str,
    key: &str,
    override_dir: Option<&Path>,
    default: Option<&str>,
) -> Result<Option<String>, LoadError> {
    if let Some(v) = RUNTIME_OVERRIDES.read().expect("lock poisoned").get(key) {
        return Ok(Some(v.clone()));
    }
    if let Ok(v) = std::env::var(key) {
        return Ok(Some(v));
    }
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;
    if let Some(v) = dotenv_map.get(key) {
        return Ok(Some(v.clone()));
    }
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    if let Some(v) = xdg_map.get(key) {
        return Ok(Some(v.clone()));
    }
    Ok(default.map(str::to_string))
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets
/// environment variables only for keys that are **not** already set (so
/// existing env has highest priority save for runtime overrides, which are
/// applied separately via [`resolve`]).
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}
