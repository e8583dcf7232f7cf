//! Engine configuration loader.
//!
//! Reads `weft.toml` (from `--config`, `WEFT_CONFIG`, or the platform config
//! directory) into [`EngineConfig`]. Falls back to defaults when the file is
//! missing or malformed.

use std::path::{Path, PathBuf};

use weft_types::config::EngineConfig;

/// `<config dir>/weft/weft.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("weft").join("weft.toml"))
}

/// Load engine configuration from `path`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: a warning, then the default.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Resolve the config location and load it. No location at all means defaults.
pub async fn load_config(explicit: Option<&Path>) -> EngineConfig {
    match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_engine_config(&path).await,
        None => EngineConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join("weft.toml")).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("weft.toml");
        tokio::fs::write(
            &path,
            r#"
[execution]
continue_on_error = true
max_parallelism = 2

[cache]
ttl_secs = 30
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert!(config.execution.continue_on_error);
        assert_eq!(config.execution.max_parallelism, Some(2));
        assert_eq!(config.cache.ttl_secs, Some(30));
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("weft.toml");
        tokio::fs::write(&path, "[execution\nnot toml").await.unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_config_prefers_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        tokio::fs::write(&path, "[events]\nbuffer = 8\n").await.unwrap();

        let config = load_config(Some(&path)).await;
        assert_eq!(config.events.buffer, 8);
    }
}
