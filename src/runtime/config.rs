// Taffy Runtime Configuration
// JSON-backed settings with defaults; CLI flags override them

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::gc::INITIAL_THRESHOLD;

pub const DEFAULT_MAX_STACK_DEPTH: usize = 400;
pub const DEFAULT_MAX_FUTURE_THREADS: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GcConfig {
    pub enabled: bool,
    /// Collect at every safe point
    pub always: bool,
    /// Registrations between collections
    pub threshold: usize,
    /// Tracked objects allowed to survive a collection
    pub memory_limit: Option<usize>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            always: false,
            threshold: INITIAL_THRESHOLD,
            memory_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub gc: GcConfig,
    pub max_stack_depth: usize,
    /// Roots searched for `import a.b.C` (as `a/b/C.ty`)
    pub import_paths: Vec<PathBuf>,
    /// Extra source roots searched after the import paths
    pub plugin_dirs: Vec<PathBuf>,
    /// Worker threads available to evaluation tasks
    pub max_future_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc: GcConfig::default(),
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            import_paths: vec![PathBuf::from(".")],
            plugin_dirs: Vec::new(),
            max_future_threads: DEFAULT_MAX_FUTURE_THREADS,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack_depth == 0 {
            return Err(ConfigError::Invalid("maxStackDepth must be positive".into()));
        }
        if self.max_future_threads == 0 {
            return Err(ConfigError::Invalid("maxFutureThreads must be positive".into()));
        }
        if self.gc.threshold == 0 {
            return Err(ConfigError::Invalid("gc.threshold must be positive".into()));
        }
        Ok(())
    }

    /// Every directory searched for an import, in order
    pub fn search_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.import_paths.iter().chain(self.plugin_dirs.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_stack_depth, 400);
        assert!(config.gc.enabled);
        assert!(config.gc.memory_limit.is_none());
    }

    #[test]
    fn test_config_partial_json() {
        let config =
            RuntimeConfig::from_json(r#"{ "maxStackDepth": 50, "gc": { "always": true } }"#).unwrap();
        assert_eq!(config.max_stack_depth, 50);
        assert!(config.gc.always);
        assert_eq!(config.gc.threshold, INITIAL_THRESHOLD);
    }

    #[test]
    fn test_config_rejects_zero_depth() {
        let error = RuntimeConfig::from_json(r#"{ "maxStackDepth": 0 }"#).unwrap_err();
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_config_search_roots_order() {
        let config = RuntimeConfig {
            import_paths: vec![PathBuf::from("a")],
            plugin_dirs: vec![PathBuf::from("b")],
            ..RuntimeConfig::default()
        };
        let roots: Vec<_> = config.search_roots().collect();
        assert_eq!(roots, vec![&PathBuf::from("a"), &PathBuf::from("b")]);
    }
}
