//! Configuration loader with multi-source merging

use crate::{BackhaulConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    explicit_file: Option<PathBuf>,
    user_config: bool,
    env_vars: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "BACKHAUL".to_string(),
            explicit_file: None,
            user_config: true,
            env_vars: None,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "BACKHAUL")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Layer a required file above the project files.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip ~/.config/backhaul/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Read environment overrides from `vars` instead of the process
    /// environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<BackhaulConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = BackhaulConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/backhaul/config.toml)
        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(toml_file(user_config_file, false));
                }
            }
        }

        // 3. Project config (backhaul.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(toml_file(project_config_file, false));
        }

        // 4. Local config (backhaul.local.toml)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(toml_file(local_config_file, false));
        }

        // 5. --config
        if let Some(file) = &self.explicit_file {
            builder = builder.add_source(toml_file(file.clone(), true));
        }

        // 6. Environment variables (BACKHAUL_REVERSE__CHECK_ID=...)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_vars.clone()),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut backhaul_config: BackhaulConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Relative paths in --config resolve against the project dir too.
        backhaul_config.resolve_paths(&self.project_dir);
        backhaul_config.validate()?;

        Ok(backhaul_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn toml_file(path: PathBuf, required: bool) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path)
        .required(required)
        .format(config::FileFormat::Toml)
}
