use anyhow::Context;
use aura_core::config::SessionConfig;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<SessionConfig> {
        let bytes = fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: SessionConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Write `cfg` as pretty JSON. An existing file is only replaced when
    /// `overwrite` is set.
    pub fn save(&self, cfg: &SessionConfig, overwrite: bool) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .create_new(!overwrite)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("open config for writing: {}", self.path.display()))?;
        file.write_all(&json)
            .with_context(|| format!("write config: {}", self.path.display()))?;
        Ok(())
    }
}

/// Load `path` when given, otherwise the built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    match path {
        Some(p) => ConfigStore::at_path(p).load(),
        None => Ok(SessionConfig::default()),
    }
}
