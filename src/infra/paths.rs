// src/infra/paths.rs — Home-directory path management
//
// Everything lives under $FUSIONLOOP_HOME when set, otherwise ~/.fusionloop/.
// Engine components never call these functions directly: they receive an
// `ArtifactPaths` so tests can point them at a temp dir.

use std::path::{Path, PathBuf};

/// Returns the FUSIONLOOP_HOME override, if set.
fn fusionloop_home() -> Option<PathBuf> {
    std::env::var_os("FUSIONLOOP_HOME").map(PathBuf::from)
}

/// Home directory, or the working directory when none can be determined.
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $FUSIONLOOP_HOME/ or ~/.fusionloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = fusionloop_home() {
        return home;
    }
    dirs_home().join(".fusionloop")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default history file consumed by `run`, `live` and `tune`.
pub fn default_history_path() -> PathBuf {
    config_dir().join("history.csv")
}

/// Every file the engine reads or writes, rooted at one directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    root: PathBuf,
}

impl ArtifactPaths {
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths rooted at the user's config dir.
    pub fn from_env() -> Self {
        Self::under(config_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persistent adaptive state: ~/.fusionloop/state/
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// Audit output: ~/.fusionloop/reports/
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn memory(&self) -> PathBuf {
        self.state_dir().join("memory.json")
    }

    pub fn strategy_weights(&self) -> PathBuf {
        self.state_dir().join("strategy_weights.json")
    }

    pub fn priors(&self) -> PathBuf {
        self.state_dir().join("priors.json")
    }

    pub fn fusion_trace(&self) -> PathBuf {
        self.reports_dir().join("fusion_trace_last.json")
    }

    pub fn attempt_log(&self) -> PathBuf {
        self.reports_dir().join("attempts.jsonl")
    }

    pub fn closed_loop_summary(&self) -> PathBuf {
        self.reports_dir().join("closed_loop_summary.json")
    }

    pub fn live_log(&self) -> PathBuf {
        self.reports_dir().join("live_predictions.jsonl")
    }

    pub fn live_latest(&self) -> PathBuf {
        self.reports_dir().join("live_latest.json")
    }

    /// Ensure state and report directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.state_dir(), self.reports_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
