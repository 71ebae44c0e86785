//! Agent directory layout and workspace path validation.
//!
//! The agent root holds protected files (config, wallet, platform session,
//! database) and a `workspace/` subtree the agent may read and write. Tool
//! executors and the workspace HTTP surface resolve paths exclusively through
//! [`AgentDirs::resolve_workspace_path`], which rejects escapes.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path escapes workspace: {0}")]
    Escape(String),
    #[error("absolute paths are not allowed: {0}")]
    Absolute(String),
    #[error("protected path: {0}")]
    Protected(String),
}

/// Filesystem layout rooted at the agent directory (default `~/.teleton/`).
#[derive(Clone, Debug)]
pub struct AgentDirs {
    root: PathBuf,
}

impl AgentDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("memory.db")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.root.join("wallet.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.txt")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates the directories the agent writes into.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.workspace_dir())?;
        std::fs::create_dir_all(self.memory_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Resolves a caller-supplied relative path inside the workspace.
    ///
    /// Rejects absolute paths and any `..` component. The check is lexical so
    /// it also covers paths that do not exist yet. Protected files under the
    /// agent root are unreachable by construction (the workspace is a
    /// dedicated subtree), but symlinked escapes are re-checked when the
    /// target exists.
    pub fn resolve_workspace_path(&self, relative: &str) -> Result<PathBuf, PathError> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(PathError::Absolute(relative.to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::ParentDir => return Err(PathError::Escape(relative.to_string())),
                Component::Prefix(_) | Component::RootDir => {
                    return Err(PathError::Absolute(relative.to_string()))
                }
                Component::CurDir | Component::Normal(_) => {}
            }
        }
        let workspace = self.workspace_dir();
        let joined = workspace.join(candidate);
        if let Ok(real) = joined.canonicalize() {
            let real_ws = workspace.canonicalize().unwrap_or(workspace.clone());
            if !real.starts_with(&real_ws) {
                return Err(PathError::Escape(relative.to_string()));
            }
            return Ok(real);
        }
        Ok(joined)
    }
}
