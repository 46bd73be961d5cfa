use std::path::{Path, PathBuf};

/// Default data directory name under the working directory.
pub const DEFAULT_DATA_DIR: &str = ".kgrag";

/// On-disk layout of an engine data directory.
pub struct DataPaths {
    pub root: PathBuf,
    pub records: PathBuf,
    pub vectors: PathBuf,
    pub state: PathBuf,
    pub config: PathBuf,
}

impl DataPaths {
    pub fn new() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_root(cwd.join(DEFAULT_DATA_DIR))
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            records: root.join("records.db"),
            vectors: root.join("vectors.db"),
            state: root.join("state.db"),
            config: root.join("config.yaml"),
            root,
        }
    }

    pub fn resolve(data_dir: Option<&Path>) -> Self {
        match data_dir {
            Some(dir) => Self::from_root(dir.to_path_buf()),
            None => Self::new(),
        }
    }

    pub fn ensure_root(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn is_initialized(&self) -> bool {
        self.records.exists() && self.vectors.exists()
    }

    pub fn files(&self) -> Vec<(&PathBuf, &str)> {
        vec![
            (&self.records, "Relational records"),
            (&self.vectors, "Vector store"),
            (&self.state, "Cache, evaluation and history state"),
            (&self.config, "Engine configuration"),
        ]
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new()
    }
}
