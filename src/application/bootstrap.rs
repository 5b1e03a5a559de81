use crate::infrastructure::config::{ensure_default_configs, load_duration_config};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

const DATABASE_FILE: &str = "focus.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join(DATABASE_FILE);

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let _ = load_duration_config(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        config_dir,
        logs_dir,
        database_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TempRoot {
        path: PathBuf,
    }

    impl TempRoot {
        fn new() -> Self {
            let path =
                std::env::temp_dir().join(format!("focus-engine-bootstrap-{}", std::process::id()));
            Self { path }
        }
    }

    impl Drop for TempRoot {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn creates_layout_and_rejects_unknown_schema() {
        let root = TempRoot::new();
        let result = bootstrap_workspace(&root.path).expect("bootstrap workspace");
        assert!(result.config_dir.join("timer.json").exists());
        assert!(result.logs_dir.is_dir());
        assert!(result.database_path.exists());

        fs::write(result.config_dir.join("timer.json"), "{\"schema\": 2}")
            .expect("overwrite config");
        assert!(matches!(
            bootstrap_workspace(&root.path),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
