use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// Emit the model-search-paths config the engine is launched with.
///
/// Lists, per model category (one per subdirectory of the projected models
/// tree), the absolute path to the symlink tree. Returns the config path.
pub fn write_model_paths_config(workspace: &Path, models_dir: &Path) -> io::Result<PathBuf> {
    let mut categories = Vec::new();
    match fs_err::read_dir(models_dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        categories.push(name.to_string());
                    }
                }
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    categories.sort();

    let mut contents = String::new();
    let _ = writeln!(contents, "heddle:");
    let _ = writeln!(contents, "  base_path: {}", workspace.display());
    let custom_nodes = workspace.join("custom_nodes");
    if custom_nodes.is_dir() {
        let _ = writeln!(contents, "  custom_nodes: {}", custom_nodes.display());
    }
    for category in &categories {
        let _ = writeln!(
            contents,
            "  {category}: {}",
            models_dir.join(category).display()
        );
    }

    let config = workspace.join("extra_model_paths.yaml");
    heddle_fs::write_atomic_sync(&config, contents)?;
    Ok(config)
}
