//! Filesystem utilities

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};

/// Create a directory and all of its parents if they don't exist
pub fn create_dir_all<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Sibling path used while a file is being written: `<dir>/.<name>.staging`
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.staging", name))
}

/// Write `contents` to `path` and flush it to disk before returning.
pub fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Write `contents` to the staging sibling of `target` and flush it to disk.
///
/// `target` itself is not touched; call [`replace_file`] to publish it.
pub fn write_staged(target: &Path, contents: &[u8]) -> std::io::Result<PathBuf> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }
    let staged = staging_path(target);
    write_synced(&staged, contents)?;
    debug!("staged {} bytes at {}", contents.len(), staged.display());
    Ok(staged)
}

/// Atomically move a staged file over `target`.
pub fn replace_file(staged: &Path, target: &Path) -> std::io::Result<()> {
    fs::rename(staged, target)?;
    debug!("published {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let staged = staging_path(Path::new("/tmp/models/aqi_metadata.json"));
        assert_eq!(
            staged,
            PathBuf::from("/tmp/models/.aqi_metadata.json.staging")
        );
    }

    #[test]
    fn test_staged_write_leaves_target_until_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("artifact.json");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, b"old").unwrap();

        let staged = write_staged(&target, b"new").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"old");

        replace_file(&staged, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staged.exists());
    }

    #[test]
    fn test_staged_write_fails_when_a_directory_holds_the_staging_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("artifact.json");
        fs::create_dir(staging_path(&target)).unwrap();

        assert!(write_staged(&target, b"new").is_err());
        assert!(!target.exists());
    }
}
