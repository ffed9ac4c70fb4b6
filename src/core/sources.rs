//! Source retrieval for the pull step.
//!
//! Only local directory sources are supported. A source is resolved
//! relative to the project work directory and copied into the part's
//! source directory, leaving out the lifecycle's own work trees.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::migration::{copy_tree, remove_path};
use crate::domain::{Part, ProjectDirs};

/// Resolve a part's source to a local directory
pub fn resolve_source(source: &str, dirs: &ProjectDirs) -> Result<PathBuf> {
    if source.contains("://") {
        bail!("source {:?} is not a local directory; only local sources can be pulled", source);
    }

    let path = Path::new(source);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        dirs.work_dir().join(path)
    };

    if !resolved.is_dir() {
        bail!("source directory {} does not exist", resolved.display());
    }

    Ok(resolved)
}

/// Populate the part's source directory from scratch
pub async fn pull(part: &Part, dirs: &ProjectDirs) -> Result<()> {
    let src_dir = part.dirs.src.clone();
    let source = match &part.spec.source {
        Some(source) => Some(resolve_source(source, dirs)?),
        None => None,
    };

    let skip = [
        dirs.parts_dir().to_path_buf(),
        dirs.stage_dir().to_path_buf(),
        dirs.prime_dir().to_path_buf(),
    ];

    tokio::task::spawn_blocking(move || -> Result<()> {
        remove_path(&src_dir).with_context(|| format!("Failed to remove {}", src_dir.display()))?;
        std::fs::create_dir_all(&src_dir)
            .with_context(|| format!("Failed to create {}", src_dir.display()))?;

        if let Some(source) = source {
            let skip: Vec<&Path> = skip.iter().map(PathBuf::as_path).collect();
            copy_tree(&source, &src_dir, &skip)
                .with_context(|| format!("Failed to copy {} into {}", source.display(), src_dir.display()))?;
        }
        Ok(())
    })
    .await
    .context("Pull task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_source_rejected() {
        let dirs = ProjectDirs::new("/work");
        let err = resolve_source("https://example.com/repo.git", &dirs).unwrap_err();
        assert!(err.to_string().contains("only local sources"));
    }

    #[test]
    fn test_relative_source_resolves_against_work_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("hello")).unwrap();
        let dirs = ProjectDirs::new(temp.path());

        assert_eq!(resolve_source("hello", &dirs).unwrap(), temp.path().join("hello"));
        assert!(resolve_source("missing", &dirs).is_err());
    }
}
