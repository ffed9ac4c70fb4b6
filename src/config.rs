//! Configuration for partline projects.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PARTLINE_WORK_DIR, PARTLINE_CACHE_DIR, PARTLINE_ARCH)
//! 2. Config file (.partline/config.yaml)
//! 3. Defaults (current directory, user cache directory, host architecture)
//!
//! Config file discovery:
//! - Searches current directory and parents for .partline/config.yaml
//! - Paths in config file are relative to the project root (the directory
//!   holding .partline/)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::LifecycleOptions;
use crate::domain::project::host_arch;

/// Default application name, also used for the cache directory
pub const DEFAULT_APPLICATION_NAME: &str = "partline";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub application_name: Option<String>,
    /// Work directory (relative to the project root)
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Package cache directory (relative to the project root)
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub parallel_build_count: Option<usize>,
    #[serde(default)]
    pub custom_args: BTreeMap<String, String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub application_name: String,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub arch: String,
    pub base: String,
    pub parallel_build_count: usize,
    pub custom_args: BTreeMap<String, String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Options for constructing a lifecycle manager
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions::new(&self.application_name, &self.cache_dir)
            .with_work_dir(&self.work_dir)
            .with_arch(&self.arch)
            .with_base(&self.base)
            .with_parallel_build_count(self.parallel_build_count)
            .with_custom_args(self.custom_args.clone())
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".partline").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn default_parallel_build_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Combine a config file and environment lookups into a configuration
fn resolve_config<F>(config_path: Option<PathBuf>, cwd: &Path, env: F) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let config = match &config_path {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    // Project root is the parent of .partline/
    let base_dir = config_path
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .unwrap_or(cwd)
        .to_path_buf();

    let file = |get: fn(&ConfigFile) -> Option<&String>| config.as_ref().and_then(get).cloned();

    let application_name = file(|c| c.application_name.as_ref())
        .unwrap_or_else(|| DEFAULT_APPLICATION_NAME.to_string());

    let work_dir = if let Some(dir) = env("PARTLINE_WORK_DIR") {
        resolve_path(cwd, &dir)
    } else if let Some(dir) = file(|c| c.work_dir.as_ref()) {
        resolve_path(&base_dir, &dir)
    } else {
        base_dir.clone()
    };

    let cache_dir = if let Some(dir) = env("PARTLINE_CACHE_DIR") {
        resolve_path(cwd, &dir)
    } else if let Some(dir) = file(|c| c.cache_dir.as_ref()) {
        resolve_path(&base_dir, &dir)
    } else {
        dirs::cache_dir()
            .context("Failed to determine cache directory")?
            .join(&application_name)
    };

    let arch = env("PARTLINE_ARCH")
        .or_else(|| file(|c| c.arch.as_ref()))
        .unwrap_or_else(|| host_arch().to_string());

    let base = file(|c| c.base.as_ref()).unwrap_or_default();

    let parallel_build_count = config
        .as_ref()
        .and_then(|c| c.parallel_build_count)
        .unwrap_or_else(default_parallel_build_count);

    let custom_args = config.as_ref().map(|c| c.custom_args.clone()).unwrap_or_default();

    Ok(ResolvedConfig {
        application_name,
        work_dir,
        cache_dir,
        arch,
        base,
        parallel_build_count,
        custom_args,
        config_file: config_path,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    resolve_config(find_config_file(&cwd), &cwd, |name| std::env::var(name).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(root: &Path, content: &str) -> PathBuf {
        let dir = root.join(".partline");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", content).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let temp = TempDir::new().unwrap();
        let config = resolve_config(None, temp.path(), no_env).unwrap();

        assert_eq!(config.application_name, DEFAULT_APPLICATION_NAME);
        assert_eq!(config.work_dir, temp.path());
        assert_eq!(config.arch, host_arch());
        assert!(config.parallel_build_count >= 1);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            temp.path(),
            r#"
version: "1.0"
application_name: demo
work_dir: build
cache_dir: /var/cache/demo
arch: arm64
parallel_build_count: 3
custom_args:
  debug: "true"
"#,
        );

        let config = resolve_config(Some(path.clone()), temp.path(), no_env).unwrap();
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.work_dir, temp.path().join("build"));
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/demo"));
        assert_eq!(config.arch, "arm64");
        assert_eq!(config.parallel_build_count, 3);
        assert_eq!(config.custom_args.get("debug"), Some(&"true".to_string()));
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1.0\"\narch: arm64\ncache_dir: cache");

        let env = |name: &str| match name {
            "PARTLINE_ARCH" => Some("riscv64".to_string()),
            "PARTLINE_CACHE_DIR" => Some("/tmp/override".to_string()),
            _ => None,
        };
        let config = resolve_config(Some(path), temp.path(), env).unwrap();

        assert_eq!(config.arch, "riscv64");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/override"));
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1.0\"\nbogus: 1");
        assert!(load_config_file(&path).is_err());
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path(), "version: \"1.0\"");
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
