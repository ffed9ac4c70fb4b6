//! File migration between part trees and the shared areas.
//!
//! Stage and prime populate trees shared by every part. Files are linked
//! into place (hard link, falling back to a copy) and every file a part
//! contributes is remembered in its step record so it can later be
//! removed without touching other parts' files.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern, PatternError};
use thiserror::Error;
use walkdir::WalkDir;

use crate::domain::StepContents;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include/exclude globs selecting files of a tree
///
/// Entries prefixed with `-` exclude. With no include entries every path is
/// included. A pattern matching a directory applies to everything below it.
#[derive(Debug, Clone, Default)]
pub struct Fileset {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl Fileset {
    pub fn new(entries: &[String]) -> Result<Self, PatternError> {
        let mut fileset = Self::default();
        for entry in entries {
            let entry = entry.trim();
            match entry.strip_prefix('-') {
                Some(excluded) => fileset.excludes.push(Pattern::new(normalize(excluded))?),
                None => fileset.includes.push(Pattern::new(normalize(entry))?),
            }
        }
        Ok(fileset)
    }

    /// Whether a relative path is selected
    pub fn matches(&self, path: &str) -> bool {
        let included = self.includes.is_empty() || self.includes.iter().any(|p| matches_or_ancestor(p, path));
        included && !self.excludes.iter().any(|p| matches_or_ancestor(p, path))
    }

    /// Narrow a tree listing to the selected files
    ///
    /// Directories are kept when selected themselves or when they lead to a
    /// selected file.
    pub fn apply(&self, contents: &StepContents) -> StepContents {
        let mut selected = StepContents::default();

        for file in &contents.files {
            if self.matches(file) {
                selected.files.insert(file.clone());
                selected.directories.extend(ancestors(file));
            }
        }

        for dir in &contents.directories {
            if self.matches(dir) {
                selected.directories.insert(dir.clone());
                selected.directories.extend(ancestors(dir));
            }
        }

        selected
    }
}

fn normalize(entry: &str) -> &str {
    entry.trim_start_matches("./").trim_start_matches('/').trim_end_matches('/')
}

fn matches_or_ancestor(pattern: &Pattern, path: &str) -> bool {
    pattern.matches_with(path, MATCH_OPTIONS)
        || ancestors(path).any(|ancestor| pattern.matches_with(&ancestor, MATCH_OPTIONS))
}

/// Proper ancestors of a relative path, nearest last
fn ancestors(path: &str) -> impl Iterator<Item = String> + '_ {
    path.match_indices('/').map(move |(i, _)| path[..i].to_string())
}

/// List every file and directory below `root`, relative to it
///
/// Symbolic links are listed as files and never followed. A missing root
/// yields an empty listing.
pub fn collect_tree(root: &Path) -> io::Result<StepContents> {
    let mut contents = StepContents::default();
    if !root.exists() {
        return Ok(contents);
    }

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };

        if entry.file_type().is_dir() {
            contents.directories.insert(relative);
        } else {
            contents.files.insert(relative);
        }
    }

    Ok(contents)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// A path that clashes with another part's contribution to a shared tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path:?} conflicts with the files of part {other_part:?}")]
pub struct Conflict {
    pub other_part: String,
    pub path: String,
}

/// Find the first entry of `contents` clashing with what other parts
/// already migrated into `dst_root`
///
/// A file clashes with another part's directory at the same path or below
/// another part's file. Two parts may provide the same file only when its
/// contents are identical.
pub fn find_conflict(
    contents: &StepContents,
    src_root: &Path,
    dst_root: &Path,
    claims: &[(String, StepContents)],
) -> io::Result<Option<Conflict>> {
    for (other_part, theirs) in claims {
        let conflict = |path: &str| {
            Some(Conflict {
                other_part: other_part.clone(),
                path: path.to_string(),
            })
        };

        for dir in &contents.directories {
            if theirs.files.contains(dir) {
                return Ok(conflict(dir.as_str()));
            }
        }

        for file in &contents.files {
            let below = format!("{}/", file);
            if theirs.directories.contains(file) || theirs.files.iter().any(|f| f.starts_with(&below)) {
                return Ok(conflict(file.as_str()));
            }
            if let Some(ancestor) = ancestors(file).find(|a| theirs.files.contains(a)) {
                return Ok(conflict(ancestor.as_str()));
            }
            if theirs.files.contains(file) && !same_contents(&src_root.join(file), &dst_root.join(file))? {
                return Ok(conflict(file.as_str()));
            }
        }
    }

    Ok(None)
}

fn same_contents(src: &Path, dst: &Path) -> io::Result<bool> {
    let dst_meta = match fs::symlink_metadata(dst) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let src_meta = fs::symlink_metadata(src)?;

    let (src_type, dst_type) = (src_meta.file_type(), dst_meta.file_type());
    if src_type.is_symlink() || dst_type.is_symlink() {
        return Ok(src_type.is_symlink() && dst_type.is_symlink() && fs::read_link(src)? == fs::read_link(dst)?);
    }
    if dst_type.is_dir() || src_meta.len() != dst_meta.len() {
        return Ok(false);
    }

    Ok(fs::read(src)? == fs::read(dst)?)
}

/// Link the listed entries from `src_root` into `dst_root`
///
/// Existing destination files are replaced, directories never are. Every
/// path that did not exist before is added to `created`, also when the
/// migration stops halfway.
pub fn migrate_files(
    contents: &StepContents,
    src_root: &Path,
    dst_root: &Path,
    created: &mut StepContents,
) -> io::Result<()> {
    fs::create_dir_all(dst_root)?;

    for dir in &contents.directories {
        create_dirs(dst_root, dir, created)?;
    }

    for file in &contents.files {
        for ancestor in ancestors(file) {
            create_dir(dst_root, &ancestor, created)?;
        }

        let dst = dst_root.join(file);
        let existed = fs::symlink_metadata(&dst).is_ok();
        link_or_copy(&src_root.join(file), &dst)?;
        if !existed {
            created.files.insert(file.clone());
        }
    }

    Ok(())
}

fn create_dirs(root: &Path, dir: &str, created: &mut StepContents) -> io::Result<()> {
    for ancestor in ancestors(dir) {
        create_dir(root, &ancestor, created)?;
    }
    create_dir(root, dir, created)
}

fn create_dir(root: &Path, dir: &str, created: &mut StepContents) -> io::Result<()> {
    let path = root.join(dir);
    match fs::symlink_metadata(&path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir(&path)?;
            created.directories.insert(dir.to_string());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn link_or_copy(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(metadata) if metadata.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", dst.display()),
            ));
        }
        Ok(_) => fs::remove_file(dst)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let metadata = fs::symlink_metadata(src)?;
    if metadata.file_type().is_symlink() {
        return copy_symlink(src, dst);
    }

    if fs::hard_link(src, dst).is_err() {
        fs::copy(src, dst)?;
    }
    Ok(())
}

/// Move entries inside `root` according to an organize mapping
///
/// Keys are globs relative to `root`. A value ending in `/` is a directory
/// receiving every match; any other value is the new path of a single
/// match. Existing destinations are never replaced.
pub fn organize_files(root: &Path, mapping: &BTreeMap<String, String>) -> io::Result<()> {
    for (source, destination) in mapping {
        let pattern = Pattern::new(normalize(source))
            .map_err(|e| invalid_input(format!("invalid organize pattern {:?}: {}", source, e)))?;
        let target_root = root.join(relative_inside(destination)?);
        let into_dir = destination.ends_with('/');

        let tree = collect_tree(root)?;
        let matched: BTreeSet<&String> = tree
            .files
            .iter()
            .chain(&tree.directories)
            .filter(|path| pattern.matches_with(path, MATCH_OPTIONS))
            .collect();
        // Moving a directory takes everything below it along
        let selected: Vec<&String> = matched
            .iter()
            .copied()
            .filter(|path| !ancestors(path).any(|a| matched.contains(&a)))
            .collect();

        if selected.len() > 1 && !into_dir {
            return Err(invalid_input(format!(
                "organize destination {:?} must end with '/' to receive {} entries",
                destination,
                selected.len()
            )));
        }

        for entry in selected {
            let target = if into_dir {
                target_root.join(entry.rsplit('/').next().unwrap_or(entry))
            } else {
                target_root.clone()
            };

            if fs::symlink_metadata(&target).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("cannot organize {:?}: {} already exists", entry, target.display()),
                ));
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(root.join(entry), &target)?;
        }
    }

    Ok(())
}

/// A relative path that stays below its root
fn relative_inside(path: &str) -> io::Result<PathBuf> {
    let relative = PathBuf::from(normalize(path));
    if relative.components().all(|c| matches!(c, Component::Normal(_))) {
        Ok(relative)
    } else {
        Err(invalid_input(format!("path {:?} leaves the install directory", path)))
    }
}

fn invalid_input(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let target = fs::read_link(src)?;
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Remove listed entries from a shared tree
///
/// Directories are only removed once empty, deepest first.
pub fn clean_shared_area(root: &Path, contents: &StepContents) -> io::Result<()> {
    for file in &contents.files {
        remove_path(&root.join(file))?;
    }

    let mut directories: Vec<&String> = contents.directories.iter().collect();
    directories.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));

    for dir in directories {
        let path = root.join(dir);
        match fs::remove_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // Still holds files of another part
            Err(_) if path.read_dir().map(|mut d| d.next().is_some()).unwrap_or(false) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Copy a directory tree, skipping the given absolute paths
pub fn copy_tree(src_root: &Path, dst_root: &Path, skip: &[&Path]) -> io::Result<()> {
    fs::create_dir_all(dst_root)?;

    let walker = WalkDir::new(src_root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !skip.iter().any(|s| entry.path() == *s));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(src_root) else {
            continue;
        };
        let dst = dst_root.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dst)?;
        } else if entry.file_type().is_symlink() {
            if fs::symlink_metadata(&dst).is_ok() {
                remove_path(&dst)?;
            }
            copy_symlink(entry.path(), &dst)?;
        } else {
            fs::copy(entry.path(), &dst)?;
        }
    }

    Ok(())
}

/// Remove a file, link or directory tree; a missing path is not an error
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing(files: &[&str], dirs: &[&str]) -> StepContents {
        StepContents {
            files: files.iter().map(|f| f.to_string()).collect(),
            directories: dirs.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_empty_fileset_selects_everything() {
        let fileset = Fileset::new(&[]).unwrap();
        assert!(fileset.matches("usr/bin/hello"));
    }

    #[test]
    fn test_fileset_includes_and_excludes() {
        let fileset = Fileset::new(&[
            "usr".to_string(),
            "-usr/share/doc".to_string(),
            "-*.la".to_string(),
        ])
        .unwrap();

        assert!(fileset.matches("usr/bin/hello"));
        assert!(!fileset.matches("usr/share/doc/README"));
        assert!(!fileset.matches("lib.la"));
        assert!(!fileset.matches("etc/config"));
    }

    #[test]
    fn test_apply_keeps_parent_directories() {
        let fileset = Fileset::new(&["bin/*".to_string()]).unwrap();
        let selected = fileset.apply(&listing(&["bin/hello", "share/man/hello.1"], &["bin", "share", "share/man"]));

        assert_eq!(selected, listing(&["bin/hello"], &["bin"]));
    }

    #[test]
    fn test_migrate_and_clean_shared_area() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let stage = temp.path().join("stage");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::write(install.join("bin/hello"), "hello").unwrap();
        fs::create_dir_all(stage.join("bin")).unwrap();
        fs::write(stage.join("bin/other"), "other part").unwrap();

        let contents = collect_tree(&install).unwrap();
        assert_eq!(contents, listing(&["bin/hello"], &["bin"]));

        let mut created = StepContents::default();
        migrate_files(&contents, &install, &stage, &mut created).unwrap();
        assert_eq!(fs::read_to_string(stage.join("bin/hello")).unwrap(), "hello");
        assert_eq!(created, listing(&["bin/hello"], &[]));

        // Migrating again replaces the existing file
        let mut created = StepContents::default();
        migrate_files(&contents, &install, &stage, &mut created).unwrap();
        assert!(created.is_empty());

        clean_shared_area(&stage, &contents).unwrap();
        assert!(!stage.join("bin/hello").exists());
        assert!(stage.join("bin/other").exists());
    }

    #[test]
    fn test_file_never_replaces_directory() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let stage = temp.path().join("stage");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("x"), "file").unwrap();
        fs::create_dir_all(stage.join("x")).unwrap();
        fs::write(stage.join("x/y"), "other part").unwrap();

        let mut created = StepContents::default();
        let result = migrate_files(&listing(&["x"], &[]), &install, &stage, &mut created);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::AlreadyExists);
        assert!(stage.join("x/y").exists());
        assert!(created.is_empty());
    }

    #[test]
    fn test_find_conflict() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let stage = temp.path().join("stage");
        for root in [&install, &stage] {
            fs::create_dir_all(root.join("bin")).unwrap();
        }
        fs::write(install.join("bin/same"), "same").unwrap();
        fs::write(stage.join("bin/same"), "same").unwrap();
        fs::write(install.join("bin/tool"), "mine").unwrap();
        fs::write(stage.join("bin/tool"), "theirs").unwrap();

        let claims = vec![(
            "foo".to_string(),
            listing(&["bin/same", "bin/tool", "etc"], &["bin", "share"]),
        )];
        let conflict = |files: &[&str], dirs: &[&str]| {
            find_conflict(&listing(files, dirs), &install, &stage, &claims).unwrap()
        };

        // Identical files may be shared
        assert_eq!(conflict(&["bin/same"], &["bin"]), None);

        let expected = |path: &str| {
            Some(Conflict {
                other_part: "foo".to_string(),
                path: path.to_string(),
            })
        };
        assert_eq!(conflict(&["bin/tool"], &["bin"]), expected("bin/tool"));
        assert_eq!(conflict(&["share"], &[]), expected("share"));
        assert_eq!(conflict(&["etc/conf"], &["etc"]), expected("etc"));
        assert_eq!(conflict(&["bin"], &[]), expected("bin"));
    }

    #[test]
    fn test_organize_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("usr/lib")).unwrap();
        fs::write(root.join("usr/lib/liba.so"), "a").unwrap();
        fs::write(root.join("usr/lib/libb.so"), "b").unwrap();
        fs::write(root.join("hello"), "hi").unwrap();

        let mapping = BTreeMap::from([
            ("usr/lib/*.so".to_string(), "lib/".to_string()),
            ("hello".to_string(), "bin/hello-world".to_string()),
        ]);
        organize_files(root, &mapping).unwrap();

        assert!(root.join("lib/liba.so").exists());
        assert!(root.join("lib/libb.so").exists());
        assert!(!root.join("usr/lib/liba.so").exists());
        assert_eq!(fs::read_to_string(root.join("bin/hello-world")).unwrap(), "hi");
    }

    #[test]
    fn test_organize_rejects_bad_destinations() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a"), "a").unwrap();
        fs::write(root.join("b"), "b").unwrap();

        let escape = BTreeMap::from([("a".to_string(), "../a".to_string())]);
        assert_eq!(organize_files(root, &escape).unwrap_err().kind(), io::ErrorKind::InvalidInput);

        let many = BTreeMap::from([("*".to_string(), "single".to_string())]);
        assert_eq!(organize_files(root, &many).unwrap_err().kind(), io::ErrorKind::InvalidInput);

        let clobber = BTreeMap::from([("a".to_string(), "b".to_string())]);
        assert_eq!(organize_files(root, &clobber).unwrap_err().kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(root.join("b")).unwrap(), "b");
    }

    #[test]
    fn test_copy_tree_skips_paths() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("project");
        fs::create_dir_all(src.join("parts/foo")).unwrap();
        fs::write(src.join("Makefile"), "all:").unwrap();
        fs::write(src.join("parts/foo/junk"), "").unwrap();

        let dst = temp.path().join("copy");
        let skip = src.join("parts");
        copy_tree(&src, &dst, &[skip.as_path()]).unwrap();

        assert!(dst.join("Makefile").exists());
        assert!(!dst.join("parts").exists());
    }

    #[test]
    fn test_remove_missing_path() {
        let temp = TempDir::new().unwrap();
        assert!(remove_path(&temp.path().join("nothing")).is_ok());
    }
}
