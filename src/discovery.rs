// src/discovery.rs

use regex::Regex;
use std::io;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// Matches every file name
pub const ANY_FILE: &str = ".*";

/// Build and packaging manifests worth reporting alongside the SBOM
pub const BUILD_MANIFESTS: &str =
    r"(Dockerfile.*|Makefile|Cargo\.toml|package\.json|requirements.*\.txt|pom\.xml|build\.gradle.*|go\.mod|pyproject\.toml)$";

/// An entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub name: String,
    pub is_dir: bool,
}

/// Lists one directory level, in the order the backing store returns it
pub trait DirLister {
    fn list(&self, dir: &Path) -> io::Result<Vec<Listed>>;

    /// `/`-joined relative paths of every file under `root`, depth-first.
    /// At each level files come first, then subdirectories, both in listing order.
    fn files(&self, root: &Path) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        walk(self, root, "", &mut found)?;
        Ok(found)
    }
}

/// Walks the real filesystem. Symlinks are followed; cycles and dangling links are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLister;

impl FsLister {
    fn walker(root: &Path) -> WalkDir {
        // Stable sort on `is_dir` alone keeps listing order within files and within directories
        WalkDir::new(root).min_depth(1).follow_links(true).sort_by(|a, b| a.path().is_dir().cmp(&b.path().is_dir()))
    }
}

impl DirLister for FsLister {
    fn list(&self, dir: &Path) -> io::Result<Vec<Listed>> {
        let mut listed = Vec::new();
        for entry in Self::walker(dir).max_depth(1) {
            let Some(entry) = skip_unwalkable(entry)? else { continue };
            listed.push(Listed { name: entry.file_name().to_string_lossy().into_owned(), is_dir: entry.file_type().is_dir() });
        }
        Ok(listed)
    }

    fn files(&self, root: &Path) -> io::Result<Vec<String>> {
        let mut found = Vec::new();
        for entry in Self::walker(root) {
            let Some(entry) = skip_unwalkable(entry)? else { continue };
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
            found.push(parts.join("/"));
        }
        Ok(found)
    }
}

/// Logs and drops symlink cycles and dangling links; other walk errors are returned
fn skip_unwalkable(entry: walkdir::Result<walkdir::DirEntry>) -> io::Result<Option<walkdir::DirEntry>> {
    match entry {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.loop_ancestor().is_some() => {
            warn!(path = ?err.path(), ancestor = ?err.loop_ancestor(), "skipping symlink cycle");
            Ok(None)
        }
        Err(err) if err.io_error().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) => {
            warn!(path = ?err.path(), "skipping dangling link");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Returns the relative paths of files whose name matches `pattern` at its start,
/// in the order `lister` walks them
pub fn find_files<L: DirLister>(lister: &L, root: &Path, pattern: &Regex) -> io::Result<Vec<String>> {
    let mut files = lister.files(root)?;
    files.retain(|path| pattern.is_match(path.rsplit('/').next().unwrap_or(path)));
    Ok(files)
}

/// Build manifests under `root`. A failed walk is logged and yields nothing.
pub fn build_manifests<L: DirLister>(lister: &L, root: &Path) -> Vec<String> {
    let found = compile(BUILD_MANIFESTS).map_err(io::Error::other).and_then(|pattern| find_files(lister, root, &pattern));
    match found {
        Ok(files) => files,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "could not list build manifests");
            Vec::new()
        }
    }
}

/// Compiles `pattern` so it only matches from the first character of a file name
pub fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})"))
}

fn walk<L: DirLister + ?Sized>(lister: &L, dir: &Path, prefix: &str, found: &mut Vec<String>) -> io::Result<()> {
    let entries = lister.list(dir)?;
    let mut subdirs = Vec::new();

    for entry in entries {
        if entry.is_dir {
            subdirs.push(entry.name);
        } else {
            found.push(join(prefix, &entry.name));
        }
    }

    for name in subdirs {
        walk(lister, &dir.join(&name), &join(prefix, &name), found)?;
    }
    Ok(())
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}
