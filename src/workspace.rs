//! Project file lookup.

use std::fs;
use std::path::{Path, PathBuf};

pub trait Workspace: Send + Sync {
    /// Find a file in the project by name (or relative path).
    fn find_project_file(&self, name: &str) -> Option<PathBuf>;

    /// Resolve `path` against the project root unless it is already absolute.
    fn get_absolute_path(&self, path: &Path) -> PathBuf;
}

/// A project rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryWorkspace {
    root: PathBuf,
}

impl DirectoryWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn search(dir: &Path, file_name: &str, depth: usize) -> Option<PathBuf> {
    if depth == 0 {
        return None;
    }
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|n| n == file_name) {
            return Some(path);
        }
    }
    subdirs.sort();
    subdirs
        .iter()
        .find_map(|sub| search(sub, file_name, depth - 1))
}

impl Workspace for DirectoryWorkspace {
    fn find_project_file(&self, name: &str) -> Option<PathBuf> {
        let direct = self.get_absolute_path(Path::new(name));
        if direct.is_file() {
            return Some(direct);
        }
        let file_name = Path::new(name).file_name()?.to_str()?;
        search(&self.root, file_name, 8)
    }

    fn get_absolute_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shaders/common")).unwrap();
        fs::write(dir.path().join("shaders/common/noise.wgsl"), "// noise").unwrap();
        fs::write(dir.path().join("main.rhai"), "").unwrap();
        dir
    }

    #[test]
    fn test_find_direct_and_nested() {
        let dir = temp_project();
        let root = dir.path();
        let ws = DirectoryWorkspace::new(root);

        assert_eq!(ws.find_project_file("main.rhai"), Some(root.join("main.rhai")));
        assert_eq!(
            ws.find_project_file("noise.wgsl"),
            Some(root.join("shaders/common/noise.wgsl"))
        );
        assert_eq!(ws.find_project_file("missing.wgsl"), None);
    }

    #[test]
    fn test_absolute_paths_pass_through() {
        let ws = DirectoryWorkspace::new("/project");
        assert_eq!(ws.get_absolute_path(Path::new("a/b.png")), PathBuf::from("/project/a/b.png"));
        assert_eq!(ws.get_absolute_path(Path::new("/tmp/x.png")), PathBuf::from("/tmp/x.png"));
    }
}
