//! project paths and stacks
//!
//! A [ProjectPath] is the logical, `/` separated and absolute location of a directory relative to the project root.
//! Paths are normalized on construction so comparing two of them compares the directories they name.
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ProjectPath(String);

impl ProjectPath {
    /// Normalize `path`
    ///
    /// Repeated separators and `.` are dropped and `..` is resolved. `..` never leaves the root.
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut components: Vec<&str> = vec![];
        for component in path.as_ref().split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }

        Self(format!("/{}", components.join("/")))
    }

    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Last component, `None` for the root
    pub fn basename(&self) -> Option<&str> {
        self.components().last()
    }

    /// Parent directory. The root is its own parent.
    pub fn dir(&self) -> Self {
        match self.0.rfind('/') {
            Some(0) | None => Self::root(),
            Some(idx) => Self(self.0[..idx].to_string()),
        }
    }

    pub fn join(&self, relative: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.0, relative.as_ref()))
    }

    /// Relative path leading from `base` to `self`, `.` when both are equal
    pub fn relative_to(&self, base: &ProjectPath) -> String {
        let target: Vec<_> = self.components().collect();
        let base: Vec<_> = base.components().collect();

        let common = target
            .iter()
            .zip(base.iter())
            .take_while(|(a, b)| a == b)
            .count();

        let parts: Vec<&str> = std::iter::repeat("..")
            .take(base.len() - common)
            .chain(target[common..].iter().copied())
            .collect();

        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Location on the host file system given the project root
    pub fn host_path(&self, root: &Path) -> PathBuf {
        self.components()
            .fold(root.to_path_buf(), |path, component| path.join(component))
    }
}

impl Default for ProjectPath {
    fn default() -> Self {
        Self::root()
    }
}

impl std::fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProjectPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// A deployable configuration unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stack {
    pub dir: ProjectPath,
    pub name: String,
    /// path relative to the repository root, used by `stack_filter.repository_paths`
    pub repository_path: ProjectPath,
}

impl Stack {
    pub fn new(dir: ProjectPath) -> Self {
        let name = dir.basename().unwrap_or("/").to_string();
        Self {
            repository_path: dir.clone(),
            dir,
            name,
        }
    }

    pub fn with_repository_path(mut self, path: ProjectPath) -> Self {
        self.repository_path = path;
        self
    }
}
