//! module vendoring hand-off
//!
//! Generation never fetches anything. `tm_vendor` computes where a module will live once vendored and offers a
//! [VendorRequest] to an out-of-process collaborator through a bounded queue. Offering never blocks: a full or
//! disconnected queue is only logged, the queue owner decides how much back-pressure it accepts.
use crate::project::ProjectPath;
use std::sync::mpsc::{SyncSender, TrySendError};

/// Where modules are vendored unless configured otherwise
pub const DEFAULT_VENDOR_DIR: &str = "/modules";

#[derive(derive_new::new, Debug, Clone, PartialEq, Eq)]
pub struct VendorRequest {
    pub source: ModuleSource,
    pub vendor_dir: ProjectPath,
}

#[derive(Debug, Clone)]
pub struct Vendoring {
    pub dir: ProjectPath,
    requests: Option<SyncSender<VendorRequest>>,
}

impl Default for Vendoring {
    fn default() -> Self {
        Self {
            dir: ProjectPath::new(DEFAULT_VENDOR_DIR),
            requests: None,
        }
    }
}

impl Vendoring {
    pub fn new(dir: ProjectPath, requests: Option<SyncSender<VendorRequest>>) -> Self {
        Self { dir, requests }
    }

    pub(crate) fn request(&self, request: VendorRequest) {
        let Some(requests) = &self.requests else {
            return;
        };

        match requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                tracing::warn!(source=%request.source, "vendor queue is full, dropping request")
            }
            Err(TrySendError::Disconnected(request)) => {
                tracing::debug!(source=%request.source, "vendor queue is closed, dropping request")
            }
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ModuleSourceError {
    #[error("module source {0:?} is missing a ?ref=<ref> query")]
    MissingRef(String),
    #[error("module source {0:?} has no path")]
    MissingPath(String),
}

/// A remote module reference such as `github.com/acme/modules//net?ref=v1.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSource {
    raw: String,
    /// `host/path` of the repository, without scheme and `.git` suffix
    pub repository: String,
    pub reference: String,
    /// sub directory inside the repository
    pub subdir: Option<String>,
}

impl ModuleSource {
    /// Project path the module is vendored into
    pub fn vendor_path(&self, vendor_dir: &ProjectPath) -> ProjectPath {
        let module_dir = vendor_dir
            .join(&self.repository)
            .join(&self.reference);

        match &self.subdir {
            Some(subdir) => module_dir.join(subdir),
            None => module_dir,
        }
    }
}

impl std::fmt::Display for ModuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for ModuleSource {
    type Err = ModuleSourceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (location, query) = raw
            .split_once('?')
            .ok_or_else(|| ModuleSourceError::MissingRef(raw.to_string()))?;

        let reference = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("ref="))
            .filter(|reference| !reference.is_empty())
            .ok_or_else(|| ModuleSourceError::MissingRef(raw.to_string()))?;

        let mut location = location.strip_prefix("git::").unwrap_or(location);
        for scheme in ["https://", "http://", "ssh://"] {
            location = location.strip_prefix(scheme).unwrap_or(location);
        }

        // scp-like form: git@github.com:acme/modules
        let location = match location.strip_prefix("git@") {
            Some(rest) => rest.replacen(':', "/", 1),
            None => location.to_string(),
        };

        let (repository, subdir) = match location.split_once("//") {
            Some((repository, subdir)) => (repository, Some(subdir.trim_matches('/').to_string())),
            None => (location.as_str(), None),
        };
        let repository = repository
            .trim_end_matches('/')
            .trim_end_matches(".git")
            .to_string();

        if repository.is_empty() {
            return Err(ModuleSourceError::MissingPath(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            repository,
            reference: reference.to_string(),
            subdir: subdir.filter(|s| !s.is_empty()),
        })
    }
}
