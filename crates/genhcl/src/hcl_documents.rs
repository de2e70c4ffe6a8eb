//! collection of hcl documents of one configuration directory
//!
//! [HclDocuments] tracks every parsed file together with its [SourceFile] so spans of the parsed tree can be turned
//! into user friendly locations later on. Two kinds of documents exist:
//! - configuration files (`*.tm`, `*.tm.hcl`) declaring `generate_hcl` blocks among other things
//! - generation files (`*.tmgen`) whose whole body is the content of an implicit generation block
//!
//! At this point documents only have to be valid HCL to be accepted.
use crate::error::LoadError;
use crate::source::SourceFile;
use hcl_edit::structure::{Block, Body};
use std::path::Path;
use std::sync::Arc;

/// Suffix of files holding the content of an implicit generation block
pub const TMGEN_SUFFIX: &str = ".tmgen";

const CONFIG_SUFFIXES: [&str; 2] = [".tm", ".tm.hcl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Config,
    Tmgen,
}

impl DocumentKind {
    /// Kind of document by file name, `None` for files that are not ours
    pub fn of(file_name: &str) -> Option<Self> {
        if file_name.starts_with('.') {
            return None;
        }
        if file_name.ends_with(TMGEN_SUFFIX) && file_name.len() > TMGEN_SUFFIX.len() {
            return Some(DocumentKind::Tmgen);
        }
        if CONFIG_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix)) {
            return Some(DocumentKind::Config);
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub kind: DocumentKind,
    pub source: Arc<SourceFile>,
    pub body: Body,
}

#[derive(Default, Debug, Clone)]
pub struct HclDocuments {
    documents: Vec<Document>,
}

impl HclDocuments {
    /// Inserts an already parsed document
    pub fn insert(&mut self, kind: DocumentKind, source: SourceFile, body: Body) {
        self.documents.push(Document {
            kind,
            source: Arc::new(source),
            body,
        });
    }

    /// Parses and inserts `text` as if it was read from `path`
    pub fn insert_source(
        &mut self,
        kind: DocumentKind,
        path: impl Into<std::path::PathBuf>,
        text: impl Into<String>,
    ) -> Result<(), LoadError> {
        let source = SourceFile::new(path, text);
        let body = hcl_edit::parser::parse_body(source.text()).map_err(|source_err| {
            LoadError::HclParseFailed {
                path: source.path().to_path_buf(),
                source: source_err,
            }
        })?;

        self.insert(kind, source, body);
        Ok(())
    }

    /// Root blocks of all configuration documents
    pub fn config_blocks(&self) -> impl Iterator<Item = (&Arc<SourceFile>, &Block)> {
        self.documents
            .iter()
            .filter(|doc| doc.kind == DocumentKind::Config)
            .flat_map(|doc| doc.body.blocks().map(move |block| (&doc.source, block)))
    }

    pub fn tmgen_documents(&self) -> impl Iterator<Item = &Document> {
        self.documents
            .iter()
            .filter(|doc| doc.kind == DocumentKind::Tmgen)
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl HclDocuments {
    pub fn load_file(&mut self, kind: DocumentKind, file_path: &Path) -> Result<(), LoadError> {
        tracing::info!(path=%file_path.display(), ?kind, "loading file");

        let file_contents = std::fs::read_to_string(file_path)?;
        self.insert_source(kind, file_path, file_contents)
    }

    /// Load every configuration and generation file of `dir_path`
    ///
    /// Files are loaded in file name order. Sub directories are not visited.
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut files = vec![];

        for dir_entry in std::fs::read_dir(dir_path)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let file_name = dir_entry.file_name().to_string_lossy().to_string();
            if let Some(kind) = DocumentKind::of(&file_name) {
                files.push((file_name, kind, dir_entry.path()));
            }
        }

        files.sort_by(|(a, ..), (b, ..)| a.cmp(b));
        for (_, kind, file_path) in files {
            self.load_file(kind, &file_path)?;
        }

        Ok(())
    }
}

/// Utility macro to create [HclDocuments]
///
/// Create from a single configuration document
/// ```
/// # use genhcl::hcl_documents;
/// hcl_documents!("attribute = 42");
/// ```
///
/// Create from multiple documents (path required, the kind follows from the file name)
/// ```
/// # use genhcl::hcl_documents;
/// hcl_documents! {
///   "gen.tm.hcl" => "generate_hcl \"a.hcl\" {\n content {}\n}",
///   "b.hcl.tmgen" => "b = 2"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use genhcl::hcl_documents;
/// hcl_documents!("not = valid = hcl");
/// ```
#[macro_export]
macro_rules! hcl_documents {
    // single configuration document
    { $expr:expr } => {
        $crate::hcl_documents! { "config.tm.hcl" => $expr }
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::hcl_documents::HclDocuments::default();
        $(
            let kind = $crate::hcl_documents::DocumentKind::of($source).expect("file name must be a known kind");
            docs.insert_source(kind, $source, $expr).expect("body must parse");
        )+

        docs
    }};
}
