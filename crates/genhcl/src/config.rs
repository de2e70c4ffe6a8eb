//! generation blocks declared by configuration directories
//!
//! A directory contributes explicit `generate_hcl` blocks from its configuration files and one implicit block per
//! `*.tmgen` file. Parsing is structural only: expressions are kept for later evaluation, except `stack_filter` globs
//! which must be literal.
//!
//! Structural issues of every block of every file in a directory are collected before failing.
use crate::error::{Diagnostic, Diagnostics, ErrorKind, LoadError};
use crate::eval::EvalContext;
use crate::filter::{Glob, StackFilter};
use crate::generate::CommentStyle;
use crate::hcl_documents::{HclDocuments, TMGEN_SUFFIX};
use crate::project::ProjectPath;
use crate::source::{SourceFile, SourceRange};
use crate::value::as_string_list;
use hcl_edit::structure::{Attribute, Block, Body};
use hcl_edit::Span;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub const GENERATE_HCL: &str = "generate_hcl";

/// An expression together with where it was written
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigExpr {
    pub expr: hcl::Expression,
    pub range: SourceRange,
}

impl ConfigExpr {
    pub(crate) fn from_attribute(source: &SourceFile, attribute: &Attribute) -> Self {
        Self {
            expr: attribute.value.clone().into(),
            range: source.range(attribute.value.span()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Let {
    pub name: String,
    pub value: ConfigExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertConfig {
    pub range: SourceRange,
    pub assertion: ConfigExpr,
    pub message: ConfigExpr,
    pub warning: Option<ConfigExpr>,
}

#[derive(Debug, Clone)]
pub struct GenerationBlock {
    /// name of the generated artifact, relative to the stack
    pub label: String,
    /// directory declaring the block
    pub dir: ProjectPath,
    pub range: SourceRange,
    pub source: Arc<SourceFile>,
    pub stack_filters: Vec<StackFilter>,
    pub condition: Option<ConfigExpr>,
    pub inherit: Option<ConfigExpr>,
    pub lets: Vec<Let>,
    pub asserts: Vec<AssertConfig>,
    pub content: Body,
    /// synthesized from a `*.tmgen` file
    pub is_implicit: bool,
}

impl GenerationBlock {
    /// Human readable identification used in diagnostics
    pub fn describe(&self) -> String {
        if self.is_implicit {
            format!("tmgen file {:?}", self.source.path().display().to_string())
        } else {
            format!("{GENERATE_HCL} {:?}", self.label)
        }
    }
}

/// Everything this engine needs from one directory
#[derive(Debug, Clone, Default)]
pub struct DirConfig {
    pub blocks: Vec<GenerationBlock>,
    pub comment_style: Option<CommentStyle>,
}

impl DirConfig {
    pub fn parse(dir: &ProjectPath, documents: &HclDocuments) -> Result<Self, LoadError> {
        let mut issues = Diagnostics::new();
        let mut config = DirConfig::default();

        for (source, block) in documents.config_blocks() {
            match block.ident.value().as_str() {
                GENERATE_HCL => {
                    let mut parser = BlockParser::new(source);
                    let parsed = parser.parse_generate_hcl(dir, block);
                    parser.flush_into(&mut issues);
                    config.blocks.extend(parsed);
                }
                "terramate" => match parse_comment_style(source, block) {
                    Ok(Some(style)) => config.comment_style = Some(style),
                    Ok(None) => {}
                    Err(issue) => issues.log(issue),
                },
                other => tracing::trace!(block = other, "ignoring block"),
            }
        }

        for doc in documents.tmgen_documents() {
            let Some(label) = doc
                .source
                .path()
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(TMGEN_SUFFIX))
            else {
                continue;
            };

            config.blocks.push(GenerationBlock {
                label: label.to_string(),
                dir: dir.clone(),
                range: doc.source.range(None),
                source: doc.source.clone(),
                stack_filters: vec![],
                condition: None,
                inherit: None,
                lets: vec![],
                asserts: vec![],
                content: doc.body.clone(),
                is_implicit: true,
            });
        }

        if !issues.is_empty() {
            return Err(LoadError::Invalid(issues));
        }

        tracing::debug!(%dir, blocks = config.blocks.len(), "parsed generation blocks");
        Ok(config)
    }
}

/// Validate the label of a generation block
fn validate_label(label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err("label must not be empty".to_string());
    }
    if label.starts_with('/') {
        return Err(format!("label {label:?} must be a relative path"));
    }
    if label.split('/').any(|component| component == "..") {
        return Err(format!("label {label:?} must not contain '..'"));
    }
    Ok(())
}

struct BlockParser<'s> {
    source: &'s Arc<SourceFile>,
    /// identification of the block once its label is known
    block: Option<String>,
    issues: Diagnostics,
}

impl<'s> BlockParser<'s> {
    fn new(source: &'s Arc<SourceFile>) -> Self {
        Self {
            source,
            block: None,
            issues: Diagnostics::new(),
        }
    }

    fn issue(&mut self, span: Option<std::ops::Range<usize>>, message: impl ToString) {
        let range = self.source.range(span);
        self.issues
            .log(Diagnostic::at(ErrorKind::Parsing, range, message));
    }

    fn flush_into(self, issues: &mut Diagnostics) {
        for issue in self.issues.iter() {
            match &self.block {
                Some(block) => issues.log(issue.clone().in_block(block)),
                None => issues.log(issue.clone()),
            }
        }
    }

    fn parse_generate_hcl(&mut self, dir: &ProjectPath, block: &Block) -> Option<GenerationBlock> {
        let [label] = block.labels.as_slice() else {
            self.issue(
                block.span(),
                format!(
                    "{GENERATE_HCL} must have a single label, got {}",
                    block.labels.len()
                ),
            );
            return None;
        };
        let label = label.as_str().to_string();
        self.block = Some(format!("{GENERATE_HCL} {label:?}"));

        if let Err(message) = validate_label(&label) {
            self.issue(block.span(), message);
        }

        let mut condition = None;
        let mut inherit = None;
        for attribute in block.body.attributes() {
            let target = match attribute.key.value().as_str() {
                "condition" => &mut condition,
                "inherit" => &mut inherit,
                other => {
                    self.issue(attribute.span(), format!("unsupported attribute {other:?}"));
                    continue;
                }
            };
            *target = Some(ConfigExpr::from_attribute(self.source, attribute));
        }

        let mut lets: Vec<Let> = vec![];
        let mut asserts = vec![];
        let mut stack_filters = vec![];
        let mut content: Option<Body> = None;

        for child in block.body.blocks() {
            let ident = child.ident.value().as_str();
            if !child.labels.is_empty() {
                self.issue(child.span(), format!("{ident} block must not have labels"));
                continue;
            }

            match ident {
                "lets" => self.parse_lets(child, &mut lets),
                "assert" => asserts.extend(self.parse_assert(child)),
                "stack_filter" => stack_filters.extend(self.parse_stack_filter(child)),
                "content" => {
                    if content.is_some() {
                        self.issue(child.span(), "multiple content blocks");
                    } else {
                        content = Some(child.body.clone());
                    }
                }
                other => self.issue(child.span(), format!("unsupported block {other:?}")),
            }
        }

        let Some(content) = content else {
            self.issue(block.span(), "missing content block");
            return None;
        };

        if !self.issues.is_empty() {
            return None;
        }

        Some(GenerationBlock {
            label,
            dir: dir.clone(),
            range: self.source.range(block.span()),
            source: self.source.clone(),
            stack_filters,
            condition,
            inherit,
            lets,
            asserts,
            content,
            is_implicit: false,
        })
    }

    fn parse_lets(&mut self, block: &Block, lets: &mut Vec<Let>) {
        for nested in block.body.blocks() {
            self.issue(nested.span(), "lets must not contain blocks");
        }

        for attribute in block.body.attributes() {
            let name = attribute.key.value().as_str();
            if lets.iter().any(|existing| existing.name == name) {
                self.issue(attribute.span(), format!("let {name:?} is already defined"));
                continue;
            }

            lets.push(Let {
                name: name.to_string(),
                value: ConfigExpr::from_attribute(self.source, attribute),
            });
        }
    }

    fn parse_assert(&mut self, block: &Block) -> Option<AssertConfig> {
        for nested in block.body.blocks() {
            self.issue(nested.span(), "assert must not contain blocks");
        }

        let mut assertion = None;
        let mut message = None;
        let mut warning = None;
        for attribute in block.body.attributes() {
            let target = match attribute.key.value().as_str() {
                "assertion" => &mut assertion,
                "message" => &mut message,
                "warning" => &mut warning,
                other => {
                    self.issue(attribute.span(), format!("unsupported assert attribute {other:?}"));
                    continue;
                }
            };
            *target = Some(ConfigExpr::from_attribute(self.source, attribute));
        }

        match (assertion, message) {
            (Some(assertion), Some(message)) => Some(AssertConfig {
                range: self.source.range(block.span()),
                assertion,
                message,
                warning,
            }),
            _ => {
                self.issue(block.span(), "assert requires assertion and message");
                None
            }
        }
    }

    fn parse_stack_filter(&mut self, block: &Block) -> Option<StackFilter> {
        for nested in block.body.blocks() {
            self.issue(nested.span(), "stack_filter must not contain blocks");
        }

        let mut filter = StackFilter::default();
        for attribute in block.body.attributes() {
            let target = match attribute.key.value().as_str() {
                "project_paths" => &mut filter.project_paths,
                "repository_paths" => &mut filter.repository_paths,
                other => {
                    self.issue(
                        attribute.span(),
                        format!("unsupported stack_filter attribute {other:?}"),
                    );
                    continue;
                }
            };

            let expr: hcl::Expression = attribute.value.clone().into();
            let patterns = match EvalContext::new().eval(&expr) {
                Ok(value) => as_string_list(value),
                Err(err) => Err(err.to_string()),
            };

            let globs = patterns.and_then(|patterns| {
                patterns
                    .iter()
                    .map(|p| Glob::new(p).map_err(|e| format!("invalid glob {p:?}: {e}")))
                    .collect::<Result<Vec<_>, _>>()
            });

            match globs {
                Ok(globs) => *target = Some(globs),
                Err(message) => self.issue(attribute.value.span(), message),
            }
        }

        if block.body.attributes().next().is_none() {
            self.issue(
                block.span(),
                "stack_filter requires project_paths or repository_paths",
            );
        }

        (filter.project_paths.is_some() || filter.repository_paths.is_some()).then_some(filter)
    }
}

/// `terramate { config { generate { hcl_magic_header_comment_style = "#" } } }`
fn parse_comment_style(
    source: &SourceFile,
    terramate: &Block,
) -> Result<Option<CommentStyle>, Diagnostic> {
    let generate = terramate
        .body
        .blocks()
        .filter(|b| b.ident.value().as_str() == "config")
        .flat_map(|config| config.body.blocks())
        .filter(|b| b.ident.value().as_str() == "generate");

    let mut style = None;
    for attribute in generate.flat_map(|g| g.body.attributes()) {
        if attribute.key.value().as_str() != "hcl_magic_header_comment_style" {
            continue;
        }

        let range = source.range(attribute.value.span());
        let expr: hcl::Expression = attribute.value.clone().into();
        let parsed = match EvalContext::new().eval(&expr) {
            Ok(hcl::Value::String(s)) => s.parse::<CommentStyle>(),
            Ok(other) => Err(format!(
                "expected string, got {}",
                crate::value::type_name(&other)
            )),
            Err(err) => Err(err.to_string()),
        };

        match parsed {
            Ok(parsed) => style = Some(parsed),
            Err(message) => return Err(Diagnostic::at(ErrorKind::Parsing, range, message)),
        }
    }

    Ok(style)
}

/// Read access to the configuration of a project
pub trait ConfigTree {
    /// Generation blocks of `dir`, `None` if the directory has no configuration
    fn lookup(&self, dir: &ProjectPath) -> Result<Option<Vec<GenerationBlock>>, LoadError>;

    /// Header comment style configured for the whole project
    fn comment_style(&self) -> Result<CommentStyle, LoadError> {
        Ok(CommentStyle::default())
    }
}

/// Configuration read from disk below `root`
///
/// Each directory is parsed once. Ancestors shared by several stacks, and the root read for the comment style,
/// come from the cache afterwards.
#[derive(derive_new::new, Debug, Clone)]
pub struct FsConfigTree {
    root: PathBuf,
    #[new(default)]
    parsed: RefCell<BTreeMap<ProjectPath, Option<DirConfig>>>,
}

impl FsConfigTree {
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn load(&self, dir: &ProjectPath) -> Result<Option<DirConfig>, LoadError> {
        if let Some(cached) = self.parsed.borrow().get(dir) {
            return Ok(cached.clone());
        }

        let config = self.read(dir)?;
        self.parsed.borrow_mut().insert(dir.clone(), config.clone());
        Ok(config)
    }

    fn read(&self, dir: &ProjectPath) -> Result<Option<DirConfig>, LoadError> {
        tracing::debug!(%dir, "reading directory configuration");
        let host_dir = dir.host_path(&self.root);
        if !host_dir.is_dir() {
            return Ok(None);
        }

        let mut documents = HclDocuments::default();
        documents.load_directory(&host_dir)?;
        if documents.is_empty() {
            return Ok(None);
        }

        DirConfig::parse(dir, &documents).map(Some)
    }
}

impl ConfigTree for FsConfigTree {
    fn lookup(&self, dir: &ProjectPath) -> Result<Option<Vec<GenerationBlock>>, LoadError> {
        Ok(self.load(dir)?.map(|config| config.blocks))
    }

    fn comment_style(&self) -> Result<CommentStyle, LoadError> {
        Ok(self
            .load(&ProjectPath::root())?
            .and_then(|config| config.comment_style)
            .unwrap_or_default())
    }
}

/// Configuration held in memory, mostly useful for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigTree {
    dirs: BTreeMap<ProjectPath, DirConfig>,
}

impl MemoryConfigTree {
    pub fn insert(&mut self, dir: &str, documents: &HclDocuments) -> Result<(), LoadError> {
        let dir = ProjectPath::new(dir);
        let config = DirConfig::parse(&dir, documents)?;
        self.dirs.insert(dir, config);
        Ok(())
    }

    pub fn with(mut self, dir: &str, documents: &HclDocuments) -> Result<Self, LoadError> {
        self.insert(dir, documents)?;
        Ok(self)
    }
}

impl ConfigTree for MemoryConfigTree {
    fn lookup(&self, dir: &ProjectPath) -> Result<Option<Vec<GenerationBlock>>, LoadError> {
        Ok(self.dirs.get(dir).map(|config| config.blocks.clone()))
    }

    fn comment_style(&self) -> Result<CommentStyle, LoadError> {
        Ok(self
            .dirs
            .get(&ProjectPath::root())
            .and_then(|config| config.comment_style)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hcl_documents;
    use pretty_assertions::assert_eq;

    fn parse(docs: &HclDocuments) -> Result<DirConfig, LoadError> {
        DirConfig::parse(&ProjectPath::new("/stacks/a"), docs)
    }

    fn issues(docs: &HclDocuments) -> Vec<String> {
        match parse(docs) {
            Err(LoadError::Invalid(issues)) => issues.iter().map(|i| i.message.clone()).collect(),
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn explicit_block() {
        let docs = hcl_documents!(
            r#"
generate_hcl "main.hcl" {
  condition = true
  lets {
    name = "x"
  }
  assert {
    assertion = true
    message   = "ok"
  }
  stack_filter {
    project_paths = ["/stacks/*"]
  }
  content {
    a = let.name
  }
}

stack {
  name = "ignored"
}
"#
        );

        let config = parse(&docs).expect("valid");
        assert_eq!(config.blocks.len(), 1);

        let block = &config.blocks[0];
        assert_eq!(block.label, "main.hcl");
        assert_eq!(block.dir.as_str(), "/stacks/a");
        assert!(block.condition.is_some());
        assert!(block.inherit.is_none());
        assert_eq!(block.lets.len(), 1);
        assert_eq!(block.asserts.len(), 1);
        assert_eq!(block.stack_filters.len(), 1);
        assert!(!block.is_implicit);
        assert_eq!(block.describe(), r#"generate_hcl "main.hcl""#);
        assert_eq!(block.range.start.line, 2);
    }

    #[test]
    fn implicit_block() {
        let docs = hcl_documents! {
            "main.tf.tmgen" => "a = 1"
        };

        let config = parse(&docs).expect("valid");
        let block = &config.blocks[0];
        assert_eq!(block.label, "main.tf");
        assert!(block.is_implicit);
        assert_eq!(block.describe(), r#"tmgen file "main.tf.tmgen""#);
    }

    #[test]
    fn structural_issues_accumulate() {
        let docs = hcl_documents! {
            "a.tm.hcl" => r#"
generate_hcl "a" {
  unknown = 1
  content {}
  content {}
}
"#,
            "b.tm.hcl" => r#"
generate_hcl "b" "c" {
  content {}
}

generate_hcl "/abs" {
}
"#
        };

        assert_eq!(
            issues(&docs),
            vec![
                r#"unsupported attribute "unknown""#.to_string(),
                "multiple content blocks".to_string(),
                "generate_hcl must have a single label, got 2".to_string(),
                r#"label "/abs" must be a relative path"#.to_string(),
                "missing content block".to_string(),
            ]
        );
    }

    #[test]
    fn issues_name_their_block() {
        let docs = hcl_documents!(
            r#"
generate_hcl "x.hcl" {
  lets {
    a = 1
  }
  lets {
    a = 2
  }
  content {}
}
"#
        );

        let Err(LoadError::Invalid(issues)) = parse(&docs) else {
            panic!("expected invalid configuration");
        };
        let issue = issues.iter().next().expect("one issue");
        assert_eq!(issue.block.as_deref(), Some(r#"generate_hcl "x.hcl""#));
        assert_eq!(issue.message, r#"let "a" is already defined"#);
    }

    #[test]
    fn stack_filter_validation() {
        let docs = hcl_documents!(
            r#"
generate_hcl "x.hcl" {
  stack_filter {
  }
  stack_filter {
    project_paths = [global.dynamic]
  }
  content {}
}
"#
        );

        assert_eq!(issues(&docs).len(), 2);
    }

    #[test]
    fn comment_style() {
        let docs = hcl_documents!(
            r##"
terramate {
  config {
    generate {
      hcl_magic_header_comment_style = "#"
    }
  }
}
"##
        );
        assert_eq!(
            parse(&docs).expect("valid").comment_style,
            Some(CommentStyle::Hash)
        );

        let invalid = hcl_documents!(
            r#"
terramate {
  config {
    generate {
      hcl_magic_header_comment_style = ";"
    }
  }
}
"#
        );
        assert_eq!(issues(&invalid).len(), 1);
    }

    #[test]
    fn filesystem_tree() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join("stacks/a")).expect("mkdir");
        std::fs::write(
            root.path().join("stacks/a/gen.tm.hcl"),
            "generate_hcl \"a.hcl\" {\n  content {\n    a = 1\n  }\n}\n",
        )
        .expect("write");

        let tree = FsConfigTree::new(root.path().to_path_buf());
        assert!(tree.lookup(&ProjectPath::new("/stacks")).expect("ok").is_none());
        assert!(tree.lookup(&ProjectPath::new("/missing")).expect("ok").is_none());

        let blocks = tree
            .lookup(&ProjectPath::new("/stacks/a"))
            .expect("ok")
            .expect("configured");
        assert_eq!(blocks[0].label, "a.hcl");
        assert_eq!(tree.comment_style().expect("ok"), CommentStyle::Slash);
    }

    #[test]
    fn filesystem_tree_parses_each_directory_once() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::write(
            root.path().join("terramate.tm.hcl"),
            "terramate {\n  config {\n    generate {\n      hcl_magic_header_comment_style = \"#\"\n    }\n  }\n}\n",
        )
        .expect("write");

        let tree = FsConfigTree::new(root.path().to_path_buf());
        assert_eq!(tree.comment_style().expect("ok"), CommentStyle::Hash);
        assert!(tree.lookup(&ProjectPath::root()).expect("ok").is_some());

        // later reads come from the cache, not from disk
        std::fs::remove_file(root.path().join("terramate.tm.hcl")).expect("remove");
        assert_eq!(tree.comment_style().expect("ok"), CommentStyle::Hash);
        assert!(tree.lookup(&ProjectPath::root()).expect("ok").is_some());
    }
}
