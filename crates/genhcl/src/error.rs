//! error types
//!
//! Every user facing failure is a [Diagnostic]: a stable [ErrorKind], a message, and (when known) the
//! [SourceRange] and the generation block it originates from. Structural problems are collected in [Diagnostics]
//! so a single run reports all of them.
use crate::source::SourceRange;
use std::path::PathBuf;

/// Stable classification of failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// malformed `generate_hcl` or `tm_dynamic` usage
    Parsing,
    LetsEval,
    ConditionEval,
    InvalidConditionType,
    InheritEval,
    InvalidInheritType,
    AssertEval,
    ContentEval,
    DynamicLabelCount,
    DynamicUnsupportedAttribute,
    InvalidDynamicIterator,
    InvalidDynamicLabels,
    DynamicForEachEval,
    InvalidDynamicForEach,
    DynamicAttrsEval,
    InvalidDynamicAttrsKey,
    InvalidDynamicAttrName,
    DynamicConditionEval,
    InvalidDynamicConditionType,
    DynamicAttrsConflict,
    Formatting,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Parsing => "parsing generate_hcl block",
            ErrorKind::LetsEval => "evaluating lets",
            ErrorKind::ConditionEval => "evaluating condition attribute",
            ErrorKind::InvalidConditionType => "invalid condition type",
            ErrorKind::InheritEval => "evaluating inherit attribute",
            ErrorKind::InvalidInheritType => "invalid inherit type",
            ErrorKind::AssertEval => "evaluating assert",
            ErrorKind::ContentEval => "evaluating content",
            ErrorKind::DynamicLabelCount => "invalid tm_dynamic label count",
            ErrorKind::DynamicUnsupportedAttribute => "unsupported tm_dynamic attribute",
            ErrorKind::InvalidDynamicIterator => "invalid tm_dynamic.iterator",
            ErrorKind::InvalidDynamicLabels => "invalid tm_dynamic.labels",
            ErrorKind::DynamicForEachEval => "evaluating tm_dynamic.for_each",
            ErrorKind::InvalidDynamicForEach => "invalid tm_dynamic.for_each",
            ErrorKind::DynamicAttrsEval => "evaluating tm_dynamic.attributes",
            ErrorKind::InvalidDynamicAttrsKey => "invalid tm_dynamic.attributes key",
            ErrorKind::InvalidDynamicAttrName => "invalid tm_dynamic.attributes name",
            ErrorKind::DynamicConditionEval => "evaluating tm_dynamic.condition",
            ErrorKind::InvalidDynamicConditionType => "invalid tm_dynamic.condition type",
            ErrorKind::DynamicAttrsConflict => {
                "tm_dynamic.attributes and tm_dynamic.content have conflicting fields"
            }
            ErrorKind::Formatting => "formatting generated code",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub range: Option<SourceRange>,
    /// identifies the generation block, e.g. `generate_hcl "main.hcl"`
    pub block: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, range: Option<SourceRange>, message: impl ToString) -> Self {
        Self {
            kind,
            message: message.to_string(),
            range,
            block: None,
        }
    }

    pub fn at(kind: ErrorKind, range: SourceRange, message: impl ToString) -> Self {
        Self::new(kind, Some(range), message)
    }

    /// Attach the identifying block unless a more specific one is already set
    pub fn in_block(mut self, block: &str) -> Self {
        self.block.get_or_insert_with(|| block.to_string());
        self
    }
}

impl std::error::Error for Diagnostic {}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(range) = &self.range {
            write!(f, "{range}: ")?;
        }
        if let Some(block) = &self.block {
            write!(f, "{block}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Collect-then-flush list of [Diagnostic]s
#[derive(derive_new::new, Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    #[new(default)]
    issues: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn log(&mut self, issue: Diagnostic) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.issues.iter()
    }
}

impl std::error::Error for Diagnostics {}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file {}", path.display())]
    HclParseFailed {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
    #[error("invalid configuration\n{0}")]
    Invalid(Diagnostics),
}

/// The error of a generation run
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("loading generate_hcl: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Diagnostic(#[from] Diagnostic),
    #[error(transparent)]
    Diagnostics(#[from] Diagnostics),
}

impl Error {
    /// All kinds carried by this error
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self {
            Error::Diagnostic(issue) => vec![issue.kind],
            Error::Diagnostics(issues) | Error::Load(LoadError::Invalid(issues)) => {
                issues.iter().map(|issue| issue.kind).collect()
            }
            Error::Load(_) => vec![],
        }
    }

    pub(crate) fn in_block(self, block: &str) -> Self {
        match self {
            Error::Diagnostic(issue) => Error::Diagnostic(issue.in_block(block)),
            Error::Diagnostics(issues) => Error::Diagnostics(Diagnostics {
                issues: issues.issues.into_iter().map(|i| i.in_block(block)).collect(),
            }),
            other => other,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn diagnostics_keep_every_issue() {
        let mut issues = Diagnostics::new();
        issues.log(Diagnostic::new(ErrorKind::Parsing, None, "first"));
        issues.log(Diagnostic::new(ErrorKind::DynamicUnsupportedAttribute, None, "second"));

        let error = Error::Diagnostics(issues).in_block(r#"generate_hcl "a""#);
        assert_eq!(
            error.kinds(),
            vec![ErrorKind::Parsing, ErrorKind::DynamicUnsupportedAttribute]
        );
        insta::assert_snapshot!(error.to_string(), @r###"
        generate_hcl "a": parsing generate_hcl block: first
        generate_hcl "a": unsupported tm_dynamic attribute: second
        "###);
    }
}
