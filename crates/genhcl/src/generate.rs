//! generation of the `generate_hcl` artifacts of a stack
//!
//! Every block visible from the stack runs through the same steps:
//!
//! 1. stack filters, a mismatch yields a non applicable artifact
//! 2. `lets` are bound into the `let` namespace
//! 3. `condition`, false yields a non applicable artifact
//! 4. `inherit`, false drops blocks declared in ancestor directories
//! 5. asserts, a failing non-warning assert yields an artifact without body
//! 6. content is partially evaluated and formatted
//!
//! Any error aborts the whole run. Artifacts are returned sorted by label.
use crate::assert::{eval_asserts, Assert};
use crate::config::{ConfigExpr, ConfigTree, GenerationBlock};
use crate::copy::Copier;
use crate::error::{Diagnostic, Error, ErrorKind};
use crate::eval::EvalContext;
use crate::filter;
use crate::lets::bind_lets;
use crate::loader::load_blocks;
use crate::project::{ProjectPath, Stack};
use crate::source::SourceRange;
use crate::stdlib;
use crate::value::{as_bool, type_name};
use crate::vendor::Vendoring;
use serde::Serialize;

pub const HEADER_MAGIC: &str = "TERRAMATE: GENERATED AUTOMATICALLY DO NOT EDIT";

/// Header written by old versions, still recognized as generated code
pub const HEADER_V0: &str = "// GENERATED BY TERRAMATE: DO NOT EDIT";

/// Comment style of the generated header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentStyle {
    #[default]
    Slash,
    Hash,
}

impl std::fmt::Display for CommentStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CommentStyle::Slash => "//",
            CommentStyle::Hash => "#",
        })
    }
}

impl std::str::FromStr for CommentStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "//" => Ok(CommentStyle::Slash),
            "#" => Ok(CommentStyle::Hash),
            other => Err(format!(
                "invalid comment style {other:?}, expected \"//\" or \"#\""
            )),
        }
    }
}

pub fn header(style: CommentStyle) -> String {
    format!("{style} {HEADER_MAGIC}\n\n")
}

/// Whether `text` was written by a generation run
pub fn is_generated_code(text: &str) -> bool {
    let Some(first_line) = text.lines().next() else {
        return false;
    };
    let first_line = first_line.trim_end();

    first_line == HEADER_V0
        || [CommentStyle::Slash, CommentStyle::Hash]
            .iter()
            .any(|style| first_line == format!("{style} {HEADER_MAGIC}"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedArtifact {
    label: String,
    range: SourceRange,
    condition: bool,
    body: String,
    asserts: Vec<Assert>,
    comment_style: CommentStyle,
}

impl GeneratedArtifact {
    fn empty(block: &GenerationBlock, condition: bool, comment_style: CommentStyle) -> Self {
        Self {
            label: block.label.clone(),
            range: block.range.clone(),
            condition,
            body: String::new(),
            asserts: vec![],
            comment_style,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn range(&self) -> &SourceRange {
        &self.range
    }

    /// Whether the block applies to the stack
    pub fn condition(&self) -> bool {
        self.condition
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn asserts(&self) -> &[Assert] {
        &self.asserts
    }

    pub fn comment_style(&self) -> CommentStyle {
        self.comment_style
    }

    pub fn header(&self) -> String {
        header(self.comment_style)
    }

    /// Header and body as written to disk
    pub fn file_contents(&self) -> String {
        format!("{}{}", self.header(), self.body)
    }
}

impl std::fmt::Display for GeneratedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} (from {})", self.label, self.range)?;
        writeln!(f, "condition: {}", self.condition)?;
        for assert in &self.asserts {
            let state = match (assert.assertion, assert.warning) {
                (true, _) => "passed",
                (false, true) => "warning",
                (false, false) => "failed",
            };
            writeln!(f, "assert {state}: {}", assert.message)?;
        }
        if !self.body.is_empty() {
            writeln!(f)?;
            f.write_str(&self.header())?;
            f.write_str(&self.body)?;
        }
        Ok(())
    }
}

/// Generate every artifact of `stack`
///
/// `ctx` carries the stack wide namespaces (`global`, `terramate`). Each block evaluates in its own copy of it.
#[tracing::instrument(skip_all, fields(stack = %stack.dir))]
pub fn generate(
    tree: &impl ConfigTree,
    stack: &Stack,
    ctx: &EvalContext,
    vendoring: &Vendoring,
) -> Result<Vec<GeneratedArtifact>, Error> {
    let comment_style = tree.comment_style()?;
    let blocks = load_blocks(tree, &stack.dir)?;

    let mut artifacts = vec![];
    for block in &blocks {
        let artifact = BlockGenerator::new(block, stack, vendoring, comment_style)
            .generate(ctx)
            .map_err(|err| err.in_block(&block.describe()))?;

        artifacts.extend(artifact);
    }

    artifacts.sort_by(|a, b| a.label.cmp(&b.label));
    tracing::info!(count = artifacts.len(), "generated");
    Ok(artifacts)
}

#[derive(derive_new::new)]
struct BlockGenerator<'a> {
    block: &'a GenerationBlock,
    stack: &'a Stack,
    vendoring: &'a Vendoring,
    comment_style: CommentStyle,
}

impl<'a> BlockGenerator<'a> {
    /// `None` when the block is not inherited by the stack
    #[tracing::instrument(level = "debug", skip_all, fields(label = %self.block.label))]
    fn generate(&self, ctx: &EvalContext) -> Result<Option<GeneratedArtifact>, Error> {
        let block = self.block;

        if !filter::matches(&block.stack_filters, self.stack) {
            tracing::debug!("stack filters do not match");
            return Ok(Some(self.empty(false)));
        }

        let mut ctx = ctx.copy();
        ctx.set_function(
            stdlib::VENDOR,
            stdlib::vendor_func(self.target_dir(), self.vendoring),
        );
        bind_lets(&mut ctx, &block.lets)?;

        if let Some(condition) = &block.condition {
            let condition = self.eval_bool(
                &ctx,
                condition,
                ErrorKind::ConditionEval,
                ErrorKind::InvalidConditionType,
            )?;
            if !condition {
                tracing::debug!("condition is false");
                return Ok(Some(self.empty(false)));
            }
        }

        if let Some(inherit) = &block.inherit {
            let inherit = self.eval_bool(
                &ctx,
                inherit,
                ErrorKind::InheritEval,
                ErrorKind::InvalidInheritType,
            )?;
            if !inherit && block.dir != self.stack.dir {
                tracing::debug!(declared = %block.dir, "not inherited");
                return Ok(None);
            }
        }

        let asserts = eval_asserts(&ctx, &block.asserts)?;
        if asserts.iter().any(Assert::is_blocking) {
            tracing::debug!("failed assertion, skipping content");
            return Ok(Some(GeneratedArtifact {
                asserts,
                ..self.empty(true)
            }));
        }

        ctx.set_function(stdlib::HCL_EXPRESSION, stdlib::hcl_expression_func());

        let mut body = hcl::Body::default();
        Copier::new(&block.source).copy_body(&mut body, &block.content, &ctx)?;

        let body = hcl::format::to_string(&body).map_err(|err| {
            Diagnostic::at(ErrorKind::Formatting, block.range.clone(), err)
        })?;

        Ok(Some(GeneratedArtifact {
            asserts,
            body,
            ..self.empty(true)
        }))
    }

    fn empty(&self, condition: bool) -> GeneratedArtifact {
        GeneratedArtifact::empty(self.block, condition, self.comment_style)
    }

    /// Directory the artifact is written to
    fn target_dir(&self) -> ProjectPath {
        self.stack.dir.join(&self.block.label).dir()
    }

    fn eval_bool(
        &self,
        ctx: &EvalContext,
        config: &ConfigExpr,
        eval_kind: ErrorKind,
        type_kind: ErrorKind,
    ) -> Result<bool, Diagnostic> {
        let value = ctx
            .eval(&config.expr)
            .map_err(|err| Diagnostic::at(eval_kind, config.range.clone(), err))?;

        as_bool(&value).ok_or_else(|| {
            Diagnostic::at(
                type_kind,
                config.range.clone(),
                format!("must be bool, got {}", type_name(&value)),
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::MemoryConfigTree;
    use crate::hcl_documents;
    use pretty_assertions::assert_eq;

    fn stack_ctx(stack: &Stack) -> EvalContext {
        let mut globals = hcl::value::Map::new();
        globals.insert("env".to_string(), hcl::Value::String("prod".to_string()));
        EvalContext::for_stack(stack).with_globals(globals)
    }

    fn run(tree: &MemoryConfigTree, stack: &str) -> Result<Vec<GeneratedArtifact>, Error> {
        let stack = Stack::new(ProjectPath::new(stack));
        generate(tree, &stack, &stack_ctx(&stack), &Vendoring::default())
    }

    fn tree(dir: &str, text: &str) -> MemoryConfigTree {
        MemoryConfigTree::default()
            .with(dir, &hcl_documents!(text))
            .expect("valid config")
    }

    #[test]
    fn headers() {
        assert_eq!(
            header(CommentStyle::Slash),
            "// TERRAMATE: GENERATED AUTOMATICALLY DO NOT EDIT\n\n"
        );
        assert_eq!(
            header(CommentStyle::Hash),
            "# TERRAMATE: GENERATED AUTOMATICALLY DO NOT EDIT\n\n"
        );
    }

    #[test]
    fn generated_code_detection() {
        assert!(is_generated_code(&header(CommentStyle::Hash)));
        assert!(is_generated_code("// GENERATED BY TERRAMATE: DO NOT EDIT\n\na = 1\n"));
        assert!(!is_generated_code("a = 1\n"));
        assert!(!is_generated_code(""));
    }

    #[test]
    fn comment_styles_round_trip_through_text() {
        assert_eq!("#".parse::<CommentStyle>(), Ok(CommentStyle::Hash));
        assert_eq!(CommentStyle::default().to_string(), "//");
        assert!(";".parse::<CommentStyle>().is_err());
    }

    #[test]
    fn content_uses_stack_metadata_and_lets() {
        let tree = tree(
            "/stacks/a",
            r#"
generate_hcl "main.hcl" {
  lets {
    prefix = "${global.env}-"
  }
  content {
    name = "${let.prefix}${terramate.stack.name}"
  }
}
"#,
        );

        let artifacts = run(&tree, "/stacks/a").expect("generates");
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].condition());
        assert_eq!(
            hcl::parse(artifacts[0].body()).expect("valid"),
            hcl::parse("name = \"prod-a\"").expect("valid")
        );
    }

    #[test]
    fn condition_type_is_checked() {
        let tree = tree(
            "/",
            "generate_hcl \"a\" {\n  condition = \"yes\"\n  content {}\n}\n",
        );

        let err = run(&tree, "/stack").expect_err("must fail");
        assert_eq!(err.kinds(), vec![ErrorKind::InvalidConditionType]);
        assert!(err.to_string().contains(r#"generate_hcl "a": "#));
    }

    #[test]
    fn lets_errors_are_fatal() {
        let tree = tree(
            "/",
            "generate_hcl \"a\" {\n  lets {\n    x = global.missing\n  }\n  content {}\n}\n",
        );

        let err = run(&tree, "/stack").expect_err("must fail");
        assert_eq!(err.kinds(), vec![ErrorKind::LetsEval]);
        assert!(err.to_string().contains("evaluating lets"));
    }

    #[test]
    fn hcl_expression_is_emitted_verbatim() {
        let tree = tree(
            "/stack",
            r#"
generate_hcl "a.hcl" {
  content {
    ref = tm_hcl_expression("aws_vpc.${global.env}.id")
  }
}
"#,
        );

        let artifacts = run(&tree, "/stack").expect("generates");
        assert_eq!(
            hcl::parse(artifacts[0].body()).expect("valid"),
            hcl::parse("ref = aws_vpc.prod.id").expect("valid")
        );
    }

    #[test]
    fn hcl_expression_is_rejected_outside_content() {
        let tree = tree(
            "/stack",
            r#"
generate_hcl "a.hcl" {
  condition = tm_hcl_expression("true")
  content {}
}
"#,
        );

        // only registered for content, so it is an unknown reserved function here
        let err = run(&tree, "/stack").expect_err("must fail");
        assert_eq!(err.kinds(), vec![ErrorKind::ConditionEval]);
    }

    #[test]
    fn vendor_paths_are_relative_to_the_target() {
        let tree = tree(
            "/stacks/a",
            r#"
generate_hcl "modules/main.tf" {
  content {
    source = tm_vendor("github.com/acme/vpc?ref=v1")
  }
}
"#,
        );

        let (tx, rx) = std::sync::mpsc::sync_channel(4);
        let stack = Stack::new(ProjectPath::new("/stacks/a"));
        let vendoring = Vendoring::new(ProjectPath::new("/vendor"), Some(tx));
        let artifacts = generate(&tree, &stack, &stack_ctx(&stack), &vendoring).expect("generates");

        assert_eq!(
            hcl::parse(artifacts[0].body()).expect("valid"),
            hcl::parse("source = \"../../../vendor/github.com/acme/vpc/v1\"").expect("valid")
        );
        let request = rx.try_recv().expect("vendor request sent");
        assert_eq!(request.source.repository, "github.com/acme/vpc");
    }

    #[test]
    fn display() {
        let tree = tree(
            "/",
            r#"
generate_hcl "a.hcl" {
  assert {
    assertion = false
    message   = "careful"
    warning   = true
  }
  content {
    a = 1
  }
}
"#,
        );

        let artifacts = run(&tree, "/").expect("generates");
        let shown = artifacts[0].to_string();
        let (first, rest) = shown.split_once('\n').expect("multi line");

        assert!(first.starts_with("a.hcl (from config.tm.hcl:2,1-"));
        insta::assert_snapshot!(rest, @r###"
        condition: true
        assert warning: careful

        // TERRAMATE: GENERATED AUTOMATICALLY DO NOT EDIT

        a = 1
        "###);
    }
}
