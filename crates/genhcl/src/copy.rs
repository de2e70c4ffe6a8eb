//! partial evaluation of content bodies
//!
//! [Copier::copy_body] rebuilds a parsed `hcl_edit` body as an [hcl::Body]. Attribute values are partially evaluated:
//! whatever is resolvable becomes a literal, references to unknown namespaces stay as written. Attributes are
//! emitted in lexical order, nested blocks in source order. `tm_dynamic` blocks are handed to the
//! [dynamic](crate::dynamic) expander which in turn copies its `content` through here.
use crate::dynamic;
use crate::error::{Diagnostic, Error, ErrorKind};
use crate::eval::EvalContext;
use crate::source::SourceFile;
use hcl_edit::structure::{Block, Body};
use hcl_edit::Span;

pub const TM_DYNAMIC: &str = "tm_dynamic";

/// Nested block classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Dynamic,
    Plain,
}

impl BlockKind {
    fn of(block: &Block) -> Self {
        match block.ident.value().as_str() {
            TM_DYNAMIC => BlockKind::Dynamic,
            _ => BlockKind::Plain,
        }
    }
}

#[derive(derive_new::new, Debug, Clone, Copy)]
pub struct Copier<'a> {
    source: &'a SourceFile,
}

impl<'a> Copier<'a> {
    pub fn source(&self) -> &'a SourceFile {
        self.source
    }

    pub fn copy_body(&self, dest: &mut hcl::Body, src: &Body, ctx: &EvalContext) -> Result<(), Error> {
        let mut attributes: Vec<_> = src.attributes().collect();
        attributes.sort_by(|a, b| a.key.value().as_str().cmp(b.key.value().as_str()));

        for attribute in attributes {
            let name = attribute.key.value().as_str();
            let expr: hcl::Expression = attribute.value.clone().into();
            let evaluated = ctx.partial_eval(&expr).map_err(|err| {
                Diagnostic::at(
                    ErrorKind::ContentEval,
                    self.source.range(attribute.value.span()),
                    format!("{name}: {err}"),
                )
            })?;

            set_attribute(dest, name, evaluated);
        }

        for block in src.blocks() {
            match BlockKind::of(block) {
                BlockKind::Dynamic => dynamic::expand(self, dest, block, ctx)?,
                BlockKind::Plain => {
                    let mut body = hcl::Body::default();
                    self.copy_body(&mut body, &block.body, ctx)?;

                    let labels = block
                        .labels
                        .iter()
                        .map(|label| label.as_str().to_string())
                        .collect();
                    push_block(dest, block.ident.value().as_str(), labels, body);
                }
            }
        }

        Ok(())
    }
}

/// Set `name`, replacing an attribute of the same name
pub(crate) fn set_attribute(body: &mut hcl::Body, name: &str, expr: hcl::Expression) {
    for structure in body.0.iter_mut() {
        if let hcl::Structure::Attribute(attribute) = structure {
            if attribute.key.as_str() == name {
                attribute.expr = expr;
                return;
            }
        }
    }

    body.0.push(hcl::Structure::Attribute(hcl::Attribute {
        key: hcl::Identifier::unchecked(name),
        expr,
    }));
}

pub(crate) fn push_block(body: &mut hcl::Body, ident: &str, labels: Vec<String>, block_body: hcl::Body) {
    body.0.push(hcl::Structure::Block(hcl::Block {
        identifier: hcl::Identifier::unchecked(ident),
        labels: labels.into_iter().map(hcl::BlockLabel::String).collect(),
        body: block_body,
    }));
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Copy `text` as a content body and render it
    pub(crate) fn copy(ctx: &EvalContext, text: &str) -> Result<String, Error> {
        let source = SourceFile::new("test.tm.hcl", text);
        let body = hcl_edit::parser::parse_body(source.text()).expect("valid hcl");

        let mut dest = hcl::Body::default();
        Copier::new(&source).copy_body(&mut dest, &body, ctx)?;
        Ok(hcl::format::to_string(&dest).expect("formats"))
    }

    pub(crate) fn ctx() -> EvalContext {
        let mut globals = hcl::value::Map::new();
        globals.insert("env".to_string(), hcl::Value::String("prod".to_string()));
        EvalContext::new().with_globals(globals)
    }

    fn parsed(text: &str) -> hcl::Body {
        hcl::parse(text).expect("valid hcl")
    }

    #[test]
    fn attributes_sorted_and_evaluated() {
        let out = copy(&ctx(), "b = global.env\na = 1 + 1\n").expect("copies");
        assert_eq!(parsed(&out), parsed("a = 2\nb = \"prod\"\n"));
        assert!(out.find("a =") < out.find("b ="));
    }

    #[test]
    fn unknown_namespaces_are_preserved() {
        let out = copy(
            &ctx(),
            "env = global.env\nid = module.vpc.id\nname = \"${var.prefix}-bucket\"\n",
        )
        .expect("copies");

        assert_eq!(
            parsed(&out),
            parsed("env = \"prod\"\nid = module.vpc.id\nname = \"${var.prefix}-bucket\"\n")
        );
    }

    #[test]
    fn nested_blocks_keep_type_and_labels() {
        let out = copy(
            &ctx(),
            r#"
resource "aws_s3_bucket" "b" {
  bucket = global.env
  versioning {
    enabled = true
  }
}
"#,
        )
        .expect("copies");

        assert_eq!(
            parsed(&out),
            parsed(
                r#"
resource "aws_s3_bucket" "b" {
  bucket = "prod"
  versioning {
    enabled = true
  }
}
"#
            )
        );
    }

    #[test]
    fn partially_known_expressions_resolve_their_known_parts() {
        let out = copy(
            &ctx(),
            r#"
a = "${global.env}-${var.x}"
d = var.flag ? global.env : "dev"
g = global.env == "prod" ? var.a : var.b
l = [for x in var.list : "${global.env}-${x}"]
"#,
        )
        .expect("copies");

        assert_eq!(
            parsed(&out),
            parsed(
                r#"
a = "prod-${var.x}"
d = var.flag ? "prod" : "dev"
g = var.a
l = [for x in var.list : "prod-${x}"]
"#
            )
        );
    }

    #[test]
    fn literal_only_content_is_context_independent() {
        let text = "a = 1\nb = [true, \"x\"]\nc = { k = null }\n";
        let with_globals = copy(&ctx(), text).expect("copies");
        let without = copy(&EvalContext::new(), text).expect("copies");
        assert_eq!(parsed(&with_globals), parsed(&without));
    }

    #[test]
    fn evaluation_errors_carry_the_range() {
        let err = copy(&ctx(), "a = 1\nb = global.missing\n").expect_err("missing global");

        let Error::Diagnostic(issue) = err else {
            panic!("expected a single diagnostic");
        };
        assert_eq!(issue.kind, ErrorKind::ContentEval);
        assert_eq!(issue.range.map(|r| r.start.line), Some(2));
    }

    #[test]
    fn set_attribute_replaces() {
        let mut body = hcl::Body::default();
        set_attribute(&mut body, "a", hcl::Expression::Bool(true));
        set_attribute(&mut body, "a", hcl::Expression::Bool(false));
        assert_eq!(body, parsed("a = false"));
    }
}
