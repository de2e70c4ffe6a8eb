//! `tm_dynamic` block expansion
//!
//! ```hcl
//! tm_dynamic "ingress" {
//!   for_each  = global.ports
//!   iterator  = port
//!   labels    = ["rule"]
//!   condition = tm_length(global.ports) > 0
//!   attributes = {
//!     from_port = port.value
//!   }
//!   content {
//!     protocol = "tcp"
//!   }
//! }
//! ```
//!
//! produces one `ingress "rule" { ... }` block per element of `global.ports`. The iterator (named after the
//! generated block type unless `iterator` says otherwise) is bound to `{key, value}` in a scope that only lives for
//! the expansion.
use crate::config::ConfigExpr;
use crate::copy::{push_block, set_attribute, Copier};
use crate::error::{Diagnostic, Diagnostics, Error, ErrorKind};
use crate::eval::EvalContext;
use crate::source::SourceFile;
use crate::value::{as_string_list, is_valid_identifier, iter_elements, type_name};
use hcl::Value;
use hcl_edit::expr::{Expression, Object, ObjectKey};
use hcl_edit::structure::{Block, Body};
use hcl_edit::Span;
use std::collections::HashSet;

/// Control data of one `tm_dynamic` block
#[derive(Debug)]
struct DynamicBlockSpec<'b> {
    /// type of the generated blocks
    generated_type: String,
    attributes: Option<ConfigExpr>,
    /// `attributes` written as an object literal, evaluated entry by entry
    attributes_object: Option<&'b Object>,
    iterator: Option<ConfigExpr>,
    for_each: Option<ConfigExpr>,
    labels: Option<ConfigExpr>,
    condition: Option<ConfigExpr>,
    content: Option<&'b Body>,
}

impl<'b> DynamicBlockSpec<'b> {
    fn parse(source: &SourceFile, block: &'b Block) -> Result<Self, Diagnostics> {
        let mut issues = Diagnostics::new();
        let range = source.range(block.span());

        let generated_type = match block.labels.as_slice() {
            [label] if is_valid_identifier(label.as_str()) => label.as_str().to_string(),
            [label] => {
                issues.log(Diagnostic::at(
                    ErrorKind::DynamicLabelCount,
                    range.clone(),
                    format!("{:?} is not a valid block type", label.as_str()),
                ));
                String::new()
            }
            labels => {
                issues.log(Diagnostic::at(
                    ErrorKind::DynamicLabelCount,
                    range.clone(),
                    format!("expected a single label, got {}", labels.len()),
                ));
                String::new()
            }
        };

        let mut spec = Self {
            generated_type,
            attributes: None,
            attributes_object: None,
            iterator: None,
            for_each: None,
            labels: None,
            condition: None,
            content: None,
        };

        let mut unsupported = vec![];
        for attribute in block.body.attributes() {
            let name = attribute.key.value().as_str();
            let target = match name {
                "attributes" => &mut spec.attributes,
                "iterator" => &mut spec.iterator,
                "for_each" => &mut spec.for_each,
                "labels" => &mut spec.labels,
                "condition" => &mut spec.condition,
                _ => {
                    unsupported.push(name.to_string());
                    continue;
                }
            };

            if target.is_some() {
                issues.log(Diagnostic::at(
                    ErrorKind::DynamicUnsupportedAttribute,
                    source.range(attribute.span()),
                    format!("duplicate attribute {name:?}"),
                ));
                continue;
            }
            *target = Some(ConfigExpr::from_attribute(source, attribute));
        }

        spec.attributes_object = match block.body.get_attribute("attributes").map(|a| &a.value) {
            Some(Expression::Object(object)) => Some(object),
            _ => None,
        };

        if !unsupported.is_empty() {
            issues.log(Diagnostic::at(
                ErrorKind::DynamicUnsupportedAttribute,
                range.clone(),
                format!("unsupported attributes: {}", unsupported.join(", ")),
            ));
        }

        for nested in block.body.blocks() {
            let ident = nested.ident.value().as_str();
            if ident != "content" {
                issues.log(Diagnostic::at(
                    ErrorKind::Parsing,
                    source.range(nested.span()),
                    format!("unsupported block {ident:?} inside tm_dynamic"),
                ));
                continue;
            }
            if spec.content.is_some() {
                issues.log(Diagnostic::at(
                    ErrorKind::Parsing,
                    source.range(nested.span()),
                    "multiple tm_dynamic.content blocks",
                ));
                continue;
            }
            spec.content = Some(&nested.body);
        }

        if spec.attributes.is_none() && spec.content.is_none() {
            issues.log(Diagnostic::at(
                ErrorKind::Parsing,
                range,
                "tm_dynamic requires attributes or a content block",
            ));
        }

        if !issues.is_empty() {
            return Err(issues);
        }
        Ok(spec)
    }
}

/// Expand `block` into `dest`
#[tracing::instrument(level = "debug", skip_all, fields(generated_type))]
pub(crate) fn expand(
    copier: &Copier<'_>,
    dest: &mut hcl::Body,
    block: &Block,
    ctx: &EvalContext,
) -> Result<(), Error> {
    let spec = DynamicBlockSpec::parse(copier.source(), block).map_err(Error::Diagnostics)?;
    tracing::Span::current().record("generated_type", spec.generated_type.as_str());

    if let Some(condition) = &spec.condition {
        let value = ctx.eval(&condition.expr).map_err(|err| {
            Diagnostic::at(ErrorKind::DynamicConditionEval, condition.range.clone(), err)
        })?;

        match value {
            Value::Bool(true) => {}
            Value::Bool(false) => {
                tracing::debug!("condition is false, skipping");
                return Ok(());
            }
            other => {
                return Err(Diagnostic::at(
                    ErrorKind::InvalidDynamicConditionType,
                    condition.range.clone(),
                    format!("must be bool, got {}", type_name(&other)),
                )
                .into())
            }
        }
    }

    let Some(for_each) = &spec.for_each else {
        if let Some(iterator) = &spec.iterator {
            return Err(Diagnostic::at(
                ErrorKind::InvalidDynamicIterator,
                iterator.range.clone(),
                "iterator requires for_each",
            )
            .into());
        }
        return expand_once(copier, dest, &spec, ctx);
    };

    let collection = ctx.eval(&for_each.expr).map_err(|err| {
        Diagnostic::at(ErrorKind::DynamicForEachEval, for_each.range.clone(), err)
    })?;
    let collection_type = type_name(&collection);
    let elements = iter_elements(collection).ok_or_else(|| {
        Diagnostic::at(
            ErrorKind::InvalidDynamicForEach,
            for_each.range.clone(),
            format!("must be a collection, got {collection_type}"),
        )
    })?;

    let iterator = match &spec.iterator {
        None => spec.generated_type.clone(),
        Some(iterator) => match &iterator.expr {
            hcl::Expression::Variable(var) => var.as_str().to_string(),
            _ => {
                return Err(Diagnostic::at(
                    ErrorKind::InvalidDynamicIterator,
                    iterator.range.clone(),
                    "must be a single identifier",
                )
                .into())
            }
        },
    };

    tracing::debug!(%iterator, count = elements.len(), "expanding");

    let mut scope = ctx.copy();
    let result = elements.into_iter().try_for_each(|(key, value)| {
        let binding = [("key".to_string(), key), ("value".to_string(), value)]
            .into_iter()
            .collect();
        scope.set_namespace(&iterator, binding);
        expand_once(copier, dest, &spec, &scope)
    });
    scope.delete_namespace(&iterator);

    result
}

/// Produce a single block of the generated type
fn expand_once(
    copier: &Copier<'_>,
    dest: &mut hcl::Body,
    spec: &DynamicBlockSpec<'_>,
    ctx: &EvalContext,
) -> Result<(), Error> {
    let labels = match &spec.labels {
        None => vec![],
        Some(labels) => ctx
            .eval(&labels.expr)
            .map_err(|err| err.to_string())
            .and_then(as_string_list)
            .map_err(|message| {
                Diagnostic::at(ErrorKind::InvalidDynamicLabels, labels.range.clone(), message)
            })?,
    };

    let mut body = hcl::Body::default();
    let mut from_attributes = HashSet::new();

    if let Some(attributes) = &spec.attributes {
        let evaluated = match spec.attributes_object {
            Some(object) => eval_attribute_entries(copier.source(), object, ctx)?,
            None => eval_attributes(attributes, ctx)?,
        };
        for (name, expr) in evaluated {
            set_attribute(&mut body, &name, expr);
            from_attributes.insert(name);
        }
    }

    if let Some(content) = spec.content {
        if let Some(conflict) = content
            .attributes()
            .find(|attribute| from_attributes.contains(attribute.key.value().as_str()))
        {
            return Err(Diagnostic::at(
                ErrorKind::DynamicAttrsConflict,
                copier.source().range(conflict.span()),
                format!(
                    "{:?} is set by both attributes and content",
                    conflict.key.value().as_str()
                ),
            )
            .into());
        }

        copier.copy_body(&mut body, content, ctx)?;
    }

    push_block(dest, &spec.generated_type, labels, body);
    Ok(())
}

/// Evaluate the entries of an `attributes` object literal
///
/// Keys are fully evaluated, values partially. Issues point at the offending key or value.
fn eval_attribute_entries(
    source: &SourceFile,
    object: &Object,
    ctx: &EvalContext,
) -> Result<Vec<(String, hcl::Expression)>, Diagnostic> {
    let mut result = Vec::with_capacity(object.len());

    for (key, value) in object.iter() {
        let key_range = source.range(key.span());
        let name = match key {
            ObjectKey::Ident(ident) => ident.value().as_str().to_string(),
            ObjectKey::Expression(expr) => {
                let key_value = ctx.eval(&expr.clone().into()).map_err(|err| {
                    Diagnostic::at(ErrorKind::DynamicAttrsEval, key_range.clone(), err)
                })?;
                match key_value {
                    Value::String(name) => name,
                    other => {
                        return Err(Diagnostic::at(
                            ErrorKind::InvalidDynamicAttrsKey,
                            key_range,
                            format!("keys must be strings, got {}", type_name(&other)),
                        ))
                    }
                }
            }
        };

        if !is_valid_identifier(&name) {
            return Err(Diagnostic::at(
                ErrorKind::InvalidDynamicAttrName,
                key_range,
                format!("{name:?} is not a valid attribute name"),
            ));
        }

        let expr = ctx.partial_eval(&value.expr().clone().into()).map_err(|err| {
            Diagnostic::at(
                ErrorKind::DynamicAttrsEval,
                source.range(value.expr().span()),
                format!("{name}: {err}"),
            )
        })?;
        result.push((name, expr));
    }

    Ok(result)
}

/// Partially evaluate an `attributes` expression that is not an object literal, such as `global.tags`
fn eval_attributes(
    attributes: &ConfigExpr,
    ctx: &EvalContext,
) -> Result<Vec<(String, hcl::Expression)>, Diagnostic> {
    let range = &attributes.range;
    let evaluated = ctx
        .partial_eval(&attributes.expr)
        .map_err(|err| Diagnostic::at(ErrorKind::DynamicAttrsEval, range.clone(), err))?;

    let hcl::Expression::Object(object) = evaluated else {
        return Err(Diagnostic::at(
            ErrorKind::DynamicAttrsEval,
            range.clone(),
            "must be an object",
        ));
    };

    let mut result = Vec::with_capacity(object.len());
    for (key, expr) in object {
        let name = match key {
            hcl::ObjectKey::Identifier(ident) => ident.to_string(),
            hcl::ObjectKey::Expression(hcl::Expression::String(name)) => name,
            hcl::ObjectKey::Expression(other) => {
                return Err(Diagnostic::at(
                    ErrorKind::InvalidDynamicAttrsKey,
                    range.clone(),
                    format!("keys must be strings, got {other}"),
                ))
            }
            _ => {
                return Err(Diagnostic::at(
                    ErrorKind::InvalidDynamicAttrsKey,
                    range.clone(),
                    "unsupported key",
                ))
            }
        };

        if !is_valid_identifier(&name) {
            return Err(Diagnostic::at(
                ErrorKind::InvalidDynamicAttrName,
                range.clone(),
                format!("{name:?} is not a valid attribute name"),
            ));
        }

        result.push((name, expr));
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use crate::copy::test::{copy, ctx};
    use crate::error::{Error, ErrorKind};
    use pretty_assertions::assert_eq;

    fn parsed(text: &str) -> hcl::Body {
        hcl::parse(text).expect("valid hcl")
    }

    fn kinds(result: Result<String, Error>) -> Vec<ErrorKind> {
        result.expect_err("must fail").kinds()
    }

    #[test]
    fn for_each_over_object() {
        let out = copy(
            &ctx(),
            r#"
tm_dynamic "item" {
  for_each = { b = 2, a = 1 }
  labels   = [item.key]
  content {
    value = item.value
  }
}
"#,
        )
        .expect("expands");

        assert_eq!(
            parsed(&out),
            parsed(
                r#"
item "a" {
  value = 1
}
item "b" {
  value = 2
}
"#
            )
        );
    }

    #[test]
    fn for_each_over_list_with_iterator_and_attributes() {
        let out = copy(
            &ctx(),
            r#"
tm_dynamic "rule" {
  for_each   = ["x", "y"]
  iterator   = r
  attributes = {
    index = r.key
    name  = "${global.env}-${r.value}"
  }
  content {
    kept = var.unknown
  }
}
"#,
        )
        .expect("expands");

        assert_eq!(
            parsed(&out),
            parsed(
                r#"
rule {
  index = 0
  name  = "prod-x"
  kept  = var.unknown
}
rule {
  index = 1
  name  = "prod-y"
  kept  = var.unknown
}
"#
            )
        );
    }

    #[test]
    fn without_for_each_expands_once() {
        let out = copy(
            &ctx(),
            r#"
tm_dynamic "settings" {
  attributes = { env = global.env }
}
"#,
        )
        .expect("expands");

        assert_eq!(parsed(&out), parsed("settings {\n  env = \"prod\"\n}\n"));
    }

    #[test]
    fn false_condition_produces_nothing() {
        let out = copy(
            &ctx(),
            r#"
tm_dynamic "item" {
  for_each  = [1, 2]
  condition = false
  content {
    value = item.value
  }
}
"#,
        )
        .expect("expands");

        assert_eq!(parsed(&out), hcl::Body::default());
    }

    #[test]
    fn iterator_bindings_do_not_leak() {
        let out = copy(
            &ctx(),
            r#"
tm_dynamic "item" {
  for_each = [1]
  content {
    value = item.value
  }
}

tm_dynamic "other" {
  attributes = { seen = item.value }
}
"#,
        )
        .expect("expands");

        assert_eq!(
            parsed(&out),
            parsed("item {\n  value = 1\n}\nother {\n  seen = item.value\n}\n")
        );
    }

    #[test]
    fn conflicts_between_attributes_and_content() {
        assert_eq!(
            kinds(copy(
                &ctx(),
                r#"
tm_dynamic "item" {
  attributes = { a = 1 }
  content {
    a = 1
  }
}
"#,
            )),
            vec![ErrorKind::DynamicAttrsConflict]
        );
    }

    #[test]
    fn structural_issues_accumulate() {
        assert_eq!(
            kinds(copy(
                &ctx(),
                r#"
tm_dynamic "a" "b" {
  unknown = 1
  other   = 2
  content {}
  content {}
}
"#,
            )),
            vec![
                ErrorKind::DynamicLabelCount,
                ErrorKind::DynamicUnsupportedAttribute,
                ErrorKind::Parsing,
            ]
        );

        assert_eq!(
            kinds(copy(&ctx(), "tm_dynamic \"a\" {\n  labels = []\n}\n")),
            vec![ErrorKind::Parsing]
        );
    }

    #[test]
    fn evaluation_failures() {
        let cases = [
            ("condition = 1\nattributes = {}", ErrorKind::InvalidDynamicConditionType),
            ("condition = global.nope\nattributes = {}", ErrorKind::DynamicConditionEval),
            ("iterator = x\nattributes = {}", ErrorKind::InvalidDynamicIterator),
            ("for_each = [1]\niterator = \"x\"\nattributes = {}", ErrorKind::InvalidDynamicIterator),
            ("for_each = 1\nattributes = {}", ErrorKind::InvalidDynamicForEach),
            ("for_each = global.nope\nattributes = {}", ErrorKind::DynamicForEachEval),
            ("labels = [1]\nattributes = {}", ErrorKind::InvalidDynamicLabels),
            ("attributes = [1]", ErrorKind::DynamicAttrsEval),
            ("attributes = { \"not valid\" = 1 }", ErrorKind::InvalidDynamicAttrName),
            ("attributes = { (1 + 1) = 1 }", ErrorKind::InvalidDynamicAttrsKey),
            ("attributes = { (var.x) = 1 }", ErrorKind::DynamicAttrsEval),
            ("attributes = { a = global.nope }", ErrorKind::DynamicAttrsEval),
            ("attributes = global.env", ErrorKind::DynamicAttrsEval),
        ];

        for (body, kind) in cases {
            let text = format!("tm_dynamic \"a\" {{\n{body}\n}}\n");
            assert_eq!(kinds(copy(&ctx(), &text)), vec![kind], "{body}");
        }
    }

    #[test]
    fn attribute_issues_point_at_the_entry() {
        let err = copy(
            &ctx(),
            r#"
tm_dynamic "a" {
  attributes = {
    ok          = 1
    "not valid" = 2
  }
}
"#,
        )
        .expect_err("invalid name");

        let Error::Diagnostic(issue) = err else {
            panic!("expected a single diagnostic");
        };
        assert_eq!(issue.kind, ErrorKind::InvalidDynamicAttrName);
        let range = issue.range.expect("has a range");
        assert_eq!((range.start.line, range.start.column), (5, 5));

        let err = copy(
            &ctx(),
            "tm_dynamic \"a\" {\n  attributes = {\n    a = 1\n    b = global.nope\n  }\n}\n",
        )
        .expect_err("missing global");

        let Error::Diagnostic(issue) = err else {
            panic!("expected a single diagnostic");
        };
        assert_eq!(issue.kind, ErrorKind::DynamicAttrsEval);
        let range = issue.range.expect("has a range");
        assert_eq!((range.start.line, range.start.column), (4, 9));
    }

    #[test]
    fn attributes_from_an_evaluated_object() {
        let mut globals = hcl::value::Map::new();
        globals.insert(
            "tags".to_string(),
            hcl::Value::Object(
                [("owner".to_string(), hcl::Value::String("team".to_string()))]
                    .into_iter()
                    .collect(),
            ),
        );
        let ctx = crate::eval::EvalContext::new().with_globals(globals);

        let out = copy(&ctx, "tm_dynamic \"tags\" {\n  attributes = global.tags\n}\n")
            .expect("expands");
        assert_eq!(parsed(&out), parsed("tags {\n  owner = \"team\"\n}\n"));
    }
}
