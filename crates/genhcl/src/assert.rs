//! assertions of generation blocks
use crate::config::{AssertConfig, ConfigExpr};
use crate::error::{Diagnostic, Diagnostics, ErrorKind};
use crate::eval::EvalContext;
use crate::source::SourceRange;
use crate::value::type_name;
use hcl::Value;
use serde::Serialize;

/// An evaluated `assert` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assert {
    pub range: SourceRange,
    pub assertion: bool,
    pub warning: bool,
    pub message: String,
}

impl Assert {
    /// Failed and not a warning, content must not be generated
    pub fn is_blocking(&self) -> bool {
        !self.assertion && !self.warning
    }
}

/// Evaluate every assert, reporting all evaluation failures together
pub fn eval_asserts(ctx: &EvalContext, asserts: &[AssertConfig]) -> Result<Vec<Assert>, Diagnostics> {
    let mut issues = Diagnostics::new();
    let mut evaluated = vec![];

    for config in asserts {
        match eval_assert(ctx, config) {
            Ok(assert) => evaluated.push(assert),
            Err(issue) => issues.log(issue),
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }
    Ok(evaluated)
}

fn eval_assert(ctx: &EvalContext, config: &AssertConfig) -> Result<Assert, Diagnostic> {
    let assertion = eval_bool(ctx, &config.assertion, "assertion")?;
    let warning = match &config.warning {
        Some(warning) => eval_bool(ctx, warning, "warning")?,
        None => false,
    };
    let message = match eval(ctx, &config.message)? {
        Value::String(message) => message,
        other => return Err(type_error(&config.message, "message", "string", &other)),
    };

    Ok(Assert {
        range: config.range.clone(),
        assertion,
        warning,
        message,
    })
}

fn eval(ctx: &EvalContext, config: &ConfigExpr) -> Result<Value, Diagnostic> {
    ctx.eval(&config.expr)
        .map_err(|err| Diagnostic::at(ErrorKind::AssertEval, config.range.clone(), err))
}

fn eval_bool(ctx: &EvalContext, config: &ConfigExpr, field: &str) -> Result<bool, Diagnostic> {
    match eval(ctx, config)? {
        Value::Bool(b) => Ok(b),
        other => Err(type_error(config, field, "bool", &other)),
    }
}

fn type_error(config: &ConfigExpr, field: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::at(
        ErrorKind::AssertEval,
        config.range.clone(),
        format!("{field} must be {expected}, got {}", type_name(got)),
    )
}
