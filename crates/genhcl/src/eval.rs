//! evaluation context
//!
//! [EvalContext] is an owned set of namespaces (`global`, `terramate`, `let`, loop iterators) and scoped functions.
//! It is cheap enough to [EvalContext::copy] whenever a new scope is entered, which is how block and loop scopes are
//! isolated from each other: a fork is taken on enter and dropped on exit.
//!
//! Evaluation is delegated to [hcl::eval]. Because [hcl::eval::FuncDef] only accepts plain function pointers, the
//! scoped functions (which capture per-run state such as the vendor target directory) are applied before handing
//! the expression to [hcl::eval]: every call to a scoped function is replaced by its result.
//!
//! Two modes exist:
//! - [EvalContext::eval] must resolve everything
//! - [EvalContext::partial_eval] resolves what it can and keeps sub-expressions referring to unknown variables (or
//!   unknown non-`tm_` functions), so `"${global.env}-${var.x}"` becomes `"prod-${var.x}"`
use crate::stdlib;
use crate::visit::{VisitExpressionsMut, VisitMut};
use hcl::eval::{ErrorKind, Evaluate};
use hcl::expr::{Heredoc, ObjectKey, Operation, TemplateExpr, Traversal, TraversalOperator};
use hcl::template::{Directive, Element, Strip, Template};
use hcl::{Expression, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// Prefix of placeholders standing in for verbatim expressions during evaluation
const VERBATIM_PREFIX: &str = "__genhcl_verbatim_";

/// Functions starting with this prefix belong to us and must never be left unresolved
const RESERVED_FUNCTION_PREFIX: &str = "tm_";

/// What a scoped function produced
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutput {
    Value(Value),
    /// expression emitted as-is, never evaluated
    Verbatim(Expression),
}

pub type ScopedFunction =
    Arc<dyn Fn(&[Value]) -> Result<FunctionOutput, String> + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("{0}")]
    Expression(String),
    #[error("calling {function}(): {message}")]
    Function { function: String, message: String },
    #[error("{0}() can only be used inside generated content")]
    VerbatimNotAllowed(String),
}

#[derive(Clone, Default)]
pub struct EvalContext {
    namespaces: IndexMap<String, Value>,
    functions: IndexMap<String, ScopedFunction>,
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("namespaces", &self.namespaces)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying the `terramate` metadata namespace of `stack`
    pub fn for_stack(stack: &crate::project::Stack) -> Self {
        let mut path = hcl::value::Map::new();
        path.insert(
            "absolute".to_string(),
            Value::String(stack.dir.to_string()),
        );
        path.insert(
            "basename".to_string(),
            Value::String(stack.dir.basename().unwrap_or("/").to_string()),
        );

        let mut stack_ns = hcl::value::Map::new();
        stack_ns.insert("name".to_string(), Value::String(stack.name.clone()));
        stack_ns.insert("path".to_string(), Value::Object(path));

        let mut ctx = Self::new();
        ctx.set_namespace(
            "terramate",
            [("stack".to_string(), Value::Object(stack_ns))]
                .into_iter()
                .collect(),
        );
        ctx
    }

    pub fn with_globals(mut self, globals: hcl::value::Map<String, Value>) -> Self {
        self.set_namespace("global", globals);
        self
    }

    pub fn set_namespace(&mut self, name: &str, bindings: hcl::value::Map<String, Value>) {
        self.namespaces
            .insert(name.to_string(), Value::Object(bindings));
    }

    pub fn delete_namespace(&mut self, name: &str) {
        self.namespaces.shift_remove(name);
    }

    pub fn set_function(&mut self, name: &str, function: ScopedFunction) {
        self.functions.insert(name.to_string(), function);
    }

    /// Fork this context for a new scope
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Fully evaluate `expr`
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn eval(&self, expr: &Expression) -> Result<Value, EvalError> {
        let mut expr = expr.clone();
        let verbatim = self.apply_scoped_functions(&mut expr)?;
        if let Some((function, _)) = verbatim.first() {
            return Err(EvalError::VerbatimNotAllowed(function.clone()));
        }

        expr.evaluate(&self.hcl_context())
            .map_err(|err| EvalError::Expression(err.to_string()))
    }

    /// Evaluate what is resolvable, keep the rest
    ///
    /// Every sub-expression that only refers to bound names is replaced by its value. Templates are rebuilt part by
    /// part and conditionals collapse once their predicate is known. Fully resolved expressions come back as
    /// literals, so evaluating the result again yields the same literal.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn partial_eval(&self, expr: &Expression) -> Result<Expression, EvalError> {
        let mut expr = expr.clone();
        let verbatim = self.apply_scoped_functions(&mut expr)?;

        let scope = Scope::new(self, vec![]);
        PartialEvaluator::new(self).reduce(&mut expr, &scope)?;

        if !verbatim.is_empty() {
            let mut verbatim: IndexMap<String, Expression> = verbatim
                .into_iter()
                .enumerate()
                .map(|(idx, (_, expr))| (placeholder(idx), expr))
                .collect();

            expr.visit_expressions_mut(&mut |e: &mut Expression| {
                if let Expression::Variable(var) = e {
                    if let Some(replacement) = verbatim.shift_remove(var.as_str()) {
                        *e = replacement;
                    }
                }
            });
        }

        Ok(expr)
    }

    fn hcl_context(&self) -> hcl::eval::Context<'static> {
        self.hcl_context_hiding(&[])
    }

    /// Context without the namespaces in `hidden`, which are shadowed by local bindings
    fn hcl_context_hiding(&self, hidden: &[String]) -> hcl::eval::Context<'static> {
        let mut ctx = hcl::eval::Context::new();
        for (name, value) in &self.namespaces {
            if !hidden.contains(name) {
                ctx.declare_var(hcl::Identifier::unchecked(name), value.clone());
            }
        }
        stdlib::declare(&mut ctx);
        ctx
    }

    /// Replace calls to scoped functions by their results
    ///
    /// Verbatim results are substituted by placeholder variables, which plain evaluation leaves alone. They are
    /// returned in placeholder order together with the name of the function producing them.
    fn apply_scoped_functions(
        &self,
        expr: &mut Expression,
    ) -> Result<Vec<(String, Expression)>, EvalError> {
        if self.functions.is_empty() {
            return Ok(vec![]);
        }

        let mut applicator = ScopedFunctionApplicator::new(self);
        expr.visit_expressions_mut(&mut applicator);

        match applicator.error {
            Some(err) => Err(err),
            None => Ok(applicator.verbatim),
        }
    }
}

fn placeholder(idx: usize) -> String {
    format!("{VERBATIM_PREFIX}{idx}")
}

/// Whether evaluation failed only because of names we do not know yet
fn is_unresolved(err: &hcl::eval::Error) -> bool {
    match err.kind() {
        ErrorKind::UndefinedVar(_) => true,
        ErrorKind::UndefinedFunc(func) => !func.as_str().starts_with(RESERVED_FUNCTION_PREFIX),
        _ => false,
    }
}

fn is_literal(expr: &Expression) -> bool {
    match expr {
        Expression::Null | Expression::Bool(_) | Expression::Number(_) | Expression::String(_) => true,
        Expression::Array(array) => array.iter().all(is_literal),
        Expression::Object(object) => object.iter().all(|(key, value)| {
            matches!(key, ObjectKey::Identifier(_) | ObjectKey::Expression(Expression::String(_)))
                && is_literal(value)
        }),
        _ => false,
    }
}

/// Known value of a predicate, an error for literals that are not booleans
fn predicate(expr: &Expression) -> Result<Option<bool>, EvalError> {
    let kind = match expr {
        Expression::Bool(value) => return Ok(Some(*value)),
        Expression::Null => "null",
        Expression::Number(_) => "number",
        Expression::String(_) => "string",
        _ => return Ok(None),
    };
    Err(EvalError::Expression(format!(
        "condition must be bool, got {kind}"
    )))
}

/// Text a resolved interpolation contributes to its template
fn template_text(expr: &Expression) -> Option<String> {
    match expr {
        Expression::String(s) => Some(s.clone()),
        Expression::Number(n) => Some(n.to_string()),
        Expression::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Evaluation context of a partial evaluation, minus the namespaces shadowed by `for` bindings
struct Scope {
    hcl: hcl::eval::Context<'static>,
    hidden: Vec<String>,
}

impl Scope {
    fn new(ctx: &EvalContext, hidden: Vec<String>) -> Self {
        Self {
            hcl: ctx.hcl_context_hiding(&hidden),
            hidden,
        }
    }
}

/// Rewrites an expression top down, replacing every resolvable sub-expression by its value
#[derive(derive_new::new)]
struct PartialEvaluator<'c> {
    ctx: &'c EvalContext,
}

impl<'c> PartialEvaluator<'c> {
    fn reduce(&self, expr: &mut Expression, scope: &Scope) -> Result<(), EvalError> {
        if self.settle(expr, scope)? {
            return Ok(());
        }

        let replacement = match expr {
            Expression::Array(array) => {
                for element in array.iter_mut() {
                    self.reduce(element, scope)?;
                }
                None
            }
            Expression::Object(object) => {
                let mut entries = vec![];
                for (mut key, mut value) in std::mem::take(object) {
                    if let ObjectKey::Expression(key) = &mut key {
                        self.reduce(key, scope)?;
                    }
                    self.reduce(&mut value, scope)?;
                    entries.push((key, value));
                }
                *object = entries.into_iter().collect();
                None
            }
            Expression::TemplateExpr(template_expr) => {
                self.reduce_template_expr(template_expr, scope)?;
                None
            }
            Expression::FuncCall(call) => {
                for arg in call.args.iter_mut() {
                    self.reduce(arg, scope)?;
                }
                None
            }
            Expression::Traversal(traversal) => {
                self.reduce_traversal(traversal, scope)?;
                None
            }
            Expression::Parenthesis(inner) => {
                self.reduce(inner, scope)?;
                None
            }
            Expression::Conditional(cond) => {
                self.reduce(&mut cond.cond_expr, scope)?;
                match predicate(&cond.cond_expr)? {
                    Some(true) => Some(std::mem::replace(&mut cond.true_expr, Expression::Null)),
                    Some(false) => Some(std::mem::replace(&mut cond.false_expr, Expression::Null)),
                    None => {
                        self.reduce(&mut cond.true_expr, scope)?;
                        self.reduce(&mut cond.false_expr, scope)?;
                        None
                    }
                }
            }
            Expression::Operation(operation) => {
                match operation.as_mut() {
                    Operation::Binary(binop) => {
                        self.reduce(&mut binop.lhs_expr, scope)?;
                        self.reduce(&mut binop.rhs_expr, scope)?;
                    }
                    Operation::Unary(unop) => self.reduce(&mut unop.expr, scope)?,
                }
                None
            }
            Expression::ForExpr(for_expr) => {
                self.reduce(&mut for_expr.collection_expr, scope)?;

                let locals: Vec<String> = for_expr
                    .key_var
                    .iter()
                    .chain([&for_expr.value_var])
                    .map(|ident| ident.to_string())
                    .collect();
                let inner = self.enter(scope, locals);
                let scope = inner.as_ref().unwrap_or(scope);

                if let Some(key_expr) = &mut for_expr.key_expr {
                    self.reduce(key_expr, scope)?;
                }
                self.reduce(&mut for_expr.value_expr, scope)?;
                if let Some(cond_expr) = &mut for_expr.cond_expr {
                    self.reduce(cond_expr, scope)?;
                }
                None
            }
            _ => None,
        };

        match replacement {
            Some(branch) => {
                *expr = branch;
                self.reduce(expr, scope)
            }
            None => self.settle(expr, scope).map(|_| ()),
        }
    }

    /// Replace `expr` by its value if it is fully resolvable
    fn settle(&self, expr: &mut Expression, scope: &Scope) -> Result<bool, EvalError> {
        if is_literal(expr) {
            return Ok(true);
        }

        match expr.evaluate(&scope.hcl) {
            Ok(value) => {
                *expr = value.into();
                Ok(true)
            }
            Err(err) if is_unresolved(&err) => Ok(false),
            Err(err) => Err(EvalError::Expression(err.to_string())),
        }
    }

    /// Scope for a `for` body, `None` when the locals shadow no namespace
    fn enter(&self, scope: &Scope, locals: Vec<String>) -> Option<Scope> {
        let shadows = locals
            .iter()
            .any(|local| self.ctx.namespaces.contains_key(local) && !scope.hidden.contains(local));
        if !shadows {
            return None;
        }

        let mut hidden = scope.hidden.clone();
        hidden.extend(locals);
        Some(Scope::new(self.ctx, hidden))
    }

    /// Resolve the operators up to the first index that is still unknown
    ///
    /// A bare namespace base is never inlined on its own, only together with the operators applied to it.
    fn reduce_traversal(&self, traversal: &mut Traversal, scope: &Scope) -> Result<(), EvalError> {
        for operator in traversal.operators.iter_mut() {
            if let TraversalOperator::Index(index) = operator {
                self.reduce(index, scope)?;
            }
        }
        if !matches!(traversal.expr, Expression::Variable(_)) {
            self.reduce(&mut traversal.expr, scope)?;
        }

        let resolvable = traversal
            .operators
            .iter()
            .take_while(|operator| match operator {
                TraversalOperator::Index(index) => is_literal(index),
                _ => true,
            })
            .count();
        if resolvable == 0 {
            return Ok(());
        }

        let prefix = Traversal {
            expr: traversal.expr.clone(),
            operators: traversal.operators[..resolvable].to_vec(),
        };
        match prefix.evaluate(&scope.hcl) {
            Ok(value) => {
                traversal.expr = value.into();
                traversal.operators = traversal.operators.split_off(resolvable);
                Ok(())
            }
            Err(err) if is_unresolved(&err) => Ok(()),
            Err(err) => Err(EvalError::Expression(err.to_string())),
        }
    }

    fn reduce_template_expr(
        &self,
        template_expr: &mut Box<TemplateExpr>,
        scope: &Scope,
    ) -> Result<(), EvalError> {
        let template = match Template::from_expr(template_expr) {
            Ok(template) => template,
            Err(err) => {
                tracing::debug!(%err, "keeping unparsable template");
                return Ok(());
            }
        };

        let reduced: Template = self.reduce_template(&template, scope)?.into_iter().collect();
        if reduced == template {
            return Ok(());
        }

        let text = reduced.to_string();
        let rebuilt = match template_expr.as_ref() {
            TemplateExpr::QuotedString(_) => TemplateExpr::QuotedString(text),
            TemplateExpr::Heredoc(heredoc) => TemplateExpr::Heredoc(Heredoc {
                template: text,
                ..heredoc.clone()
            }),
        };
        **template_expr = rebuilt;
        Ok(())
    }

    fn reduce_template(&self, template: &Template, scope: &Scope) -> Result<Vec<Element>, EvalError> {
        let mut elements = Vec::with_capacity(template.elements().len());

        for element in template.elements() {
            match element.clone() {
                Element::Literal(literal) => elements.push(Element::Literal(literal)),
                Element::Interpolation(mut interpolation) => {
                    self.reduce(&mut interpolation.expr, scope)?;
                    match template_text(&interpolation.expr) {
                        Some(text) if interpolation.strip == Strip::None => {
                            elements.push(Element::Literal(text))
                        }
                        _ => elements.push(Element::Interpolation(interpolation)),
                    }
                }
                Element::Directive(Directive::If(mut directive)) => {
                    self.reduce(&mut directive.cond_expr, scope)?;
                    let unstripped = [directive.if_strip, directive.else_strip, directive.endif_strip]
                        .iter()
                        .all(|strip| *strip == Strip::None);

                    match predicate(&directive.cond_expr)? {
                        Some(true) if unstripped => {
                            elements.extend(self.reduce_template(&directive.true_template, scope)?)
                        }
                        Some(false) if unstripped => {
                            if let Some(false_template) = &directive.false_template {
                                elements.extend(self.reduce_template(false_template, scope)?);
                            }
                        }
                        _ => {
                            directive.true_template = self
                                .reduce_template(&directive.true_template, scope)?
                                .into_iter()
                                .collect();
                            if let Some(false_template) = &mut directive.false_template {
                                *false_template =
                                    self.reduce_template(false_template, scope)?.into_iter().collect();
                            }
                            elements.push(Element::Directive(Directive::If(directive)));
                        }
                    }
                }
                Element::Directive(Directive::For(mut directive)) => {
                    self.reduce(&mut directive.collection_expr, scope)?;

                    let locals: Vec<String> = directive
                        .key_var
                        .iter()
                        .chain([&directive.value_var])
                        .map(|ident| ident.to_string())
                        .collect();
                    let inner = self.enter(scope, locals);
                    let scope = inner.as_ref().unwrap_or(scope);

                    directive.template = self
                        .reduce_template(&directive.template, scope)?
                        .into_iter()
                        .collect();
                    elements.push(Element::Directive(Directive::For(directive)));
                }
            }
        }

        Ok(elements)
    }
}

#[derive(derive_new::new)]
struct ScopedFunctionApplicator<'c> {
    ctx: &'c EvalContext,
    #[new(default)]
    verbatim: Vec<(String, Expression)>,
    #[new(default)]
    error: Option<EvalError>,
}

impl<'c> VisitMut<Expression> for ScopedFunctionApplicator<'c> {
    fn visit_mut(&mut self, expr: &mut Expression) {
        if self.error.is_some() {
            return;
        }

        let Expression::FuncCall(call) = expr else {
            return;
        };

        let ctx = self.ctx;
        let name = call.name.to_string();
        let Some(function) = ctx.functions.get(&name) else {
            return;
        };

        // arguments were already visited, so they no longer contain scoped calls
        let hcl_ctx = ctx.hcl_context();
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            match arg.evaluate(&hcl_ctx) {
                Ok(value) => args.push(value),
                Err(err) => {
                    self.error = Some(EvalError::Expression(err.to_string()));
                    return;
                }
            }
        }

        tracing::trace!(function=%name, ?args, "calling scoped function");
        match function(&args) {
            Ok(FunctionOutput::Value(value)) => *expr = value.into(),
            Ok(FunctionOutput::Verbatim(verbatim)) => {
                let var = placeholder(self.verbatim.len());
                self.verbatim.push((name, verbatim));
                *expr = Expression::Variable(hcl::Variable::unchecked(var));
            }
            Err(message) => {
                self.error = Some(EvalError::Function {
                    function: name,
                    message,
                })
            }
        }
    }
}
