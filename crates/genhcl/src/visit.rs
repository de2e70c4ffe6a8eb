//! mutable expression visitors
//!
//! Used to rewrite expressions before and after handing them to [hcl::eval]: scoped function calls are replaced by
//! their results, verbatim placeholders by the expressions they stand for.
use hcl::{
    template::{Directive, Element},
    Expression, Operation, Template, TemplateExpr, TraversalOperator,
};

/// Visitor receiving each subject mutably
pub trait VisitMut<T> {
    fn visit_mut(&mut self, value: &mut T);
}

impl<T, F> VisitMut<T> for F
where
    F: FnMut(&mut T),
{
    fn visit_mut(&mut self, value: &mut T) {
        self(value)
    }
}

/// Recursively visit all [hcl::Expression]s mutably
///
/// Children are visited before their parent, so a visitor sees arguments of a function call already rewritten
/// when it reaches the call itself.
pub trait VisitExpressionsMut {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>);
}

impl VisitExpressionsMut for Expression {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        match self {
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_expressions_mut(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values_mut() {
                    value.visit_expressions_mut(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                match Template::from_expr(template_expr) {
                    Ok(mut template) => {
                        let original = template.clone();
                        template.visit_expressions_mut(visitor);

                        // only re-render templates that changed, rendering turns heredocs into quoted strings
                        if template != original {
                            *template_expr =
                                Box::new(TemplateExpr::QuotedString(template.to_string()));
                        }
                    }
                    Err(err) => tracing::debug!(%err, "skipping unparsable template"),
                }
            }
            Expression::FuncCall(func_call) => {
                for arg in func_call.args.iter_mut() {
                    arg.visit_expressions_mut(visitor);
                }
            }
            Expression::Traversal(traversal) => {
                traversal.expr.visit_expressions_mut(visitor);
                for operator in traversal.operators.iter_mut() {
                    if let TraversalOperator::Index(index) = operator {
                        index.visit_expressions_mut(visitor);
                    }
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_expressions_mut(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_expressions_mut(visitor);
                cond.true_expr.visit_expressions_mut(visitor);
                cond.false_expr.visit_expressions_mut(visitor);
            }
            Expression::Operation(operation) => match operation.as_mut() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_expressions_mut(visitor);
                    binop.rhs_expr.visit_expressions_mut(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_expressions_mut(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr.collection_expr.visit_expressions_mut(visitor);
                forexpr
                    .key_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
                forexpr.value_expr.visit_expressions_mut(visitor);
                forexpr
                    .cond_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
            }
            _ => {}
        }

        visitor.visit_mut(self);
    }
}

impl VisitExpressionsMut for Template {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        for element in self.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_expressions_mut(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_expressions_mut(visitor);
                        ifdir.true_template.visit_expressions_mut(visitor);
                        ifdir
                            .false_template
                            .iter_mut()
                            .for_each(|t| t.visit_expressions_mut(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.collection_expr.visit_expressions_mut(visitor);
                        fordir.template.visit_expressions_mut(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn children_before_parents() {
        let mut expr: Expression = "outer(inner())"
            .parse::<hcl_edit::expr::Expression>()
            .expect("valid expression")
            .into();

        let mut seen = vec![];
        expr.visit_expressions_mut(&mut |e: &mut Expression| {
            if let Expression::FuncCall(call) = e {
                seen.push(call.name.to_string());
            }
        });

        assert_eq!(seen, vec!["inner".to_string(), "outer".to_string()]);
    }

    #[test]
    fn variables_are_rewritten() {
        let mut expr = Expression::Array(vec![
            Expression::Variable(hcl::Variable::unchecked("a")),
            Expression::Bool(true),
        ]);

        expr.visit_expressions_mut(&mut |e: &mut Expression| {
            if let Expression::Variable(var) = e {
                if var.as_str() == "a" {
                    *e = Expression::String("replaced".to_string());
                }
            }
        });

        assert_eq!(
            expr,
            Expression::Array(vec![
                Expression::String("replaced".to_string()),
                Expression::Bool(true),
            ])
        );
    }
}
