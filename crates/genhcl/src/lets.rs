//! block local variables
use crate::config::Let;
use crate::error::{Diagnostic, ErrorKind};
use crate::eval::EvalContext;

pub const NAMESPACE: &str = "let";

/// Evaluate `lets` into the `let` namespace of `ctx`
///
/// Lets may refer to each other in any order. They are evaluated in passes until every let resolved; a pass without
/// progress means a cycle or an unresolvable reference and reports the first let still pending.
pub fn bind_lets(ctx: &mut EvalContext, lets: &[Let]) -> Result<(), Diagnostic> {
    let mut resolved = hcl::value::Map::new();
    let mut pending: Vec<&Let> = lets.iter().collect();
    ctx.set_namespace(NAMESPACE, resolved.clone());

    while !pending.is_empty() {
        let before = resolved.len();
        let mut first_failure = None;

        for item in std::mem::take(&mut pending) {
            match ctx.eval(&item.value.expr) {
                Ok(value) => {
                    tracing::trace!(name = %item.name, "let resolved");
                    resolved.insert(item.name.clone(), value);
                    ctx.set_namespace(NAMESPACE, resolved.clone());
                }
                Err(err) => {
                    first_failure.get_or_insert((item, err));
                    pending.push(item);
                }
            }
        }

        if resolved.len() == before {
            if let Some((item, err)) = first_failure {
                return Err(Diagnostic::at(
                    ErrorKind::LetsEval,
                    item.value.range.clone(),
                    format!("let.{}: {err}", item.name),
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DirConfig;
    use crate::hcl_documents;
    use crate::project::ProjectPath;
    use hcl::Value;
    use pretty_assertions::assert_eq;

    fn lets(body: &str) -> Vec<Let> {
        let docs = hcl_documents!(format!(
            "generate_hcl \"x\" {{\n  lets {{\n{body}\n  }}\n  content {{}}\n}}\n"
        ));
        DirConfig::parse(&ProjectPath::root(), &docs)
            .expect("valid config")
            .blocks
            .remove(0)
            .lets
    }

    fn expr(s: &str) -> hcl::Expression {
        s.parse::<hcl_edit::expr::Expression>()
            .expect("valid expression")
            .into()
    }

    #[test]
    fn out_of_order_references() {
        let mut ctx = EvalContext::new();
        bind_lets(&mut ctx, &lets("b = let.a + 1\na = 1\nc = let.b * 2")).expect("resolves");

        assert_eq!(ctx.eval(&expr("let.c")), Ok(Value::Number(4u64.into())));
    }

    #[test]
    fn cycles_fail() {
        let mut ctx = EvalContext::new();
        let err = bind_lets(&mut ctx, &lets("a = let.b\nb = let.a")).expect_err("cycle");

        assert_eq!(err.kind, ErrorKind::LetsEval);
        assert!(err.message.starts_with("let.a: "));
    }

    #[test]
    fn empty_lets_bind_an_empty_namespace() {
        let mut ctx = EvalContext::new();
        bind_lets(&mut ctx, &[]).expect("nothing to do");
        assert_eq!(
            ctx.eval(&expr(NAMESPACE)),
            Ok(Value::Object(hcl::value::Map::new()))
        );
    }
}
