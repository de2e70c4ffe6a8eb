//! function library
//!
//! Plain functions are declared on every [hcl::eval::Context] built by [crate::eval::EvalContext]. Functions that
//! need per-run state are [ScopedFunction]s registered on the context of a single generation block.
use crate::eval::{FunctionOutput, ScopedFunction};
use crate::project::ProjectPath;
use crate::value::type_name;
use crate::vendor::{ModuleSource, VendorRequest, Vendoring};
use hcl::eval::{FuncArgs, FuncDef, ParamType};
use hcl::Value;
use std::sync::Arc;

pub const VENDOR: &str = "tm_vendor";
pub const HCL_EXPRESSION: &str = "tm_hcl_expression";

type Func = fn(FuncArgs) -> Result<Value, String>;

fn single(func: Func) -> FuncDef {
    FuncDef::builder().param(ParamType::Any).build(func)
}

fn variadic(func: Func) -> FuncDef {
    FuncDef::builder().variadic_param(ParamType::Any).build(func)
}

pub(crate) fn declare(ctx: &mut hcl::eval::Context<'_>) {
    ctx.declare_func(hcl::Identifier::unchecked("tm_upper"), single(upper));
    ctx.declare_func(hcl::Identifier::unchecked("tm_lower"), single(lower));
    ctx.declare_func(hcl::Identifier::unchecked("tm_length"), single(length));
    ctx.declare_func(hcl::Identifier::unchecked("tm_keys"), single(keys));
    ctx.declare_func(hcl::Identifier::unchecked("tm_values"), single(values));
    ctx.declare_func(hcl::Identifier::unchecked("tm_tostring"), single(tostring));
    ctx.declare_func(hcl::Identifier::unchecked("tm_concat"), variadic(concat));
    ctx.declare_func(hcl::Identifier::unchecked("tm_merge"), variadic(merge));
    ctx.declare_func(
        hcl::Identifier::unchecked("tm_join"),
        FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::Any)
            .build(join),
    );
}

fn string_arg(value: &Value) -> Result<&str, String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(format!("expected string, got {}", type_name(other))),
    }
}

fn upper(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::String(string_arg(&args[0])?.to_uppercase()))
}

fn lower(args: FuncArgs) -> Result<Value, String> {
    Ok(Value::String(string_arg(&args[0])?.to_lowercase()))
}

fn length(args: FuncArgs) -> Result<Value, String> {
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(array) => array.len(),
        Value::Object(object) => object.len(),
        other => return Err(format!("cannot take length of {}", type_name(other))),
    };

    Ok(Value::Number((len as u64).into()))
}

fn keys(args: FuncArgs) -> Result<Value, String> {
    match &args[0] {
        Value::Object(object) => {
            let mut keys: Vec<_> = object.keys().cloned().collect();
            keys.sort();
            Ok(Value::Array(keys.into_iter().map(Value::String).collect()))
        }
        other => Err(format!("expected object, got {}", type_name(other))),
    }
}

fn values(args: FuncArgs) -> Result<Value, String> {
    match &args[0] {
        Value::Object(object) => {
            let mut entries: Vec<_> = object.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            Ok(Value::Array(
                entries.into_iter().map(|(_, v)| v.clone()).collect(),
            ))
        }
        other => Err(format!("expected object, got {}", type_name(other))),
    }
}

fn tostring(args: FuncArgs) -> Result<Value, String> {
    match &args[0] {
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(format!("cannot convert {} to string", type_name(other))),
    }
}

fn concat(args: FuncArgs) -> Result<Value, String> {
    let mut result = vec![];
    for arg in args.iter() {
        match arg {
            Value::Array(array) => result.extend(array.iter().cloned()),
            other => return Err(format!("expected list, got {}", type_name(other))),
        }
    }
    Ok(Value::Array(result))
}

fn merge(args: FuncArgs) -> Result<Value, String> {
    let mut result = hcl::value::Map::new();
    for arg in args.iter() {
        match arg {
            Value::Object(object) => {
                result.extend(object.iter().map(|(k, v)| (k.clone(), v.clone())))
            }
            Value::Null => {}
            other => return Err(format!("expected object, got {}", type_name(other))),
        }
    }
    Ok(Value::Object(result))
}

fn join(args: FuncArgs) -> Result<Value, String> {
    let separator = string_arg(&args[0])?;
    let Value::Array(elements) = &args[1] else {
        return Err(format!("expected list, got {}", type_name(&args[1])));
    };

    let parts = elements
        .iter()
        .map(|element| string_arg(element).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::String(parts.join(separator)))
}

/// `tm_vendor(source)`
///
/// Returns the directory the module `source` gets vendored into, relative to `target_dir`, and hands a
/// [VendorRequest] to the vendoring collaborator.
pub fn vendor_func(target_dir: ProjectPath, vendoring: &Vendoring) -> ScopedFunction {
    let vendoring = vendoring.clone();

    Arc::new(move |args: &[Value]| {
        let [Value::String(source)] = args else {
            return Err("expects a single string argument".to_string());
        };

        let source: ModuleSource = source.parse().map_err(|e| format!("{e}"))?;
        let vendored = source.vendor_path(&vendoring.dir);

        vendoring.request(VendorRequest::new(source, vendoring.dir.clone()));

        Ok(FunctionOutput::Value(Value::String(
            vendored.relative_to(&target_dir),
        )))
    })
}

/// `tm_hcl_expression(text)`
///
/// Parses `text` as an expression that is emitted verbatim.
pub fn hcl_expression_func() -> ScopedFunction {
    Arc::new(|args: &[Value]| {
        let [Value::String(text)] = args else {
            return Err("expects a single string argument".to_string());
        };

        let expr: hcl_edit::expr::Expression = text
            .parse()
            .map_err(|e| format!("parsing {text:?}: {e}"))?;

        Ok(FunctionOutput::Verbatim(expr.into()))
    })
}
