//! Variable resolver built on minijinja.

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Environment, UndefinedBehavior, Value};

use crate::context::StepScope;
use crate::error::StepError;

/// Resolves `{{ ... }}` references against an execution context tree.
///
/// There is exactly one grammar: minijinja expressions over the tree built
/// by [`StepScope::template_context`]. The device placeholder is the
/// `device` variable, and dotted paths (`steps.show.result.data`) are plain
/// attribute access. Undefined references are always an error.
pub struct VariableResolver {
    env: Environment<'static>,
}

impl VariableResolver {
    /// Create a resolver with strict undefined handling and device-output filters.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        // upper, lower, trim, replace, join, length, default and tojson are
        // minijinja builtins.
        env.add_filter("int", filter_int);
        env.add_filter("float", filter_float);
        env.add_filter("fromjson", filter_fromjson);
        env.add_filter("lines", filter_lines);
        env.add_filter("b64encode", filter_b64encode);
        env.add_filter("b64decode", filter_b64decode);

        Self { env }
    }

    /// Check if a string contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a template string to text.
    pub fn render(&self, template: &str, ctx: &serde_json::Value) -> Result<String, StepError> {
        let tmpl = self.env.template_from_str(template)?;
        tmpl.render(Value::from_serialize(ctx))
            .map_err(|e| StepError::Resolution(format!("{}: {}", template.trim(), e)))
    }

    /// Evaluate a bare expression such as `steps.show.status`.
    pub fn lookup(&self, expr: &str, ctx: &serde_json::Value) -> Result<serde_json::Value, StepError> {
        let compiled = self.env.compile_expression(expr)?;
        let value = compiled
            .eval(Value::from_serialize(ctx))
            .map_err(|e| StepError::Resolution(format!("{}: {}", expr.trim(), e)))?;
        if value.is_undefined() {
            return Err(StepError::Resolution(format!("{} is undefined", expr.trim())));
        }
        serde_json::to_value(&value).map_err(StepError::from)
    }

    /// Resolve every template string inside a JSON value.
    ///
    /// A string consisting of a single `{{ expr }}` resolves to the typed
    /// value of `expr`; any other template string renders to text.
    pub fn resolve_value(
        &self,
        value: &serde_json::Value,
        ctx: &serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        match value {
            serde_json::Value::String(s) if Self::is_template(s) => match single_expression(s) {
                Some(expr) => self.lookup(expr, ctx),
                None => Ok(serde_json::Value::String(self.render(s, ctx)?)),
            },
            serde_json::Value::Object(obj) => {
                let mut result = serde_json::Map::new();
                for (k, v) in obj {
                    result.insert(k.clone(), self.resolve_value(v, ctx)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => {
                let result: Result<Vec<_>, _> =
                    arr.iter().map(|v| self.resolve_value(v, ctx)).collect();
                Ok(serde_json::Value::Array(result?))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Resolve step parameters for one invocation, leaving the top-level
    /// keys named in `raw` untouched.
    pub fn resolve_params(
        &self,
        params: &serde_json::Value,
        scope: &StepScope,
        raw: &[&str],
    ) -> Result<serde_json::Value, StepError> {
        let ctx = scope.template_context();
        match params {
            serde_json::Value::Object(obj) => {
                let mut result = serde_json::Map::new();
                for (k, v) in obj {
                    let resolved = if raw.contains(&k.as_str()) {
                        v.clone()
                    } else {
                        self.resolve_value(v, &ctx)?
                    };
                    result.insert(k.clone(), resolved);
                }
                Ok(serde_json::Value::Object(result))
            }
            other => self.resolve_value(other, &ctx),
        }
    }
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the inner expression if `s` is exactly one `{{ ... }}` block.
fn single_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.contains("{%") {
        return None;
    }
    let inner = inner.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner)
    }
}

// Filters. Device output is text, so numeric and JSON conversions parse
// strings; anything unparseable is an error, never a silent default.

fn invalid(msg: String) -> minijinja::Error {
    minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, msg)
}

fn as_number(value: &Value) -> Result<f64, minijinja::Error> {
    match serde_json::to_value(value).map_err(|e| invalid(e.to_string()))? {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("{} is not a finite number", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(format!("cannot convert {:?} to a number", s))),
        other => Err(invalid(format!("cannot convert {} to a number", other))),
    }
}

fn filter_int(value: Value) -> Result<Value, minijinja::Error> {
    if let Some(text) = value.as_str() {
        if let Ok(n) = text.trim().parse::<i64>() {
            return Ok(Value::from(n));
        }
    }
    Ok(Value::from(as_number(&value)?.trunc() as i64))
}

fn filter_float(value: Value) -> Result<Value, minijinja::Error> {
    Ok(Value::from(as_number(&value)?))
}

fn filter_fromjson(value: Value) -> Result<Value, minijinja::Error> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(format!("fromjson expects a string, got {:?}", value.kind())))?;
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid(format!("fromjson: {}", e)))?;
    Ok(Value::from_serialize(&parsed))
}

/// Non-empty, trimmed lines of device output.
fn filter_lines(value: Value) -> Vec<String> {
    value
        .to_string()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn filter_b64encode(value: Value) -> String {
    STANDARD.encode(value.to_string())
}

fn filter_b64decode(value: Value) -> Result<String, minijinja::Error> {
    let decoded = STANDARD
        .decode(value.to_string())
        .map_err(|e| invalid(format!("b64decode: {}", e)))?;
    String::from_utf8(decoded).map_err(|e| invalid(format!("b64decode: {}", e)))
}
