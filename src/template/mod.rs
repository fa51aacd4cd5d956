//! Command and stdin templating.
//!
//! Templates are rendered with [`tera`], so expressions and filters follow
//! its syntax:
//!
//! ```text
//! echo {{ offset + batchSize }}={{ limit }}
//! ```
//!
//! Workers only depend on the [`Renderer`] trait; [`TemplateRenderer`] is the
//! built-in implementation. Variables available to every job are `offset`,
//! `batchSize`, `limit`, `tryCount` and `maxTryCount`. On top of the tera
//! builtins, `b64enc`, `b64dec` and `quote` (POSIX shell quoting) are
//! registered as filters.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::error::RenderError;

/// Variables visible to a template.
pub type TemplateVars = Map<String, Value>;

/// Turns a template and a set of variables into concrete text.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError>;
}

/// Built-in renderer backed by a one-off [`Tera`] instance per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl Renderer for TemplateRenderer {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
        let mut context = Context::new();
        for (name, value) in vars {
            context.insert(name.as_str(), value);
        }
        engine()
            .render_str(template, &context)
            .map_err(|e| RenderError(describe(&e)))
    }
}

fn engine() -> Tera {
    let mut tera = Tera::default();
    // Rendered text goes to a shell, never to a browser.
    tera.autoescape_on(vec![]);
    tera.register_filter("b64enc", b64enc);
    tera.register_filter("b64dec", b64dec);
    tera.register_filter("quote", quote);
    tera
}

/// Tera keeps the useful part of a failure (which variable, which filter) in
/// the source chain, so flatten it into one line.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn b64enc(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(Value::String(STANDARD.encode(as_text(value))))
}

fn b64dec(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let bytes = STANDARD
        .decode(as_text(value))
        .map_err(|e| tera::Error::msg(format!("b64dec: {e}")))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| tera::Error::msg("b64dec: decoded bytes are not valid UTF-8"))
}

/// Single-quotes a value for `sh`; embedded quotes become `'\''`.
fn quote(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let text = as_text(value);
    Ok(Value::String(format!("'{}'", text.replace('\'', r"'\''"))))
}
