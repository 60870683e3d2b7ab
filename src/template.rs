//! HTML templates for blocked responses
//!
//! A template is a document with exactly two positional `%s` slots, filled
//! with the policy's heading and message in that order. Documents are loaded
//! by the refresher; rendering works on the copy held by the policy.

use crate::error::TemplateError;
use crate::policy::TemplateRef;
use std::borrow::Cow;
use std::io::ErrorKind;
use std::sync::Arc;

/// Positional substitution slot
pub const SLOT: &str = "%s";

/// Page compiled into the binary, used for policies without a template
pub const BUILTIN_TEMPLATE: &str = include_str!("../assets/maintenance.html");

/// Served when a template cannot be read
pub const FALLBACK_TEMPLATE: &str =
    "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Maintenance</title></head><body><h1>%s</h1><p>%s</p></body></html>";

/// Load a template document without blocking the runtime
pub async fn load(template: &TemplateRef) -> Result<Arc<str>, TemplateError> {
    match template {
        TemplateRef::Builtin => Ok(Arc::from(BUILTIN_TEMPLATE)),
        TemplateRef::File(path) => match tokio::fs::read_to_string(path).await {
            Ok(document) => Ok(Arc::from(document)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TemplateError::NotFound(path.clone())),
            Err(source) => Err(TemplateError::Read {
                path: path.clone(),
                source,
            }),
        },
    }
}

/// Fill the two positional slots. Missing slots are ignored, extra ones left untouched.
pub fn render(template: &str, heading: &str, message: &str) -> String {
    let mut out = String::with_capacity(template.len() + heading.len() + message.len());
    let mut rest = template;

    for value in [heading, message] {
        match rest.find(SLOT) {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                out.push_str(&escape_html(value));
                rest = &rest[pos + SLOT.len()..];
            }
            None => break,
        }
    }

    out.push_str(rest);
    out
}

pub fn escape_html(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }

    let mut escaped = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
