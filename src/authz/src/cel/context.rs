//! Label bindings for CEL evaluation

use cel_interpreter::objects::{Key, Map, Value};
use cel_interpreter::Context;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Labels;

/// Variable holding the complete label map
pub const LABELS_VARIABLE: &str = "labels";

const RESERVED: &[&str] = &[
    LABELS_VARIABLE,
    "true",
    "false",
    "null",
    "in",
    "as",
    "break",
    "const",
    "continue",
    "else",
    "for",
    "function",
    "if",
    "import",
    "let",
    "loop",
    "package",
    "namespace",
    "return",
    "var",
    "void",
    "while",
];

/// Labels exposed to a scope expression.
///
/// Every label whose key is a plain identifier is bound as a top-level string
/// variable, so `env == "dev"` works directly. The whole map is also bound as
/// `labels` for keys that are not identifiers (`labels["app/tier"]`) and for
/// presence tests (`"team" in labels`). Identifiers an expression references
/// that name no label are bound to `null`, so `env == "dev"` is simply false
/// on a resource without an `env` label.
pub struct LabelContext<'a> {
    labels: &'a Labels,
}

impl<'a> LabelContext<'a> {
    pub fn new(labels: &'a Labels) -> Self {
        Self { labels }
    }

    /// Build the interpreter context for a program referencing `referenced`
    pub fn to_cel_context(&self, referenced: &[&str]) -> Context<'static> {
        let mut ctx = Context::default();

        let map: HashMap<Key, Value> = self
            .labels
            .iter()
            .map(|(k, v)| (Key::from(k.clone()), Value::String(Arc::new(v.clone()))))
            .collect();

        ctx.add_variable_from_value(LABELS_VARIABLE, Value::Map(Map { map: Arc::new(map) }));

        for (key, value) in self.labels {
            if is_bindable_identifier(key) {
                ctx.add_variable_from_value(key.as_str(), Value::String(Arc::new(value.clone())));
            }
        }

        for name in referenced {
            if *name != LABELS_VARIABLE && !self.labels.contains_key(*name) {
                ctx.add_variable_from_value(*name, Value::Null);
            }
        }

        ctx
    }
}

/// Whether a label key can be referenced as a bare CEL identifier
pub fn is_bindable_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');

    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&key)
}
