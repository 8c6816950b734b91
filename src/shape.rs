//! Argument expressions - the static shape of call-site bindings
//!
//! An [`ArgExpr`] is what a call site binds to a template argument: a scalar
//! literal, a composite literal (object or array, possibly containing
//! references), or a cross-unit reference written `${unit}` / `${unit.attr}`.
//!
//! Directive evaluation operates on this shape only, never on resolved
//! runtime values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Number;

use crate::error::TrellisError;

/// Pattern for ${unit} or ${unit.attr} references
static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{([\w-]+)(?:\.([\w-]+))?\}$").unwrap());

/// Bound arguments of one call site (argument name -> expression)
pub type BoundArgs = std::collections::BTreeMap<String, ArgExpr>;

/// A reference to another unit's handle or attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitRef {
    /// Name of the referenced unit
    pub unit: String,
    /// Attribute on the referenced unit; `None` means the unit's identifier
    pub attr: Option<String>,
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.attr {
            Some(attr) => write!(f, "{}.{}", self.unit, attr),
            None => write!(f, "{}", self.unit),
        }
    }
}

/// The static expression bound to one template argument
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    Null,
    Bool(bool),
    Number(Number),
    Str(String),
    /// Array literal
    Array(Vec<ArgExpr>),
    /// Object literal, in source key order
    Object(Vec<(String, ArgExpr)>),
    /// Cross-unit reference
    Ref(UnitRef),
}

impl ArgExpr {
    /// Build a reference expression
    pub fn reference(unit: impl Into<String>, attr: Option<&str>) -> Self {
        ArgExpr::Ref(UnitRef {
            unit: unit.into(),
            attr: attr.map(str::to_string),
        })
    }

    /// Parse a string as a reference if it matches `${unit}` / `${unit.attr}`
    fn from_str_literal(s: &str) -> Self {
        match REF_PATTERN.captures(s) {
            Some(cap) => ArgExpr::Ref(UnitRef {
                unit: cap[1].to_string(),
                attr: cap.get(2).map(|m| m.as_str().to_string()),
            }),
            None => ArgExpr::Str(s.to_string()),
        }
    }

    /// Convert a YAML value (manifest args) into an expression
    ///
    /// Key order of mappings is preserved - it is part of the static shape
    /// and keeps rendering deterministic.
    pub fn from_yaml(value: &serde_yaml::Value) -> Result<Self, TrellisError> {
        use serde_yaml::Value;
        match value {
            Value::Null => Ok(ArgExpr::Null),
            Value::Bool(b) => Ok(ArgExpr::Bool(*b)),
            Value::Number(n) => {
                let num = if let Some(u) = n.as_u64() {
                    Number::from(u)
                } else if let Some(i) = n.as_i64() {
                    Number::from(i)
                } else {
                    n.as_f64().and_then(Number::from_f64).ok_or_else(|| {
                        TrellisError::InvalidManifest {
                            details: format!("unrepresentable number: {}", n),
                        }
                    })?
                };
                Ok(ArgExpr::Number(num))
            }
            Value::String(s) => Ok(Self::from_str_literal(s)),
            Value::Sequence(seq) => Ok(ArgExpr::Array(
                seq.iter().map(Self::from_yaml).collect::<Result<_, _>>()?,
            )),
            Value::Mapping(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (k, v) in map {
                    let key = k.as_str().ok_or_else(|| TrellisError::InvalidManifest {
                        details: format!("non-string key in args mapping: {:?}", k),
                    })?;
                    entries.push((key.to_string(), Self::from_yaml(v)?));
                }
                Ok(ArgExpr::Object(entries))
            }
            Value::Tagged(t) => Err(TrellisError::InvalidManifest {
                details: format!("unsupported YAML tag: {}", t.tag),
            }),
        }
    }

    /// Whether this expression is truthy for directive predicates
    ///
    /// Falsy: null, false, zero, empty string, empty array, empty object.
    /// A reference is always truthy - the binding is present, and its
    /// eventual value is never inspected at generation time.
    pub fn truthy(&self) -> bool {
        match self {
            ArgExpr::Null => false,
            ArgExpr::Bool(b) => *b,
            ArgExpr::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            ArgExpr::Str(s) => !s.is_empty(),
            ArgExpr::Array(items) => !items.is_empty(),
            ArgExpr::Object(entries) => !entries.is_empty(),
            ArgExpr::Ref(_) => true,
        }
    }

    /// Shape name for error messages
    pub fn shape_name(&self) -> &'static str {
        match self {
            ArgExpr::Null => "null",
            ArgExpr::Bool(_) => "a boolean literal",
            ArgExpr::Number(_) => "a number literal",
            ArgExpr::Str(_) => "a string literal",
            ArgExpr::Array(_) => "an array literal",
            ArgExpr::Object(_) => "an object literal",
            ArgExpr::Ref(_) => "a reference",
        }
    }

    /// Render this expression as emitted source text
    ///
    /// Strings are quoted, composites render as single-line literals in key
    /// order, references render as bare identifiers (the downstream program
    /// binds them to the referenced resource's variable).
    pub fn render_source(&self) -> String {
        match self {
            ArgExpr::Null => "null".to_string(),
            ArgExpr::Bool(b) => b.to_string(),
            ArgExpr::Number(n) => n.to_string(),
            ArgExpr::Str(s) => serde_json::Value::String(s.clone()).to_string(),
            ArgExpr::Array(items) => {
                let parts: Vec<String> = items.iter().map(ArgExpr::render_source).collect();
                format!("[{}]", parts.join(", "))
            }
            ArgExpr::Object(entries) => {
                if entries.is_empty() {
                    return "{}".to_string();
                }
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.render_source()))
                    .collect();
                format!("{{ {} }}", parts.join(", "))
            }
            ArgExpr::Ref(r) => r.to_string(),
        }
    }

    /// Collect every reference in this expression, in source order
    pub fn collect_refs(&self, out: &mut Vec<UnitRef>) {
        match self {
            ArgExpr::Ref(r) => out.push(r.clone()),
            ArgExpr::Array(items) => {
                for item in items {
                    item.collect_refs(out);
                }
            }
            ArgExpr::Object(entries) => {
                for (_, v) in entries {
                    v.collect_refs(out);
                }
            }
            _ => {}
        }
    }
}

/// Conversion from JSON, for programmatic bindings and tests
///
/// Strings of the form `${unit.attr}` become references here too, so the
/// `json!` macro can express complete bindings.
impl From<serde_json::Value> for ArgExpr {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ArgExpr::Null,
            Value::Bool(b) => ArgExpr::Bool(b),
            Value::Number(n) => ArgExpr::Number(n),
            Value::String(s) => ArgExpr::from_str_literal(&s),
            Value::Array(items) => ArgExpr::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ArgExpr::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}
