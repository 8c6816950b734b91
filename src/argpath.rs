//! Minimal argument-path parser
//!
//! Supports:
//! - a.b.c (dot notation over argument names and object keys)
//! - a[0].b (array index)
//!
//! Does NOT support wildcards, slices, or filters. Paths walk the *static
//! shape* of bound argument expressions, never resolved values.

use crate::error::TrellisError;
use crate::shape::{ArgExpr, BoundArgs};

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parse a path string into segments
///
/// Examples:
/// - "DefaultCacheBehavior.targetOriginId" → [Field, Field]
/// - "Origins[0].originId" → [Field, Index(0), Field]
///
/// Returns a detail string on malformed input; callers wrap it with their
/// own position info.
pub fn parse(path: &str) -> Result<Vec<Segment>, String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(format!("empty segment in '{}'", path));
        }

        // Check for array index: field[0] or just [0]
        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            if !part.ends_with(']') {
                return Err(format!("unterminated index in '{}'", path));
            }

            let index_str = &part[bracket_pos + 1..part.len() - 1];
            let index: usize = index_str
                .parse()
                .map_err(|_| format!("non-numeric index '{}' in '{}'", index_str, path))?;

            segments.push(Segment::Index(index));
        } else if let Ok(index) = part.parse::<usize>() {
            // Numeric segment treated as array index (e.g., "Origins.0")
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    match segments.first() {
        Some(Segment::Field(_)) => Ok(segments),
        _ => Err(format!("path '{}' must start with an argument name", path)),
    }
}

/// Walk bound arguments along parsed segments
///
/// Absent segments yield `Ok(None)`. Walking *into* a reference is an
/// error: referenced attributes are backend-assigned and cannot be
/// inspected at generation time.
pub fn lookup<'a>(
    args: &'a BoundArgs,
    path: &str,
    segments: &[Segment],
) -> Result<Option<&'a ArgExpr>, TrellisError> {
    let mut iter = segments.iter();

    let mut current = match iter.next() {
        Some(Segment::Field(name)) => match args.get(name) {
            Some(expr) => expr,
            None => return Ok(None),
        },
        _ => return Ok(None),
    };

    for segment in iter {
        if let ArgExpr::Ref(r) = current {
            return Err(TrellisError::DirectiveEval {
                path: path.to_string(),
                details: format!(
                    "cannot walk into reference '{}': attributes are unknown at generation time",
                    r
                ),
            });
        }

        current = match (segment, current) {
            (Segment::Field(name), ArgExpr::Object(entries)) => {
                match entries.iter().find(|(k, _)| k == name) {
                    Some((_, v)) => v,
                    None => return Ok(None),
                }
            }
            (Segment::Index(idx), ArgExpr::Array(items)) => match items.get(*idx) {
                Some(v) => v,
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
    }

    Ok(Some(current))
}

/// Predicate used by `{{- if <path> }}` directives
///
/// True iff every segment exists and the terminal expression is truthy.
/// Absent segments are falsy, never an error.
pub fn exists_or_truthy(
    args: &BoundArgs,
    path: &str,
    segments: &[Segment],
) -> Result<bool, TrellisError> {
    Ok(lookup(args, path, segments)?
        .map(ArgExpr::truthy)
        .unwrap_or(false))
}
