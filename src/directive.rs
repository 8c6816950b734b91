//! Generation-time directive parser and evaluator
//!
//! A template's create body is plain source text interleaved with directive
//! markup:
//!
//! - `{{- if <path> }}` / `{{- else }}` / `{{- end }}` conditional blocks
//!   on their own lines (nesting allowed)
//! - `{{path}}` inline interpolation of bound argument substructure
//! - an optional `//TMPL ` tag in front of any directive-owned line, the way
//!   alternative branches are smuggled through the host language as comments
//!
//! Branch selection depends only on the static shape of the bound
//! arguments. Expansion of identical (template, shape) pairs is
//! byte-identical.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::argpath::{self, Segment};
use crate::error::TrellisError;
use crate::shape::BoundArgs;

/// Control markers: {{- if <path> }}, {{- else }}, {{- end }}
static CONTROL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{\{-\s*(?:if\s+([^\s{}]+)|(else)|(end))\s*\}\}$").unwrap());

/// Inline interpolation: {{path}}
static INTERP_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^\s{}-][^{}]*?)\s*\}\}").unwrap());

/// One node of a parsed create body
#[derive(Debug, Clone)]
pub enum DirectiveNode {
    /// Literal source text
    Literal(String),
    /// Inline interpolation of an argument path
    Interp {
        path: String,
        segments: Vec<Segment>,
    },
    /// Conditional block over the static argument shape
    If {
        path: String,
        predicate: Vec<Segment>,
        then_branch: Vec<DirectiveNode>,
        else_branch: Vec<DirectiveNode>,
    },
}

/// An open `{{- if }}` block during parsing
struct Frame {
    path: String,
    predicate: Vec<Segment>,
    then_branch: Vec<DirectiveNode>,
    else_branch: Option<Vec<DirectiveNode>>,
    line: usize,
}

fn push_node(root: &mut Vec<DirectiveNode>, stack: &mut [Frame], node: DirectiveNode) {
    match stack.last_mut() {
        Some(frame) => match frame.else_branch.as_mut() {
            Some(branch) => branch.push(node),
            None => frame.then_branch.push(node),
        },
        None => root.push(node),
    }
}

/// Parse create-body source text into a directive sequence
pub fn parse_source(source: &str) -> Result<Vec<DirectiveNode>, TrellisError> {
    let mut root: Vec<DirectiveNode> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for (idx, raw_line) in source.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        let (line, newline) = match raw_line.strip_suffix('\n') {
            Some(rest) => (rest, "\n"),
            None => (raw_line, ""),
        };

        // Strip the host-language comment tag, keeping outer indentation
        let content = match line.trim_start().strip_prefix("//TMPL") {
            Some(rest) => {
                let indent = &line[..line.len() - line.trim_start().len()];
                format!("{}{}", indent, rest.strip_prefix(' ').unwrap_or(rest))
            }
            None => line.to_string(),
        };

        if let Some(cap) = CONTROL_PATTERN.captures(content.trim()) {
            if let Some(path) = cap.get(1) {
                let path = path.as_str().to_string();
                let predicate =
                    argpath::parse(&path).map_err(|details| TrellisError::DirectiveParse {
                        line: line_no,
                        details,
                    })?;
                stack.push(Frame {
                    path,
                    predicate,
                    then_branch: Vec::new(),
                    else_branch: None,
                    line: line_no,
                });
            } else if cap.get(2).is_some() {
                let frame = stack.last_mut().ok_or(TrellisError::DirectiveParse {
                    line: line_no,
                    details: "{{- else }} without matching {{- if }}".to_string(),
                })?;
                if frame.else_branch.is_some() {
                    return Err(TrellisError::DirectiveParse {
                        line: line_no,
                        details: "duplicate {{- else }} in one {{- if }} block".to_string(),
                    });
                }
                frame.else_branch = Some(Vec::new());
            } else {
                let frame = stack.pop().ok_or(TrellisError::DirectiveParse {
                    line: line_no,
                    details: "{{- end }} without matching {{- if }}".to_string(),
                })?;
                let node = DirectiveNode::If {
                    path: frame.path,
                    predicate: frame.predicate,
                    then_branch: frame.then_branch,
                    else_branch: frame.else_branch.unwrap_or_default(),
                };
                push_node(&mut root, &mut stack, node);
            }
            continue; // control lines emit nothing
        }

        parse_content_line(&content, newline, line_no, &mut root, &mut stack)?;
    }

    if let Some(frame) = stack.last() {
        return Err(TrellisError::DirectiveParse {
            line: frame.line,
            details: format!("unclosed {{{{- if {} }}}}", frame.path),
        });
    }

    debug!(nodes = root.len(), "parsed directive sequence");
    Ok(root)
}

/// Split a content line into literal chunks and inline interpolations
fn parse_content_line(
    content: &str,
    newline: &str,
    line_no: usize,
    root: &mut Vec<DirectiveNode>,
    stack: &mut [Frame],
) -> Result<(), TrellisError> {
    let mut cursor = 0;

    for cap in INTERP_PATTERN.captures_iter(content) {
        let m = cap.get(0).expect("capture 0 always present");
        if m.start() > cursor {
            push_node(
                root,
                stack,
                DirectiveNode::Literal(content[cursor..m.start()].to_string()),
            );
        }

        let path = cap[1].to_string();
        let segments = argpath::parse(&path).map_err(|details| TrellisError::DirectiveParse {
            line: line_no,
            details,
        })?;
        push_node(root, stack, DirectiveNode::Interp { path, segments });
        cursor = m.end();
    }

    let tail = format!("{}{}", &content[cursor..], newline);
    if !tail.is_empty() {
        push_node(root, stack, DirectiveNode::Literal(tail));
    }

    Ok(())
}

/// Expand a directive sequence against a binding's static shape
///
/// Deterministic and side-effect-free; the output is literal source text,
/// not validated here.
pub fn expand(nodes: &[DirectiveNode], args: &BoundArgs) -> Result<String, TrellisError> {
    let mut out = String::new();
    expand_into(nodes, args, &mut out)?;
    Ok(out)
}

fn expand_into(
    nodes: &[DirectiveNode],
    args: &BoundArgs,
    out: &mut String,
) -> Result<(), TrellisError> {
    for node in nodes {
        match node {
            DirectiveNode::Literal(text) => out.push_str(text),
            DirectiveNode::Interp { path, segments } => {
                let expr = argpath::lookup(args, path, segments)?.ok_or_else(|| {
                    TrellisError::DirectiveEval {
                        path: path.clone(),
                        details: "path not present in bound arguments".to_string(),
                    }
                })?;
                out.push_str(&expr.render_source());
            }
            DirectiveNode::If {
                path,
                predicate,
                then_branch,
                else_branch,
            } => {
                if argpath::exists_or_truthy(args, path, predicate)? {
                    expand_into(then_branch, args, out)?;
                } else {
                    expand_into(else_branch, args, out)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ArgExpr;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn args(value: serde_json::Value) -> BoundArgs {
        match ArgExpr::from(value) {
            ArgExpr::Object(entries) => entries.into_iter().collect(),
            other => panic!("expected object args, got {:?}", other),
        }
    }

    #[test]
    fn literal_only_roundtrips() {
        let nodes = parse_source("name: fixed,\n").unwrap();
        let out = expand(&nodes, &args(json!({}))).unwrap();
        assert_eq!(out, "name: fixed,\n");
    }

    #[test]
    fn interpolation_renders_bound_shape() {
        let nodes = parse_source("name: {{AliasName}},\n").unwrap();
        let out = expand(&nodes, &args(json!({"AliasName": "alias/a"}))).unwrap();
        assert_eq!(out, "name: \"alias/a\",\n");
    }

    #[test]
    fn interpolation_of_reference_renders_identifier() {
        let nodes = parse_source("targetKeyId: {{TargetKey}}.id,\n").unwrap();
        let out = expand(&nodes, &args(json!({"TargetKey": "${key}"}))).unwrap();
        assert_eq!(out, "targetKeyId: key.id,\n");
    }

    #[test]
    fn missing_interpolation_path_is_an_error() {
        let nodes = parse_source("x: {{Absent}}\n").unwrap();
        let err = expand(&nodes, &args(json!({}))).unwrap_err();
        assert!(err.to_string().starts_with("TRL-021"));
    }

    #[test]
    fn if_selects_then_branch_on_truthy_path() {
        let source = "\
{{- if DefaultRootObject }}
defaultRootObject: {{DefaultRootObject}},
{{- end }}
";
        let nodes = parse_source(source).unwrap();

        let out = expand(&nodes, &args(json!({"DefaultRootObject": "index.html"}))).unwrap();
        assert_eq!(out, "defaultRootObject: \"index.html\",\n");

        let out = expand(&nodes, &args(json!({}))).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn else_branch_and_tmpl_tags() {
        let source = "\
{{- if Behavior.targetOriginId }}
behavior: {{Behavior}},
//TMPL {{- else }}
//TMPL behavior: { ...{{Behavior}}, targetOriginId: {{Origins[0].originId}} },
{{- end }}
";
        let nodes = parse_source(source).unwrap();

        let present = args(json!({
            "Behavior": {"targetOriginId": "o1"},
            "Origins": [{"originId": "o1"}]
        }));
        assert_eq!(
            expand(&nodes, &present).unwrap(),
            "behavior: { targetOriginId: \"o1\" },\n"
        );

        let absent = args(json!({
            "Behavior": {"viewerProtocolPolicy": "https-only"},
            "Origins": [{"originId": "o1"}]
        }));
        assert_eq!(
            expand(&nodes, &absent).unwrap(),
            "behavior: { ...{ viewerProtocolPolicy: \"https-only\" }, targetOriginId: \"o1\" },\n"
        );
    }

    #[test]
    fn nested_if_blocks() {
        let source = "\
{{- if Outer }}
outer,
{{- if Inner }}
inner,
{{- end }}
{{- end }}
";
        let nodes = parse_source(source).unwrap();
        assert_eq!(
            expand(&nodes, &args(json!({"Outer": true, "Inner": true}))).unwrap(),
            "outer,\ninner,\n"
        );
        assert_eq!(
            expand(&nodes, &args(json!({"Outer": true}))).unwrap(),
            "outer,\n"
        );
        assert_eq!(expand(&nodes, &args(json!({}))).unwrap(), "");
    }

    #[test]
    fn unbalanced_markers_fail_to_parse() {
        for source in [
            "{{- if X }}\nbody\n",
            "{{- end }}\n",
            "{{- else }}\n",
            "{{- if X }}\n{{- else }}\n{{- else }}\n{{- end }}\n",
        ] {
            let err = parse_source(source).unwrap_err();
            assert!(err.to_string().starts_with("TRL-020"), "source: {}", source);
        }
    }

    #[test]
    fn expansion_is_deterministic() {
        let source = "\
a: {{A}},
{{- if B.key }}
b: {{B}},
{{- else }}
b: none,
{{- end }}
";
        let nodes = parse_source(source).unwrap();
        let bound = args(json!({"A": [1, 2], "B": {"other": 1}}));

        let first = expand(&nodes, &bound).unwrap();
        let second = expand(&nodes, &bound).unwrap();
        assert_eq!(first, second);
    }
}
