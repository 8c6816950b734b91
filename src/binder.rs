//! Invocation binder - template record + call site -> compiled unit
//!
//! Validation order is part of the contract: unknown keys, then missing
//! required keys, then shape/type conflicts - all before any directive
//! expansion, and expansion before any handle is allocated. Binding never
//! touches the provisioning backend.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::directive;
use crate::error::TrellisError;
use crate::handle::ResourceHandle;
use crate::record::{PropertyMap, TemplateRecord};
use crate::shape::BoundArgs;

/// One resolved, named instantiation of a template within a stack build
pub struct CompiledUnit {
    name: Arc<str>,
    template: Arc<TemplateRecord>,
    args: BoundArgs,
    create_source: String,
    handle: ResourceHandle,
    properties: PropertyMap,
    exports: PropertyMap,
    dependencies: Vec<String>,
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("name", &self.name)
            .field("template", &self.template.id())
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl CompiledUnit {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn template(&self) -> &Arc<TemplateRecord> {
        &self.template
    }

    pub fn args(&self) -> &BoundArgs {
        &self.args
    }

    /// The expanded create body for this call site
    pub fn create_source(&self) -> &str {
        &self.create_source
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn exports(&self) -> &PropertyMap {
        &self.exports
    }

    /// Names of units this unit references, first-seen order, deduplicated
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Bind a template to a call site
#[instrument(skip(template, args), fields(template = template.id(), unit = name))]
pub fn bind(
    template: Arc<TemplateRecord>,
    name: &str,
    args: BoundArgs,
) -> Result<CompiledUnit, TrellisError> {
    for key in args.keys() {
        if template.arg(key).is_none() {
            return Err(TrellisError::UnknownArgument {
                template: template.id().to_string(),
                name: key.clone(),
            });
        }
    }

    for spec in template.args() {
        match args.get(&spec.name) {
            None if spec.required => {
                return Err(TrellisError::MissingRequiredArgument {
                    template: template.id().to_string(),
                    name: spec.name.clone(),
                });
            }
            None => {}
            Some(expr) => {
                if !spec.ty.accepts(expr) {
                    return Err(TrellisError::TypeMismatch {
                        template: template.id().to_string(),
                        name: spec.name.clone(),
                        expected: spec.ty.name(),
                        found: expr.shape_name(),
                    });
                }
            }
        }
    }

    let create_source = directive::expand(template.create_nodes(), &args)?;
    debug!(bytes = create_source.len(), "expanded create body");

    let handle = ResourceHandle::new(template.id(), name);

    let mut properties = PropertyMap::new();
    for derivation in template.properties() {
        let value = derivation.apply(&handle, &args, &properties);
        properties.insert(derivation.name.clone(), value);
    }

    let mut exports = PropertyMap::new();
    for derivation in template.exports() {
        let value = derivation.apply(&handle, &args, &properties);
        exports.insert(derivation.name.clone(), value);
    }

    let mut refs = Vec::new();
    for expr in args.values() {
        expr.collect_refs(&mut refs);
    }
    let mut dependencies: Vec<String> = Vec::new();
    for r in refs {
        if !dependencies.contains(&r.unit) {
            dependencies.push(r.unit);
        }
    }

    Ok(CompiledUnit {
        name: Arc::from(name),
        template,
        args,
        create_source,
        handle,
        properties,
        exports,
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SemanticType;
    use crate::shape::ArgExpr;
    use serde_json::json;

    fn args(value: serde_json::Value) -> BoundArgs {
        match ArgExpr::from(value) {
            ArgExpr::Object(entries) => entries.into_iter().collect(),
            other => panic!("expected object args, got {:?}", other),
        }
    }

    fn alias_template() -> Arc<TemplateRecord> {
        Arc::new(
            TemplateRecord::builder("kms_alias")
                .required("Name", SemanticType::Str)
                .required("AliasName", SemanticType::Str)
                .required("TargetKey", SemanticType::Resource)
                .create_body("targetKeyId: {{TargetKey}}.id,\nname: {{AliasName}},\n")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn bind_produces_compiled_unit() {
        let unit = bind(
            alias_template(),
            "a",
            args(json!({"Name": "a", "AliasName": "alias/a", "TargetKey": "${key}"})),
        )
        .unwrap();

        assert_eq!(unit.name().as_ref(), "a");
        assert_eq!(unit.create_source(), "targetKeyId: key.id,\nname: \"alias/a\",\n");
        assert_eq!(unit.dependencies(), ["key"]);
        assert_eq!(unit.handle().kind(), "kms_alias");
    }

    #[test]
    fn missing_required_argument() {
        let err = bind(
            alias_template(),
            "a",
            args(json!({"Name": "a", "AliasName": "alias/a"})),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("TRL-010"));
        assert!(err.to_string().contains("TargetKey"));
    }

    #[test]
    fn unknown_argument_rejected_before_expansion() {
        // Expansion of this template would fail (the path is absent), so an
        // UnknownArgument error proves validation ran first
        let template = Arc::new(
            TemplateRecord::builder("strict")
                .required("Name", SemanticType::Str)
                .create_body("x: {{Missing}},\n")
                .build()
                .unwrap(),
        );

        let err = bind(
            template,
            "u",
            args(json!({"Name": "n", "Extra": "boom"})),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("TRL-011"));
        assert!(err.to_string().contains("Extra"));
    }

    #[test]
    fn type_mismatch_on_conflicting_shape() {
        let err = bind(
            alias_template(),
            "a",
            args(json!({"Name": "a", "AliasName": 7, "TargetKey": "${key}"})),
        )
        .unwrap_err();
        match err {
            TrellisError::TypeMismatch { name, expected, found, .. } => {
                assert_eq!(name, "AliasName");
                assert_eq!(expected, "a string");
                assert_eq!(found, "a number literal");
            }
            other => panic!("expected TypeMismatch, got {}", other),
        }
    }

    #[test]
    fn resource_argument_requires_a_reference() {
        let err = bind(
            alias_template(),
            "a",
            args(json!({"Name": "a", "AliasName": "alias/a", "TargetKey": "key-id-literal"})),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("TRL-012"));
    }

    #[test]
    fn optional_argument_may_be_absent() {
        let template = Arc::new(
            TemplateRecord::builder("opt")
                .required("Name", SemanticType::Str)
                .optional("Tags", SemanticType::Object)
                .create_body("name: {{Name}},\n")
                .build()
                .unwrap(),
        );

        let unit = bind(template, "u", args(json!({"Name": "n"}))).unwrap();
        assert_eq!(unit.create_source(), "name: \"n\",\n");
        assert!(unit.dependencies().is_empty());
    }

    #[test]
    fn dependencies_deduplicated_in_first_seen_order() {
        let template = Arc::new(
            TemplateRecord::builder("multi")
                .required("A", SemanticType::Str)
                .required("B", SemanticType::Object)
                .create_body("")
                .build()
                .unwrap(),
        );

        let unit = bind(
            template,
            "u",
            args(json!({
                "A": "${alpha.id}",
                "B": {"x": "${beta.arn}", "y": "${alpha.urn}", "z": "${gamma}"}
            })),
        )
        .unwrap();
        assert_eq!(unit.dependencies(), ["alpha", "beta", "gamma"]);
    }
}
