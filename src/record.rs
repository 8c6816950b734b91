//! Template records - the static contract for one resource kind
//!
//! A record carries the argument schema, the parsed create body, and the
//! property/export derivations. Records are immutable once loaded and
//! shared process-wide through the [`TemplateRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::deferred::DeferredValue;
use crate::directive::{self, DirectiveNode};
use crate::error::TrellisError;
use crate::handle::ResourceHandle;
use crate::shape::{ArgExpr, BoundArgs};

/// Declared semantic type of one template argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticType {
    Str,
    Bool,
    Num,
    Object,
    List,
    /// Must be bound to a cross-unit reference
    Resource,
}

impl SemanticType {
    pub fn name(&self) -> &'static str {
        match self {
            SemanticType::Str => "a string",
            SemanticType::Bool => "a boolean",
            SemanticType::Num => "a number",
            SemanticType::Object => "an object",
            SemanticType::List => "a list",
            SemanticType::Resource => "a resource reference",
        }
    }

    /// Whether a bound expression's static shape satisfies this type
    ///
    /// A reference satisfies any non-resource type too - its value arrives
    /// at resolution time and cannot be shape-checked statically.
    pub fn accepts(&self, expr: &ArgExpr) -> bool {
        match (self, expr) {
            (SemanticType::Resource, ArgExpr::Ref(_)) => true,
            (SemanticType::Resource, _) => false,
            (_, ArgExpr::Ref(_)) => true,
            (SemanticType::Str, ArgExpr::Str(_)) => true,
            (SemanticType::Bool, ArgExpr::Bool(_)) => true,
            (SemanticType::Num, ArgExpr::Number(_)) => true,
            (SemanticType::Object, ArgExpr::Object(_)) => true,
            (SemanticType::List, ArgExpr::Array(_)) => true,
            _ => false,
        }
    }
}

/// One entry of a template's argument schema
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub name: String,
    pub ty: SemanticType,
    pub required: bool,
}

/// Named deferred outputs of one unit (properties or exports)
pub type PropertyMap = BTreeMap<String, DeferredValue>;

/// Derivation function: handle + bound args + already-derived properties
/// to one deferred output. Must only chain transforms, never block.
pub type DeriveFn =
    Arc<dyn Fn(&ResourceHandle, &BoundArgs, &PropertyMap) -> DeferredValue + Send + Sync>;

/// One named property or export derivation
#[derive(Clone)]
pub struct Derivation {
    pub name: String,
    derive: DeriveFn,
}

impl Derivation {
    pub fn apply(
        &self,
        handle: &ResourceHandle,
        args: &BoundArgs,
        props: &PropertyMap,
    ) -> DeferredValue {
        (self.derive)(handle, args, props)
    }
}

impl std::fmt::Debug for Derivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Derivation({})", self.name)
    }
}

/// The static, source-level contract for one resource kind
pub struct TemplateRecord {
    id: String,
    args: Vec<ArgSpec>,
    create: Vec<DirectiveNode>,
    properties: Vec<Derivation>,
    exports: Vec<Derivation>,
}

impl std::fmt::Debug for TemplateRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRecord")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("properties", &self.properties)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl TemplateRecord {
    pub fn builder(id: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            id: id.into(),
            args: Vec::new(),
            create_body: String::new(),
            properties: Vec::new(),
            exports: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    pub fn create_nodes(&self) -> &[DirectiveNode] {
        &self.create
    }

    pub fn properties(&self) -> &[Derivation] {
        &self.properties
    }

    pub fn exports(&self) -> &[Derivation] {
        &self.exports
    }
}

/// Builder for [`TemplateRecord`]; `build` parses the create body
pub struct TemplateBuilder {
    id: String,
    args: Vec<ArgSpec>,
    create_body: String,
    properties: Vec<Derivation>,
    exports: Vec<Derivation>,
}

impl TemplateBuilder {
    pub fn required(mut self, name: &str, ty: SemanticType) -> Self {
        self.args.push(ArgSpec {
            name: name.to_string(),
            ty,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: &str, ty: SemanticType) -> Self {
        self.args.push(ArgSpec {
            name: name.to_string(),
            ty,
            required: false,
        });
        self
    }

    pub fn create_body(mut self, body: &str) -> Self {
        self.create_body = body.to_string();
        self
    }

    pub fn property<F>(mut self, name: &str, derive: F) -> Self
    where
        F: Fn(&ResourceHandle, &BoundArgs, &PropertyMap) -> DeferredValue + Send + Sync + 'static,
    {
        self.properties.push(Derivation {
            name: name.to_string(),
            derive: Arc::new(derive),
        });
        self
    }

    pub fn export<F>(mut self, name: &str, derive: F) -> Self
    where
        F: Fn(&ResourceHandle, &BoundArgs, &PropertyMap) -> DeferredValue + Send + Sync + 'static,
    {
        self.exports.push(Derivation {
            name: name.to_string(),
            derive: Arc::new(derive),
        });
        self
    }

    pub fn build(self) -> Result<TemplateRecord, TrellisError> {
        let create = directive::parse_source(&self.create_body)?;
        Ok(TemplateRecord {
            id: self.id,
            args: self.args,
            create,
            properties: self.properties,
            exports: self.exports,
        })
    }
}

/// Process-wide, read-mostly template store
///
/// Records are registered once at startup and shared across stack builds;
/// lookups are lock-free.
#[derive(Default, Debug)]
pub struct TemplateRegistry {
    templates: DashMap<String, Arc<TemplateRecord>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: TemplateRecord) {
        self.templates.insert(record.id.clone(), Arc::new(record));
    }

    pub fn get(&self, id: &str) -> Result<Arc<TemplateRecord>, TrellisError> {
        self.templates
            .get(id)
            .map(|r| Arc::clone(&r))
            .ok_or_else(|| TrellisError::UnknownTemplate { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
