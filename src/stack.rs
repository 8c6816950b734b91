//! Stack building and provisioning
//!
//! A [`StackBuilder`] binds units one by one (or from a manifest), `link`
//! validates references and produces the dependency graph, and
//! [`Stack::provision`] hands creation to the backend: one task per unit,
//! gated only on that unit's direct dependencies, so independent units run
//! concurrently. Schema, shape, and graph errors abort before any backend
//! call; per-unit creation or derivation failures mark the unit and its
//! dependents failed while independent units complete.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::backend::{CreateOptions, ProvisioningBackend};
use crate::binder::{bind, CompiledUnit};
use crate::deferred::{AttrMap, AttrValue, DeferredError, DeferredValue};
use crate::error::TrellisError;
use crate::graph::{self, DependencyGraph};
use crate::manifest::StackManifest;
use crate::record::TemplateRegistry;
use crate::shape::{ArgExpr, BoundArgs};

/// Attribute a bare `${unit}` reference resolves to
pub const DEFAULT_REF_ATTR: &str = "id";

/// Per-unit lifecycle state
///
/// `Pending -> Created -> PropertiesResolved -> Succeeded`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Pending,
    Created,
    PropertiesResolved,
    Succeeded,
    Failed(String),
}

impl UnitStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, UnitStatus::Failed(_))
    }
}

/// One failed unit with its cause
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: TrellisError,
}

/// Aggregated outcome of one stack build
#[derive(Debug)]
pub struct BuildReport {
    /// Terminal status per unit
    pub statuses: BTreeMap<String, UnitStatus>,
    /// Every failed unit with its cause, sorted by unit name
    pub failures: Vec<UnitFailure>,
    /// Resolved exports of succeeded units: unit name -> export name -> value
    pub exports: BTreeMap<String, BTreeMap<String, AttrValue>>,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn status(&self, unit: &str) -> Option<&UnitStatus> {
        self.statuses.get(unit)
    }

    pub fn export(&self, unit: &str, name: &str) -> Option<&AttrValue> {
        self.exports.get(unit).and_then(|m| m.get(name))
    }
}

/// Incrementally binds units against a shared template registry
#[derive(Debug)]
pub struct StackBuilder {
    registry: Arc<TemplateRegistry>,
    units: Vec<Arc<CompiledUnit>>,
    names: HashSet<Arc<str>>,
}

impl StackBuilder {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self {
            registry,
            units: Vec::new(),
            names: HashSet::new(),
        }
    }

    /// Bind one call site; declaration order is preserved and breaks
    /// topological ties
    pub fn add_unit(
        &mut self,
        template_id: &str,
        name: &str,
        args: BoundArgs,
    ) -> Result<(), TrellisError> {
        if self.names.contains(name) {
            return Err(TrellisError::DuplicateUnit {
                name: name.to_string(),
            });
        }

        let template = self.registry.get(template_id)?;
        let unit = bind(template, name, args)?;
        self.names.insert(Arc::clone(unit.name()));
        self.units.push(Arc::new(unit));
        Ok(())
    }

    /// Bind every unit declared in a manifest, in declaration order
    pub fn from_manifest(
        registry: Arc<TemplateRegistry>,
        manifest: &StackManifest,
    ) -> Result<Self, TrellisError> {
        let mut builder = Self::new(registry);
        for decl in &manifest.units {
            builder.add_unit(&decl.template, &decl.name, decl.bound_args()?)?;
        }
        Ok(builder)
    }

    /// Validate cross-references and produce a provisionable stack
    ///
    /// Dangling references and cycles are rejected here - before any
    /// backend call is possible.
    pub fn link(self) -> Result<Stack, TrellisError> {
        let graph = graph::link(&self.units)?;

        let statuses: Arc<DashMap<Arc<str>, UnitStatus>> = Arc::new(DashMap::new());
        let mut by_name = HashMap::with_capacity(self.units.len());
        for unit in &self.units {
            statuses.insert(Arc::clone(unit.name()), UnitStatus::Pending);
            by_name.insert(Arc::clone(unit.name()), Arc::clone(unit));
        }

        Ok(Stack {
            units: self.units,
            by_name,
            graph,
            statuses,
        })
    }
}

/// A linked set of compiled units, ready for one provisioning pass
#[derive(Debug)]
pub struct Stack {
    units: Vec<Arc<CompiledUnit>>,
    by_name: HashMap<Arc<str>, Arc<CompiledUnit>>,
    graph: DependencyGraph,
    statuses: Arc<DashMap<Arc<str>, UnitStatus>>,
}

impl Stack {
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn unit(&self, name: &str) -> Option<&Arc<CompiledUnit>> {
        self.by_name.get(name)
    }

    pub fn units(&self) -> &[Arc<CompiledUnit>] {
        &self.units
    }

    /// Current status of one unit (orchestrators poll this mid-build)
    pub fn status(&self, name: &str) -> Option<UnitStatus> {
        self.statuses.get(name).map(|s| s.clone())
    }

    /// Execute the build against the backend
    ///
    /// One task per unit, gated on its direct dependencies reaching a
    /// terminal state; a stack is provisioned at most once (handles are
    /// write-once).
    #[instrument(skip(self, backend), fields(units = self.units.len()))]
    pub async fn provision(&self, backend: Arc<dyn ProvisioningBackend>) -> BuildReport {
        let failures: Arc<Mutex<Vec<UnitFailure>>> = Arc::new(Mutex::new(Vec::new()));

        // Completion signal per unit: fulfilled on success, failed on any
        // failure, so dependents can gate without polling
        let mut completions: HashMap<Arc<str>, DeferredValue> = HashMap::new();
        let mut cells = HashMap::new();
        for unit in &self.units {
            let (value, cell) = DeferredValue::cell();
            completions.insert(Arc::clone(unit.name()), value);
            cells.insert(Arc::clone(unit.name()), cell);
        }

        let mut tasks = Vec::with_capacity(self.units.len());
        for name in self.graph.order() {
            let unit = Arc::clone(&self.by_name[name]);
            let deps: Vec<(Arc<CompiledUnit>, DeferredValue)> = self
                .graph
                .dependencies(name)
                .iter()
                .map(|dep| {
                    (
                        Arc::clone(&self.by_name[dep]),
                        completions[dep].clone(),
                    )
                })
                .collect();
            let cell = cells[name].clone();
            let backend = Arc::clone(&backend);
            let statuses = Arc::clone(&self.statuses);
            let failures = Arc::clone(&failures);

            tasks.push(tokio::spawn(async move {
                let fail = |error: TrellisError, deferred: DeferredError| {
                    warn!(unit = unit.name().as_ref(), %error, "unit failed");
                    statuses.insert(Arc::clone(unit.name()), UnitStatus::Failed(error.to_string()));
                    failures
                        .lock()
                        .expect("failure lock poisoned")
                        .push(UnitFailure {
                            unit: unit.name().to_string(),
                            error,
                        });
                    unit.handle().fail(deferred.clone());
                    cell.fail(deferred);
                };

                // Wait for every direct dependency to finish; a failed
                // dependency means this unit's create is never issued
                let mut dep_attrs: HashMap<String, AttrMap> = HashMap::new();
                for (dep, completion) in &deps {
                    if completion.resolve().await.is_err() {
                        let cause = format!("dependency '{}' failed", dep.name());
                        fail(
                            TrellisError::ResourceCreationFailed {
                                unit: unit.name().to_string(),
                                cause: cause.clone(),
                            },
                            DeferredError::CreationFailed {
                                unit: unit.name().to_string(),
                                cause,
                            },
                        );
                        return;
                    }
                    match dep.handle().resolved().await {
                        Ok(attrs) => {
                            dep_attrs.insert(dep.name().to_string(), attrs);
                        }
                        Err(err) => {
                            fail(
                                TrellisError::ResourceCreationFailed {
                                    unit: unit.name().to_string(),
                                    cause: err.to_string(),
                                },
                                err,
                            );
                            return;
                        }
                    }
                }

                let resolved = match resolve_args(unit.args(), &dep_attrs) {
                    Ok(value) => value,
                    Err(err) => {
                        fail(
                            TrellisError::ResourceCreationFailed {
                                unit: unit.name().to_string(),
                                cause: err.to_string(),
                            },
                            err,
                        );
                        return;
                    }
                };

                let mut depends_on: Vec<String> =
                    deps.iter().map(|(d, _)| d.name().to_string()).collect();
                depends_on.sort();
                let options = CreateOptions {
                    protect: matches!(unit.args().get("protect"), Some(ArgExpr::Bool(true))),
                    depends_on,
                };

                debug!(unit = unit.name().as_ref(), "issuing create");
                match backend
                    .create_resource(unit.template().id(), unit.name(), &resolved, &options)
                    .await
                {
                    Ok(attrs) => {
                        unit.handle().fulfill(attrs);
                        statuses.insert(Arc::clone(unit.name()), UnitStatus::Created);
                    }
                    Err(err) => {
                        let cause = err.to_string();
                        fail(
                            TrellisError::ResourceCreationFailed {
                                unit: unit.name().to_string(),
                                cause: cause.clone(),
                            },
                            DeferredError::CreationFailed {
                                unit: unit.name().to_string(),
                                cause,
                            },
                        );
                        return;
                    }
                }

                for (property, value) in unit.properties() {
                    if let Err(err) = value.resolve().await {
                        fail(
                            TrellisError::PropertyDerivationFailed {
                                unit: unit.name().to_string(),
                                property: property.clone(),
                                cause: err.to_string(),
                            },
                            err,
                        );
                        return;
                    }
                }
                statuses.insert(Arc::clone(unit.name()), UnitStatus::PropertiesResolved);

                for (export, value) in unit.exports() {
                    if let Err(err) = value.resolve().await {
                        fail(
                            TrellisError::PropertyDerivationFailed {
                                unit: unit.name().to_string(),
                                property: export.clone(),
                                cause: err.to_string(),
                            },
                            err,
                        );
                        return;
                    }
                }
                statuses.insert(Arc::clone(unit.name()), UnitStatus::Succeeded);
                cell.fulfill(Value::Null);
            }));
        }

        for task in tasks {
            let _ = task.await;
        }

        self.report(failures).await
    }

    async fn report(&self, failures: Arc<Mutex<Vec<UnitFailure>>>) -> BuildReport {
        let mut statuses = BTreeMap::new();
        for unit in &self.units {
            let status = self
                .status(unit.name())
                .unwrap_or(UnitStatus::Pending);
            statuses.insert(unit.name().to_string(), status);
        }

        let mut exports: BTreeMap<String, BTreeMap<String, AttrValue>> = BTreeMap::new();
        for unit in &self.units {
            if statuses.get(unit.name().as_ref()) != Some(&UnitStatus::Succeeded) {
                continue;
            }
            let mut resolved = BTreeMap::new();
            for (name, value) in unit.exports() {
                if let Ok(v) = value.resolve().await {
                    resolved.insert(name.clone(), v);
                }
            }
            if !resolved.is_empty() {
                exports.insert(unit.name().to_string(), resolved);
            }
        }

        let mut failures = Arc::try_unwrap(failures)
            .expect("all provisioning tasks joined")
            .into_inner()
            .expect("failure lock poisoned");
        failures.sort_by(|a, b| a.unit.cmp(&b.unit));

        BuildReport {
            statuses,
            failures,
            exports,
        }
    }
}

/// Substitute references with resolved dependency attributes
fn resolve_args(
    args: &BoundArgs,
    deps: &HashMap<String, AttrMap>,
) -> Result<AttrValue, DeferredError> {
    let mut map = serde_json::Map::new();
    for (name, expr) in args {
        map.insert(name.clone(), resolve_expr(expr, deps)?);
    }
    Ok(Value::Object(map))
}

fn resolve_expr(
    expr: &ArgExpr,
    deps: &HashMap<String, AttrMap>,
) -> Result<AttrValue, DeferredError> {
    match expr {
        ArgExpr::Null => Ok(Value::Null),
        ArgExpr::Bool(b) => Ok(Value::Bool(*b)),
        ArgExpr::Number(n) => Ok(Value::Number(n.clone())),
        ArgExpr::Str(s) => Ok(Value::String(s.clone())),
        ArgExpr::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve_expr(item, deps))
                .collect::<Result<_, _>>()?,
        )),
        ArgExpr::Object(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                map.insert(k.clone(), resolve_expr(v, deps)?);
            }
            Ok(Value::Object(map))
        }
        ArgExpr::Ref(r) => {
            let attrs = deps
                .get(&r.unit)
                .ok_or_else(|| DeferredError::Derivation {
                    detail: format!("reference '{}' has no resolved dependency", r),
                })?;
            let attr = r.attr.as_deref().unwrap_or(DEFAULT_REF_ATTR);
            attrs
                .get(attr)
                .cloned()
                .ok_or_else(|| DeferredError::MissingAttribute {
                    unit: r.unit.clone(),
                    attr: attr.to_string(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::catalog;
    use serde_json::json;

    fn args(value: serde_json::Value) -> BoundArgs {
        match ArgExpr::from(value) {
            ArgExpr::Object(entries) => entries.into_iter().collect(),
            other => panic!("expected object args, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_unit_rejected() {
        let registry = Arc::new(catalog::builtin());
        let mut builder = StackBuilder::new(Arc::clone(&registry));
        builder
            .add_unit("secret", "s", args(json!({"Name": "s", "protect": true})))
            .unwrap();
        let err = builder
            .add_unit("secret", "s", args(json!({"Name": "s", "protect": false})))
            .unwrap_err();
        assert!(err.to_string().starts_with("TRL-014"));
    }

    #[test]
    fn unknown_template_rejected() {
        let registry = Arc::new(catalog::builtin());
        let mut builder = StackBuilder::new(registry);
        let err = builder
            .add_unit("no_such_template", "u", BoundArgs::new())
            .unwrap_err();
        assert!(err.to_string().starts_with("TRL-013"));
    }

    #[test]
    fn resolve_args_substitutes_references() {
        let bound = args(json!({
            "Name": "a",
            "TargetKey": "${key}",
            "Nested": {"arn": "${key.arn}"}
        }));
        let deps = HashMap::from([(
            "key".to_string(),
            AttrMap::from([
                ("id".to_string(), json!("key-id")),
                ("arn".to_string(), json!("arn:key")),
            ]),
        )]);

        let resolved = resolve_args(&bound, &deps).unwrap();
        assert_eq!(
            resolved,
            json!({
                "Name": "a",
                "TargetKey": "key-id",
                "Nested": {"arn": "arn:key"}
            })
        );
    }

    #[test]
    fn resolve_args_missing_attribute() {
        let bound = args(json!({"TargetKey": "${key.nonexistent}"}));
        let deps = HashMap::from([(
            "key".to_string(),
            AttrMap::from([("id".to_string(), json!("key-id"))]),
        )]);

        let err = resolve_args(&bound, &deps).unwrap_err();
        assert_eq!(
            err,
            DeferredError::MissingAttribute {
                unit: "key".into(),
                attr: "nonexistent".into(),
            }
        );
    }

    #[tokio::test]
    async fn provision_reports_statuses_and_options() {
        let registry = Arc::new(catalog::builtin());
        let mut builder = StackBuilder::new(registry);
        builder
            .add_unit("secret", "db-password", args(json!({"Name": "db-password", "protect": true})))
            .unwrap();
        let stack = builder.link().unwrap();

        assert_eq!(stack.status("db-password"), Some(UnitStatus::Pending));

        let backend = Arc::new(MockBackend::new());
        let report = stack.provision(Arc::clone(&backend) as Arc<dyn ProvisioningBackend>).await;

        assert!(report.succeeded());
        assert_eq!(report.status("db-password"), Some(&UnitStatus::Succeeded));

        let created = backend.created();
        assert_eq!(created.len(), 1);
        assert!(created[0].options.protect);
        assert!(created[0].options.depends_on.is_empty());
    }
}
