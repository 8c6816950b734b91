//! Provisioning backend abstraction
//!
//! The core performs no network I/O: resource creation is delegated to an
//! external backend behind this trait. The backend owns retries, timeouts,
//! authentication, and state persistence.
//!
//! [`MockBackend`] is the test double: configurable attributes, scripted
//! failures, and a recorded creation order for assertions.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;

use crate::deferred::{AttrMap, AttrValue};

/// Per-create options forwarded to the backend
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Protect the created resource from deletion/replacement
    pub protect: bool,
    /// Names of units that must be created before this one, sorted
    pub depends_on: Vec<String>,
}

/// Capability required of the external provisioning collaborator
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Create one provider resource and return its assigned attributes
    async fn create_resource(
        &self,
        kind: &str,
        name: &str,
        args: &AttrValue,
        options: &CreateOptions,
    ) -> Result<AttrMap>;
}

/// One recorded create call (for assertions)
#[derive(Debug, Clone)]
pub struct CreatedResource {
    pub kind: String,
    pub name: String,
    pub args: AttrValue,
    pub options: CreateOptions,
}

/// In-memory backend for tests
pub struct MockBackend {
    /// Extra attributes returned per resource kind
    kind_attrs: DashMap<String, AttrMap>,
    /// Scripted failures: unit name -> cause
    failures: DashMap<String, String>,
    /// Every create call, in issue order
    created: Mutex<Vec<CreatedResource>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            kind_attrs: DashMap::new(),
            failures: DashMap::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Attributes to merge into every created resource of `kind`
    pub fn with_attributes(self, kind: &str, attrs: AttrMap) -> Self {
        self.kind_attrs.insert(kind.to_string(), attrs);
        self
    }

    /// Script a failure for the named unit
    pub fn fail_unit(&self, name: &str, cause: &str) {
        self.failures.insert(name.to_string(), cause.to_string());
    }

    /// All create calls made so far
    pub fn created(&self) -> Vec<CreatedResource> {
        self.created.lock().expect("mock lock poisoned").clone()
    }

    /// Unit names in the order their creation was issued
    pub fn creation_order(&self) -> Vec<String> {
        self.created()
            .into_iter()
            .map(|r| r.name)
            .collect()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisioningBackend for MockBackend {
    async fn create_resource(
        &self,
        kind: &str,
        name: &str,
        args: &AttrValue,
        options: &CreateOptions,
    ) -> Result<AttrMap> {
        self.created.lock().expect("mock lock poisoned").push(CreatedResource {
            kind: kind.to_string(),
            name: name.to_string(),
            args: args.clone(),
            options: options.clone(),
        });

        if let Some(cause) = self.failures.get(name) {
            anyhow::bail!("{}", cause.value());
        }

        let mut attrs = AttrMap::from([
            ("id".to_string(), json!(format!("{}-id", name))),
            ("urn".to_string(), json!(format!("urn:mock:{}::{}", kind, name))),
        ]);
        if let Some(extra) = self.kind_attrs.get(kind) {
            for (k, v) in extra.value() {
                attrs.insert(k.clone(), v.clone());
            }
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_assigns_default_id_and_urn() {
        let backend = MockBackend::new();
        let attrs = backend
            .create_resource("kms_key", "key", &json!({}), &CreateOptions::default())
            .await
            .unwrap();

        assert_eq!(attrs["id"], json!("key-id"));
        assert_eq!(attrs["urn"], json!("urn:mock:kms_key::key"));
    }

    #[tokio::test]
    async fn mock_merges_kind_attributes() {
        let backend = MockBackend::new().with_attributes(
            "api_stage",
            AttrMap::from([("invokeUrl".to_string(), json!("https://x.example.com/prod"))]),
        );

        let attrs = backend
            .create_resource("api_stage", "stage", &json!({}), &CreateOptions::default())
            .await
            .unwrap();

        assert_eq!(attrs["invokeUrl"], json!("https://x.example.com/prod"));
        assert_eq!(attrs["id"], json!("stage-id"));
    }

    #[tokio::test]
    async fn mock_scripted_failure() {
        let backend = MockBackend::new();
        backend.fail_unit("key", "quota exceeded");

        let err = backend
            .create_resource("kms_key", "key", &json!({}), &CreateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }

    #[tokio::test]
    async fn mock_records_creation_order() {
        let backend = MockBackend::new();
        for name in ["first", "second"] {
            backend
                .create_resource("kind", name, &json!({}), &CreateOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(backend.creation_order(), ["first", "second"]);
    }
}
