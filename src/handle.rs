//! Resource handles - the opaque identity of one created provider resource

use std::sync::Arc;

use crate::deferred::{AttrMap, DeferredError, DeferredValue, HandleState};

/// Opaque identifier for a created provider resource
///
/// Allocated at bind time with all attributes unresolved; the provisioning
/// executor fulfills (or fails) it once the backend reports. Cloning shares
/// the same underlying resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    state: Arc<HandleState>,
}

impl ResourceHandle {
    pub(crate) fn new(kind: &str, unit: &str) -> Self {
        Self {
            state: Arc::new(HandleState::new(kind, unit)),
        }
    }

    /// Provider resource kind (the template id)
    pub fn kind(&self) -> &str {
        &self.state.kind
    }

    /// Name of the unit this handle belongs to
    pub fn unit(&self) -> &str {
        &self.state.unit
    }

    /// Deferred view of one backend-assigned attribute
    pub fn attribute(&self, name: &str) -> DeferredValue {
        DeferredValue::attr(Arc::clone(&self.state), name)
    }

    pub(crate) fn fulfill(&self, attrs: AttrMap) {
        self.state.fulfill(attrs);
    }

    pub(crate) fn fail(&self, error: DeferredError) {
        self.state.fail(error);
    }

    /// Await the full attribute map
    pub async fn resolved(&self) -> Result<AttrMap, DeferredError> {
        self.state.resolved().await
    }

    /// Non-blocking peek at the resolution state
    pub fn try_resolved(&self) -> Option<Result<AttrMap, DeferredError>> {
        self.state.try_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn attributes_resolve_after_fulfill() {
        let handle = ResourceHandle::new("aws:kms_key", "key");
        assert!(handle.try_resolved().is_none());

        let id = handle.attribute("id");
        handle.fulfill(AttrMap::from([("id".to_string(), json!("key-1234"))]));

        assert_eq!(id.resolve().await.unwrap(), json!("key-1234"));
        assert!(handle.try_resolved().is_some());
    }

    #[tokio::test]
    async fn clones_share_state() {
        let handle = ResourceHandle::new("aws:kms_key", "key");
        let other = handle.clone();
        handle.fulfill(AttrMap::new());
        assert!(other.resolved().await.is_ok());
    }

    #[tokio::test]
    async fn failure_reaches_attribute_views() {
        let handle = ResourceHandle::new("aws:kms_key", "key");
        let id = handle.attribute("id");

        handle.fail(DeferredError::CreationFailed {
            unit: "key".into(),
            cause: "quota".into(),
        });

        assert!(id.resolve().await.is_err());
    }
}
