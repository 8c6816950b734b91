//! Deferred values - write-once placeholders for backend-assigned attributes
//!
//! A [`DeferredValue`] stands for a value that exists only after the
//! provisioning backend has created a resource. Transforms (`map`,
//! `combine`) are lazy: they build a chain and perform no work until the
//! source resolves. A failed source makes every downstream transform
//! failed; nothing is silently defaulted.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::Notify;

/// A resolved attribute value
pub type AttrValue = serde_json::Value;

/// The full attribute map assigned to one created resource
pub type AttrMap = BTreeMap<String, AttrValue>;

/// Failure carried through deferred chains
///
/// Cloneable so one upstream failure can fan out to every dependent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeferredError {
    #[error("resource creation failed for unit '{unit}': {cause}")]
    CreationFailed { unit: String, cause: String },

    #[error("unit '{unit}' has no attribute '{attr}'")]
    MissingAttribute { unit: String, attr: String },

    #[error("transform failed: {detail}")]
    Derivation { detail: String },
}

/// Write-once slot with async waiters
#[derive(Debug)]
struct Slot<T> {
    value: OnceLock<Result<T, DeferredError>>,
    notify: Notify,
}

impl<T: Clone> Slot<T> {
    fn new() -> Self {
        Self {
            value: OnceLock::new(),
            notify: Notify::new(),
        }
    }

    /// First write wins; later writes are ignored
    fn set(&self, result: Result<T, DeferredError>) -> bool {
        let stored = self.value.set(result).is_ok();
        if stored {
            self.notify.notify_waiters();
        }
        stored
    }

    fn try_get(&self) -> Option<Result<T, DeferredError>> {
        self.value.get().cloned()
    }

    async fn get(&self) -> Result<T, DeferredError> {
        loop {
            // Register interest before checking, so a set between the check
            // and the await cannot be missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.value.get() {
                return value.clone();
            }
            notified.await;
        }
    }
}

/// Shared state behind a [`crate::handle::ResourceHandle`]
///
/// One slot per created resource; attribute values project out of it.
#[derive(Debug)]
pub(crate) struct HandleState {
    pub(crate) kind: Arc<str>,
    pub(crate) unit: Arc<str>,
    slot: Slot<AttrMap>,
}

impl HandleState {
    pub(crate) fn new(kind: &str, unit: &str) -> Self {
        Self {
            kind: Arc::from(kind),
            unit: Arc::from(unit),
            slot: Slot::new(),
        }
    }

    pub(crate) fn fulfill(&self, attrs: AttrMap) {
        self.slot.set(Ok(attrs));
    }

    pub(crate) fn fail(&self, error: DeferredError) {
        self.slot.set(Err(error));
    }

    pub(crate) async fn resolved(&self) -> Result<AttrMap, DeferredError> {
        self.slot.get().await
    }

    pub(crate) fn try_resolved(&self) -> Option<Result<AttrMap, DeferredError>> {
        self.slot.try_get()
    }
}

type Transform = Arc<dyn Fn(AttrValue) -> Result<AttrValue, String> + Send + Sync>;
type Combiner = Arc<dyn Fn(AttrValue, AttrValue) -> Result<AttrValue, String> + Send + Sync>;

enum Node {
    /// Already-known value (literal exports, tests)
    Ready(Result<AttrValue, DeferredError>),
    /// Backend-fulfilled cell
    Cell(Arc<Slot<AttrValue>>),
    /// Projection of one attribute out of a handle's attribute map
    Attr {
        handle: Arc<HandleState>,
        name: String,
    },
    /// Pure transform over one source
    Map {
        source: DeferredValue,
        transform: Transform,
    },
    /// Pure merge of two sources
    Combine {
        left: DeferredValue,
        right: DeferredValue,
        merge: Combiner,
    },
}

/// A write-once, read-many placeholder for an eventually-resolved value
#[derive(Clone)]
pub struct DeferredValue {
    node: Arc<Node>,
}

impl std::fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.node.as_ref() {
            Node::Ready(_) => "ready",
            Node::Cell(_) => "cell",
            Node::Attr { .. } => "attr",
            Node::Map { .. } => "map",
            Node::Combine { .. } => "combine",
        };
        write!(f, "DeferredValue({})", kind)
    }
}

/// Fulfillment side of a cell-backed [`DeferredValue`]
#[derive(Clone)]
pub struct DeferredCell {
    slot: Arc<Slot<AttrValue>>,
}

impl DeferredCell {
    pub fn fulfill(&self, value: AttrValue) -> bool {
        self.slot.set(Ok(value))
    }

    pub fn fail(&self, error: DeferredError) -> bool {
        self.slot.set(Err(error))
    }
}

impl DeferredValue {
    /// A value known up front
    pub fn ready(value: AttrValue) -> Self {
        Self {
            node: Arc::new(Node::Ready(Ok(value))),
        }
    }

    /// A fresh unresolved cell plus its fulfillment side
    pub fn cell() -> (Self, DeferredCell) {
        let slot = Arc::new(Slot::new());
        (
            Self {
                node: Arc::new(Node::Cell(Arc::clone(&slot))),
            },
            DeferredCell { slot },
        )
    }

    pub(crate) fn attr(handle: Arc<HandleState>, name: impl Into<String>) -> Self {
        Self {
            node: Arc::new(Node::Attr {
                handle,
                name: name.into(),
            }),
        }
    }

    /// Lazy pure transform; runs only once the source resolves
    pub fn map<F>(&self, transform: F) -> Self
    where
        F: Fn(AttrValue) -> Result<AttrValue, String> + Send + Sync + 'static,
    {
        Self {
            node: Arc::new(Node::Map {
                source: self.clone(),
                transform: Arc::new(transform),
            }),
        }
    }

    /// Lazy pure merge of two deferred values
    pub fn combine<F>(&self, other: &DeferredValue, merge: F) -> Self
    where
        F: Fn(AttrValue, AttrValue) -> Result<AttrValue, String> + Send + Sync + 'static,
    {
        Self {
            node: Arc::new(Node::Combine {
                left: self.clone(),
                right: other.clone(),
                merge: Arc::new(merge),
            }),
        }
    }

    /// Await resolution, applying the transform chain
    pub fn resolve(&self) -> BoxFuture<'static, Result<AttrValue, DeferredError>> {
        let node = Arc::clone(&self.node);
        async move {
            match node.as_ref() {
                Node::Ready(result) => result.clone(),
                Node::Cell(slot) => slot.get().await,
                Node::Attr { handle, name } => {
                    let attrs = handle.resolved().await?;
                    attrs
                        .get(name)
                        .cloned()
                        .ok_or_else(|| DeferredError::MissingAttribute {
                            unit: handle.unit.to_string(),
                            attr: name.clone(),
                        })
                }
                Node::Map { source, transform } => {
                    let value = source.resolve().await?;
                    transform(value).map_err(|detail| DeferredError::Derivation { detail })
                }
                Node::Combine { left, right, merge } => {
                    let l = left.resolve().await?;
                    let r = right.resolve().await?;
                    merge(l, r).map_err(|detail| DeferredError::Derivation { detail })
                }
            }
        }
        .boxed()
    }
}
