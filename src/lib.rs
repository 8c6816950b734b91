//! Trellis - resource template compiler and provisioning graph runtime
//!
//! Templates declare a typed argument contract, a create body with
//! generation-time directives, and deferred property/export derivations.
//! Binding a template to a call site yields a compiled unit; units link
//! into a dependency DAG; provisioning hands creation to an external
//! backend and threads backend-assigned attributes through deferred
//! transform chains into the stack's export surface.

pub mod argpath;
pub mod backend;
pub mod binder;
pub mod catalog;
pub mod deferred;
pub mod directive;
pub mod error;
pub mod graph;
pub mod handle;
pub mod manifest;
pub mod record;
pub mod shape;
pub mod stack;

pub use backend::{CreateOptions, CreatedResource, MockBackend, ProvisioningBackend};
pub use binder::{bind, CompiledUnit};
pub use deferred::{AttrMap, AttrValue, DeferredCell, DeferredError, DeferredValue};
pub use directive::DirectiveNode;
pub use error::{FixSuggestion, TrellisError};
pub use graph::DependencyGraph;
pub use handle::ResourceHandle;
pub use manifest::{StackManifest, UnitDecl};
pub use record::{ArgSpec, SemanticType, TemplateRecord, TemplateRegistry};
pub use shape::{ArgExpr, BoundArgs, UnitRef};
pub use stack::{BuildReport, Stack, StackBuilder, UnitFailure, UnitStatus};
