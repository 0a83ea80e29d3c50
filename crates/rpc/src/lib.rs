//! RPC method registry and the reference milestone/file-transfer handlers
//! (§4.J).
//!
//! RPC messages share the transport with document traffic. A registry maps
//! `methodName -> handler`; handlers see a [`RpcContext`] scoping them to
//! one document and respond with either a single value or a stream of
//! intermediate messages followed by a final response.

pub mod context;
pub mod error;
pub mod handlers;
pub mod milestone;
pub mod registry;

pub use context::RpcContext;
pub use error::RpcError;
pub use handlers::file::{FileDownloadHandler, FileUploadHandler};
pub use teleportal_upload::FileReader;
pub use handlers::milestone::{
    MilestoneCreateHandler, MilestoneDeleteHandler, MilestoneGetHandler, MilestoneListHandler,
    MilestoneRestoreHandler, MilestoneUpdateNameHandler,
};
pub use milestone::{InMemoryMilestoneStore, MilestoneRecord, MilestoneStore};
pub use registry::{MethodRegistry, RpcHandler, RpcOutcome};

use std::sync::Arc;

/// Builds a [`MethodRegistry`] with the reference milestone CRUD methods
/// registered (§4.J: "The reference methods are the milestone CRUD... and
/// file RPCs").
#[must_use]
pub fn milestone_registry(store: Arc<dyn MilestoneStore>) -> MethodRegistry {
    let registry = MethodRegistry::new();
    registry.register(
        "milestoneList",
        Arc::new(MilestoneListHandler {
            store: store.clone(),
        }),
    );
    registry.register(
        "milestoneGet",
        Arc::new(MilestoneGetHandler {
            store: store.clone(),
        }),
    );
    registry.register(
        "milestoneCreate",
        Arc::new(MilestoneCreateHandler {
            store: store.clone(),
        }),
    );
    registry.register(
        "milestoneUpdateName",
        Arc::new(MilestoneUpdateNameHandler {
            store: store.clone(),
        }),
    );
    registry.register(
        "milestoneDelete",
        Arc::new(MilestoneDeleteHandler {
            store: store.clone(),
        }),
    );
    registry.register("milestoneRestore", Arc::new(MilestoneRestoreHandler { store }));
    registry
}
