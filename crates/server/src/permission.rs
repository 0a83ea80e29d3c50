use async_trait::async_trait;
use teleportal_auth::{Claims, PermissionEvaluator};
use teleportal_primitives::{DocumentId, Message, Permission};

/// Everything a [`PermissionChecker`] needs to decide one `(client,
/// document, permission)` check (§4.H Permission gate).
pub struct PermissionRequest<'a> {
    pub claims: &'a Claims,
    pub document_id: &'a DocumentId,
    pub message: &'a Message,
    pub permission: Permission,
}

/// User-supplied (or default) authorization hook. `doc.sync-step-1` needs
/// `Read`, `doc.sync-step-2`/`doc.update` need `Write`; `awareness`, `ack`,
/// `file.*`, and most `rpc.*` bypass the gate entirely by never producing a
/// `Some(permission)` from [`Message::required_permission`].
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn check(&self, request: PermissionRequest<'_>) -> bool;
}

/// Evaluates the requesting client's token claims against its
/// `documentAccess` pattern list (§4.D).
#[derive(Debug, Default)]
pub struct ClaimsPermissionChecker {
    evaluator: PermissionEvaluator,
}

impl ClaimsPermissionChecker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionChecker for ClaimsPermissionChecker {
    async fn check(&self, request: PermissionRequest<'_>) -> bool {
        self.evaluator
            .evaluate(request.claims, request.document_id.as_str(), request.permission)
    }
}
