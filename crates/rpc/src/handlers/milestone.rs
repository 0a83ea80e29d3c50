use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use teleportal_primitives::MilestoneId;
use tracing::debug;

use crate::context::RpcContext;
use crate::error::RpcError;
use crate::milestone::{MilestoneRecord, MilestoneStore};
use crate::registry::{RpcHandler, RpcOutcome};

fn record_json(record: &MilestoneRecord) -> Value {
    json!({
        "milestoneId": record.id.as_str(),
        "name": record.name,
        "createdAt": record.created_at.to_rfc3339(),
    })
}

fn field<'a>(payload: &'a Value, name: &str, method: &str) -> Result<&'a Value, RpcError> {
    payload
        .get(name)
        .ok_or_else(|| RpcError::InvalidPayload(method.to_owned(), format!("missing `{name}`")))
}

fn string_field(payload: &Value, name: &str, method: &str) -> Result<String, RpcError> {
    field(payload, name, method)?
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RpcError::InvalidPayload(method.to_owned(), format!("`{name}` must be a string")))
}

fn milestone_id_field(payload: &Value, method: &str) -> Result<MilestoneId, RpcError> {
    string_field(payload, "milestoneId", method).map(MilestoneId::new)
}

/// `milestoneList`: read-only (§4.J, §6 permission mapping).
pub struct MilestoneListHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneListHandler {
    async fn handle(&self, ctx: &RpcContext, _payload: Value) -> Result<RpcOutcome, RpcError> {
        let records = self.store.list(&ctx.document_id).await?;
        let items: Vec<Value> = records.iter().map(record_json).collect();
        Ok(RpcOutcome::Response(json!({ "milestones": items })))
    }
}

/// `milestoneGet`: returns metadata plus the base64-encoded snapshot.
/// Treated uniformly as a read, including the snapshot payload.
pub struct MilestoneGetHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneGetHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let id = milestone_id_field(&payload, "milestoneGet")?;
        let (record, snapshot) = self.store.get(&ctx.document_id, &id).await?;
        let mut response = record_json(&record);
        response["snapshot"] = json!(BASE64.encode(snapshot));
        Ok(RpcOutcome::Response(response))
    }
}

/// `milestoneCreate`: write.
pub struct MilestoneCreateHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneCreateHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let name = string_field(&payload, "name", "milestoneCreate")?;
        let snapshot_b64 = string_field(&payload, "snapshot", "milestoneCreate")?;
        let snapshot = BASE64
            .decode(snapshot_b64)
            .map_err(|e| RpcError::InvalidPayload("milestoneCreate".into(), e.to_string()))?;

        let record = self
            .store
            .create(&ctx.document_id, name, snapshot)
            .await?;
        debug!(document_id = %ctx.document_id, milestone_id = %record.id, "milestone created");
        Ok(RpcOutcome::Response(record_json(&record)))
    }
}

/// `milestoneUpdateName`: write.
pub struct MilestoneUpdateNameHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneUpdateNameHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let id = milestone_id_field(&payload, "milestoneUpdateName")?;
        let name = string_field(&payload, "name", "milestoneUpdateName")?;
        let record = self
            .store
            .update_name(&ctx.document_id, &id, name)
            .await?;
        Ok(RpcOutcome::Response(record_json(&record)))
    }
}

/// `milestoneDelete`: write.
pub struct MilestoneDeleteHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneDeleteHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let id = milestone_id_field(&payload, "milestoneDelete")?;
        self.store.delete(&ctx.document_id, &id).await?;
        Ok(RpcOutcome::Response(json!({ "milestoneId": id.as_str() })))
    }
}

/// `milestoneRestore`: write.
pub struct MilestoneRestoreHandler {
    pub store: Arc<dyn MilestoneStore>,
}

#[async_trait]
impl RpcHandler for MilestoneRestoreHandler {
    async fn handle(&self, ctx: &RpcContext, payload: Value) -> Result<RpcOutcome, RpcError> {
        let id = milestone_id_field(&payload, "milestoneRestore")?;
        let record = self.store.restore(&ctx.document_id, &id).await?;
        Ok(RpcOutcome::Response(record_json(&record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestone::InMemoryMilestoneStore;
    use teleportal_primitives::DocumentId;
    use teleportal_storage::{InMemoryUnencryptedStorage, LogEngine};

    fn ctx() -> RpcContext {
        RpcContext::new(
            DocumentId::new("doc-1"),
            Arc::new(InMemoryUnencryptedStorage::new(LogEngine)),
        )
    }

    #[tokio::test]
    async fn create_list_get_round_trip() {
        let store: Arc<dyn MilestoneStore> = Arc::new(InMemoryMilestoneStore::new());
        let ctx = ctx();

        let create = MilestoneCreateHandler {
            store: store.clone(),
        };
        let created = create
            .handle(
                &ctx,
                json!({"name": "v1", "snapshot": BASE64.encode(b"hello")}),
            )
            .await
            .unwrap();
        let RpcOutcome::Response(created) = created else {
            panic!("expected response")
        };
        let milestone_id = created["milestoneId"].as_str().unwrap().to_owned();

        let list = MilestoneListHandler {
            store: store.clone(),
        };
        let RpcOutcome::Response(listed) = list.handle(&ctx, Value::Null).await.unwrap() else {
            panic!("expected response")
        };
        assert_eq!(listed["milestones"].as_array().unwrap().len(), 1);

        let get = MilestoneGetHandler { store };
        let RpcOutcome::Response(fetched) = get
            .handle(&ctx, json!({"milestoneId": milestone_id}))
            .await
            .unwrap()
        else {
            panic!("expected response")
        };
        assert_eq!(fetched["snapshot"].as_str().unwrap(), BASE64.encode(b"hello"));
    }
}
