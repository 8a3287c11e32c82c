use crate::{
    auth::AuthUser,
    error::AppResult,
    models::{AuditOutcome, NewAuditRecord},
    repository::AuditState,
};

/// AuditRecorder
///
/// Appends one operation-log line per attempted mutation. Recording is best-effort:
/// a failed write is logged and dropped, and never changes the caller's result.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: AuditState,
}

impl AuditRecorder {
    pub fn new(sink: AuditState) -> Self {
        Self { sink }
    }

    /// The underlying sink, for the read-only operation-log endpoints.
    pub fn sink(&self) -> &AuditState {
        &self.sink
    }

    pub async fn record(
        &self,
        actor: &AuthUser,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        detail: impl Into<String>,
        outcome: AuditOutcome,
    ) {
        let entry = NewAuditRecord {
            actor_id: actor.id,
            actor_username: actor.username.clone(),
            actor_role: actor.role,
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            detail: detail.into(),
            outcome,
        };

        if let Err(e) = self.sink.append(entry).await {
            tracing::warn!(
                error = %e,
                actor_id = %actor.id,
                action,
                resource_type,
                resource_id,
                "audit record dropped"
            );
        }
    }

    /// record_result
    ///
    /// Records the outcome of `result`: `success_detail` on `Ok`, the error text on `Err`.
    pub async fn record_result<T>(
        &self,
        actor: &AuthUser,
        action: &str,
        resource_type: &str,
        resource_id: &str,
        result: &AppResult<T>,
        success_detail: &str,
    ) {
        let (outcome, detail) = match result {
            Ok(_) => (AuditOutcome::Success, success_detail.to_string()),
            Err(e) => (AuditOutcome::Failure, format!("{action} failed: {e}")),
        };
        self.record(actor, action, resource_type, resource_id, detail, outcome)
            .await;
    }
}

/// Joins batch ids into the single `resource_id` of a batch audit line.
pub fn join_ids<I, T>(ids: I) -> String
where
    I: IntoIterator<Item = T>,
    T: ToString,
{
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
