//! Single and batch role changes on a document's member sets.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::access::{resolve_role, Role};
use crate::cache;
use crate::error::{AccessError, AccessResult};
use crate::events::Notification;
use crate::model::{normalize_email, Document, Identity, MembershipChange};
use crate::service::HubContext;

/// One requested change in a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChange {
    pub email: String,
    /// `none` removes the member.
    pub role: Role,
}

/// Per-entry report of [`RoleMutationEngine::change_roles`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoleChangeOutcome {
    pub email: String,
    pub role: Role,
    /// Error code when the entry was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RoleChangeOutcome {
    pub fn applied(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct RoleMutationEngine {
    ctx: HubContext,
}

impl RoleMutationEngine {
    pub fn new(ctx: HubContext) -> Self {
        Self { ctx }
    }

    /// Caller's role, served from the short-lived role cache.
    pub async fn my_role(&self, document_id: Uuid, caller: &Identity) -> AccessResult<Role> {
        let key = cache::role_key(document_id, &caller.email);
        self.ctx
            .cache
            .get_or_load(&key, self.ctx.cache.ttls().role, || async {
                let document = self.ctx.document(document_id).await?;
                Ok(resolve_role(&document, &caller.email))
            })
            .await
    }

    fn authorize(document: &Document, caller: &Identity) -> AccessResult<()> {
        if document.owner_id != caller.id {
            return Err(AccessError::forbidden("only the owner can change roles"));
        }
        Ok(())
    }

    /// Set `target_email` to `role` on the document, `Role::None` removing it.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn change_role(
        &self,
        document_id: Uuid,
        caller: &Identity,
        target_email: &str,
        role: Role,
    ) -> AccessResult<Document> {
        if role == Role::Owner {
            return Err(AccessError::validation("ownership cannot be granted"));
        }
        let document = self.ctx.document(document_id).await?;
        Self::authorize(&document, caller)?;
        let email = normalize_email(target_email)?;
        if email == document.owner_email {
            return Err(AccessError::validation("cannot change the owner's role"));
        }

        // a pending invitation must not outlive a revocation or keep a stale role
        self.ctx
            .store
            .update_pending_invitation(document.id, &email, role)
            .await?;
        let updated = self
            .ctx
            .store
            .apply_membership(
                document.id,
                &[MembershipChange {
                    email: email.clone(),
                    role,
                }],
            )
            .await?
            .ok_or_else(|| AccessError::not_found(format!("document {document_id}")))?;

        self.ctx
            .invalidate_membership(&updated, std::slice::from_ref(&email))
            .await;

        if self.ctx.store.find_identity_by_email(&email).await?.is_some() {
            let notification = if role == Role::None {
                Notification::RoleRemoved {
                    email: email.clone(),
                    document: updated.name.clone(),
                }
            } else {
                Notification::RoleChanged {
                    email: email.clone(),
                    document: updated.name.clone(),
                    role,
                }
            };
            self.ctx.notify(notification).await;
        }

        info!(document = %updated.id, %email, %role, "role changed");
        Ok(updated)
    }

    /// Apply each change independently; every entry is attempted and reported.
    #[instrument(skip(self, caller, changes), fields(caller = %caller.id, count = changes.len()))]
    pub async fn change_roles(
        &self,
        document_id: Uuid,
        caller: &Identity,
        changes: &[RoleChange],
    ) -> AccessResult<Vec<RoleChangeOutcome>> {
        let mut outcomes = Vec::with_capacity(changes.len());
        for change in changes {
            let result = self
                .change_role(document_id, caller, &change.email, change.role)
                .await;
            let (error, message) = match result {
                Ok(_) => (None, None),
                Err(err) => (Some(err.code().to_string()), Some(err.to_string())),
            };
            outcomes.push(RoleChangeOutcome {
                email: change.email.clone(),
                role: change.role,
                error,
                message,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_without_error_fields_on_success() {
        let ok = RoleChangeOutcome {
            email: "u@x.com".into(),
            role: Role::Editor,
            error: None,
            message: None,
        };
        assert!(ok.applied());
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["role"], "editor");
    }

    #[test]
    fn batch_entries_deserialize_from_lowercase_roles() {
        let change: RoleChange =
            serde_json::from_str(r#"{"email":"u@x.com","role":"none"}"#).unwrap();
        assert_eq!(change.role, Role::None);
    }
}
