//! Granting access to a set of emails, registered or not.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::access::{require_role, resolve_role, Role};
use crate::cache;
use crate::error::{AccessError, AccessResult};
use crate::events::Notification;
use crate::model::{mint_token, normalize_email, Document, Identity, Invitation, MembershipChange};
use crate::service::HubContext;

/// What happened to one invited email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InviteOutcome {
    /// The email already had a role; nothing changed.
    AlreadyMember { email: String, role: Role },
    /// Known identity added to the viewer or editor set.
    Granted { email: String, role: Role },
    /// No identity yet; a pending invitation was created or refreshed.
    Invited { email: String, role: Role },
}

/// Pending invitation as shown to the document owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingInvitation {
    pub email: String,
    pub role: Role,
    pub created_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct InvitationManager {
    ctx: HubContext,
}

impl InvitationManager {
    pub fn new(ctx: HubContext) -> Self {
        Self { ctx }
    }

    fn is_expired(&self, invitation: &Invitation) -> bool {
        invitation.is_expired(self.ctx.config.invitation_ttl, Utc::now())
    }

    /// Grant `role` on `document_id` to every email in `emails`.
    ///
    /// Emails are processed one after the other. Membership grants are
    /// persisted in a single write at the end; if the loop fails partway, the
    /// grants collected so far are still written before the error is returned.
    #[instrument(skip(self, owner, emails), fields(owner = %owner.id, count = emails.len()))]
    pub async fn invite(
        &self,
        document_id: Uuid,
        owner: &Identity,
        emails: &[String],
        role: Role,
    ) -> AccessResult<Vec<InviteOutcome>> {
        if !role.is_grantable() {
            return Err(AccessError::validation(format!("cannot invite as {role}")));
        }
        let mut normalized: Vec<String> = Vec::with_capacity(emails.len());
        for raw in emails {
            let email = normalize_email(raw)?;
            if !normalized.contains(&email) {
                normalized.push(email);
            }
        }

        let document = self.ctx.document(document_id).await?;
        if resolve_role(&document, &owner.email) != Role::Owner {
            return Err(AccessError::forbidden("only the owner can invite"));
        }

        let mut outcomes = Vec::with_capacity(normalized.len());
        let mut grants: Vec<MembershipChange> = Vec::new();
        let mut invited: Vec<String> = Vec::new();
        let processed = self
            .process(&document, owner, &normalized, role, &mut outcomes, &mut grants, &mut invited)
            .await;

        if !grants.is_empty() {
            self.ctx
                .store
                .apply_membership(document.id, &grants)
                .await?
                .ok_or_else(|| AccessError::not_found(format!("document {document_id}")))?;
        }
        // a direct grant supersedes any invitation sent before the account existed
        for grant in &grants {
            if let Err(error) = self
                .ctx
                .store
                .update_pending_invitation(document.id, &grant.email, Role::None)
                .await
            {
                warn!(email = %grant.email, %error, "stale invitation left behind");
            }
        }

        let mut touched: Vec<String> = grants.iter().map(|g| g.email.clone()).collect();
        touched.extend(invited);
        if !touched.is_empty() {
            self.ctx.invalidate_membership(&document, &touched).await;
        }

        for grant in &grants {
            self.ctx
                .notify(Notification::AccessGranted {
                    email: grant.email.clone(),
                    document: document.name.clone(),
                    role: grant.role,
                })
                .await;
        }

        processed?;
        info!(document = %document.id, granted = grants.len(), "invitations processed");
        Ok(outcomes)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process(
        &self,
        document: &Document,
        owner: &Identity,
        emails: &[String],
        role: Role,
        outcomes: &mut Vec<InviteOutcome>,
        grants: &mut Vec<MembershipChange>,
        invited: &mut Vec<String>,
    ) -> AccessResult<()> {
        for email in emails {
            let current = resolve_role(document, email);
            if current != Role::None {
                outcomes.push(InviteOutcome::AlreadyMember {
                    email: email.clone(),
                    role: current,
                });
                continue;
            }

            if self.ctx.store.find_identity_by_email(email).await?.is_some() {
                grants.push(MembershipChange {
                    email: email.clone(),
                    role,
                });
                outcomes.push(InviteOutcome::Granted {
                    email: email.clone(),
                    role,
                });
                continue;
            }

            let invitation = self
                .ctx
                .store
                .upsert_invitation(Invitation {
                    token: mint_token(),
                    email: email.clone(),
                    document_id: document.id,
                    role,
                    invited_by: owner.id,
                    created_at: Utc::now(),
                })
                .await?;
            invited.push(email.clone());
            self.ctx
                .notify(Notification::Invitation {
                    email: email.clone(),
                    token: invitation.token.clone(),
                    document: document.name.clone(),
                })
                .await;
            outcomes.push(InviteOutcome::Invited {
                email: email.clone(),
                role,
            });
        }
        Ok(())
    }

    /// Consume an invitation token on behalf of the identity it was sent to.
    #[instrument(skip(self, token, identity), fields(identity = %identity.id))]
    pub async fn redeem_invitation(&self, token: &str, identity: &Identity) -> AccessResult<Document> {
        let invitation = self
            .ctx
            .store
            .find_invitation(token)
            .await?
            .ok_or_else(|| AccessError::not_found("invitation"))?;
        if self.is_expired(&invitation) {
            self.ctx.store.take_invitation(token).await?;
            return Err(AccessError::not_found("invitation"));
        }
        if invitation.email != identity.email {
            return Err(AccessError::forbidden("invitation was issued to another email"));
        }
        // a concurrent redeem may have won
        let invitation = self
            .ctx
            .store
            .take_invitation(token)
            .await?
            .ok_or_else(|| AccessError::not_found("invitation"))?;

        let document = self.ctx.document(invitation.document_id).await?;
        if resolve_role(&document, &identity.email) != Role::None {
            self.ctx.cache.delete(&cache::users_key(document.id)).await;
            return Ok(document);
        }
        let document = self
            .ctx
            .store
            .apply_membership(
                document.id,
                &[MembershipChange {
                    email: identity.email.clone(),
                    role: invitation.role,
                }],
            )
            .await?
            .ok_or_else(|| AccessError::not_found(format!("document {}", invitation.document_id)))?;

        self.ctx
            .cache
            .invalidate_membership(
                document.id,
                &[identity.email.clone()],
                &[identity.id, document.owner_id],
            )
            .await;
        info!(document = %document.id, role = %invitation.role, "invitation redeemed");
        Ok(document)
    }

    /// Outstanding invitations of a document; owner only. Expired rows are omitted.
    pub async fn list_invitations(
        &self,
        document_id: Uuid,
        owner: &Identity,
    ) -> AccessResult<Vec<PendingInvitation>> {
        let document = self.ctx.document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        let ttl = self.ctx.config.invitation_ttl;
        Ok(self
            .ctx
            .store
            .invitations_for_document(document_id)
            .await?
            .into_iter()
            .filter(|inv| !self.is_expired(inv))
            .map(|inv| PendingInvitation {
                expires_at: inv.expires_at(ttl),
                email: inv.email,
                role: inv.role,
                created_at: inv.created_at,
            })
            .collect())
    }
}
