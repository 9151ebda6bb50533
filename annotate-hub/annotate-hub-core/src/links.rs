//! Identity-independent, token based access grants.
//!
//! Per (document, role) a link goes `absent -> enabled <-> disabled`, and
//! `deleted` is terminal. Links never touch the viewer or editor sets.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::access::{require_role, Role};
use crate::cache;
use crate::error::{AccessError, AccessResult};
use crate::model::{mint_token, Identity, LinkGrant, ShareLink};
use crate::service::HubContext;
use crate::storage::LinkInsert;

/// Every unusable token collapses into this one error.
fn unknown_token() -> AccessError {
    AccessError::not_found("link")
}

#[derive(Clone)]
pub struct ShareLinkManager {
    ctx: HubContext,
}

impl ShareLinkManager {
    pub fn new(ctx: HubContext) -> Self {
        Self { ctx }
    }

    async fn invalidate(&self, document_id: Uuid) {
        self.ctx.cache.delete(&cache::links_key(document_id)).await;
    }

    /// Return the active link for (document, role), minting one if there is none.
    #[instrument(skip(self, owner), fields(owner = %owner.id))]
    pub async fn create_or_get_link(
        &self,
        document_id: Uuid,
        owner: &Identity,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
    ) -> AccessResult<ShareLink> {
        if !role.is_grantable() {
            return Err(AccessError::validation(format!("links cannot grant {role}")));
        }
        let now = Utc::now();
        if expires_at.is_some_and(|at| at <= now) {
            return Err(AccessError::validation("link expiry must be in the future"));
        }
        let document = self.ctx.document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;

        let candidate = ShareLink {
            id: Uuid::new_v4(),
            document_id,
            role,
            token: mint_token(),
            // the store applies the document's switch
            enabled: true,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        match self.ctx.store.insert_link_if_absent(candidate, now).await? {
            LinkInsert::Existing(link) => {
                debug!(link = %link.id, "reusing active link");
                Ok(link)
            }
            LinkInsert::Inserted(link) => {
                self.invalidate(document_id).await;
                info!(link = %link.id, %role, "share link created");
                Ok(link)
            }
        }
    }

    /// Document-level switch: covers every existing link and the links
    /// created while it stays in this position.
    #[instrument(skip(self, owner), fields(owner = %owner.id))]
    pub async fn toggle_feature(
        &self,
        document_id: Uuid,
        owner: &Identity,
        enabled: bool,
    ) -> AccessResult<usize> {
        let document = self.ctx.document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        let touched = self.ctx.store.set_links_enabled(document_id, enabled).await?;
        self.invalidate(document_id).await;
        info!(%document_id, enabled, touched, "share links toggled");
        Ok(touched)
    }

    #[instrument(skip(self, owner), fields(owner = %owner.id))]
    pub async fn delete_link(&self, link_id: Uuid, owner: &Identity) -> AccessResult<()> {
        let link = self
            .ctx
            .store
            .find_link(link_id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("link {link_id}")))?;
        let document = self.ctx.document(link.document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        self.ctx.store.delete_link(link_id).await?;
        self.invalidate(link.document_id).await;
        info!(link = %link_id, "share link deleted");
        Ok(())
    }

    /// Owner-only listing, cached per document.
    pub async fn list_links(&self, document_id: Uuid, owner: &Identity) -> AccessResult<Vec<ShareLink>> {
        let document = self.ctx.cached_document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        self.ctx
            .cache
            .get_or_load(
                &cache::links_key(document_id),
                self.ctx.cache.ttls().links,
                || async { Ok(self.ctx.store.links_for_document(document_id).await?) },
            )
            .await
    }

    /// Exchange a bare token for a temporary read-only grant.
    ///
    /// Absent, disabled and expired tokens are indistinguishable.
    pub async fn resolve_by_token(&self, token: &str) -> AccessResult<LinkGrant> {
        let link = self
            .ctx
            .store
            .find_link_by_token(token)
            .await?
            .filter(|link| link.is_usable(Utc::now()))
            .ok_or_else(unknown_token)?;
        let document = self
            .ctx
            .cached_document(link.document_id)
            .await
            .map_err(|err| match err {
                AccessError::NotFound(_) => unknown_token(),
                other => other,
            })?;
        Ok(LinkGrant {
            document_id: document.id,
            document_name: document.name,
            role: link.role,
            expires_at: link.expires_at,
        })
    }
}
