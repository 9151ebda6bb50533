//! Document lifecycle and the listings built on the access cache.

use chrono::Utc;
use std::cmp::Reverse;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::access::{require_role, resolve_role, Role};
use crate::cache;
use crate::error::{AccessError, AccessResult};
use crate::model::{
    Document, FilePage, FileSummary, Identity, MemberStatus, SharedUser, SortOrder,
};
use crate::service::HubContext;

/// File bytes together with the name they should be served under.
#[derive(Debug, Clone)]
pub struct Download {
    pub name: String,
    pub bytes: Vec<u8>,
}

fn validate_name(name: &str) -> AccessResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccessError::validation("document name must not be empty"));
    }
    if name.len() > 255 {
        return Err(AccessError::validation("document name is longer than 255 bytes"));
    }
    Ok(name.to_string())
}

#[derive(Clone)]
pub struct FileManager {
    ctx: HubContext,
}

impl FileManager {
    pub fn new(ctx: HubContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, owner, bytes), fields(owner = %owner.id, size = bytes.len()))]
    pub async fn create_document(
        &self,
        owner: &Identity,
        name: &str,
        bytes: &[u8],
    ) -> AccessResult<Document> {
        let name = validate_name(name)?;
        let locator = self.ctx.blobs.store(bytes).await?;
        let document = Document::new(name, locator, owner.id, owner.email.clone());
        if let Err(error) = self.ctx.store.insert_document(&document).await {
            if let Err(cleanup) = self.ctx.blobs.delete(&document.locator).await {
                warn!(locator = %document.locator, error = %cleanup, "orphaned blob");
            }
            return Err(error.into());
        }
        self.ctx.cache.invalidate_listings(owner.id).await;
        info!(document = %document.id, "document created");
        Ok(document)
    }

    /// Metadata for any caller with at least viewer access.
    pub async fn get_document(&self, document_id: Uuid, caller: &Identity) -> AccessResult<Document> {
        let document = self.ctx.cached_document(document_id).await?;
        require_role(&document, &caller.email, Role::Viewer)?;
        Ok(document)
    }

    pub async fn download(&self, document_id: Uuid, caller: &Identity) -> AccessResult<Download> {
        let document = self.get_document(document_id, caller).await?;
        let bytes = self.ctx.blobs.retrieve(&document.locator).await?;
        Ok(Download {
            name: document.name,
            bytes,
        })
    }

    /// Download for an anonymous holder of a usable share-link token.
    pub async fn download_via_link(&self, token: &str) -> AccessResult<Download> {
        let link = self
            .ctx
            .store
            .find_link_by_token(token)
            .await?
            .filter(|link| link.is_usable(Utc::now()))
            .ok_or_else(|| AccessError::not_found("link"))?;
        let document = self
            .ctx
            .cached_document(link.document_id)
            .await
            .map_err(|err| match err {
                AccessError::NotFound(_) => AccessError::not_found("link"),
                other => other,
            })?;
        let bytes = self.ctx.blobs.retrieve(&document.locator).await?;
        Ok(Download {
            name: document.name,
            bytes,
        })
    }

    #[instrument(skip(self, owner), fields(owner = %owner.id))]
    pub async fn rename_document(
        &self,
        document_id: Uuid,
        owner: &Identity,
        name: &str,
    ) -> AccessResult<Document> {
        let name = validate_name(name)?;
        let document = self.ctx.document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        let renamed = self
            .ctx
            .store
            .rename_document(document_id, &name)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("document {document_id}")))?;
        let members: Vec<String> = renamed.members().cloned().collect();
        self.ctx.invalidate_membership(&renamed, &members).await;
        self.ctx.cache.delete(&cache::links_key(document_id)).await;
        info!(document = %document_id, "document renamed");
        Ok(renamed)
    }

    /// Remove the document and everything hanging off it.
    #[instrument(skip(self, owner), fields(owner = %owner.id))]
    pub async fn delete_document(&self, document_id: Uuid, owner: &Identity) -> AccessResult<()> {
        let document = self.ctx.document(document_id).await?;
        if document.owner_id != owner.id {
            return Err(AccessError::forbidden("only the owner can delete a document"));
        }
        let Some(removed) = self.ctx.store.delete_document(document_id).await? else {
            return Err(AccessError::not_found(format!("document {document_id}")));
        };
        if let Err(error) = self.ctx.blobs.delete(&removed.locator).await {
            warn!(locator = %removed.locator, %error, "blob delete failed");
        }

        let mut emails: Vec<String> = removed.members().cloned().collect();
        emails.push(removed.owner_email.clone());
        self.ctx.invalidate_membership(&removed, &emails).await;
        self.ctx.cache.invalidate_document(document_id).await;
        info!(document = %document_id, "document deleted");
        Ok(())
    }

    /// Owner, members and pending invitees of a document; owner only.
    pub async fn list_users(&self, document_id: Uuid, owner: &Identity) -> AccessResult<Vec<SharedUser>> {
        let document = self.ctx.cached_document(document_id).await?;
        require_role(&document, &owner.email, Role::Owner)?;
        self.ctx
            .cache
            .get_or_load(
                &cache::users_key(document_id),
                self.ctx.cache.ttls().users,
                || self.load_users(&document),
            )
            .await
    }

    async fn load_users(&self, document: &Document) -> AccessResult<Vec<SharedUser>> {
        let mut users = vec![SharedUser {
            email: document.owner_email.clone(),
            role: Role::Owner,
            status: MemberStatus::Active,
        }];
        for email in document.members() {
            let registered = self.ctx.store.find_identity_by_email(email).await?.is_some();
            users.push(SharedUser {
                email: email.clone(),
                role: resolve_role(document, email),
                status: if registered {
                    MemberStatus::Active
                } else {
                    MemberStatus::Unregistered
                },
            });
        }

        let ttl = self.ctx.config.invitation_ttl;
        let now = Utc::now();
        for invitation in self.ctx.store.invitations_for_document(document.id).await? {
            // members already listed above
            if invitation.is_expired(ttl, now)
                || resolve_role(document, &invitation.email) != Role::None
            {
                continue;
            }
            users.push(SharedUser {
                email: invitation.email,
                role: invitation.role,
                status: MemberStatus::Pending,
            });
        }
        Ok(users)
    }

    /// One page of the documents `caller` owns or is a member of.
    ///
    /// Pages start at 1. Only the first `cache.max_cached_pages` pages are
    /// cached, which keeps listing invalidation bounded.
    pub async fn list_files(&self, caller: &Identity, page: u32, sort: SortOrder) -> AccessResult<FilePage> {
        if page == 0 {
            return Err(AccessError::validation("pages start at 1"));
        }
        if !self.ctx.cache.listing_cacheable(page) {
            return self.load_page(caller, page, sort).await;
        }
        self.ctx
            .cache
            .get_or_load(
                &cache::listing_key(caller.id, page, sort),
                self.ctx.cache.ttls().listing,
                || self.load_page(caller, page, sort),
            )
            .await
    }

    async fn load_page(&self, caller: &Identity, page: u32, sort: SortOrder) -> AccessResult<FilePage> {
        let mut documents = self.ctx.store.documents_for(caller.id, &caller.email).await?;
        match sort {
            SortOrder::Newest => documents.sort_by_key(|d| (Reverse(d.updated_at), d.id)),
            SortOrder::Oldest => documents.sort_by_key(|d| (d.updated_at, d.id)),
        }
        let per_page = self.ctx.config.page_size;
        let total = documents.len();
        let skip = (page as usize - 1).saturating_mul(per_page as usize);
        let items = documents
            .iter()
            .skip(skip)
            .take(per_page as usize)
            .map(|d| FileSummary {
                id: d.id,
                name: d.name.clone(),
                owner_email: d.owner_email.clone(),
                role: if d.owner_id == caller.id {
                    Role::Owner
                } else {
                    resolve_role(d, &caller.email)
                },
                updated_at: d.updated_at,
            })
            .collect();
        Ok(FilePage {
            page,
            per_page,
            total,
            sort,
            items,
        })
    }
}
