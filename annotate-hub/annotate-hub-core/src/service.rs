//! Wiring of the relation store, access cache, notifier and blob storage,
//! and the facade every caller goes through.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::access::Role;
use crate::annotations::AnnotationStore;
use crate::cache::{self, AccessCache, CacheStoreRef};
use crate::config::HubConfig;
use crate::error::{AccessError, AccessResult};
use crate::events::{deliver, Notification, NotifierRef};
use crate::files::FileManager;
use crate::invite::InvitationManager;
use crate::links::ShareLinkManager;
use crate::model::{normalize_email, Document, Identity};
use crate::roles::RoleMutationEngine;
use crate::storage::{BlobStorageRef, RelationStoreRef};

/// Shared handles; cloned into every manager.
#[derive(Clone)]
pub struct HubContext {
    pub store: RelationStoreRef,
    pub cache: AccessCache,
    pub notifier: NotifierRef,
    pub blobs: BlobStorageRef,
    pub config: Arc<HubConfig>,
}

impl HubContext {
    pub fn new(
        store: RelationStoreRef,
        cache_store: CacheStoreRef,
        notifier: NotifierRef,
        blobs: BlobStorageRef,
        config: HubConfig,
    ) -> Self {
        Self {
            store,
            cache: AccessCache::new(cache_store, config.cache.clone()),
            notifier,
            blobs,
            config: Arc::new(config),
        }
    }

    /// Authoritative read, used by mutators before they authorize.
    pub async fn document(&self, id: Uuid) -> AccessResult<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("document {id}")))
    }

    /// Read-through on the file metadata family.
    pub async fn cached_document(&self, id: Uuid) -> AccessResult<Document> {
        self.cache
            .get_or_load(&cache::metadata_key(id), self.cache.ttls().metadata, || {
                self.document(id)
            })
            .await
    }

    /// Ids of the registered identities behind `emails`; unknown emails are skipped.
    pub async fn identity_ids(&self, emails: &[String]) -> AccessResult<Vec<Uuid>> {
        let lookups = emails
            .iter()
            .map(|email| self.store.find_identity_by_email(email));
        let mut ids = Vec::with_capacity(emails.len());
        for identity in try_join_all(lookups).await? {
            ids.extend(identity.map(|i| i.id));
        }
        Ok(ids)
    }

    /// Drop everything a membership change on `document` for `emails` can
    /// stale, including the owner's listings. Never fails: when the identity
    /// lookup errors only the per-file and per-role entries are dropped.
    pub async fn invalidate_membership(&self, document: &Document, emails: &[String]) {
        let mut user_ids = match self.identity_ids(emails).await {
            Ok(ids) => ids,
            Err(error) => {
                warn!(document = %document.id, %error, "identity lookup failed during invalidation");
                Vec::new()
            }
        };
        user_ids.push(document.owner_id);
        self.cache
            .invalidate_membership(document.id, emails, &user_ids)
            .await;
    }

    pub async fn notify(&self, notification: Notification) {
        deliver(self.notifier.as_ref(), notification).await;
    }
}

/// Entry point for every access-control operation.
#[derive(Clone)]
pub struct AccessService {
    ctx: HubContext,
    pub files: FileManager,
    pub invites: InvitationManager,
    pub roles: RoleMutationEngine,
    pub links: ShareLinkManager,
    pub annotations: AnnotationStore,
}

impl AccessService {
    pub fn new(ctx: HubContext) -> Self {
        Self {
            files: FileManager::new(ctx.clone()),
            invites: InvitationManager::new(ctx.clone()),
            roles: RoleMutationEngine::new(ctx.clone()),
            links: ShareLinkManager::new(ctx.clone()),
            annotations: AnnotationStore::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &HubContext {
        &self.ctx
    }

    pub fn cache(&self) -> &AccessCache {
        &self.ctx.cache
    }

    #[instrument(skip(self, display_name))]
    pub async fn register_identity(
        &self,
        email: &str,
        display_name: Option<String>,
    ) -> AccessResult<Identity> {
        let email = normalize_email(email)?;
        let identity = Identity::new(email, display_name);
        if !self.ctx.store.insert_identity(&identity).await? {
            return Err(AccessError::validation(format!(
                "{} is already registered",
                identity.email
            )));
        }
        info!(identity = %identity.id, "identity registered");
        Ok(identity)
    }

    pub async fn get_identity(&self, id: Uuid) -> AccessResult<Identity> {
        self.ctx
            .store
            .get_identity(id)
            .await?
            .ok_or_else(|| AccessError::not_found(format!("identity {id}")))
    }

    pub async fn find_identity_by_email(&self, email: &str) -> AccessResult<Option<Identity>> {
        let email = normalize_email(email)?;
        Ok(self.ctx.store.find_identity_by_email(&email).await?)
    }

    /// The caller's role on a document.
    pub async fn resolve_role(&self, document_id: Uuid, caller: &Identity) -> AccessResult<Role> {
        self.roles.my_role(document_id, caller).await
    }
}
