//! Collaborators that always fail, for exercising degraded paths.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::access::Role;
use crate::cache::CacheStore;
use crate::error::{AccessError, AccessResult};
use crate::events::{Notification, Notifier};
use crate::model::{
    AnnotationSnapshot, Document, Identity, Invitation, MembershipChange, ShareLink,
};
use crate::storage::{CasOutcome, LinkInsert, MemoryRelationStore, RelationStore};

/// Cache store whose backend is permanently unreachable.
pub struct FailingCacheStore;

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &str) -> AccessResult<Option<String>> {
        Err(AccessError::transient("cache unavailable"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> AccessResult<()> {
        Err(AccessError::transient("cache unavailable"))
    }

    async fn delete(&self, _key: &str) -> AccessResult<()> {
        Err(AccessError::transient("cache unavailable"))
    }
}

/// Notifier whose relay rejects every message.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _notification: Notification) -> AccessResult<()> {
        Err(AccessError::transient("mail relay down"))
    }
}

/// Relation store whose `nth` email lookup (1-based) fails; everything else
/// goes to an in-memory store.
pub struct FlakyLookupStore {
    pub inner: MemoryRelationStore,
    nth: usize,
    lookups: AtomicUsize,
}

impl FlakyLookupStore {
    pub fn failing_on(nth: usize) -> Self {
        Self {
            inner: MemoryRelationStore::new(),
            nth,
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RelationStore for FlakyLookupStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<bool> {
        self.inner.insert_identity(identity).await
    }

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        self.inner.get_identity(id).await
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        if self.lookups.fetch_add(1, Ordering::SeqCst) + 1 == self.nth {
            return Err(anyhow!("identity directory timed out"));
        }
        self.inner.find_identity_by_email(email).await
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        self.inner.insert_document(document).await
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn rename_document(&self, id: Uuid, name: &str) -> Result<Option<Document>> {
        self.inner.rename_document(id, name).await
    }

    async fn apply_membership(
        &self,
        id: Uuid,
        changes: &[MembershipChange],
    ) -> Result<Option<Document>> {
        self.inner.apply_membership(id, changes).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<Option<Document>> {
        self.inner.delete_document(id).await
    }

    async fn documents_for(&self, user_id: Uuid, email: &str) -> Result<Vec<Document>> {
        self.inner.documents_for(user_id, email).await
    }

    async fn upsert_invitation(&self, invitation: Invitation) -> Result<Invitation> {
        self.inner.upsert_invitation(invitation).await
    }

    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        self.inner.find_invitation(token).await
    }

    async fn invitations_for_document(&self, document_id: Uuid) -> Result<Vec<Invitation>> {
        self.inner.invitations_for_document(document_id).await
    }

    async fn take_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        self.inner.take_invitation(token).await
    }

    async fn update_pending_invitation(
        &self,
        document_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<bool> {
        self.inner.update_pending_invitation(document_id, email, role).await
    }

    async fn insert_link_if_absent(
        &self,
        link: ShareLink,
        now: DateTime<Utc>,
    ) -> Result<LinkInsert> {
        self.inner.insert_link_if_absent(link, now).await
    }

    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        self.inner.find_link(id).await
    }

    async fn find_link_by_token(&self, token: &str) -> Result<Option<ShareLink>> {
        self.inner.find_link_by_token(token).await
    }

    async fn links_for_document(&self, document_id: Uuid) -> Result<Vec<ShareLink>> {
        self.inner.links_for_document(document_id).await
    }

    async fn set_links_enabled(&self, document_id: Uuid, enabled: bool) -> Result<usize> {
        self.inner.set_links_enabled(document_id, enabled).await
    }

    async fn delete_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        self.inner.delete_link(id).await
    }

    async fn load_annotations(&self, document_id: Uuid) -> Result<AnnotationSnapshot> {
        self.inner.load_annotations(document_id).await
    }

    async fn compare_and_swap_annotations(
        &self,
        document_id: Uuid,
        payload: &str,
        expected: u64,
    ) -> Result<CasOutcome> {
        self.inner
            .compare_and_swap_annotations(document_id, payload, expected)
            .await
    }
}
