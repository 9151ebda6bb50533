//! Source of truth for documents, identities, invitations, links and
//! annotation snapshots, plus the blob storage collaborator.

pub mod blob;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::Role;
use crate::model::{
    AnnotationSnapshot, Document, Identity, Invitation, MembershipChange, ShareLink,
};

pub use blob::{BlobStorage, BlobStorageRef, LocalBlobStorage, S3BlobStorage};
pub use memory::MemoryRelationStore;

/// Result of an insert-if-absent on share links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkInsert {
    Inserted(ShareLink),
    /// A live link already existed for the (document, role) pair.
    Existing(ShareLink),
}

/// Result of a conditional annotation write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied { version: u64 },
    Stale { current: u64 },
}

#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Returns `false` when the email is already registered.
    async fn insert_identity(&self, identity: &Identity) -> Result<bool>;
    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>>;
    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>>;

    async fn insert_document(&self, document: &Document) -> Result<()>;
    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;
    async fn rename_document(&self, id: Uuid, name: &str) -> Result<Option<Document>>;

    /// Apply all `changes` to the viewer/editor sets in one atomic step.
    async fn apply_membership(
        &self,
        id: Uuid,
        changes: &[MembershipChange],
    ) -> Result<Option<Document>>;

    /// Remove the document together with its invitations, links and
    /// annotation snapshot.
    async fn delete_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Documents owned by `user_id` or shared with `email`.
    async fn documents_for(&self, user_id: Uuid, email: &str) -> Result<Vec<Document>>;

    /// Insert an invitation, or refresh role and creation time of the
    /// pending invitation for the same (document, email), keeping its token.
    async fn upsert_invitation(&self, invitation: Invitation) -> Result<Invitation>;
    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>>;
    async fn invitations_for_document(&self, document_id: Uuid) -> Result<Vec<Invitation>>;
    /// Remove and return; at most one caller gets `Some` for a token.
    async fn take_invitation(&self, token: &str) -> Result<Option<Invitation>>;
    /// Set the role of the pending invitation for (document, email);
    /// `Role::None` removes it. Returns `false` when there was none.
    async fn update_pending_invitation(
        &self,
        document_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<bool>;

    /// Insert `link` unless an unexpired link exists for its (document, role).
    /// A new link takes the document's link switch as its `enabled` flag.
    async fn insert_link_if_absent(&self, link: ShareLink, now: DateTime<Utc>)
        -> Result<LinkInsert>;
    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLink>>;
    async fn find_link_by_token(&self, token: &str) -> Result<Option<ShareLink>>;
    async fn links_for_document(&self, document_id: Uuid) -> Result<Vec<ShareLink>>;
    /// Set the document's link switch and apply it to every existing link.
    /// Returns the number of links touched.
    async fn set_links_enabled(&self, document_id: Uuid, enabled: bool) -> Result<usize>;
    async fn delete_link(&self, id: Uuid) -> Result<Option<ShareLink>>;

    /// Read the snapshot, creating the empty version-0 row if missing.
    async fn load_annotations(&self, document_id: Uuid) -> Result<AnnotationSnapshot>;

    /// Store `payload` only if the stored version equals `expected`.
    async fn compare_and_swap_annotations(
        &self,
        document_id: Uuid,
        payload: &str,
        expected: u64,
    ) -> Result<CasOutcome>;
}

pub type RelationStoreRef = Arc<dyn RelationStore>;
