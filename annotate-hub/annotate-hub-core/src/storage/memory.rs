//! In-process relation store.
//!
//! Every row lives behind one lock, which makes each trait method atomic:
//! annotation compare-and-swap, link insert-if-absent and invitation take
//! cannot interleave. When opened on a directory every mutation is applied to
//! a copy of the state, written to `state.json`, and only then made visible;
//! a failed write leaves the store unchanged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::{CasOutcome, LinkInsert, RelationStore};
use crate::access::Role;
use crate::model::{
    AnnotationSnapshot, Document, Identity, Invitation, MembershipChange, ShareLink,
};

const STATE_FILE: &str = "state.json";

#[derive(Clone, Default, Serialize, Deserialize)]
struct RelationState {
    identities: HashMap<Uuid, Identity>,
    documents: HashMap<Uuid, Document>,
    invitations: HashMap<String, Invitation>,
    links: HashMap<Uuid, ShareLink>,
    annotations: HashMap<Uuid, AnnotationSnapshot>,
    /// Per-document link switch; absent means enabled.
    #[serde(default)]
    links_enabled: HashMap<Uuid, bool>,
}

#[derive(Default)]
pub struct MemoryRelationStore {
    state: Mutex<RelationState>,
    path: Option<PathBuf>,
}

impl MemoryRelationStore {
    /// Volatile store; nothing is written to disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisted under `dir`, loading any previous state.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        let path = dir.join(STATE_FILE);
        let state = if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            RelationState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    fn persist(&self, state: &RelationState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_json::to_vec(state)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&RelationState) -> T) -> T {
        f(&self.state.lock())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut RelationState) -> T) -> Result<T> {
        let mut state = self.state.lock();
        if self.path.is_none() {
            return Ok(f(&mut state));
        }
        let mut next = state.clone();
        let out = f(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn insert_identity(&self, identity: &Identity) -> Result<bool> {
        self.mutate(|state| {
            if state.identities.values().any(|i| i.email == identity.email) {
                return false;
            }
            state.identities.insert(identity.id, identity.clone());
            true
        })
    }

    async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.read(|state| state.identities.get(&id).cloned()))
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self.read(|state| {
            state
                .identities
                .values()
                .find(|identity| identity.email == email)
                .cloned()
        }))
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        self.mutate(|state| {
            state.documents.insert(document.id, document.clone());
        })
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.read(|state| state.documents.get(&id).cloned()))
    }

    async fn rename_document(&self, id: Uuid, name: &str) -> Result<Option<Document>> {
        self.mutate(|state| {
            let doc = state.documents.get_mut(&id)?;
            doc.name = name.to_string();
            doc.updated_at = Utc::now();
            Some(doc.clone())
        })
    }

    async fn apply_membership(
        &self,
        id: Uuid,
        changes: &[MembershipChange],
    ) -> Result<Option<Document>> {
        self.mutate(|state| {
            let doc = state.documents.get_mut(&id)?;
            for change in changes {
                doc.apply_membership(&change.email, change.role);
            }
            if !changes.is_empty() {
                doc.updated_at = Utc::now();
            }
            Some(doc.clone())
        })
    }

    async fn delete_document(&self, id: Uuid) -> Result<Option<Document>> {
        self.mutate(|state| {
            let doc = state.documents.remove(&id)?;
            state.invitations.retain(|_, inv| inv.document_id != id);
            state.links.retain(|_, link| link.document_id != id);
            state.links_enabled.remove(&id);
            state.annotations.remove(&id);
            Some(doc)
        })
    }

    async fn documents_for(&self, user_id: Uuid, email: &str) -> Result<Vec<Document>> {
        Ok(self.read(|state| {
            state
                .documents
                .values()
                .filter(|doc| {
                    doc.owner_id == user_id
                        || doc.viewers.contains(email)
                        || doc.editors.contains(email)
                })
                .cloned()
                .collect()
        }))
    }

    async fn upsert_invitation(&self, invitation: Invitation) -> Result<Invitation> {
        self.mutate(|state| {
            if let Some(existing) = state.invitations.values_mut().find(|inv| {
                inv.document_id == invitation.document_id && inv.email == invitation.email
            }) {
                existing.role = invitation.role;
                existing.invited_by = invitation.invited_by;
                existing.created_at = invitation.created_at;
                return existing.clone();
            }
            state
                .invitations
                .insert(invitation.token.clone(), invitation.clone());
            invitation
        })
    }

    async fn find_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        Ok(self.read(|state| state.invitations.get(token).cloned()))
    }

    async fn invitations_for_document(&self, document_id: Uuid) -> Result<Vec<Invitation>> {
        Ok(self.read(|state| {
            let mut invitations: Vec<Invitation> = state
                .invitations
                .values()
                .filter(|inv| inv.document_id == document_id)
                .cloned()
                .collect();
            invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
            invitations
        }))
    }

    async fn take_invitation(&self, token: &str) -> Result<Option<Invitation>> {
        self.mutate(|state| state.invitations.remove(token))
    }

    async fn update_pending_invitation(
        &self,
        document_id: Uuid,
        email: &str,
        role: Role,
    ) -> Result<bool> {
        self.mutate(|state| {
            let Some(token) = state
                .invitations
                .values()
                .find(|inv| inv.document_id == document_id && inv.email == email)
                .map(|inv| inv.token.clone())
            else {
                return false;
            };
            match role {
                Role::None => {
                    state.invitations.remove(&token);
                }
                role => {
                    if let Some(inv) = state.invitations.get_mut(&token) {
                        inv.role = role;
                    }
                }
            }
            true
        })
    }

    async fn insert_link_if_absent(
        &self,
        mut link: ShareLink,
        now: DateTime<Utc>,
    ) -> Result<LinkInsert> {
        self.mutate(|state| {
            link.enabled = state
                .links_enabled
                .get(&link.document_id)
                .copied()
                .unwrap_or(true);
            let same_slot =
                |l: &ShareLink| l.document_id == link.document_id && l.role == link.role;
            if let Some(existing) = state
                .links
                .values()
                .find(|l| same_slot(*l) && !l.is_expired(now))
            {
                return LinkInsert::Existing(existing.clone());
            }
            // expired links in the slot are replaced
            state.links.retain(|_, l| !same_slot(&*l));
            state.links.insert(link.id, link.clone());
            LinkInsert::Inserted(link)
        })
    }

    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        Ok(self.read(|state| state.links.get(&id).cloned()))
    }

    async fn find_link_by_token(&self, token: &str) -> Result<Option<ShareLink>> {
        Ok(self.read(|state| state.links.values().find(|l| l.token == token).cloned()))
    }

    async fn links_for_document(&self, document_id: Uuid) -> Result<Vec<ShareLink>> {
        Ok(self.read(|state| {
            let mut links: Vec<ShareLink> = state
                .links
                .values()
                .filter(|l| l.document_id == document_id)
                .cloned()
                .collect();
            links.sort_by_key(|l| l.role);
            links
        }))
    }

    async fn set_links_enabled(&self, document_id: Uuid, enabled: bool) -> Result<usize> {
        self.mutate(|state| {
            state.links_enabled.insert(document_id, enabled);
            let now = Utc::now();
            let mut touched = 0;
            for link in state.links.values_mut().filter(|l| l.document_id == document_id) {
                link.enabled = enabled;
                link.updated_at = now;
                touched += 1;
            }
            touched
        })
    }

    async fn delete_link(&self, id: Uuid) -> Result<Option<ShareLink>> {
        self.mutate(|state| state.links.remove(&id))
    }

    async fn load_annotations(&self, document_id: Uuid) -> Result<AnnotationSnapshot> {
        if let Some(snapshot) = self.read(|state| state.annotations.get(&document_id).cloned()) {
            return Ok(snapshot);
        }
        self.mutate(|state| {
            state
                .annotations
                .entry(document_id)
                .or_insert_with(|| AnnotationSnapshot::empty(document_id))
                .clone()
        })
    }

    async fn compare_and_swap_annotations(
        &self,
        document_id: Uuid,
        payload: &str,
        expected: u64,
    ) -> Result<CasOutcome> {
        self.mutate(|state| {
            let snapshot = state
                .annotations
                .entry(document_id)
                .or_insert_with(|| AnnotationSnapshot::empty(document_id));
            if snapshot.version != expected {
                return CasOutcome::Stale {
                    current: snapshot.version,
                };
            }
            snapshot.payload = payload.to_string();
            snapshot.version += 1;
            snapshot.updated_at = Utc::now();
            CasOutcome::Applied {
                version: snapshot.version,
            }
        })
    }
}
