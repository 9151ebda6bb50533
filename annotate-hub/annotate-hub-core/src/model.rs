//! Rows held by the relation store and the views built from them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::access::Role;
use crate::error::{AccessError, AccessResult};

/// Payload stored for a document whose annotations were never saved.
pub const EMPTY_ANNOTATIONS: &str = "";

/// Fresh unguessable token for invitations and share links (256 random bits).
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Trim and lowercase an email, rejecting anything that is clearly not one.
pub fn normalize_email(raw: &str) -> AccessResult<String> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AccessError::validation(format!("malformed email `{}`", raw.trim())))
    }
}

/// A registered user as seen by the access-control core: an opaque id and an email.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(email: String, display_name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            created_at: Utc::now(),
        }
    }
}

/// The shareable unit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    /// Opaque locator handed out by the blob storage.
    pub locator: String,
    pub owner_id: Uuid,
    pub owner_email: String,
    pub viewers: BTreeSet<String>,
    pub editors: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: String, locator: String, owner_id: Uuid, owner_email: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            locator,
            owner_id,
            owner_email,
            viewers: BTreeSet::new(),
            editors: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Every email holding a member role.
    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.viewers.iter().chain(self.editors.iter())
    }

    /// Remove `email` from both sets, then add it to the set for `role`.
    ///
    /// The owner email is never placed in either set.
    pub fn apply_membership(&mut self, email: &str, role: Role) {
        self.viewers.remove(email);
        self.editors.remove(email);
        if email == self.owner_email {
            return;
        }
        match role {
            Role::Viewer => {
                self.viewers.insert(email.to_string());
            }
            Role::Editor => {
                self.editors.insert(email.to_string());
            }
            Role::Owner | Role::None => {}
        }
    }
}

/// A single membership edit applied atomically by the relation store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipChange {
    pub email: String,
    /// `Role::None` removes the email from both sets.
    pub role: Role,
}

/// A pending grant for an email that has no identity yet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invitation {
    pub token: String,
    pub email: String,
    pub document_id: Uuid,
    pub role: Role,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    /// End of validity; a lifetime past the calendar's range never ends.
    pub fn expires_at(&self, ttl: std::time::Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        self.expires_at(ttl) <= now
    }
}

/// Identity-independent, token based access grant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareLink {
    pub id: Uuid,
    pub document_id: Uuid,
    pub role: Role,
    pub token: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShareLink {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Usable by an anonymous caller right now.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_expired(now)
    }
}

/// The single opaque, versioned annotation payload of a document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnnotationSnapshot {
    pub document_id: Uuid,
    pub payload: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl AnnotationSnapshot {
    pub fn empty(document_id: Uuid) -> Self {
        Self {
            document_id,
            payload: EMPTY_ANNOTATIONS.to_string(),
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub const ALL: [SortOrder; 2] = [SortOrder::Newest, SortOrder::Oldest];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
        }
    }
}

/// One row of a user's file listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileSummary {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    pub role: Role,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePage {
    pub page: u32,
    pub per_page: u32,
    pub total: usize,
    pub sort: SortOrder,
    pub items: Vec<FileSummary>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Email belongs to a registered identity.
    Active,
    /// Member email with no registered identity.
    Unregistered,
    /// Outstanding invitation.
    Pending,
}

/// Entry of a document's user list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedUser {
    pub email: String,
    pub role: Role,
    pub status: MemberStatus,
}

/// Temporary, read-only grant handed out for a valid link token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkGrant {
    pub document_id: Uuid,
    pub document_name: String,
    pub role: Role,
    pub expires_at: Option<DateTime<Utc>>,
}
