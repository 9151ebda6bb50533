//! Role resolution.
//!
//! Every authorization check in the crate goes through [`resolve_role`], so
//! precedence between owner, viewer and editor membership lives in one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AccessError;
use crate::model::Document;

/// Level of access an identity has to a document.
///
/// Variants are declared in ascending order so `Ord` gives the privilege
/// order `None < Viewer < Editor < Owner`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    None,
    Viewer,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::None => "none",
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }

    /// Roles that can be granted to a member, an invitee or a link.
    pub fn is_grantable(&self) -> bool {
        matches!(self, Role::Viewer | Role::Editor)
    }

    pub fn can_view(&self) -> bool {
        *self >= Role::Viewer
    }

    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Role::None),
            "viewer" => Ok(Role::Viewer),
            "editor" => Ok(Role::Editor),
            "owner" => Ok(Role::Owner),
            other => Err(AccessError::validation(format!("unknown role `{other}`"))),
        }
    }
}

/// Resolve the role of `email` on `document`.
///
/// Owner email first, then viewer membership, then editor membership.
/// `email` is expected to be normalized already.
pub fn resolve_role(document: &Document, email: &str) -> Role {
    if document.owner_email == email {
        Role::Owner
    } else if document.viewers.contains(email) {
        Role::Viewer
    } else if document.editors.contains(email) {
        Role::Editor
    } else {
        Role::None
    }
}

/// Fail with `Forbidden` unless `email` resolves to at least `required`.
pub fn require_role(document: &Document, email: &str, required: Role) -> Result<Role, AccessError> {
    let role = resolve_role(document, email);
    if role >= required && role != Role::None {
        Ok(role)
    } else {
        Err(AccessError::forbidden(format!(
            "{required} access to document {} required",
            document.id
        )))
    }
}
