//! Outbound notifications about access changes.
//!
//! Mutators call a [`Notifier`] after the relation store write succeeded.
//! Delivery goes through [`deliver`], which awaits the sink and only logs a
//! failure, so a broken mail relay never fails an access-control request.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::access::Role;
use crate::error::AccessResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum Notification {
    Invitation {
        email: String,
        token: String,
        document: String,
    },
    AccessGranted {
        email: String,
        document: String,
        role: Role,
    },
    RoleChanged {
        email: String,
        document: String,
        role: Role,
    },
    RoleRemoved {
        email: String,
        document: String,
    },
}

impl Notification {
    pub fn email(&self) -> &str {
        match self {
            Notification::Invitation { email, .. }
            | Notification::AccessGranted { email, .. }
            | Notification::RoleChanged { email, .. }
            | Notification::RoleRemoved { email, .. } => email,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> AccessResult<()>;

    async fn send_invitation(&self, email: &str, token: &str, document: &str) -> AccessResult<()> {
        self.notify(Notification::Invitation {
            email: email.to_string(),
            token: token.to_string(),
            document: document.to_string(),
        })
        .await
    }

    async fn send_access_granted(&self, email: &str, document: &str, role: Role) -> AccessResult<()> {
        self.notify(Notification::AccessGranted {
            email: email.to_string(),
            document: document.to_string(),
            role,
        })
        .await
    }

    async fn send_role_changed(&self, email: &str, document: &str, role: Role) -> AccessResult<()> {
        self.notify(Notification::RoleChanged {
            email: email.to_string(),
            document: document.to_string(),
            role,
        })
        .await
    }

    async fn send_role_removed(&self, email: &str, document: &str) -> AccessResult<()> {
        self.notify(Notification::RoleRemoved {
            email: email.to_string(),
            document: document.to_string(),
        })
        .await
    }
}

pub type NotifierRef = Arc<dyn Notifier>;

/// Send and swallow: failures are logged, never returned.
pub async fn deliver(notifier: &dyn Notifier, notification: Notification) {
    let email = notification.email().to_string();
    if let Err(error) = notifier.notify(notification).await {
        warn!(%email, %error, "notification delivery failed");
    }
}

/// In-process fan-out of notifications to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        // no subscriber is not an error
        let _ = self.tx.send(notification);
    }
}

#[async_trait]
impl Notifier for EventBus {
    async fn notify(&self, notification: Notification) -> AccessResult<()> {
        self.send(notification);
        Ok(())
    }
}

/// Writes every notification to the log. Used when no mail relay is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> AccessResult<()> {
        match &notification {
            Notification::Invitation { email, document, .. } => {
                info!(%email, %document, "invitation sent")
            }
            Notification::AccessGranted { email, document, role } => {
                info!(%email, %document, %role, "access granted")
            }
            Notification::RoleChanged { email, document, role } => {
                info!(%email, %document, %role, "role changed")
            }
            Notification::RoleRemoved { email, document } => {
                info!(%email, %document, "role removed")
            }
        }
        Ok(())
    }
}
