//! One opaque, versioned annotation payload per document.
//!
//! Writes are a compare-and-swap on the version held by the relation store;
//! the payload itself is never inspected here.

use tracing::{info, instrument};
use uuid::Uuid;

use crate::access::{require_role, Role};
use crate::cache;
use crate::error::{AccessError, AccessResult};
use crate::model::{AnnotationSnapshot, Identity};
use crate::service::HubContext;
use crate::storage::CasOutcome;

#[derive(Clone)]
pub struct AnnotationStore {
    ctx: HubContext,
}

impl AnnotationStore {
    pub fn new(ctx: HubContext) -> Self {
        Self { ctx }
    }

    /// Current snapshot; a document that was never annotated reads as the
    /// empty payload at version 0.
    pub async fn read(&self, document_id: Uuid, caller: &Identity) -> AccessResult<AnnotationSnapshot> {
        let document = self.ctx.cached_document(document_id).await?;
        require_role(&document, &caller.email, Role::Viewer)?;
        self.ctx
            .cache
            .get_or_load(
                &cache::annotations_key(document_id),
                self.ctx.cache.ttls().annotations,
                || async { Ok(self.ctx.store.load_annotations(document_id).await?) },
            )
            .await
    }

    /// Store `payload` if `expected_version` is still current and return the
    /// new version.
    #[instrument(skip(self, caller, payload), fields(caller = %caller.id, bytes = payload.len()))]
    pub async fn write(
        &self,
        document_id: Uuid,
        caller: &Identity,
        payload: &str,
        expected_version: u64,
    ) -> AccessResult<u64> {
        if payload.len() > self.ctx.config.max_annotation_bytes {
            return Err(AccessError::validation(format!(
                "annotation payload exceeds {} bytes",
                self.ctx.config.max_annotation_bytes
            )));
        }
        let document = self.ctx.document(document_id).await?;
        require_role(&document, &caller.email, Role::Editor)?;

        match self
            .ctx
            .store
            .compare_and_swap_annotations(document_id, payload, expected_version)
            .await?
        {
            CasOutcome::Applied { version } => {
                self.ctx
                    .cache
                    .delete(&cache::annotations_key(document_id))
                    .await;
                info!(%document_id, version, "annotations saved");
                Ok(version)
            }
            CasOutcome::Stale { current } => Err(AccessError::Conflict {
                expected: expected_version,
                current,
            }),
        }
    }
}
