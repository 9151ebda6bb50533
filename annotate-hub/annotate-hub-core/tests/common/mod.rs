#![allow(dead_code)]

use annotate_hub_core::cache::{CacheStoreRef, MemoryCacheStore};
use annotate_hub_core::config::HubConfig;
use annotate_hub_core::events::{EventBus, Notification};
use annotate_hub_core::model::{Document, Identity};
use annotate_hub_core::storage::{LocalBlobStorage, MemoryRelationStore};
use annotate_hub_core::{AccessService, HubContext};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub struct Harness {
    pub service: AccessService,
    pub cache_store: Arc<MemoryCacheStore>,
    pub events: broadcast::Receiver<Notification>,
    pub owner: Identity,
    pub document: Document,
    _tmp: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(HubConfig::default()).await
    }

    pub async fn with_config(config: HubConfig) -> Self {
        let cache_store = Arc::new(MemoryCacheStore::new());
        Self::build(config, cache_store.clone(), cache_store).await
    }

    pub async fn with_cache_store(store: CacheStoreRef) -> Self {
        Self::build(HubConfig::default(), store, Arc::new(MemoryCacheStore::new())).await
    }

    async fn build(
        config: HubConfig,
        cache: CacheStoreRef,
        cache_store: Arc<MemoryCacheStore>,
    ) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStorage::new(tmp.path().join("blobs")).await.unwrap();
        let bus = EventBus::new();
        let events = bus.subscribe();
        let ctx = HubContext::new(
            Arc::new(MemoryRelationStore::new()),
            cache,
            Arc::new(bus),
            Arc::new(blobs),
            config,
        );
        let service = AccessService::new(ctx);
        let owner = service.register_identity("owner@x.com", None).await.unwrap();
        let document = service
            .files
            .create_document(&owner, "contract.pdf", b"%PDF-1.7")
            .await
            .unwrap();
        Self {
            service,
            cache_store,
            events,
            owner,
            document,
            _tmp: tmp,
        }
    }

    pub async fn register(&self, email: &str) -> Identity {
        self.service.register_identity(email, None).await.unwrap()
    }

    pub async fn reload(&self) -> Document {
        self.service.context().document(self.document.id).await.unwrap()
    }

    /// Notifications published so far, in order.
    pub fn drain_events(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
