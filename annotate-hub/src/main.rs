//! Annotate Hub server
//!
//! Document sharing with role based access, invitations, share links and
//! versioned annotations.

use annotate_hub_core::auth::Hs256Verifier;
use annotate_hub_core::cache::{CacheStoreRef, MemoryCacheStore, RedisCacheStore};
use annotate_hub_core::config::HubConfig;
use annotate_hub_core::events::{EventBus, LogNotifier, Notifier};
use annotate_hub_core::storage::{
    BlobStorageRef, LocalBlobStorage, MemoryRelationStore, S3BlobStorage,
};
use annotate_hub_core::{AccessService, HubContext};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;

#[derive(Parser)]
#[command(name = "annotate-hub")]
#[command(about = "Document sharing and annotation access control")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,

        /// Data directory, overrides DATA_DIR
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = HubConfig::from_env()?;

    match cli.command {
        Commands::Serve { addr, data_dir } => {
            if let Some(dir) = data_dir {
                config.blob_dir = dir.join("blobs");
                config.data_dir = dir;
            }
            serve(addr, config).await?;
        }
        Commands::Config => {
            println!("data_dir:             {}", config.data_dir.display());
            println!("blob_dir:             {}", config.blob_dir.display());
            println!("s3_bucket:            {}", config.s3_bucket.as_deref().unwrap_or("-"));
            println!("redis_url:            {}", config.redis_url.as_deref().unwrap_or("-"));
            println!("trust_user_header:    {}", config.trust_user_header);
            println!("page_size:            {}", config.page_size);
            println!("max_cached_pages:     {}", config.cache.max_cached_pages);
            println!("max_annotation_bytes: {}", config.max_annotation_bytes);
            println!("invitation_ttl:       {:?}", config.invitation_ttl);
            println!("cache ttls:           {:?}", config.cache.ttls);
        }
    }
    Ok(())
}

async fn cache_store(config: &HubConfig) -> CacheStoreRef {
    let Some(url) = &config.redis_url else {
        info!("no REDIS_URL, using in-process cache");
        return Arc::new(MemoryCacheStore::new());
    };
    match RedisCacheStore::connect(url, "annotate-hub").await {
        Ok(store) => {
            info!(%url, "connected to redis cache");
            Arc::new(store)
        }
        Err(error) => {
            // the cache is advisory; run without it rather than refuse to start
            warn!(%url, %error, "redis unavailable, using in-process cache");
            Arc::new(MemoryCacheStore::new())
        }
    }
}

async fn blob_storage(config: &HubConfig) -> Result<BlobStorageRef> {
    if let Some(bucket) = &config.s3_bucket {
        let s3_config = aws_config::load_from_env().await;
        let client = aws_sdk_s3::Client::new(&s3_config);
        info!(%bucket, "storing files in s3");
        return Ok(Arc::new(S3BlobStorage {
            client,
            bucket: bucket.clone(),
            prefix: "blobs".to_string(),
        }));
    }
    Ok(Arc::new(LocalBlobStorage::new(&config.blob_dir).await?))
}

async fn serve(addr: SocketAddr, config: HubConfig) -> Result<()> {
    let store = Arc::new(MemoryRelationStore::open(&config.data_dir)?);
    let cache = cache_store(&config).await;
    let blobs = blob_storage(&config).await?;
    let verifier = Arc::new(Hs256Verifier::new(&config.jwt_secret));
    if config.trust_user_header {
        warn!("X-User-Id header accepted as identity; do not expose this server");
    }

    let events = EventBus::new();
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let log = LogNotifier;
        loop {
            match rx.recv().await {
                Ok(notification) => {
                    let _ = log.notify(notification).await;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ctx = HubContext::new(store, cache, Arc::new(events.clone()), blobs, config);
    let app = api::router(AccessService::new(ctx), events, verifier);

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
