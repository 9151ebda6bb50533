//! File bytes live outside the access-control core; documents only keep the
//! opaque locator returned by [`BlobStorage::store`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn store(&self, data: &[u8]) -> Result<String>;
    async fn retrieve(&self, locator: &str) -> Result<Vec<u8>>;
    async fn delete(&self, locator: &str) -> Result<()>;
}

pub type BlobStorageRef = Arc<dyn BlobStorage>;

/// One file per blob under a local directory.
pub struct LocalBlobStorage {
    dir: PathBuf,
}

impl LocalBlobStorage {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path(&self, locator: &str) -> Result<PathBuf> {
        // locators are uuids minted by `store`; anything else could escape the dir
        let id = Uuid::parse_str(locator).map_err(|_| anyhow!("invalid blob locator"))?;
        Ok(self.dir.join(id.to_string()))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn store(&self, data: &[u8]) -> Result<String> {
        let locator = Uuid::new_v4().to_string();
        tokio::fs::write(self.path(&locator)?, data).await?;
        Ok(locator)
    }

    async fn retrieve(&self, locator: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(locator)?).await?)
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(locator)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// S3-compatible blob storage implementation
pub struct S3BlobStorage {
    pub client: aws_sdk_s3::Client,
    pub bucket: String,
    pub prefix: String,
}

impl S3BlobStorage {
    fn key(&self, locator: &str) -> String {
        format!("{}/{}", self.prefix, locator)
    }
}

#[async_trait]
impl BlobStorage for S3BlobStorage {
    async fn store(&self, data: &[u8]) -> Result<String> {
        let locator = Uuid::new_v4().to_string();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(&locator))
            .body(data.to_vec().into())
            .send()
            .await?;
        Ok(locator)
    }

    async fn retrieve(&self, locator: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(locator))
            .send()
            .await?;

        let data = resp.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, locator: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(locator))
            .send()
            .await?;
        Ok(())
    }
}
