//! Runtime configuration loaded from the environment.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for every configured lifetime (about a century).
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn bounded(key: &str, ttl: Duration) -> Result<Duration> {
    if ttl > MAX_TTL {
        bail!("{key} exceeds {} seconds", MAX_TTL.as_secs());
    }
    Ok(ttl)
}

/// Time-to-live per cache key family.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub metadata: Duration,
    pub users: Duration,
    /// Kept short: the direct "what is my role" answer.
    pub role: Duration,
    pub listing: Duration,
    pub annotations: Duration,
    pub links: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(300),
            users: Duration::from_secs(300),
            role: Duration::from_secs(60),
            listing: Duration::from_secs(120),
            annotations: Duration::from_secs(300),
            links: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttls: CacheTtls,
    /// Listing pages beyond this one are never cached, which bounds the set
    /// of keys a listing invalidation has to enumerate.
    pub max_cached_pages: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttls: CacheTtls::default(),
            max_cached_pages: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub redis_url: Option<String>,
    pub data_dir: PathBuf,
    pub blob_dir: PathBuf,
    pub s3_bucket: Option<String>,
    pub jwt_secret: String,
    /// Accept a bare `X-User-Id` header as identity when no bearer token is
    /// sent. Only for local development and tests.
    pub trust_user_header: bool,
    pub cache: CacheConfig,
    pub page_size: u32,
    pub max_annotation_bytes: usize,
    pub invitation_ttl: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            data_dir: PathBuf::from("data"),
            blob_dir: PathBuf::from("data/blobs"),
            s3_bucket: None,
            jwt_secret: "change-me".to_string(),
            trust_user_header: false,
            cache: CacheConfig::default(),
            page_size: 20,
            max_annotation_bytes: 8 * 1024 * 1024,
            invitation_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let data_dir = lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);
        let blob_dir = lookup("BLOB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("blobs"));

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => bounded(
                    key,
                    Duration::from_secs(
                        raw.parse().with_context(|| format!("{key} must be a number of seconds"))?,
                    ),
                ),
                None => Ok(default),
            }
        };
        let ttls = CacheTtls {
            metadata: secs("CACHE_META_TTL_SECS", defaults.cache.ttls.metadata)?,
            users: secs("CACHE_USERS_TTL_SECS", defaults.cache.ttls.users)?,
            role: secs("CACHE_ROLE_TTL_SECS", defaults.cache.ttls.role)?,
            listing: secs("CACHE_LISTING_TTL_SECS", defaults.cache.ttls.listing)?,
            annotations: secs("CACHE_ANNOTATION_TTL_SECS", defaults.cache.ttls.annotations)?,
            links: secs("CACHE_LINKS_TTL_SECS", defaults.cache.ttls.links)?,
        };
        let max_cached_pages = match lookup("CACHE_MAX_PAGES") {
            Some(raw) => raw.parse().context("CACHE_MAX_PAGES must be a number")?,
            None => defaults.cache.max_cached_pages,
        };
        let page_size = match lookup("PAGE_SIZE") {
            Some(raw) => raw.parse().context("PAGE_SIZE must be a number")?,
            None => defaults.page_size,
        };
        let max_annotation_bytes = match lookup("MAX_ANNOTATION_BYTES") {
            Some(raw) => raw.parse().context("MAX_ANNOTATION_BYTES must be a number")?,
            None => defaults.max_annotation_bytes,
        };
        let trust_user_header = match lookup("TRUST_USER_ID_HEADER") {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => bail!("TRUST_USER_ID_HEADER must be true or false"),
            },
            None => defaults.trust_user_header,
        };
        let invitation_ttl = match lookup("INVITATION_TTL_HOURS") {
            Some(raw) => {
                let hours: u64 = raw.parse().context("INVITATION_TTL_HOURS must be a number")?;
                let secs = hours
                    .checked_mul(60 * 60)
                    .context("INVITATION_TTL_HOURS is out of range")?;
                bounded("INVITATION_TTL_HOURS", Duration::from_secs(secs))?
            }
            None => defaults.invitation_ttl,
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL").filter(|s| !s.is_empty()),
            data_dir,
            blob_dir,
            s3_bucket: lookup("S3_BUCKET").filter(|s| !s.is_empty()),
            jwt_secret: lookup("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            trust_user_header,
            cache: CacheConfig {
                ttls,
                max_cached_pages,
            },
            page_size: page_size.max(1),
            max_annotation_bytes,
            invitation_ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = HubConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.redis_url.is_none());
        assert_eq!(config.blob_dir, PathBuf::from("data").join("blobs"));
        assert_eq!(config.cache.max_cached_pages, 5);
        assert_eq!(config.cache.ttls.role, Duration::from_secs(60));
        assert!(!config.trust_user_header);
    }

    #[test]
    fn user_header_trust_is_opt_in() {
        let on = HubConfig::from_lookup(lookup(&[("TRUST_USER_ID_HEADER", "true")])).unwrap();
        assert!(on.trust_user_header);
        let off = HubConfig::from_lookup(lookup(&[("TRUST_USER_ID_HEADER", "0")])).unwrap();
        assert!(!off.trust_user_header);
        assert!(HubConfig::from_lookup(lookup(&[("TRUST_USER_ID_HEADER", "maybe")])).is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = HubConfig::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6379"),
            ("DATA_DIR", "/srv/hub"),
            ("CACHE_ROLE_TTL_SECS", "5"),
            ("CACHE_MAX_PAGES", "2"),
            ("PAGE_SIZE", "0"),
            ("INVITATION_TTL_HOURS", "1"),
        ]))
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.blob_dir, PathBuf::from("/srv/hub/blobs"));
        assert_eq!(config.cache.ttls.role, Duration::from_secs(5));
        assert_eq!(config.cache.max_cached_pages, 2);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.invitation_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn rejects_garbage_numbers() {
        assert!(HubConfig::from_lookup(lookup(&[("CACHE_META_TTL_SECS", "soon")])).is_err());
    }

    #[test]
    fn rejects_lifetimes_out_of_range() {
        let max = u64::MAX.to_string();
        assert!(HubConfig::from_lookup(lookup(&[("INVITATION_TTL_HOURS", max.as_str())])).is_err());
        assert!(HubConfig::from_lookup(lookup(&[("INVITATION_TTL_HOURS", "10000000")])).is_err());
        assert!(HubConfig::from_lookup(lookup(&[("CACHE_ROLE_TTL_SECS", max.as_str())])).is_err());

        let century = HubConfig::from_lookup(lookup(&[("INVITATION_TTL_HOURS", "876000")])).unwrap();
        assert_eq!(century.invitation_ttl, MAX_TTL);
    }
}
