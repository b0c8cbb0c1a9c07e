//! Cache status tracking for playlist content.
//!
//! The [`Tracker`] records, per content URL, whether the resource has been
//! fetched ahead of time. Fetching itself is delegated to a [`Preloader`]
//! running off the owner; its outcome comes back as a [`Completion`] that the
//! owner applies with [`Tracker::complete`].
//!
//! Entries never expire on their own. Once the cached content grows past a
//! ceiling, the whole cache is purged.

use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc};

use futures_util::future::BoxFuture;
use md5::{Digest, Md5};
use tokio::sync::mpsc;

use crate::{error::Result, protocol::content::ContentItem};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    #[default]
    NotCached,
    Caching,
    Cached,
    Failed,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCached => write!(f, "not cached"),
            Self::Caching => write!(f, "caching"),
            Self::Cached => write!(f, "cached"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Stable cache key of a URL: the hex MD5 digest.
#[must_use]
pub fn key(url: &str) -> String {
    format!("{:x}", Md5::digest(url.as_bytes()))
}

/// Fetches content into a local cache.
pub trait Preloader: Send + Sync {
    /// Fetches `url` and stores it under `key`, returning the stored size in
    /// bytes.
    fn preload(&self, url: String, key: String) -> BoxFuture<'static, Result<u64>>;

    /// Drops everything stored so far.
    fn clear(&self) -> BoxFuture<'static, Result<()>>;
}

/// Outcome of a preload, to be applied on the owner.
#[derive(Debug)]
pub struct Completion {
    pub key: String,
    pub result: Result<u64>,
}

pub struct Tracker {
    entries: HashMap<String, CacheStatus>,
    sizes: HashMap<String, u64>,
    loader: Arc<dyn Preloader>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Tracker {
    #[must_use]
    pub fn new(loader: Arc<dyn Preloader>, completions: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            entries: HashMap::new(),
            sizes: HashMap::new(),
            loader,
            completions,
        }
    }

    #[must_use]
    pub fn status(&self, url: &str) -> CacheStatus {
        self.entries.get(&key(url)).copied().unwrap_or_default()
    }

    /// Starts fetching `item` in the background.
    ///
    /// Items that are cached or being cached, that have a blank URL, or whose
    /// type cannot be fetched ahead of time are skipped.
    pub fn preload(&mut self, item: &ContentItem) {
        if !item.content_type.is_fetchable() {
            trace!("not preloading {item}: {} is not fetchable", item.content_type);
            return;
        }

        let url = item.url.trim();
        if url.is_empty() {
            return;
        }

        let key = key(url);
        if let Some(status @ (CacheStatus::Cached | CacheStatus::Caching)) = self.entries.get(&key) {
            trace!("not preloading {item}: already {status}");
            return;
        }

        debug!("preloading {item}");
        self.entries.insert(key.clone(), CacheStatus::Caching);

        let fetch = self.loader.preload(url.to_owned(), key.clone());
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = fetch.await;
            let _ = completions.send(Completion { key, result });
        });
    }

    /// Applies the outcome of a preload.
    ///
    /// Outcomes for entries that were purged in the meantime are dropped.
    pub fn complete(&mut self, completion: Completion) {
        let Completion { key, result } = completion;
        let Some(status) = self.entries.get_mut(&key) else {
            trace!("dropping preload result for purged entry {key}");
            return;
        };

        match result {
            Ok(size) => {
                trace!("cached {key} ({size} bytes)");
                *status = CacheStatus::Cached;
                self.sizes.insert(key, size);
            }
            Err(e) => {
                warn!("preloading {key} failed: {e}");
                *status = CacheStatus::Failed;
            }
        }
    }

    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.sizes.values().sum()
    }

    /// Purges all entries and asks the preloader to drop its storage.
    pub fn clear(&mut self) {
        info!("clearing content cache");
        self.entries.clear();
        self.sizes.clear();

        let clear = self.loader.clear();
        tokio::spawn(async move {
            if let Err(e) = clear.await {
                error!("failed to clear content cache: {e}");
            }
        });
    }

    /// Purges the cache if it has grown past `ceiling` bytes.
    ///
    /// Returns `true` if the cache was purged.
    pub fn cleanup(&mut self, ceiling: u64) -> bool {
        let total = self.total_size_bytes();
        if total > ceiling {
            info!("content cache at {total} bytes exceeds {ceiling} bytes");
            self.clear();
            true
        } else {
            false
        }
    }
}

/// Preloader that downloads content into a directory.
pub struct HttpPreloader {
    client: reqwest::Client,
    dir: PathBuf,
}

impl HttpPreloader {
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(dir: PathBuf, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()?;
        Ok(Self { client, dir })
    }
}

impl Preloader for HttpPreloader {
    fn preload(&self, url: String, key: String) -> BoxFuture<'static, Result<u64>> {
        let client = self.client.clone();
        let path = self.dir.join(key);
        let dir = self.dir.clone();
        Box::pin(async move {
            let response = client.get(&url).send().await?.error_for_status()?;
            let body = response.bytes().await?;
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, &body).await?;
            Ok(body.len() as u64)
        })
    }

    fn clear(&self) -> BoxFuture<'static, Result<()>> {
        let dir = self.dir.clone();
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&dir).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        })
    }
}
