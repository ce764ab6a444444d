//! Versioned offline cache for the application shell.
//!
//! A [`CacheController`] owns one cache bucket named after its version. It
//! walks the install/activate lifecycle once, then answers requests from
//! the cache with a network fallback. [`Registration`] keeps track of which
//! controller is live so a failed upgrade leaves the previous one serving.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use strum::Display;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::notify::{NotificationCenter, SystemNotification, APP_TITLE};

mod cache;
mod network;

pub use cache::{CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
pub use network::{
    parse_origin, DirectoryNetwork, HttpNetwork, Network, Request, Response, ResponseKind,
};

pub const PUSH_ICON: &str = "images/icons/icon-192x192.png";
pub const FONT_STYLESHEET: &str =
    "https://fonts.googleapis.com/css2?family=Dancing+Script:wght@400;700&display=swap";

pub fn default_manifest() -> Vec<String> {
    [
        "/",
        "/index.html",
        "/note.html",
        "/note_list.html",
        "/css/styles.css",
        "/js/app.js",
        "/js/todo.js",
        "/js/note.js",
        "/js/note-list.js",
        "/js/utils.js",
        "/manifest.json",
        FONT_STYLESHEET,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("install failed: {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("request for {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("cache storage error: {0:#}")]
    Cache(#[source] anyhow::Error),

    #[error("cannot {action} while the worker is {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: WorkerPhase,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum WorkerPhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub purged: Vec<String>,
    pub claimed: usize,
}

/// The environment around the controller: open clients and the platform
/// notification surface.
#[async_trait]
pub trait ClientHost: Send + Sync {
    /// Takes control of open clients and returns how many were claimed.
    async fn claim(&self) -> usize;
    async fn show_notification(&self, notification: &SystemNotification) -> bool;
    async fn close_notification(&self, notification: &SystemNotification);
    async fn open_window(&self, url: &str);
}

/// Host for the command line: there are no clients to claim, notifications
/// go through the [`NotificationCenter`] and windows are only logged.
pub struct ConsoleHost {
    center: Arc<NotificationCenter>,
}

impl ConsoleHost {
    pub fn new(center: Arc<NotificationCenter>) -> Self {
        Self { center }
    }
}

#[async_trait]
impl ClientHost for ConsoleHost {
    async fn claim(&self) -> usize {
        0
    }

    async fn show_notification(&self, notification: &SystemNotification) -> bool {
        self.center.show_system(notification)
    }

    async fn close_notification(&self, notification: &SystemNotification) {
        tracing::debug!(title = %notification.title, "notification closed");
    }

    async fn open_window(&self, url: &str) {
        tracing::info!(url, "open window requested");
    }
}

/// Entries are keyed by absolute URL, so `/index.html` and the same path
/// spelled out against the origin hit one entry.
pub struct CacheController {
    version: String,
    manifest: Vec<String>,
    origin: Url,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    host: Arc<dyn ClientHost>,
    phase: Mutex<WorkerPhase>,
    skip_waiting: AtomicBool,
    writes: Mutex<JoinSet<()>>,
}

impl CacheController {
    pub fn new(
        version: impl Into<String>,
        manifest: Vec<String>,
        origin: Url,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        host: Arc<dyn ClientHost>,
    ) -> Self {
        Self {
            version: version.into(),
            manifest,
            origin,
            storage,
            network,
            host,
            phase: Mutex::new(WorkerPhase::Parsed),
            skip_waiting: AtomicBool::new(false),
            writes: Mutex::new(JoinSet::new()),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn manifest(&self) -> &[String] {
        &self.manifest
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.lock()
    }

    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    fn transition(
        &self,
        from: WorkerPhase,
        to: WorkerPhase,
        action: &'static str,
    ) -> Result<(), OfflineError> {
        let mut phase = self.phase.lock();
        if *phase != from {
            return Err(OfflineError::InvalidPhase {
                action,
                phase: *phase,
            });
        }
        *phase = to;
        Ok(())
    }

    fn set_phase(&self, to: WorkerPhase) {
        *self.phase.lock() = to;
    }

    fn cache_key(&self, url: &str) -> String {
        match self.origin.join(url) {
            Ok(absolute) => absolute.into(),
            Err(err) => {
                tracing::debug!(url, %err, "unresolvable url, caching as given");
                url.to_string()
            }
        }
    }

    /// Fetches the whole manifest into this version's bucket. Nothing is
    /// stored unless every fetch succeeds; on failure the worker turns
    /// redundant.
    pub async fn on_install(&self) -> Result<(), OfflineError> {
        self.transition(WorkerPhase::Parsed, WorkerPhase::Installing, "install")?;
        tracing::info!(version = %self.version, assets = self.manifest.len(), "installing");

        let existed = self.storage.has(&self.version).await?;
        match self.populate().await {
            Ok(()) => {
                self.skip_waiting.store(true, Ordering::SeqCst);
                self.set_phase(WorkerPhase::Installed);
                tracing::info!(version = %self.version, "installed");
                Ok(())
            }
            Err(err) => {
                self.set_phase(WorkerPhase::Redundant);
                tracing::warn!(version = %self.version, %err, "install failed");
                if !existed {
                    if let Err(cleanup) = self.storage.delete(&self.version).await {
                        tracing::error!(err = %cleanup, "failed to drop partial bucket");
                    }
                }
                Err(err)
            }
        }
    }

    async fn populate(&self) -> Result<(), OfflineError> {
        self.storage.open(&self.version).await?;
        let mut entries = Vec::with_capacity(self.manifest.len());
        for url in &self.manifest {
            let response = self
                .network
                .fetch(&Request::get(url))
                .await
                .map_err(|err| OfflineError::InstallFailed {
                    url: url.clone(),
                    reason: err.to_string(),
                })?;
            if !response.is_ok() {
                return Err(OfflineError::InstallFailed {
                    url: url.clone(),
                    reason: format!("status {}", response.status),
                });
            }
            entries.push((self.cache_key(url), response));
        }
        self.storage.put_all(&self.version, entries).await
    }

    /// Drops every bucket but this version's and claims open clients.
    pub async fn on_activate(&self) -> Result<ActivationReport, OfflineError> {
        self.transition(WorkerPhase::Installed, WorkerPhase::Activating, "activate")?;

        let mut purged = Vec::new();
        for name in self.storage.keys().await? {
            if name != self.version && self.storage.delete(&name).await? {
                tracing::info!(bucket = %name, "purged old cache");
                purged.push(name);
            }
        }
        let claimed = self.host.claim().await;
        self.set_phase(WorkerPhase::Activated);
        tracing::info!(version = %self.version, claimed, "activated");
        Ok(ActivationReport { purged, claimed })
    }

    /// Marks a controller whose bucket survives from an earlier run as
    /// active without reinstalling. Returns `false` when no bucket exists.
    pub async fn resume(&self) -> Result<bool, OfflineError> {
        if !self.storage.has(&self.version).await? {
            return Ok(false);
        }
        self.transition(WorkerPhase::Parsed, WorkerPhase::Activated, "resume")?;
        Ok(true)
    }

    /// Cache first, then network. Successful same-origin responses are
    /// written back on a background task; the caller gets the original.
    pub async fn on_fetch(&self, request: &Request) -> Result<Response, OfflineError> {
        let key = self.cache_key(&request.url);
        if let Some(hit) = self.storage.match_any(&key).await? {
            tracing::debug!(url = %key, "cache hit");
            return Ok(hit);
        }

        let response = self.network.fetch(request).await?;
        if !response.is_cacheable() {
            tracing::debug!(
                url = %request.url,
                status = response.status,
                kind = %response.kind,
                "not caching response"
            );
            return Ok(response);
        }

        let to_cache = response.clone();
        let storage = self.storage.clone();
        let bucket = self.version.clone();
        let url = key;
        let mut writes = self.writes.lock();
        while let Some(finished) = writes.try_join_next() {
            if let Err(err) = finished {
                tracing::error!(?err, "cache write task failed");
            }
        }
        writes.spawn(async move {
            let stored = match storage.open(&bucket).await {
                Ok(()) => storage.put(&bucket, &url, &to_cache).await,
                Err(err) => Err(err),
            };
            match stored {
                Ok(()) => tracing::debug!(%url, %bucket, "cached response"),
                Err(err) => tracing::warn!(%url, %err, "failed to cache response"),
            }
        });
        Ok(response)
    }

    /// Shows a push message. A missing payload yields an empty body.
    pub async fn on_push(&self, payload: Option<&str>) -> bool {
        let notification = SystemNotification {
            title: APP_TITLE.to_string(),
            body: payload.unwrap_or_default().to_string(),
            icon: Some(PUSH_ICON.to_string()),
            badge: Some(PUSH_ICON.to_string()),
        };
        self.host.show_notification(&notification).await
    }

    pub async fn on_notification_click(&self, notification: &SystemNotification) {
        self.host.close_notification(notification).await;
        self.host.open_window("/").await;
    }

    /// Background cache writes not yet reaped.
    pub fn pending_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Waits for background cache writes started by [`Self::on_fetch`].
    pub async fn settle(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.writes.lock());
            if pending.is_empty() {
                return;
            }
            while let Some(result) = pending.join_next().await {
                if let Err(err) = result {
                    tracing::error!(?err, "cache write task failed");
                }
            }
        }
    }

    fn retire(&self) {
        self.set_phase(WorkerPhase::Redundant);
    }
}

/// Tracks the live controller. Requests go straight to the network until
/// one is registered.
pub struct Registration {
    network: Arc<dyn Network>,
    active: Option<Arc<CacheController>>,
}

impl Registration {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&Arc<CacheController>> {
        self.active.as_ref()
    }

    pub fn active_version(&self) -> Option<&str> {
        self.active.as_deref().map(CacheController::version)
    }

    /// Installs and activates `controller`. If install fails the current
    /// controller stays in charge and its bucket is left alone.
    pub async fn register(
        &mut self,
        controller: CacheController,
    ) -> Result<ActivationReport, OfflineError> {
        controller.on_install().await?;
        if let Some(previous) = &self.active {
            previous.settle().await;
        }
        let report = controller.on_activate().await?;
        if let Some(previous) = self.active.replace(Arc::new(controller)) {
            previous.retire();
        }
        Ok(report)
    }

    /// Adopts a controller installed by an earlier run, if its bucket is
    /// still there.
    pub async fn restore(&mut self, controller: CacheController) -> Result<bool, OfflineError> {
        if !controller.resume().await? {
            return Ok(false);
        }
        self.active = Some(Arc::new(controller));
        Ok(true)
    }

    pub async fn fetch(&self, request: &Request) -> Result<Response, OfflineError> {
        match &self.active {
            Some(controller) => controller.on_fetch(request).await,
            None => self.network.fetch(request).await,
        }
    }

    pub async fn settle(&self) {
        if let Some(controller) = &self.active {
            controller.settle().await;
        }
    }
}
