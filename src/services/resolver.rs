//! Request-path raster resolution.
//!
//! Lookup order is hot tier, warm tier (auto-selected variants only), then
//! encode on demand. Every successful path populates the hot tier and
//! counts a popularity hit; nothing on this path ever writes the warm tier,
//! which belongs to the refresh cycle alone.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{HotTier, WarmTier};
use crate::database::Database;
use crate::errors::ResolveError;
use crate::models::{CacheEntry, Fingerprint, RaceSelector, Raster};
use crate::render::Renderer;
use crate::services::provider::ScheduleProvider;

pub struct Resolver {
    hot: HotTier,
    warm: WarmTier,
    database: Database,
    renderer: Renderer,
    provider: Arc<dyn ScheduleProvider>,
    supported_locales: Vec<String>,
    default_locale: String,
    provider_timeout: Duration,
}

impl Resolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hot: HotTier,
        warm: WarmTier,
        database: Database,
        provider: Arc<dyn ScheduleProvider>,
        supported_locales: Vec<String>,
        default_locale: String,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            hot,
            warm,
            database,
            renderer: Renderer::new(),
            provider,
            supported_locales,
            default_locale,
            provider_timeout,
        }
    }

    /// Resolve one variant to a complete raster.
    ///
    /// Provider and encoder failures surface typed; the caller is expected
    /// to answer with [`Resolver::error_raster`], which is never cached.
    pub async fn resolve(
        &self,
        locale: &str,
        timezone: &str,
        selector: RaceSelector,
    ) -> Result<Raster, ResolveError> {
        let locale = self.normalize_locale(locale);
        let fingerprint = Fingerprint::new(&locale, timezone, selector);
        let current_version = self.provider.current_version().await;

        if let Some(entry) = self.hot.get(&fingerprint).await {
            if entry.snapshot_version == current_version {
                debug!(fingerprint = %fingerprint, "Hot tier hit");
                self.count_hit(&fingerprint).await;
                return Ok(entry.raster);
            }
            debug!(fingerprint = %fingerprint, "Hot tier entry stale, re-resolving");
        }

        if selector.is_default() {
            if let Some(raster) = self.warm_lookup(&fingerprint, &current_version).await {
                self.hot
                    .put(
                        fingerprint.clone(),
                        CacheEntry::new(raster.clone(), current_version, Utc::now()),
                    )
                    .await;
                self.count_hit(&fingerprint).await;
                return Ok(raster);
            }
        }

        let input = match timeout(
            self.provider_timeout,
            self.provider.render_input(selector, &locale, timezone),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(ResolveError::UpstreamTimeout {
                    seconds: self.provider_timeout.as_secs(),
                })
            }
        };

        let raster = self.renderer.encode(&input)?;
        self.hot
            .put(
                fingerprint.clone(),
                CacheEntry::new(raster.clone(), input.snapshot_version.clone(), Utc::now()),
            )
            .await;
        self.count_hit(&fingerprint).await;
        debug!(fingerprint = %fingerprint, "Encoded on demand");
        Ok(raster)
    }

    /// Error raster for a failed resolution. Always computed fresh.
    pub fn error_raster(&self, message: &str) -> Raster {
        self.renderer.encode_error(message)
    }

    async fn warm_lookup(
        &self,
        fingerprint: &Fingerprint,
        current_version: &crate::models::SnapshotVersion,
    ) -> Option<Raster> {
        let raster = match self.warm.get(fingerprint).await {
            Ok(found) => found?,
            Err(e) => {
                warn!(fingerprint = %fingerprint, "Warm tier read failed, falling back to encode: {}", e);
                return None;
            }
        };
        match self.warm.read_version_marker().await {
            Ok(Some(marker)) if &marker == current_version => {
                debug!(fingerprint = %fingerprint, "Warm tier hit");
                Some(raster)
            }
            Ok(_) => {
                debug!(fingerprint = %fingerprint, "Warm tier stale, falling back to encode");
                None
            }
            Err(e) => {
                warn!("Warm tier version marker unreadable: {}", e);
                None
            }
        }
    }

    fn normalize_locale(&self, locale: &str) -> String {
        if self.supported_locales.iter().any(|l| l == locale) {
            locale.to_string()
        } else {
            self.default_locale.clone()
        }
    }

    /// A ledger failure is logged, not propagated: the raster is already
    /// resolved, and a statistics hiccup must not become a display outage.
    async fn count_hit(&self, fingerprint: &Fingerprint) {
        if let Err(e) = self.database.record_hit(fingerprint).await {
            warn!(fingerprint = %fingerprint, "Failed to record popularity hit: {}", e);
        }
    }
}
