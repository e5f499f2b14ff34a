//! Periodic warm tier regeneration.
//!
//! Every cycle: republish the snapshot, regenerate the default variants,
//! add the popular timezone variants the ledger reports, evict everything
//! else, then prune old ledger rows and drop the hot tier. One candidate
//! failing never aborts the rest of the cycle, and a slow cycle cannot
//! overlap the next tick.

use anyhow::Result;
use chrono::Utc;
use cron::Schedule;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::cache::{HotTier, WarmTier};
use crate::config::{LocaleConfig, PopularityConfig, SchedulerConfig};
use crate::database::Database;
use crate::models::{Fingerprint, RaceSelector};
use crate::render::Renderer;
use crate::services::provider::ScheduleProvider;

/// Summary of one refresh cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub generated: usize,
    pub evicted: usize,
    /// True when the cycle was skipped because another one was running
    pub skipped: bool,
}

pub struct RefreshService {
    database: Database,
    warm: WarmTier,
    hot: HotTier,
    renderer: Renderer,
    provider: Arc<dyn ScheduleProvider>,
    locales: LocaleConfig,
    popularity: PopularityConfig,
    scheduler: SchedulerConfig,
    running: Mutex<()>,
}

impl RefreshService {
    pub fn new(
        database: Database,
        warm: WarmTier,
        hot: HotTier,
        provider: Arc<dyn ScheduleProvider>,
        locales: LocaleConfig,
        popularity: PopularityConfig,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            database,
            warm,
            hot,
            renderer: Renderer::new(),
            provider,
            locales,
            popularity,
            scheduler,
            running: Mutex::new(()),
        }
    }

    /// One complete regeneration cycle. Idempotent and safe to invoke
    /// manually for operational recovery; an overlapping call is a no-op.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Refresh cycle already running, skipping this invocation");
            return Ok(RefreshOutcome {
                skipped: true,
                ..Default::default()
            });
        };

        let started = std::time::Instant::now();
        info!("Starting warm tier refresh cycle");

        let version = self
            .provider
            .reload()
            .await
            .map_err(|e| anyhow::anyhow!("snapshot reload failed: {e}"))?;
        self.warm.write_version_marker(&version).await?;

        let mut keep: BTreeSet<String> = BTreeSet::new();
        let mut generated = 0usize;

        // Default variants are regenerated unconditionally
        for locale in &self.locales.supported {
            let fingerprint =
                Fingerprint::new(locale, &self.locales.default_timezone, RaceSelector::Next);
            match self.generate_into_warm(&fingerprint).await {
                Ok(name) => {
                    keep.insert(name);
                    generated += 1;
                }
                Err(e) => {
                    error!(fingerprint = %fingerprint, "Failed to generate default variant: {}", e);
                }
            }
        }

        // Popular timezone variants, bounded by the candidate cap
        let candidates = self
            .database
            .top_k_excluding(
                self.popularity.window_hours,
                self.popularity.min_requests,
                self.popularity.candidate_limit,
                Some(&self.locales.default_timezone),
            )
            .await?;
        if !candidates.is_empty() {
            info!("Generating {} popular timezone variants", candidates.len());
        }
        for fingerprint in candidates {
            if !self.locales.supported.contains(&fingerprint.locale) {
                debug!("Skipping unsupported locale: {}", fingerprint.locale);
                continue;
            }
            match self.generate_into_warm(&fingerprint).await {
                Ok(name) => {
                    keep.insert(name);
                    generated += 1;
                }
                Err(e) => {
                    error!(fingerprint = %fingerprint, "Failed to generate variant: {}", e);
                }
            }
        }

        // Entries from earlier cycles that no longer made the cut
        let mut evicted = 0usize;
        for name in self.warm.list().await? {
            if !keep.contains(&name) {
                match self.warm.remove_file(&name).await {
                    Ok(()) => evicted += 1,
                    Err(e) => error!("Failed to evict warm entry {}: {}", name, e),
                }
            }
        }

        if let Err(e) = self
            .database
            .set_meta("last_generation", &Utc::now().to_rfc3339())
            .await
        {
            warn!("Failed to record last_generation: {}", e);
        }
        match self
            .database
            .prune_popularity(self.popularity.retention_days)
            .await
        {
            Ok(pruned) if pruned > 0 => info!("Pruned {} old popularity rows", pruned),
            Ok(_) => {}
            Err(e) => warn!("Failed to prune popularity rows: {}", e),
        }

        self.hot.clear().await;

        info!(
            "Refresh cycle complete: {} generated, {} evicted ({:.2}s)",
            generated,
            evicted,
            started.elapsed().as_secs_f64()
        );
        Ok(RefreshOutcome {
            generated,
            evicted,
            skipped: false,
        })
    }

    async fn generate_into_warm(&self, fingerprint: &Fingerprint) -> Result<String> {
        let input = self
            .provider
            .render_input(RaceSelector::Next, &fingerprint.locale, &fingerprint.timezone)
            .await?;
        let raster = self.renderer.encode(&input)?;
        self.warm.put(fingerprint, &raster).await?;

        let name = self.warm.file_name(fingerprint);
        if let Err(e) = self
            .database
            .save_generated_image(fingerprint, &name, &input.snapshot_version)
            .await
        {
            warn!("Failed to record generated image {}: {}", name, e);
        }
        debug!(fingerprint = %fingerprint, file = %name, "Warm entry generated");
        Ok(name)
    }

    /// Cron-gated loop. Ticks once a second and fires a cycle when the
    /// next scheduled occurrence has passed.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if !self.scheduler.enabled {
            info!("Refresh scheduler is disabled");
            return Ok(());
        }

        let schedule = Schedule::from_str(&self.scheduler.refresh_cron).map_err(|e| {
            anyhow::anyhow!(
                "invalid refresh cron expression '{}': {}",
                self.scheduler.refresh_cron,
                e
            )
        })?;

        if self.scheduler.run_on_startup {
            info!("Running initial refresh cycle");
            if let Err(e) = self.refresh().await {
                error!("Initial refresh failed: {}", e);
            }
        }

        if let Some(next) = schedule.upcoming(Utc).next() {
            info!(
                "Refresh scheduler started (cron: {}) - next cycle at {}",
                self.scheduler.refresh_cron,
                next.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }

        let mut last_fire = Utc::now();
        let mut ticker = interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let now = Utc::now();
            let due = schedule
                .after(&last_fire)
                .next()
                .map(|next| now >= next)
                .unwrap_or(false);
            if !due {
                continue;
            }
            last_fire = now;
            if let Err(e) = self.refresh().await {
                error!("Scheduled refresh failed: {}", e);
            }
            if let Some(next) = schedule.upcoming(Utc).next() {
                info!(
                    "Next refresh cycle at {}",
                    next.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }
}
