//! Schedule provider seam and the snapshot-file-backed implementation.
//!
//! The provider is the boundary to the upstream data collaborator: it owns
//! snapshot publication and turns (selector, locale, timezone) into a fully
//! localized `RenderInput`. The built-in implementation works entirely from
//! provisioned snapshot files, so serving traffic never performs network
//! retrieval.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::errors::ResolveError;
use crate::models::{
    Labels, RaceCard, RaceRecord, RaceSelector, RenderInput, ScheduleRow, SnapshotVersion,
    TrackOutline, VenueGeometry,
};
use crate::services::snapshot::SnapshotStore;

#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    /// Re-publish the newest schedule data and return its version.
    async fn reload(&self) -> Result<SnapshotVersion, ResolveError>;

    /// Version of the currently published snapshot. Cheap; called on every
    /// resolve for staleness checks.
    async fn current_version(&self) -> SnapshotVersion;

    /// Resolve a fully localized render input for one variant.
    async fn render_input(
        &self,
        selector: RaceSelector,
        locale: &str,
        timezone: &str,
    ) -> Result<RenderInput, ResolveError>;
}

/// Provider over locally provisioned season snapshot files.
pub struct StaticScheduleProvider {
    store: Arc<SnapshotStore>,
}

impl StaticScheduleProvider {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    fn select_race<'a>(
        seasons: &'a [crate::models::SeasonCalendar],
        selector: RaceSelector,
        now: chrono::DateTime<Utc>,
    ) -> Option<(i32, &'a RaceRecord)> {
        match selector {
            RaceSelector::Next => {
                // Seasons are published sorted ascending; the first race
                // whose main session is still ahead wins.
                for season in seasons {
                    for race in &season.races {
                        if let Some(start) = race.race_start() {
                            if start > now {
                                return Some((season.season, race));
                            }
                        }
                    }
                }
                None
            }
            RaceSelector::Round { season, round } => seasons
                .iter()
                .find(|s| s.season == season)
                .and_then(|s| s.races.iter().find(|r| r.round == round))
                .map(|race| (season, race)),
        }
    }
}

#[async_trait]
impl ScheduleProvider for StaticScheduleProvider {
    async fn reload(&self) -> Result<SnapshotVersion, ResolveError> {
        self.store
            .reload()
            .await
            .map_err(|e| ResolveError::upstream(e.to_string()))
    }

    async fn current_version(&self) -> SnapshotVersion {
        self.store.current_version().await
    }

    async fn render_input(
        &self,
        selector: RaceSelector,
        locale: &str,
        timezone: &str,
    ) -> Result<RenderInput, ResolveError> {
        let current = self.store.current().await;
        let now = Utc::now();

        let (season, race) = Self::select_race(&current.snapshot.seasons, selector, now)
            .ok_or_else(|| match selector {
                RaceSelector::Next => ResolveError::upstream("no upcoming race in snapshot"),
                RaceSelector::Round { season, round } => {
                    ResolveError::upstream(format!("race {}/{} not in snapshot", season, round))
                }
            })?;

        let tz = Tz::from_str(timezone).unwrap_or_else(|_| {
            warn!("Unknown timezone {}, rendering in UTC", timezone);
            Tz::UTC
        });

        let mut schedule: Vec<ScheduleRow> = race
            .sessions
            .iter()
            .map(|session| ScheduleRow {
                name: session.name.clone(),
                start: session.start.with_timezone(&tz).fixed_offset(),
            })
            .collect();
        schedule.sort_by_key(|row| row.start);

        let circuit = current.snapshot.circuits.get(&race.circuit);
        let card = RaceCard {
            season,
            round: race.round,
            race_name: race.name.clone(),
            circuit_name: circuit
                .map(|c| c.name.clone())
                .unwrap_or_else(|| race.circuit.clone()),
            locality: circuit.map(|c| c.locality.clone()).unwrap_or_default(),
            country: circuit.map(|c| c.country.clone()).unwrap_or_default(),
            schedule,
        };

        let geometry = circuit
            .and_then(|c| c.outline.clone())
            .filter(|points| points.len() >= 2)
            .map(|points| VenueGeometry::Known(TrackOutline { points }))
            .unwrap_or(VenueGeometry::Placeholder);

        Ok(RenderInput {
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            labels: labels_for(locale),
            card,
            history: circuit.and_then(|c| c.history.clone()),
            geometry,
            stats: circuit.and_then(|c| c.stats.clone()),
            generated_at: now,
            snapshot_version: current.version.clone(),
        })
    }
}

/// Built-in label bundles for the supported locales. Anything else falls
/// back to English; a real translation service would replace this table.
pub fn labels_for(locale: &str) -> Labels {
    match locale {
        "cs" => Labels {
            championship: "FIA F1 World Championship".to_string(),
            weekend_schedule: "VÍKENDOVÝ PROGRAM".to_string(),
            race: "ZÁVOD".to_string(),
            qualifying: "KVALIFIKACE".to_string(),
            new_track: "NOVÁ TRAŤ".to_string(),
            error: "Chyba".to_string(),
            countdown_in: "ZA".to_string(),
            countdown_days: "dní".to_string(),
            countdown_hours: "hodin".to_string(),
            laps: "kol".to_string(),
            first_gp: "První GP".to_string(),
            days: pairs(&[
                ("mon", "Po"),
                ("tue", "Út"),
                ("wed", "St"),
                ("thu", "Čt"),
                ("fri", "Pá"),
                ("sat", "So"),
                ("sun", "Ne"),
            ]),
            sessions: pairs(&[
                ("fp1", "1. trénink"),
                ("fp2", "2. trénink"),
                ("fp3", "3. trénink"),
                ("qualifying", "Kvalifikace"),
                ("sprint", "Sprint"),
                ("race", "Závod"),
            ]),
        },
        _ => Labels {
            championship: "FIA F1 World Championship".to_string(),
            weekend_schedule: "WEEKEND SCHEDULE".to_string(),
            race: "RACE".to_string(),
            qualifying: "QUALIFYING".to_string(),
            new_track: "NEW TRACK".to_string(),
            error: "Error".to_string(),
            countdown_in: "IN".to_string(),
            countdown_days: "days".to_string(),
            countdown_hours: "hours".to_string(),
            laps: "laps".to_string(),
            first_gp: "First GP".to_string(),
            days: pairs(&[
                ("mon", "Mon"),
                ("tue", "Tue"),
                ("wed", "Wed"),
                ("thu", "Thu"),
                ("fri", "Fri"),
                ("sat", "Sat"),
                ("sun", "Sun"),
            ]),
            sessions: pairs(&[
                ("fp1", "FP1"),
                ("fp2", "FP2"),
                ("fp3", "FP3"),
                ("qualifying", "Qualifying"),
                ("sprint", "Sprint"),
                ("race", "Race"),
            ]),
        },
    }
}

fn pairs(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScheduleSnapshot, SeasonCalendar, SessionRecord};
    use chrono::Duration;

    fn snapshot_with_race(offset_hours: i64) -> ScheduleSnapshot {
        let start = Utc::now() + Duration::hours(offset_hours);
        ScheduleSnapshot {
            seasons: vec![SeasonCalendar {
                season: 2025,
                races: vec![RaceRecord {
                    round: 4,
                    name: "Sample Grand Prix".to_string(),
                    circuit: "sample".to_string(),
                    sessions: vec![
                        SessionRecord {
                            name: "Qualifying".to_string(),
                            start: start - Duration::days(1),
                        },
                        SessionRecord {
                            name: "Race".to_string(),
                            start,
                        },
                    ],
                }],
            }],
            circuits: HashMap::new(),
        }
    }

    async fn provider_with(snapshot: ScheduleSnapshot) -> StaticScheduleProvider {
        let store = Arc::new(SnapshotStore::new("./nonexistent"));
        store
            .publish(snapshot, SnapshotVersion::from_bytes(b"test"))
            .await;
        StaticScheduleProvider::new(store)
    }

    #[tokio::test]
    async fn next_selector_finds_upcoming_race() {
        let provider = provider_with(snapshot_with_race(48)).await;
        let input = provider
            .render_input(RaceSelector::Next, "en", "Europe/Prague")
            .await
            .unwrap();
        assert_eq!(input.card.race_name, "Sample Grand Prix");
        assert_eq!(input.card.season, 2025);
        // Sessions come out sorted by start time
        assert_eq!(input.card.schedule[0].name, "Qualifying");
        assert_eq!(input.card.schedule[1].name, "Race");
    }

    #[tokio::test]
    async fn past_races_are_not_upcoming() {
        let provider = provider_with(snapshot_with_race(-48)).await;
        let err = provider
            .render_input(RaceSelector::Next, "en", "Europe/Prague")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Upstream { .. }));
    }

    #[tokio::test]
    async fn explicit_round_selector_pins_the_race() {
        let provider = provider_with(snapshot_with_race(-48)).await;
        let input = provider
            .render_input(
                RaceSelector::Round {
                    season: 2025,
                    round: 4,
                },
                "en",
                "UTC",
            )
            .await
            .unwrap();
        assert_eq!(input.card.round, 4);

        let err = provider
            .render_input(
                RaceSelector::Round {
                    season: 2025,
                    round: 99,
                },
                "en",
                "UTC",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Upstream { .. }));
    }

    #[tokio::test]
    async fn session_times_are_localized() {
        let provider = provider_with(snapshot_with_race(24 * 30)).await;
        let prague = provider
            .render_input(RaceSelector::Next, "en", "Europe/Prague")
            .await
            .unwrap();
        let tokyo = provider
            .render_input(RaceSelector::Next, "en", "Asia/Tokyo")
            .await
            .unwrap();
        let p = prague.card.schedule.last().unwrap().start;
        let t = tokyo.card.schedule.last().unwrap().start;
        assert_eq!(p.with_timezone(&Utc), t.with_timezone(&Utc));
        assert_ne!(p.offset(), t.offset());
    }

    #[tokio::test]
    async fn unknown_timezone_falls_back_to_utc() {
        let provider = provider_with(snapshot_with_race(48)).await;
        let input = provider
            .render_input(RaceSelector::Next, "en", "Not/AZone")
            .await
            .unwrap();
        assert_eq!(input.card.schedule[0].start.offset().local_minus_utc(), 0);
    }

    #[tokio::test]
    async fn missing_circuit_degrades_to_placeholder() {
        let provider = provider_with(snapshot_with_race(48)).await;
        let input = provider
            .render_input(RaceSelector::Next, "en", "UTC")
            .await
            .unwrap();
        assert!(matches!(input.geometry, VenueGeometry::Placeholder));
        assert!(input.history.is_none());
        assert_eq!(input.card.circuit_name, "sample");
    }

    #[test]
    fn czech_labels_localize_sessions_and_days() {
        let labels = labels_for("cs");
        assert_eq!(labels.session_label("Race"), "Závod");
        assert_eq!(labels.day_label(chrono::Weekday::Sun), "Ne");
        let fallback = labels_for("de");
        assert_eq!(fallback.session_label("Race"), "Race");
    }
}
