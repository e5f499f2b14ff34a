use chrono::{DateTime, FixedOffset, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which race record a request wants rendered.
///
/// `Next` is the auto-selected default (the next upcoming race); `Round`
/// pins an explicit season and round number. Only `Next` variants are ever
/// pre-generated into the warm tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RaceSelector {
    Next,
    Round { season: i32, round: u32 },
}

impl RaceSelector {
    pub fn is_default(&self) -> bool {
        matches!(self, RaceSelector::Next)
    }
}

impl fmt::Display for RaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaceSelector::Next => write!(f, "next"),
            RaceSelector::Round { season, round } => write!(f, "{}/{}", season, round),
        }
    }
}

/// Deterministic cache key for one raster variant.
///
/// Two requests with equal fingerprints always resolve to byte-identical
/// rasters for a given schedule snapshot version. Ordering is derived so
/// Top-K ties break deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    pub locale: String,
    pub timezone: String,
    pub auto_selected: bool,
}

impl Fingerprint {
    pub fn new(locale: &str, timezone: &str, selector: RaceSelector) -> Self {
        Self {
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            auto_selected: selector.is_default(),
        }
    }

    /// Warm tier file name for this variant.
    ///
    /// The default timezone gets the short form; other timezones append the
    /// identifier with `/` replaced by `_` (neither locale codes nor IANA
    /// names contain `_`-ambiguous separators in the short segment, so the
    /// mapping stays collision-free).
    pub fn warm_file_name(&self, prefix: &str, default_timezone: &str) -> String {
        if self.timezone == default_timezone {
            format!("{}_{}.raster", prefix, self.locale)
        } else {
            format!("{}_{}_{}.raster", prefix, self.locale, self.timezone.replace('/', "_"))
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.locale,
            self.timezone,
            if self.auto_selected { "next" } else { "explicit" }
        )
    }
}

/// Identity of one published schedule snapshot (hex SHA-256 of its source bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotVersion(String);

impl SnapshotVersion {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        use std::fmt::Write as _;
        let digest = Sha256::digest(bytes);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(hex, "{:02x}", byte);
        }
        Self(hex)
    }

    pub fn parse<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoded raster bytes (a complete 1-bpp BMP file), immutable once built.
///
/// Cloning is cheap; the hot tier and every resolver path hand out handles
/// to the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    bytes: Arc<Vec<u8>>,
}

impl Raster {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.as_ref().clone()
    }
}

/// Hot tier value: the raster plus the snapshot version it was encoded from.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub raster: Raster,
    pub snapshot_version: SnapshotVersion,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(raster: Raster, snapshot_version: SnapshotVersion, created_at: DateTime<Utc>) -> Self {
        Self {
            raster,
            snapshot_version,
            created_at,
        }
    }
}

// ============================================================================
// Schedule snapshot (provisioned season data, deserialized from JSON)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    pub seasons: Vec<SeasonCalendar>,
    #[serde(default)]
    pub circuits: HashMap<String, CircuitRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonCalendar {
    pub season: i32,
    pub races: Vec<RaceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceRecord {
    pub round: u32,
    pub name: String,
    pub circuit: String,
    pub sessions: Vec<SessionRecord>,
}

impl RaceRecord {
    /// Start time of the main race session, if the record carries one.
    pub fn race_start(&self) -> Option<DateTime<Utc>> {
        self.sessions
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case("race"))
            .map(|s| s.start)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub name: String,
    pub start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitRecord {
    pub name: String,
    pub locality: String,
    pub country: String,
    #[serde(default)]
    pub outline: Option<Vec<[f64; 2]>>,
    #[serde(default)]
    pub stats: Option<CircuitStats>,
    #[serde(default)]
    pub history: Option<PodiumHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStats {
    #[serde(default)]
    pub circuit_length: Option<String>,
    #[serde(default)]
    pub number_of_laps: Option<u32>,
    #[serde(default)]
    pub race_distance: Option<String>,
    #[serde(default)]
    pub fastest_lap_time: Option<String>,
    #[serde(default)]
    pub fastest_lap_driver: Option<String>,
    #[serde(default)]
    pub fastest_lap_year: Option<i32>,
    #[serde(default)]
    pub first_grand_prix: Option<i32>,
}

/// Previous results at a circuit. Absence means a new track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodiumHistory {
    #[serde(default)]
    pub season: Option<i32>,
    #[serde(default)]
    pub race: Vec<PodiumEntry>,
    #[serde(default)]
    pub qualifying: Vec<PodiumEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodiumEntry {
    pub position: u8,
    pub driver: String,
    pub team: String,
    #[serde(default)]
    pub time: Option<String>,
}

// ============================================================================
// Render input (produced by the schedule provider, consumed by the encoder)
// ============================================================================

/// Everything the encoder needs for one variant, fully resolved.
///
/// The input is a pure value: session times are already localized, the
/// `generated_at` clock is captured by the provider, and the geometry is a
/// tagged variant rather than a maybe-missing asset lookup. Encoding the
/// same input twice yields byte-identical output.
#[derive(Debug, Clone)]
pub struct RenderInput {
    pub locale: String,
    pub timezone: String,
    pub labels: Labels,
    pub card: RaceCard,
    pub history: Option<PodiumHistory>,
    pub geometry: VenueGeometry,
    pub stats: Option<CircuitStats>,
    pub generated_at: DateTime<Utc>,
    pub snapshot_version: SnapshotVersion,
}

#[derive(Debug, Clone)]
pub struct RaceCard {
    pub season: i32,
    pub round: u32,
    pub race_name: String,
    pub circuit_name: String,
    pub locality: String,
    pub country: String,
    pub schedule: Vec<ScheduleRow>,
}

#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub name: String,
    pub start: DateTime<FixedOffset>,
}

/// Venue outline, resolved once per encode instead of scattered null checks.
#[derive(Debug, Clone)]
pub enum VenueGeometry {
    Known(TrackOutline),
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct TrackOutline {
    pub points: Vec<[f64; 2]>,
}

/// Localized strings for one variant, supplied by the translation
/// collaborator alongside the schedule data. The encoder never translates.
#[derive(Debug, Clone)]
pub struct Labels {
    pub championship: String,
    pub weekend_schedule: String,
    pub race: String,
    pub qualifying: String,
    pub new_track: String,
    pub error: String,
    pub countdown_in: String,
    pub countdown_days: String,
    pub countdown_hours: String,
    pub laps: String,
    pub first_gp: String,
    pub days: HashMap<String, String>,
    pub sessions: HashMap<String, String>,
}

impl Labels {
    /// Localized weekday abbreviation, falling back to the English short name.
    pub fn day_label(&self, weekday: Weekday) -> String {
        let key = match weekday {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        };
        self.days
            .get(key)
            .cloned()
            .unwrap_or_else(|| key[..1].to_uppercase() + &key[1..])
    }

    /// Localized session name, falling back to the raw session name.
    pub fn session_label(&self, name: &str) -> String {
        self.sessions
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_uses_short_name_for_default_timezone() {
        let fp = Fingerprint::new("en", "Europe/Prague", RaceSelector::Next);
        assert_eq!(fp.warm_file_name("calendar", "Europe/Prague"), "calendar_en.raster");
    }

    #[test]
    fn fingerprint_replaces_slashes_in_foreign_timezone() {
        let fp = Fingerprint::new("en", "America/New_York", RaceSelector::Next);
        assert_eq!(
            fp.warm_file_name("calendar", "Europe/Prague"),
            "calendar_en_America_New_York.raster"
        );
    }

    #[test]
    fn fingerprint_ordering_is_total_and_stable() {
        let a = Fingerprint::new("cs", "Europe/Prague", RaceSelector::Next);
        let b = Fingerprint::new("en", "America/New_York", RaceSelector::Next);
        let c = Fingerprint::new("en", "Europe/Prague", RaceSelector::Next);
        let mut keys = vec![c.clone(), a.clone(), b.clone()];
        keys.sort();
        assert_eq!(keys, vec![a, b, c]);
    }

    #[test]
    fn selector_default_flag_feeds_fingerprint() {
        let auto = Fingerprint::new("en", "UTC", RaceSelector::Next);
        let pinned = Fingerprint::new(
            "en",
            "UTC",
            RaceSelector::Round {
                season: 2025,
                round: 3,
            },
        );
        assert!(auto.auto_selected);
        assert!(!pinned.auto_selected);
        assert_ne!(auto, pinned);
    }

    #[test]
    fn snapshot_version_is_content_addressed() {
        let a = SnapshotVersion::from_bytes(b"season data");
        let b = SnapshotVersion::from_bytes(b"season data");
        let c = SnapshotVersion::from_bytes(b"other data");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
