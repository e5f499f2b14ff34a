//! Deterministic raster encoder.
//!
//! Turns a fully resolved [`RenderInput`] into an 800x480 1-bpp BMP: split
//! header, track map with circuit label, weekend schedule with countdown,
//! compact circuit stats, historical podium footer. Pure by construction,
//! with no clock, filesystem, or randomness, so identical inputs always
//! produce byte-identical output.

pub mod bitmap;
pub mod bmp;
pub mod font;

use chrono::{Datelike, Utc};
use tracing::debug;

use crate::errors::RenderError;
use crate::models::{PodiumEntry, Raster, RenderInput, VenueGeometry};
use bitmap::{Bitmap, Ink};

pub const DISPLAY_WIDTH: usize = 800;
pub const DISPLAY_HEIGHT: usize = 480;

// Layout constants (all pixels)
const HEADER_HEIGHT: i64 = 90;
const HEADER_SPLIT_X: i64 = 230;
const LEFT_COLUMN_WIDTH: i64 = 500;
const RIGHT_COLUMN_X: i64 = 510;
const TRACK_TOP: i64 = 92;
const TRACK_SIDE_MARGIN: i64 = 3;
const SCHEDULE_TITLE_Y: i64 = 100;
const SCHEDULE_START_Y: i64 = 140;
const SCHEDULE_ROW_HEIGHT: i64 = 28;
const SCHEDULE_DATE_X: i64 = 510;
const SCHEDULE_DAY_X: i64 = 575;
const SCHEDULE_TIME_X: i64 = 620;
const SCHEDULE_NAME_X: i64 = 680;
const RESULTS_Y_START: i64 = 385;
const RESULTS_COL1_X: i64 = 109;
const RESULTS_COL2_X: i64 = 455;
const RESULTS_TIME_OFFSET: i64 = 260;
const RESULTS_ROW_HEIGHT: i64 = 20;
const STATS_ROW_HEIGHT: i64 = 18;
const PADDING: i64 = 15;
const SEPARATOR_WIDTH: i64 = 2;
const RIGHT_MARGIN: i64 = 5;

/// Stateless encoder over the fixed canvas.
#[derive(Debug, Default, Clone)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Self
    }

    /// Encode one render input into a complete raster.
    ///
    /// Missing sections degrade (placeholder geometry, omitted stats,
    /// "new track" footer); only an input without any schedule is an error.
    pub fn encode(&self, input: &RenderInput) -> Result<Raster, RenderError> {
        if input.card.schedule.is_empty() {
            return Err(RenderError::EmptySchedule);
        }

        let mut canvas = Bitmap::new(DISPLAY_WIDTH, DISPLAY_HEIGHT);

        self.draw_header(&mut canvas, input);
        self.draw_track_section(&mut canvas, input);
        self.draw_schedule_section(&mut canvas, input);
        self.draw_circuit_stats(&mut canvas, input);
        self.draw_results_section(&mut canvas, input);

        let bytes = bmp::encode(&canvas);
        if bytes.len() != bmp::file_size(DISPLAY_WIDTH, DISPLAY_HEIGHT) {
            return Err(RenderError::canvas(format!(
                "encoded {} bytes, expected {}",
                bytes.len(),
                bmp::file_size(DISPLAY_WIDTH, DISPLAY_HEIGHT)
            )));
        }
        debug!(
            locale = %input.locale,
            timezone = %input.timezone,
            race = %input.card.race_name,
            "Encoded calendar raster"
        );
        Ok(Raster::new(bytes))
    }

    /// Error raster: same dimensions, heading plus the message, bypasses
    /// every cache tier.
    pub fn encode_error(&self, message: &str) -> Raster {
        let mut canvas = Bitmap::new(DISPLAY_WIDTH, DISPLAY_HEIGHT);
        font::draw_text_bold(&mut canvas, PADDING, PADDING, "ERROR:", 3, Ink::Black);
        let truncated: String = message.chars().take(60).collect();
        font::draw_text(&mut canvas, PADDING, PADDING + 50, &truncated, 2, Ink::Black);
        Raster::new(bmp::encode(&canvas))
    }

    // =========================================================================
    // Header
    // =========================================================================

    fn draw_header(&self, canvas: &mut Bitmap, input: &RenderInput) {
        // Left block stays white with the round marker; a rule closes it off.
        canvas.hline(0, HEADER_SPLIT_X, HEADER_HEIGHT - SEPARATOR_WIDTH, SEPARATOR_WIDTH, Ink::Black);
        // Right block is solid black with white title lines.
        canvas.fill_rect(HEADER_SPLIT_X + 1, 0, DISPLAY_WIDTH as i64, HEADER_HEIGHT, Ink::Black);

        let round_label = "ROUND";
        let label_x = (HEADER_SPLIT_X - font::text_width(round_label, 2) as i64) / 2;
        font::draw_text_bold(canvas, label_x, 12, round_label, 2, Ink::Black);
        let round_text = format!("{}", input.card.round);
        let round_x = (HEADER_SPLIT_X - font::text_width(&round_text, 5) as i64) / 2;
        font::draw_text_bold(canvas, round_x, 38, &round_text, 5, Ink::Black);

        let text_x = HEADER_SPLIT_X + 15;
        let max_width = (DISPLAY_WIDTH as i64 - text_x - RIGHT_MARGIN) as usize;
        let line1 = format!("{} {}", input.card.season, input.labels.championship);
        let line2 = input.card.race_name.to_uppercase();
        let scale1 = fit_scale(&line1, max_width, 3);
        let scale2 = fit_scale(&line2, max_width, 3);
        font::draw_text(canvas, text_x, 15, &line1, scale1, Ink::White);
        font::draw_text_bold(canvas, text_x, 48, &line2, scale2, Ink::White);
    }

    // =========================================================================
    // Track map (left column)
    // =========================================================================

    fn draw_track_section(&self, canvas: &mut Bitmap, input: &RenderInput) {
        let card = &input.card;
        let country = card.country.to_uppercase();
        let label_text = if card.locality.is_empty() {
            format!("{} | {}", country, card.circuit_name)
        } else {
            format!("{}, {} | {}", country, card.locality.to_uppercase(), card.circuit_name)
        };

        let label_scale = fit_scale(&label_text, (LEFT_COLUMN_WIDTH - 2 * PADDING) as usize, 2);
        let label_y = RESULTS_Y_START - 3 - font::line_height(label_scale) as i64;

        let avail_w = LEFT_COLUMN_WIDTH - 2 * TRACK_SIDE_MARGIN;
        let avail_h = label_y - TRACK_SIDE_MARGIN - TRACK_TOP;

        match &input.geometry {
            VenueGeometry::Known(outline) if outline.points.len() >= 2 => {
                self.draw_track_outline(canvas, &outline.points, avail_w, avail_h);
            }
            _ => {
                // Generic placeholder when the venue has no usable geometry
                canvas.rounded_rect_outline(
                    TRACK_SIDE_MARGIN + 20,
                    TRACK_TOP + 20,
                    TRACK_SIDE_MARGIN + avail_w - 20,
                    TRACK_TOP + avail_h - 20,
                    20,
                    3,
                    Ink::Black,
                );
            }
        }

        font::draw_text_bold(canvas, PADDING, label_y, &label_text, label_scale, Ink::Black);
    }

    fn draw_track_outline(&self, canvas: &mut Bitmap, points: &[[f64; 2]], avail_w: i64, avail_h: i64) {
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min_x = min_x.min(p[0]);
            max_x = max_x.max(p[0]);
            min_y = min_y.min(p[1]);
            max_y = max_y.max(p[1]);
        }
        let span_x = max_x - min_x;
        let span_y = max_y - min_y;
        if span_x <= 0.0 || span_y <= 0.0 {
            return;
        }
        let ratio = (avail_w as f64 / span_x).min(avail_h as f64 / span_y);

        let mut mapped: Vec<(i64, i64)> = points
            .iter()
            .map(|p| {
                (
                    TRACK_SIDE_MARGIN + ((p[0] - min_x) * ratio) as i64,
                    TRACK_TOP + ((p[1] - min_y) * ratio) as i64,
                )
            })
            .collect();
        // Track outlines are closed loops
        if mapped.first() != mapped.last() {
            if let Some(&first) = mapped.first() {
                mapped.push(first);
            }
        }
        canvas.polyline(&mapped, 3, Ink::Black);
    }

    // =========================================================================
    // Weekend schedule (right column)
    // =========================================================================

    fn draw_schedule_section(&self, canvas: &mut Bitmap, input: &RenderInput) -> i64 {
        font::draw_text_bold(
            canvas,
            RIGHT_COLUMN_X,
            SCHEDULE_TITLE_Y,
            &input.labels.weekend_schedule,
            2,
            Ink::Black,
        );

        let mut row_y = SCHEDULE_START_Y;
        for row in &input.card.schedule {
            if row_y > RESULTS_Y_START - 80 {
                break;
            }
            let date_str = row.start.format("%d.%m").to_string();
            let day_str = input.labels.day_label(row.start.weekday());
            let time_str = row.start.format("%H:%M").to_string();
            let name = input.labels.session_label(&row.name);
            let name_scale = fit_scale(&name, (DISPLAY_WIDTH as i64 - SCHEDULE_NAME_X) as usize, 2);

            font::draw_text(canvas, SCHEDULE_DATE_X, row_y, &date_str, 2, Ink::Black);
            font::draw_text(canvas, SCHEDULE_DAY_X, row_y, &day_str, 2, Ink::Black);
            font::draw_text(canvas, SCHEDULE_TIME_X, row_y, &time_str, 2, Ink::Black);
            font::draw_text_bold(canvas, SCHEDULE_NAME_X, row_y, &name, name_scale, Ink::Black);
            row_y += SCHEDULE_ROW_HEIGHT;
        }

        self.draw_countdown_box(canvas, input, row_y + 5)
    }

    /// Countdown bar below the schedule. Skipped once the race has started.
    /// Returns the bottom Y of whatever was drawn last.
    fn draw_countdown_box(&self, canvas: &mut Bitmap, input: &RenderInput, schedule_bottom: i64) -> i64 {
        let race_start = input
            .card
            .schedule
            .iter()
            .find(|row| row.name.eq_ignore_ascii_case("race"))
            .map(|row| row.start.with_timezone(&Utc));
        let Some(race_start) = race_start else {
            return schedule_bottom;
        };

        let delta = race_start - input.generated_at;
        if delta.num_seconds() <= 0 {
            return schedule_bottom;
        }
        let days = delta.num_days();
        let hours = (delta.num_hours() % 24).max(0);

        let labels = &input.labels;
        let countdown = format!(
            "{} {} {} {} {}",
            labels.countdown_in, days, labels.countdown_days, hours, labels.countdown_hours
        );

        let box_height = font::line_height(2) as i64 + 12;
        let x_left = RIGHT_COLUMN_X;
        let x_right = DISPLAY_WIDTH as i64 - RIGHT_MARGIN;
        let stats_top = RESULTS_Y_START - 3 - 3 * STATS_ROW_HEIGHT;
        let available = stats_top - schedule_bottom;
        let y_top = schedule_bottom + (available - box_height) / 2;

        canvas.fill_rect(x_left, y_top, x_right, y_top + box_height, Ink::Black);
        let text_x = x_left + (x_right - x_left - font::text_width(&countdown, 2) as i64) / 2;
        font::draw_text_bold(canvas, text_x, y_top + 6, &countdown, 2, Ink::White);
        y_top + box_height
    }

    // =========================================================================
    // Circuit stats (between schedule and results)
    // =========================================================================

    fn draw_circuit_stats(&self, canvas: &mut Bitmap, input: &RenderInput) {
        let Some(stats) = &input.stats else {
            return;
        };
        let labels = &input.labels;

        let mut lines: Vec<String> = Vec::new();
        if let Some(length) = &stats.circuit_length {
            let mut line = length.clone();
            if let Some(laps) = stats.number_of_laps {
                line.push_str(&format!(" | {} {}", laps, labels.laps));
            }
            if let Some(distance) = &stats.race_distance {
                line.push_str(&format!(" | {}", distance));
            }
            lines.push(line);
        }
        if let Some(time) = &stats.fastest_lap_time {
            let mut line = time.clone();
            if let Some(driver) = &stats.fastest_lap_driver {
                let last_name = driver.split_whitespace().last().unwrap_or(driver);
                match stats.fastest_lap_year {
                    Some(year) => line.push_str(&format!(" ({}, {})", last_name, year)),
                    None => line.push_str(&format!(" ({})", last_name)),
                }
            }
            lines.push(line);
        }
        if let Some(first) = stats.first_grand_prix {
            lines.push(format!("{}: {}", labels.first_gp, first));
        }
        if lines.is_empty() {
            return;
        }

        let mut y = RESULTS_Y_START - 3 - (lines.len() as i64) * STATS_ROW_HEIGHT;
        for line in &lines {
            let x = DISPLAY_WIDTH as i64 - RIGHT_MARGIN - font::text_width(line, 1) as i64;
            font::draw_text(canvas, x, y + 5, line, 1, Ink::Black);
            y += STATS_ROW_HEIGHT;
        }
    }

    // =========================================================================
    // Historical results footer
    // =========================================================================

    fn draw_results_section(&self, canvas: &mut Bitmap, input: &RenderInput) {
        canvas.hline(0, DISPLAY_WIDTH as i64, RESULTS_Y_START, SEPARATOR_WIDTH, Ink::Black);

        let Some(history) = &input.history else {
            self.draw_new_track_message(canvas, input);
            return;
        };

        let visual_top = RESULTS_Y_START + 5;

        // Season year centered over the left margin column
        let year_text = history
            .season
            .map(|year| year.to_string())
            .unwrap_or_default();
        if !year_text.is_empty() {
            let year_x = (RESULTS_COL1_X - font::text_width(&year_text, 4) as i64) / 2;
            font::draw_text_bold(canvas, year_x, visual_top, &year_text, 4, Ink::Black);
        }

        // Country marker below the year, boxed the way the flag used to be
        let country = input.card.country.to_uppercase();
        if !country.is_empty() {
            let width = font::text_width(&country, 1) as i64;
            let x = (RESULTS_COL1_X - width) / 2;
            let y = visual_top + font::line_height(4) as i64 + 8;
            font::draw_text(canvas, x, y, &country, 1, Ink::Black);
            canvas.line(x - 3, y - 3, x + width + 2, y - 3, 1, Ink::Black);
            canvas.line(x - 3, y + 9, x + width + 2, y + 9, 1, Ink::Black);
            canvas.line(x - 3, y - 3, x - 3, y + 9, 1, Ink::Black);
            canvas.line(x + width + 2, y - 3, x + width + 2, y + 9, 1, Ink::Black);
        }

        self.draw_results_column(
            canvas,
            RESULTS_COL1_X,
            visual_top,
            &input.labels.qualifying,
            &history.qualifying,
        );
        self.draw_results_column(
            canvas,
            RESULTS_COL2_X,
            visual_top,
            &input.labels.race,
            &history.race,
        );
    }

    fn draw_new_track_message(&self, canvas: &mut Bitmap, input: &RenderInput) {
        let message = &input.labels.new_track;
        let x = (DISPLAY_WIDTH as i64 - font::text_width(message, 3) as i64) / 2;
        font::draw_text_bold(canvas, x, RESULTS_Y_START + 30, message, 3, Ink::Black);
    }

    fn draw_results_column(
        &self,
        canvas: &mut Bitmap,
        x_start: i64,
        visual_top: i64,
        title: &str,
        entries: &[PodiumEntry],
    ) {
        font::draw_text_bold(canvas, x_start, visual_top, title, 2, Ink::Black);

        let time_x = x_start + RESULTS_TIME_OFFSET;
        let max_width = (RESULTS_TIME_OFFSET - 10) as usize;
        let rows_start = visual_top + font::line_height(2) as i64 + 4;

        for (i, entry) in entries.iter().take(3).enumerate() {
            let y = rows_start + (i as i64) * RESULTS_ROW_HEIGHT;
            let text = fit_podium_text(entry.position, &entry.driver, &entry.team, max_width, 2);
            font::draw_text(canvas, x_start, y, &text, 2, Ink::Black);
            if let Some(time) = &entry.time {
                font::draw_text(canvas, time_x, y + 4, time, 1, Ink::Black);
            }
        }
    }
}

/// Largest scale, at most `preferred`, at which `text` fits `max_width`.
fn fit_scale(text: &str, max_width: usize, preferred: usize) -> usize {
    let mut scale = preferred;
    while scale > 1 && font::text_width(text, scale) > max_width {
        scale -= 1;
    }
    scale
}

/// Fit a podium row into `max_width` by truncating the team first, then the
/// driver, keeping the position and parentheses intact.
fn fit_podium_text(position: u8, driver: &str, team: &str, max_width: usize, scale: usize) -> String {
    let full = format!("{}. {} ({})", position, driver, team);
    if font::text_width(&full, scale) <= max_width {
        return full;
    }

    let team_chars: Vec<char> = team.chars().collect();
    for i in (3..team_chars.len()).rev() {
        let short_team: String = team_chars[..i].iter().collect();
        let text = format!("{}. {} ({}..)", position, driver, short_team);
        if font::text_width(&text, scale) <= max_width {
            return text;
        }
    }

    let short_team: String = team_chars.iter().take(3).collect();
    let driver_chars: Vec<char> = driver.chars().collect();
    for i in (3..driver_chars.len()).rev() {
        let short_driver: String = driver_chars[..i].iter().collect();
        let text = format!("{}. {}. ({}..)", position, short_driver, short_team);
        if font::text_width(&text, scale) <= max_width {
            return text;
        }
    }

    let short_driver: String = driver_chars.iter().take(5).collect();
    format!("{}. {}.. ({}..)", position, short_driver, short_team)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Labels, PodiumHistory, RaceCard, ScheduleRow, SnapshotVersion, TrackOutline,
    };
    use chrono::{DateTime, FixedOffset, TimeZone};
    use std::collections::HashMap;

    fn labels() -> Labels {
        Labels {
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
            days: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    fn session(name: &str, rfc3339: &str) -> ScheduleRow {
        ScheduleRow {
            name: name.to_string(),
            start: DateTime::<FixedOffset>::parse_from_rfc3339(rfc3339).unwrap(),
        }
    }

    fn sample_input() -> RenderInput {
        RenderInput {
            locale: "en".to_string(),
            timezone: "Europe/Prague".to_string(),
            labels: labels(),
            card: RaceCard {
                season: 2025,
                round: 10,
                race_name: "British Grand Prix".to_string(),
                circuit_name: "Silverstone Circuit".to_string(),
                locality: "Silverstone".to_string(),
                country: "UK".to_string(),
                schedule: vec![
                    session("FP1", "2025-07-04T13:30:00+02:00"),
                    session("Qualifying", "2025-07-05T16:00:00+02:00"),
                    session("Race", "2025-07-06T16:00:00+02:00"),
                ],
            },
            history: Some(PodiumHistory {
                season: Some(2024),
                race: vec![PodiumEntry {
                    position: 1,
                    driver: "Hamilton".to_string(),
                    team: "Mercedes".to_string(),
                    time: Some("1:22:27.095".to_string()),
                }],
                qualifying: vec![PodiumEntry {
                    position: 1,
                    driver: "Russell".to_string(),
                    team: "Mercedes".to_string(),
                    time: Some("1:25.819".to_string()),
                }],
            }),
            geometry: VenueGeometry::Known(TrackOutline {
                points: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 6.0], [2.0, 8.0], [0.0, 0.0]],
            }),
            stats: None,
            generated_at: Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap(),
            snapshot_version: SnapshotVersion::from_bytes(b"test"),
        }
    }

    #[test]
    fn encode_is_deterministic() {
        let renderer = Renderer::new();
        let input = sample_input();
        let a = renderer.encode(&input).unwrap();
        let b = renderer.encode(&input).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn encode_produces_contract_sized_bmp() {
        let raster = Renderer::new().encode(&sample_input()).unwrap();
        assert_eq!(raster.len(), 48_062);
        let header = bmp::parse_header(raster.as_bytes()).unwrap();
        assert_eq!(header.width, 800);
        assert_eq!(header.height, 480);
        assert_eq!(header.bits_per_pixel, 1);
        assert_eq!(header.palette_colors, 2);
    }

    #[test]
    fn header_right_block_is_black() {
        let raster = Renderer::new().encode(&sample_input()).unwrap();
        // Deep inside the right header block, away from any text
        assert_eq!(bmp::pixel_is_black(raster.as_bytes(), 790, 85), Some(true));
        // Left header block stays white at its corner
        assert_eq!(bmp::pixel_is_black(raster.as_bytes(), 2, 2), Some(false));
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let mut input = sample_input();
        input.card.schedule.clear();
        let err = Renderer::new().encode(&input).unwrap_err();
        assert!(matches!(err, RenderError::EmptySchedule));
    }

    #[test]
    fn missing_geometry_and_history_degrade_gracefully() {
        let mut input = sample_input();
        input.geometry = VenueGeometry::Placeholder;
        input.history = None;
        let raster = Renderer::new().encode(&input).unwrap();
        assert_eq!(raster.len(), 48_062);
    }

    #[test]
    fn history_changes_the_output() {
        let renderer = Renderer::new();
        let with_history = renderer.encode(&sample_input()).unwrap();
        let mut input = sample_input();
        input.history = None;
        let without_history = renderer.encode(&input).unwrap();
        assert_ne!(with_history.as_bytes(), without_history.as_bytes());
    }

    #[test]
    fn error_raster_has_contract_dimensions_and_varies_by_message() {
        let renderer = Renderer::new();
        let a = renderer.encode_error("schedule provider unavailable");
        let b = renderer.encode_error("another failure");
        assert_eq!(a.len(), 48_062);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn podium_text_truncates_team_before_driver() {
        let fitted = fit_podium_text(1, "Verstappen", "Red Bull Racing Honda RBPT", 250, 2);
        assert!(fitted.starts_with("1. Verstappen ("));
        assert!(fitted.len() < "1. Verstappen (Red Bull Racing Honda RBPT)".len());
        assert!(font::text_width(&fitted, 2) <= 250);
    }

    #[test]
    fn podium_text_passes_through_when_it_fits() {
        let fitted = fit_podium_text(2, "Norris", "McLaren", 250, 2);
        assert_eq!(fitted, "2. Norris (McLaren)");
    }
}
