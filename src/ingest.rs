use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use rusqlite::Connection;

use crate::api::{ApiClient, ApiError, CallStats, GraphQlTransport};
use crate::calendar::month_windows;
use crate::characters::CharacterMap;
use crate::config::Settings;
use crate::dataset::{self, EventStatus, RunKind, RunTotals};
use crate::discovery::scan_window;
use crate::sets::fetch_event_games;

/// Events keep completing for a while after the month they were created in.
const WINDOW_SETTLE_DAYS: i64 = 14;

pub const API_SOURCE: &str = "api";

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub start_date: NaiveDate,
    pub now: NaiveDateTime,
    pub videogame_id: u64,
    pub tournaments_per_page: u32,
    pub sets_per_page: u32,
    pub skip_discovery: bool,
    pub retry_failed: bool,
    pub max_events: Option<usize>,
}

impl IngestOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            start_date: settings.start_date,
            now: Utc::now().naive_utc(),
            videogame_id: settings.videogame_id,
            tournaments_per_page: settings.tournaments_per_page,
            sets_per_page: settings.sets_per_page,
            skip_discovery: false,
            retry_failed: true,
            max_events: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub run_id: i64,
    pub windows_total: usize,
    pub windows_skipped: usize,
    pub windows_scanned: usize,
    pub events_discovered: usize,
    pub events_attempted: usize,
    pub events_done: usize,
    pub events_doubles: usize,
    pub events_failed: usize,
    pub games_inserted: usize,
    pub games_skipped: usize,
    pub calls: CallStats,
    pub errors: Vec<String>,
}

/// Discovers new events, then downloads every event not yet stored.
///
/// Each event's games are committed in their own transaction, so an interrupted run
/// loses at most the event in flight and the next run picks up from there.
pub fn run_ingest<T: GraphQlTransport>(
    conn: &mut Connection,
    client: &mut ApiClient<T>,
    characters: &CharacterMap,
    opts: &IngestOptions,
) -> Result<IngestSummary> {
    let run_id = dataset::begin_run(conn, RunKind::Download)?;
    let mut summary = IngestSummary {
        run_id,
        ..IngestSummary::default()
    };

    let mut outcome = discover(conn, client, opts, &mut summary);
    if outcome.is_ok() {
        outcome = download(conn, client, characters, opts, &mut summary);
    }
    summary.calls = client.stats();

    let totals = RunTotals {
        events_total: summary.events_attempted,
        events_succeeded: summary.events_done + summary.events_doubles,
        games_inserted: summary.games_inserted,
        errors: summary.errors.clone(),
    };
    dataset::finish_run(conn, run_id, &totals)?;
    outcome?;
    Ok(summary)
}

fn discover<T: GraphQlTransport>(
    conn: &mut Connection,
    client: &mut ApiClient<T>,
    opts: &IngestOptions,
    summary: &mut IngestSummary,
) -> Result<()> {
    if opts.skip_discovery {
        return Ok(());
    }
    let windows = month_windows(opts.start_date, opts.now);
    let settled = opts.now - ChronoDuration::days(WINDOW_SETTLE_DAYS);
    summary.windows_total = windows.len();

    for window in &windows {
        if dataset::window_completed(conn, window)? {
            summary.windows_skipped += 1;
            continue;
        }
        tracing::info!(window = %window.key(), "scanning tournaments");
        let scan = match scan_window(client, window, opts.tournaments_per_page, opts.videogame_id)
        {
            Ok(scan) => scan,
            Err(err) => {
                check_fatal(&err)?;
                tracing::warn!(window = %window.key(), error = %err, "window scan failed");
                summary
                    .errors
                    .push(format!("window {}: {err}", window.key()));
                continue;
            }
        };
        summary.windows_scanned += 1;

        let tx = conn.transaction().context("begin discovery transaction")?;
        let mut new_events = 0usize;
        for event in &scan.events {
            if dataset::record_discovered_event(&tx, event)? {
                new_events += 1;
            }
        }
        if window.is_closed(settled) {
            dataset::mark_window_completed(&tx, window, scan.events.len(), scan.pages)?;
        }
        tx.commit().context("commit discovery transaction")?;

        summary.events_discovered += new_events;
        tracing::info!(
            window = %window.key(),
            pages = scan.pages,
            events = scan.events.len(),
            new_events,
            "window scanned"
        );
    }
    Ok(())
}

fn download<T: GraphQlTransport>(
    conn: &mut Connection,
    client: &mut ApiClient<T>,
    characters: &CharacterMap,
    opts: &IngestOptions,
    summary: &mut IngestSummary,
) -> Result<()> {
    let event_ids = dataset::events_to_download(conn, opts.retry_failed, opts.max_events)?;
    let total = event_ids.len();
    tracing::info!(events = total, "downloading event sets");
    let mut reported_characters = HashSet::new();

    for (idx, event_id) in event_ids.into_iter().enumerate() {
        summary.events_attempted += 1;
        match fetch_event_games(client, event_id, opts.sets_per_page, characters) {
            Ok(download) => {
                for id in &download.unknown_characters {
                    if reported_characters.insert(*id) {
                        tracing::warn!(
                            character_id = *id,
                            "character id missing from the character map"
                        );
                    }
                }
                let (status, records) = if download.doubles {
                    (EventStatus::Doubles, &[][..])
                } else {
                    (EventStatus::Done, download.records.as_slice())
                };
                let tx = conn.transaction().context("begin event transaction")?;
                let inserted = dataset::insert_games(&tx, records, API_SOURCE)?;
                dataset::mark_event(&tx, event_id, status, inserted, None)?;
                tx.commit().context("commit event transaction")?;

                summary.games_inserted += inserted;
                summary.games_skipped += download.skipped_games;
                match status {
                    EventStatus::Doubles => summary.events_doubles += 1,
                    _ => summary.events_done += 1,
                }
                tracing::info!(
                    progress = %format!("{}/{}", idx + 1, total),
                    event_id,
                    event = %download.event_name,
                    games = inserted,
                    doubles = download.doubles,
                    "event stored"
                );
            }
            Err(err) => {
                check_fatal(&err)?;
                tracing::warn!(event_id, error = %err, "event download failed");
                dataset::mark_event(conn, event_id, EventStatus::Failed, 0, Some(&err.to_string()))?;
                summary.events_failed += 1;
                summary.errors.push(format!("event {event_id}: {err}"));
            }
        }
    }
    Ok(())
}

fn check_fatal(err: &ApiError) -> Result<()> {
    if err.is_fatal() {
        return Err(anyhow!("aborting run: {err}"));
    }
    Ok(())
}
