use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{Value, json};

use smash_meta::api::{ApiClient, ApiError, GraphQlTransport, parse_graphql_response};
use smash_meta::calendar::MonthWindow;
use smash_meta::characters::CharacterMap;
use smash_meta::config::{RateLimitSettings, RetrySettings};
use smash_meta::dataset::{self, EventStatus};
use smash_meta::discovery::{DiscoveredEvent, scan_window};
use smash_meta::ingest::{IngestOptions, IngestSummary, run_ingest};
use smash_meta::rate_limit::RateLimiter;

fn fixture_path(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path
}

fn fixture_data(name: &str) -> Value {
    let raw = fs::read_to_string(fixture_path(name)).expect("fixture file should be readable");
    parse_graphql_response(&raw).expect("fixture should parse")
}

/// Serves the January tournaments fixture and canned event sets.
struct FakeApi {
    january_start: i64,
    failing_events: HashSet<u64>,
    reject_token: bool,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            january_start: 1704067200,
            failing_events: HashSet::new(),
            reject_token: false,
        }
    }
}

impl GraphQlTransport for FakeApi {
    fn execute(&mut self, query: &str, variables: &Value) -> Result<Value, ApiError> {
        if self.reject_token {
            return Err(ApiError::Http {
                status: 401,
                body: "invalid token".to_string(),
            });
        }
        if query.contains("TournamentsByVideogame") {
            let page = variables["page"].as_u64().unwrap_or_default();
            let after = variables["after"].as_i64().unwrap_or_default();
            if page == 1 && after == self.january_start {
                return Ok(fixture_data("tournaments_page.json"));
            }
            return Ok(json!({"tournaments": {"nodes": []}}));
        }

        let event_id = variables["eventId"].as_u64().unwrap_or_default();
        if self.failing_events.contains(&event_id) {
            return Err(ApiError::GraphQl(vec!["event not found".to_string()]));
        }
        match event_id {
            1001 => Ok(fixture_data("event_sets_page.json")),
            1002 => Ok(fixture_data("doubles_sets_page.json")),
            _ => Ok(json!({"event": null})),
        }
    }
}

/// One event whose sets arrive one page at a time; pages past the list are empty.
struct PagedEvent {
    total: u64,
    pages: Vec<Vec<Value>>,
}

impl GraphQlTransport for PagedEvent {
    fn execute(&mut self, _query: &str, variables: &Value) -> Result<Value, ApiError> {
        let page = variables["page"].as_u64().unwrap_or(1) as usize;
        let nodes = self.pages.get(page - 1).cloned().unwrap_or_default();
        Ok(json!({
            "event": {
                "id": variables["eventId"],
                "name": "Paged Weekly",
                "sets": {"pageInfo": {"total": self.total}, "nodes": nodes}
            }
        }))
    }
}

/// Serves the same tournaments page twice before running dry.
struct RepeatedTournaments;

impl GraphQlTransport for RepeatedTournaments {
    fn execute(&mut self, _query: &str, variables: &Value) -> Result<Value, ApiError> {
        match variables["page"].as_u64() {
            Some(1 | 2) => Ok(fixture_data("tournaments_page.json")),
            _ => Ok(json!({"tournaments": {"nodes": []}})),
        }
    }
}

fn singles_set(id: u64) -> Value {
    json!({
        "id": id,
        "slots": [
            {"entrant": {"id": 11, "participants": [{"id": 1}]}},
            {"entrant": {"id": 22, "participants": [{"id": 2}]}}
        ],
        "games": [{
            "winnerId": 11,
            "stage": {"name": "Battlefield"},
            "selections": [
                {"entrant": {"id": 11, "name": "Alice"}, "selectionType": "CHARACTER", "selectionValue": 1},
                {"entrant": {"id": 22, "name": "Bob"}, "selectionType": "CHARACTER", "selectionValue": 2}
            ]
        }]
    })
}

fn doubles_set(id: u64) -> Value {
    let mut set = singles_set(id);
    set["slots"] = json!([
        {"entrant": {"id": 11, "participants": [{"id": 1}, {"id": 3}]}},
        {"entrant": {"id": 22, "participants": [{"id": 2}, {"id": 4}]}}
    ]);
    set
}

fn quiet_client<T: GraphQlTransport>(transport: T) -> ApiClient<T> {
    let limits = RateLimitSettings {
        max_calls: 1_000,
        period: Duration::from_secs(60),
    };
    let retry = RetrySettings {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    };
    ApiClient::with_sleeper(
        transport,
        RateLimiter::with_sleeper(&limits, Box::new(|_| {})),
        retry,
        Box::new(|_| {}),
    )
}

fn client(api: FakeApi) -> ApiClient<FakeApi> {
    quiet_client(api)
}

fn options() -> IngestOptions {
    IngestOptions {
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        now: NaiveDate::from_ymd_opt(2024, 3, 20)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        videogame_id: 1386,
        tournaments_per_page: 30,
        sets_per_page: 25,
        skip_discovery: false,
        retry_failed: true,
        max_events: None,
    }
}

fn characters() -> CharacterMap {
    CharacterMap::load(&fixture_path("character_to_id.csv")).expect("character map should load")
}

fn temp_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = dataset::open_db(&dir.path().join("matches.sqlite")).unwrap();
    (dir, conn)
}

#[test]
fn downloads_singles_and_marks_doubles() {
    let (_dir, mut conn) = temp_db();
    let mut api = client(FakeApi::new());

    let summary = run_ingest(&mut conn, &mut api, &characters(), &options()).unwrap();
    assert_eq!(summary.windows_total, 3);
    assert_eq!(summary.windows_scanned, 3);
    assert_eq!(summary.events_discovered, 2);
    assert_eq!(summary.events_done, 1);
    assert_eq!(summary.events_doubles, 1);
    assert_eq!(summary.events_failed, 0);
    assert_eq!(summary.games_inserted, 2);
    assert_eq!(summary.games_skipped, 1);
    assert!(summary.calls.calls >= 5);

    assert_eq!(dataset::event_status(&conn, 1001).unwrap(), Some(EventStatus::Done));
    assert_eq!(dataset::event_status(&conn, 1002).unwrap(), Some(EventStatus::Doubles));
    assert_eq!(dataset::event_status(&conn, 1003).unwrap(), None);

    let games = dataset::load_games(&conn).unwrap();
    assert_eq!(games.len(), 2);
    assert!(games.iter().all(|g| g.event_id == Some(1001)));
}

#[test]
fn second_run_skips_settled_windows_and_adds_nothing() {
    let (_dir, mut conn) = temp_db();
    run_ingest(&mut conn, &mut client(FakeApi::new()), &characters(), &options()).unwrap();

    let summary =
        run_ingest(&mut conn, &mut client(FakeApi::new()), &characters(), &options()).unwrap();
    // January and February are settled; March is still open.
    assert_eq!(summary.windows_skipped, 2);
    assert_eq!(summary.windows_scanned, 1);
    assert_eq!(summary.events_discovered, 0);
    assert_eq!(summary.events_attempted, 0);
    assert_eq!(summary.games_inserted, 0);
    assert_eq!(dataset::load_games(&conn).unwrap().len(), 2);

    let stats = dataset::stats(&conn).unwrap();
    assert_eq!(stats.windows_completed, 2);
    assert_eq!(stats.games, 2);
    assert_eq!(stats.imported_games, 0);
}

#[test]
fn failed_event_is_retried_on_the_next_run() {
    let (_dir, mut conn) = temp_db();
    let mut failing = FakeApi::new();
    failing.failing_events.insert(1001);

    let first = run_ingest(&mut conn, &mut client(failing), &characters(), &options()).unwrap();
    assert_eq!(first.events_failed, 1);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(dataset::event_status(&conn, 1001).unwrap(), Some(EventStatus::Failed));

    let mut opts = options();
    opts.skip_discovery = true;
    opts.retry_failed = false;
    let skipped = run_ingest(&mut conn, &mut client(FakeApi::new()), &characters(), &opts).unwrap();
    assert_eq!(skipped.events_attempted, 0);

    opts.retry_failed = true;
    let retried = run_ingest(&mut conn, &mut client(FakeApi::new()), &characters(), &opts).unwrap();
    assert_eq!(retried.events_attempted, 1);
    assert_eq!(retried.events_done, 1);
    assert_eq!(dataset::event_status(&conn, 1001).unwrap(), Some(EventStatus::Done));
    assert_eq!(dataset::load_games(&conn).unwrap().len(), 2);
}

#[test]
fn rejected_token_aborts_but_closes_the_run() {
    let (_dir, mut conn) = temp_db();
    let mut api = FakeApi::new();
    api.reject_token = true;

    let err = run_ingest(&mut conn, &mut client(api), &characters(), &options()).unwrap_err();
    assert!(err.to_string().contains("401"));

    let last = dataset::stats(&conn).unwrap().last_run.expect("run recorded");
    assert!(last.finished_at.is_some());
}

#[test]
fn max_events_limits_downloads() {
    let (_dir, mut conn) = temp_db();
    let mut opts = options();
    opts.max_events = Some(1);

    let summary = run_ingest(&mut conn, &mut client(FakeApi::new()), &characters(), &opts).unwrap();
    assert_eq!(summary.events_discovered, 2);
    assert_eq!(summary.events_attempted, 1);
    assert_eq!(
        dataset::events_to_download(&conn, true, None).unwrap().len(),
        1
    );
}

fn paged_run(event: PagedEvent) -> (tempfile::TempDir, Connection, IngestSummary) {
    let (dir, mut conn) = temp_db();
    let seeded = DiscoveredEvent {
        id: 3001,
        name: "Paged Weekly".to_string(),
        tournament: "Paged".to_string(),
        created_at: Some(1704153600),
    };
    dataset::record_discovered_event(&conn, &seeded).unwrap();

    let mut opts = options();
    opts.skip_discovery = true;
    opts.sets_per_page = 1;
    let summary = run_ingest(&mut conn, &mut quiet_client(event), &characters(), &opts).unwrap();
    (dir, conn, summary)
}

#[test]
fn set_paging_stops_once_total_is_covered() {
    let event = PagedEvent {
        total: 3,
        pages: vec![
            vec![singles_set(1)],
            vec![singles_set(2)],
            vec![singles_set(3)],
            vec![singles_set(4)],
        ],
    };
    let (_dir, conn, summary) = paged_run(event);
    assert_eq!(summary.calls.calls, 3);
    assert_eq!(summary.games_inserted, 3);
    assert_eq!(dataset::load_games(&conn).unwrap().len(), 3);
}

#[test]
fn empty_set_page_stops_paging() {
    let event = PagedEvent {
        total: 5,
        pages: vec![vec![singles_set(1)], Vec::new(), vec![singles_set(3)]],
    };
    let (_dir, conn, summary) = paged_run(event);
    assert_eq!(summary.calls.calls, 2);
    assert_eq!(dataset::load_games(&conn).unwrap().len(), 1);
    assert_eq!(dataset::event_status(&conn, 3001).unwrap(), Some(EventStatus::Done));
}

#[test]
fn doubles_set_on_a_later_page_discards_the_whole_event() {
    let event = PagedEvent {
        total: 2,
        pages: vec![vec![singles_set(1)], vec![doubles_set(2)]],
    };
    let (_dir, conn, summary) = paged_run(event);
    assert_eq!(summary.calls.calls, 2);
    assert_eq!(summary.events_doubles, 1);
    assert_eq!(summary.games_inserted, 0);
    assert_eq!(dataset::event_status(&conn, 3001).unwrap(), Some(EventStatus::Doubles));
    assert!(dataset::load_games(&conn).unwrap().is_empty());
}

#[test]
fn events_repeated_across_tournament_pages_are_kept_once() {
    let window = MonthWindow {
        start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
    };
    let mut api = quiet_client(RepeatedTournaments);
    let scan = scan_window(&mut api, &window, 30, 1386).unwrap();
    assert_eq!(scan.pages, 2);
    assert_eq!(api.stats().calls, 3);
    let ids = scan.events.iter().map(|e| e.id).collect::<Vec<_>>();
    assert_eq!(ids, vec![1001, 1002]);
}
