use std::collections::HashSet;

use serde_json::{Value, json};

use crate::api::{ApiClient, ApiError, GraphQlTransport, as_i64_any, as_u64_any};
use crate::calendar::MonthWindow;

pub const TOURNAMENTS_QUERY: &str = r#"
query TournamentsByVideogame($perPage: Int!, $page: Int!, $videogame: ID!, $after: Timestamp!, $before: Timestamp!) {
  tournaments(query: {
    perPage: $perPage
    page: $page
    filter: {
      afterDate: $after
      beforeDate: $before
      past: true
      videogameIds: [$videogame]
    }
  }) {
    nodes {
      id
      name
      events(limit: 100) {
        id
        name
        createdAt
        isOnline
        state
        videogame {
          id
        }
      }
    }
  }
}
"#;

// The API reports totalPages capped at 999 without saying so, so paging runs until an
// empty page instead. This is only a backstop against a misbehaving server.
const MAX_PAGES_PER_WINDOW: u32 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEvent {
    pub id: u64,
    pub name: String,
    pub tournament: String,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct WindowScan {
    pub events: Vec<DiscoveredEvent>,
    pub pages: u32,
}

pub fn tournaments_variables(
    window: &MonthWindow,
    page: u32,
    per_page: u32,
    videogame_id: u64,
) -> Value {
    json!({
        "perPage": per_page,
        "page": page,
        "videogame": videogame_id,
        "after": window.start_timestamp(),
        "before": window.end_timestamp(),
    })
}

/// Kept events from one tournaments page; `None` once paging has run past the last page.
pub fn parse_tournaments_page(data: &Value, videogame_id: u64) -> Option<Vec<DiscoveredEvent>> {
    let nodes = data
        .get("tournaments")
        .and_then(|t| t.get("nodes"))
        .and_then(|n| n.as_array())?;
    if nodes.is_empty() {
        return None;
    }

    let mut out = Vec::new();
    for tournament in nodes {
        let tournament_name = tournament
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        let Some(events) = tournament.get("events").and_then(|e| e.as_array()) else {
            continue;
        };
        for event in events {
            if !event_is_kept(event, videogame_id) {
                continue;
            }
            let Some(id) = event.get("id").and_then(as_u64_any) else {
                continue;
            };
            out.push(DiscoveredEvent {
                id,
                name: event
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string(),
                tournament: tournament_name.to_string(),
                created_at: event.get("createdAt").and_then(as_i64_any),
            });
        }
    }
    Some(out)
}

/// Online, completed events for the configured videogame; anything missing disqualifies.
pub fn event_is_kept(event: &Value, videogame_id: u64) -> bool {
    let game_matches = event
        .get("videogame")
        .and_then(|v| v.get("id"))
        .and_then(as_u64_any)
        .is_some_and(|id| id == videogame_id);
    let online = event
        .get("isOnline")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let completed = event
        .get("state")
        .and_then(|v| v.as_str())
        .is_some_and(|s| s == "COMPLETED");
    game_matches && online && completed
}

pub fn scan_window<T: GraphQlTransport>(
    client: &mut ApiClient<T>,
    window: &MonthWindow,
    per_page: u32,
    videogame_id: u64,
) -> Result<WindowScan, ApiError> {
    let mut seen = HashSet::new();
    let mut scan = WindowScan::default();

    for page in 1..=MAX_PAGES_PER_WINDOW {
        let vars = tournaments_variables(window, page, per_page, videogame_id);
        let data = client.call(TOURNAMENTS_QUERY, &vars)?;
        let Some(events) = parse_tournaments_page(&data, videogame_id) else {
            break;
        };
        scan.pages = page;
        tracing::debug!(window = %window.key(), page, kept = events.len(), "tournament page");
        for event in events {
            if seen.insert(event.id) {
                scan.events.push(event);
            }
        }
        if page == MAX_PAGES_PER_WINDOW {
            tracing::warn!(window = %window.key(), "stopped paging at the page backstop");
        }
    }
    Ok(scan)
}
