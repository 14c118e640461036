use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::api::{ApiClient, ApiError, GraphQlTransport, as_u64_any};
use crate::characters::CharacterMap;

pub const EVENT_SETS_QUERY: &str = r#"
query EventSets($eventId: ID!, $page: Int!, $perPage: Int!) {
  event(id: $eventId) {
    id
    name
    sets(page: $page, perPage: $perPage, sortType: NONE) {
      pageInfo {
        total
      }
      nodes {
        id
        winnerId
        slots {
          id
          entrant {
            id
            participants {
              id
            }
          }
        }
        games {
          winnerId
          stage {
            name
          }
          selections {
            entrant {
              id
              name
              participants {
                id
              }
            }
            selectionType
            selectionValue
          }
        }
      }
    }
  }
}
"#;

const MAX_PAGES_PER_EVENT: u32 = 2_000;

/// One game of one set: who played which character, where, and who won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    pub set_id: String,
    pub game_index: u32,
    pub event_id: Option<u64>,
    pub char1: Option<String>,
    pub char2: Option<String>,
    pub stage: Option<String>,
    /// 1 when the first entrant won, 2 for the second.
    pub winner_side: u8,
    pub entrant1: Option<String>,
    pub entrant2: Option<String>,
}

impl GameRecord {
    pub fn winner(&self) -> Option<&str> {
        match self.winner_side {
            1 => self.char1.as_deref(),
            2 => self.char2.as_deref(),
            _ => None,
        }
    }

    pub fn is_mirror(&self) -> bool {
        self.char1.is_some() && self.char1 == self.char2
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetsPage {
    pub event_name: String,
    pub total: u64,
    pub set_count: usize,
    pub records: Vec<GameRecord>,
    pub doubles: bool,
    pub skipped_games: usize,
    /// Selection values missing from the character map.
    pub unknown_characters: BTreeSet<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct EventDownload {
    pub event_name: String,
    pub records: Vec<GameRecord>,
    pub doubles: bool,
    pub pages: u32,
    pub skipped_games: usize,
    pub unknown_characters: BTreeSet<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Side {
    entrant_id: u64,
    entrant_name: Option<String>,
    character: Option<String>,
}

pub fn event_sets_variables(event_id: u64, page: u32, per_page: u32) -> Value {
    json!({ "eventId": event_id, "page": page, "perPage": per_page })
}

/// `None` when the event has no (more) sets to report.
pub fn parse_event_sets_page(
    data: &Value,
    event_id: u64,
    characters: &CharacterMap,
) -> Option<SetsPage> {
    let event = data.get("event")?;
    let sets = event.get("sets")?;
    let total = sets
        .get("pageInfo")
        .and_then(|p| p.get("total"))
        .and_then(as_u64_any)?;
    if total == 0 {
        return None;
    }
    let nodes = sets.get("nodes").and_then(|n| n.as_array())?;

    let mut page = SetsPage {
        event_name: event
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string(),
        total,
        set_count: nodes.len(),
        ..SetsPage::default()
    };

    for set in nodes {
        let Some(games) = set.get("games").and_then(|g| g.as_array()) else {
            continue;
        };
        if set_is_doubles(set.get("slots")) {
            page.doubles = true;
            break;
        }
        let set_id = match set.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => continue,
        };
        for (idx, game) in games.iter().enumerate() {
            let index = idx as u32 + 1;
            let parsed = parse_game(
                game,
                &set_id,
                index,
                event_id,
                characters,
                &mut page.unknown_characters,
            );
            match parsed {
                Some(record) => page.records.push(record),
                None => page.skipped_games += 1,
            }
        }
    }
    Some(page)
}

/// A set is doubles when any slot's entrant has more than one participant.
pub fn set_is_doubles(slots: Option<&Value>) -> bool {
    let Some(slots) = slots.and_then(|s| s.as_array()) else {
        return false;
    };
    slots.iter().any(|slot| {
        slot.get("entrant")
            .and_then(|e| e.get("participants"))
            .and_then(|p| p.as_array())
            .is_some_and(|p| p.len() > 1)
    })
}

fn parse_game(
    game: &Value,
    set_id: &str,
    game_index: u32,
    event_id: u64,
    characters: &CharacterMap,
    unknown: &mut BTreeSet<u64>,
) -> Option<GameRecord> {
    let selections = game.get("selections").and_then(|s| s.as_array())?;
    let winner_id = game.get("winnerId").and_then(as_u64_any);

    let mut first: Option<Side> = None;
    let mut second: Option<Side> = None;
    for selection in selections {
        let is_character = selection
            .get("selectionType")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t == "CHARACTER");
        if !is_character {
            continue;
        }
        let Some(side) = parse_selection(selection, characters, unknown) else {
            continue;
        };
        match &first {
            None => first = Some(side),
            Some(f) if f.entrant_id != side.entrant_id && second.is_none() => second = Some(side),
            _ => {}
        }
    }

    let (Some(first), Some(second)) = (first, second) else {
        tracing::warn!(set_id, game_index, "data from only one player");
        return None;
    };
    let winner_side = match winner_id {
        Some(id) if id == first.entrant_id => 1,
        Some(id) if id == second.entrant_id => 2,
        _ => {
            tracing::warn!(set_id, game_index, "winner is neither entrant");
            return None;
        }
    };

    let stage = game
        .get("stage")
        .and_then(|s| s.get("name"))
        .and_then(|n| n.as_str())
        .map(|s| s.to_string());

    Some(GameRecord {
        set_id: set_id.to_string(),
        game_index,
        event_id: Some(event_id),
        char1: first.character,
        char2: second.character,
        stage,
        winner_side,
        entrant1: first.entrant_name,
        entrant2: second.entrant_name,
    })
}

fn parse_selection(
    selection: &Value,
    characters: &CharacterMap,
    unknown: &mut BTreeSet<u64>,
) -> Option<Side> {
    let entrant = selection.get("entrant").filter(|e| !e.is_null())?;
    let entrant_id = entrant.get("id").and_then(as_u64_any)?;
    let entrant_name = entrant
        .get("name")
        .and_then(|n| n.as_str())
        .map(|s| s.to_string());
    let character = match selection.get("selectionValue").and_then(as_u64_any) {
        Some(id) => {
            let name = characters.name(id).map(|s| s.to_string());
            if name.is_none() {
                unknown.insert(id);
            }
            name
        }
        None => None,
    };
    Some(Side {
        entrant_id,
        entrant_name,
        character,
    })
}

pub fn fetch_event_games<T: GraphQlTransport>(
    client: &mut ApiClient<T>,
    event_id: u64,
    per_page: u32,
    characters: &CharacterMap,
) -> Result<EventDownload, ApiError> {
    let mut out = EventDownload::default();
    for page in 1..=MAX_PAGES_PER_EVENT {
        let vars = event_sets_variables(event_id, page, per_page);
        let data = client.call(EVENT_SETS_QUERY, &vars)?;
        let Some(parsed) = parse_event_sets_page(&data, event_id, characters) else {
            break;
        };
        out.pages = page;
        if out.event_name.is_empty() {
            out.event_name = parsed.event_name;
        }
        out.records.extend(parsed.records);
        out.skipped_games += parsed.skipped_games;
        out.unknown_characters.extend(parsed.unknown_characters);
        if parsed.doubles {
            // Not a singles event: games from earlier sets are dropped too.
            out.doubles = true;
            out.records.clear();
            break;
        }
        if parsed.set_count == 0 || u64::from(page) * u64::from(per_page) >= parsed.total {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characters() -> CharacterMap {
        [(1, "Mario".to_string()), (2, "Link".to_string())]
            .into_iter()
            .collect()
    }

    fn selection(entrant: u64, name: &str, value: u64) -> Value {
        json!({
            "entrant": {"id": entrant, "name": name},
            "selectionType": "CHARACTER",
            "selectionValue": value,
        })
    }

    #[test]
    fn winner_is_the_winning_entrants_character() {
        let game = json!({
            "winnerId": 20,
            "stage": {"name": "Battlefield"},
            "selections": [selection(10, "Alice", 1), selection(20, "Bob", 2)],
        });
        let record = parse_game(&game, "s1", 1, 7, &characters(), &mut BTreeSet::new()).unwrap();
        assert_eq!(record.winner_side, 2);
        assert_eq!(record.winner(), Some("Link"));
        assert_eq!(record.stage.as_deref(), Some("Battlefield"));
        assert_eq!(record.entrant1.as_deref(), Some("Alice"));
    }

    #[test]
    fn single_sided_game_is_skipped() {
        let game = json!({
            "winnerId": 10,
            "selections": [selection(10, "Alice", 1)],
        });
        assert!(parse_game(&game, "s1", 1, 7, &characters(), &mut BTreeSet::new()).is_none());
    }

    #[test]
    fn non_character_selections_are_ignored() {
        let game = json!({
            "winnerId": 10,
            "selections": [
                {"entrant": {"id": 10}, "selectionType": "STAGE", "selectionValue": 99},
                selection(10, "Alice", 1),
                selection(20, "Bob", 1),
            ],
        });
        let record = parse_game(&game, "s1", 2, 7, &characters(), &mut BTreeSet::new()).unwrap();
        assert!(record.is_mirror());
        assert_eq!(record.winner_side, 1);
        assert_eq!(record.game_index, 2);
    }

    #[test]
    fn unknown_winner_is_skipped() {
        let game = json!({
            "winnerId": 99,
            "selections": [selection(10, "Alice", 1), selection(20, "Bob", 2)],
        });
        assert!(parse_game(&game, "s1", 1, 7, &characters(), &mut BTreeSet::new()).is_none());
    }

    #[test]
    fn doubles_detected_from_participants() {
        let slots = json!([
            {"entrant": {"id": 1, "participants": [{"id": 1}, {"id": 2}]}},
            {"entrant": {"id": 2, "participants": [{"id": 3}, {"id": 4}]}},
        ]);
        assert!(set_is_doubles(Some(&slots)));
        let singles = json!([{"entrant": {"id": 1, "participants": [{"id": 1}]}}]);
        assert!(!set_is_doubles(Some(&singles)));
        assert!(!set_is_doubles(Some(&json!([{"entrant": {"id": 1}}]))));
        assert!(!set_is_doubles(None));
    }

    #[test]
    fn unknown_character_ids_are_collected_once() {
        let mut unknown = BTreeSet::new();
        for _ in 0..3 {
            let game = json!({
                "winnerId": 10,
                "selections": [selection(10, "Alice", 1), selection(20, "Bob", 77)],
            });
            let record = parse_game(&game, "s1", 1, 7, &characters(), &mut unknown).unwrap();
            assert_eq!(record.char2, None);
        }
        assert_eq!(unknown.into_iter().collect::<Vec<_>>(), vec![77]);
    }
}
