use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use smash_meta::bounds::{all_win_rates, intervals};
use smash_meta::characters::CharacterMap;
use smash_meta::matchups::{MatchupMatrix, compute_matchups, matchup_rows};
use smash_meta::sets::{GameRecord, parse_event_sets_page};

const CHARACTERS: [&str; 12] = [
    "Mario", "Link", "Pikachu", "Fox", "Samus", "Kirby", "Ness", "Yoshi", "Peach", "Marth",
    "Sheik", "Pichu",
];

fn sample_games(count: usize) -> Vec<GameRecord> {
    (0..count)
        .map(|i| {
            let a = i % CHARACTERS.len();
            let b = (i * 7 + 3) % CHARACTERS.len();
            GameRecord {
                set_id: format!("{}", i / 3),
                game_index: (i % 3) as u32 + 1,
                event_id: Some((i / 60) as u64),
                char1: Some(CHARACTERS[a].to_string()),
                char2: Some(CHARACTERS[b].to_string()),
                stage: Some(if i % 2 == 0 { "Battlefield" } else { "Smashville" }.to_string()),
                winner_side: if (a * 31 + b * 17 + i) % 5 < 3 { 1 } else { 2 },
                entrant1: Some(format!("player{}", i % 40)),
                entrant2: Some(format!("player{}", (i + 13) % 40)),
            }
        })
        .collect()
}

fn bench_matchups(c: &mut Criterion) {
    let games = sample_games(50_000);
    c.bench_function("compute_matchups_50k", |b| {
        b.iter(|| {
            let report = compute_matchups(black_box(&games), 1);
            black_box(report.matchups.len());
        })
    });
}

fn bench_bounds(c: &mut Criterion) {
    let games = sample_games(20_000);
    let matrix = MatchupMatrix::from_rows(&matchup_rows(&compute_matchups(&games, 1)));
    c.bench_function("all_win_rates_12x12_div20", |b| {
        b.iter(|| {
            let table = all_win_rates(black_box(&matrix), 20).expect("solvable");
            black_box(intervals(&table, -0.02, true));
        })
    });
}

fn bench_parsing(c: &mut Criterion) {
    let chars = CHARACTERS
        .iter()
        .enumerate()
        .map(|(i, name)| (i as u64 + 1, name.to_string()))
        .collect::<CharacterMap>();
    let data: serde_json::Value =
        serde_json::from_str(SETS_PAGE_JSON).expect("valid fixture json");
    c.bench_function("parse_event_sets_page", |b| {
        b.iter(|| {
            let page = parse_event_sets_page(black_box(&data), 1, &chars);
            black_box(page.map(|p| p.records.len()));
        })
    });
}

criterion_group!(benches, bench_matchups, bench_bounds, bench_parsing);
criterion_main!(benches);

const SETS_PAGE_JSON: &str = r#"{
  "event": {
    "id": 1,
    "name": "Weekly",
    "sets": {
      "pageInfo": { "total": 2 },
      "nodes": [
        {
          "id": 10,
          "slots": [
            { "entrant": { "id": 1, "participants": [{ "id": 1 }] } },
            { "entrant": { "id": 2, "participants": [{ "id": 2 }] } }
          ],
          "games": [
            {
              "winnerId": 1,
              "stage": { "name": "Battlefield" },
              "selections": [
                { "entrant": { "id": 1, "name": "A" }, "selectionType": "CHARACTER", "selectionValue": 1 },
                { "entrant": { "id": 2, "name": "B" }, "selectionType": "CHARACTER", "selectionValue": 4 }
              ]
            },
            {
              "winnerId": 2,
              "stage": { "name": "Smashville" },
              "selections": [
                { "entrant": { "id": 1, "name": "A" }, "selectionType": "CHARACTER", "selectionValue": 1 },
                { "entrant": { "id": 2, "name": "B" }, "selectionType": "CHARACTER", "selectionValue": 4 }
              ]
            }
          ]
        },
        {
          "id": 11,
          "slots": [
            { "entrant": { "id": 3, "participants": [{ "id": 3 }] } },
            { "entrant": { "id": 4, "participants": [{ "id": 4 }] } }
          ],
          "games": [
            {
              "winnerId": 4,
              "stage": null,
              "selections": [
                { "entrant": { "id": 3, "name": "C" }, "selectionType": "CHARACTER", "selectionValue": 9 },
                { "entrant": { "id": 4, "name": "D" }, "selectionType": "CHARACTER", "selectionValue": 2 }
              ]
            }
          ]
        }
      ]
    }
  }
}"#;
