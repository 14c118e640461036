use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::sets::GameRecord;

/// Win rate used for pairs with no recorded games.
pub const UNKNOWN_WIN_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Record {
    pub wins: usize,
    pub games: usize,
}

impl Record {
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return UNKNOWN_WIN_RATE;
        }
        self.wins as f64 / self.games as f64
    }

    fn add(&mut self, won: bool) {
        self.games += 1;
        if won {
            self.wins += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchupStat {
    pub char1: String,
    pub char2: String,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterStat {
    pub character: String,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageStat {
    pub character: String,
    pub stage: String,
    pub record: Record,
}

#[derive(Debug, Clone, Default)]
pub struct MatchupReport {
    pub matchups: Vec<MatchupStat>,
    pub characters: Vec<CharacterStat>,
    pub stages: Vec<StageStat>,
    pub games_used: usize,
    pub mirrors: usize,
    pub incomplete: usize,
}

/// Row layout of `matchups.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupRow {
    pub char1: String,
    pub char2: String,
    pub win_rate: f64,
    #[serde(default)]
    pub games: usize,
}

/// Aggregates games into matchup, character and stage records.
///
/// Each non-mirror game counts once from each player's side; mirrors say nothing about
/// the matchup and are left out. Pairs with fewer than `min_games` games are dropped
/// from the matchup table only.
pub fn compute_matchups(games: &[GameRecord], min_games: usize) -> MatchupReport {
    let mut pairs: BTreeMap<(String, String), Record> = BTreeMap::new();
    let mut chars: BTreeMap<String, Record> = BTreeMap::new();
    let mut stages: BTreeMap<(String, String), Record> = BTreeMap::new();
    let mut report = MatchupReport::default();

    for game in games {
        let (Some(c1), Some(c2)) = (game.char1.as_deref(), game.char2.as_deref()) else {
            report.incomplete += 1;
            continue;
        };
        if game.winner_side != 1 && game.winner_side != 2 {
            report.incomplete += 1;
            continue;
        }
        if c1 == c2 {
            report.mirrors += 1;
            continue;
        }
        report.games_used += 1;
        let first_won = game.winner_side == 1;

        for (me, them, won) in [(c1, c2, first_won), (c2, c1, !first_won)] {
            pairs
                .entry((me.to_string(), them.to_string()))
                .or_default()
                .add(won);
            chars.entry(me.to_string()).or_default().add(won);
            if let Some(stage) = game.stage.as_deref() {
                stages
                    .entry((me.to_string(), stage.to_string()))
                    .or_default()
                    .add(won);
            }
        }
    }

    report.matchups = pairs
        .into_iter()
        .filter(|(_, record)| record.games >= min_games)
        .map(|((char1, char2), record)| MatchupStat {
            char1,
            char2,
            record,
        })
        .collect();
    report.characters = chars
        .into_iter()
        .map(|(character, record)| CharacterStat { character, record })
        .collect();
    report.stages = stages
        .into_iter()
        .map(|((character, stage), record)| StageStat {
            character,
            stage,
            record,
        })
        .collect();
    report
}

pub fn matchup_rows(report: &MatchupReport) -> Vec<MatchupRow> {
    report
        .matchups
        .iter()
        .map(|m| MatchupRow {
            char1: m.char1.clone(),
            char2: m.char2.clone(),
            win_rate: m.record.win_rate(),
            games: m.record.games,
        })
        .collect()
}

pub fn write_matchups_csv(path: &Path, rows: &[MatchupRow]) -> Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for row in rows {
        wtr.serialize(row).context("write matchup row")?;
    }
    wtr.flush().with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

pub fn read_matchups_csv(path: &Path) -> Result<Vec<MatchupRow>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<MatchupRow>().enumerate() {
        out.push(row.with_context(|| format!("{} row {}", path.display(), idx + 1))?);
    }
    Ok(out)
}

/// Square win-rate table: `value(a, b)` is how often `a` beats `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupMatrix {
    names: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl MatchupMatrix {
    /// Pivots rows over the sorted union of characters; pairs without a row get 0.5.
    pub fn from_rows(rows: &[MatchupRow]) -> Self {
        let names = rows
            .iter()
            .flat_map(|r| [r.char1.clone(), r.char2.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect::<HashMap<_, _>>();

        let mut values = vec![vec![UNKNOWN_WIN_RATE; names.len()]; names.len()];
        for row in rows {
            if !row.win_rate.is_finite() {
                continue;
            }
            if let (Some(&r), Some(&c)) = (index.get(row.char1.as_str()), index.get(row.char2.as_str()))
            {
                values[r][c] = row.win_rate;
            }
        }
        Self { names, values }
    }

    pub fn from_parts(names: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if values.len() != names.len() || values.iter().any(|row| row.len() != names.len()) {
            return Err(anyhow!(
                "matrix must be {n}x{n} to match its {n} names",
                n = names.len()
            ));
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.values[row][col]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Zero-sum payoffs in [-1, 1]: `2 * win_rate - 1`.
    pub fn payoffs(&self) -> Vec<Vec<f64>> {
        self.values
            .iter()
            .map(|row| row.iter().map(|v| 2.0 * v - 1.0).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(c1: &str, c2: &str, winner_side: u8, stage: Option<&str>) -> GameRecord {
        GameRecord {
            set_id: "s".to_string(),
            game_index: 1,
            event_id: None,
            char1: Some(c1.to_string()),
            char2: Some(c2.to_string()),
            stage: stage.map(|s| s.to_string()),
            winner_side,
            entrant1: None,
            entrant2: None,
        }
    }

    #[test]
    fn both_orientations_are_counted() {
        let games = vec![
            game("Mario", "Link", 1, Some("Battlefield")),
            game("Link", "Mario", 1, None),
            game("Mario", "Link", 1, None),
        ];
        let report = compute_matchups(&games, 1);
        let mario_link = report
            .matchups
            .iter()
            .find(|m| m.char1 == "Mario" && m.char2 == "Link")
            .unwrap();
        assert_eq!(mario_link.record, Record { wins: 2, games: 3 });
        let link_mario = report
            .matchups
            .iter()
            .find(|m| m.char1 == "Link" && m.char2 == "Mario")
            .unwrap();
        assert_eq!(link_mario.record, Record { wins: 1, games: 3 });
        assert_eq!(report.stages.len(), 2);
    }

    #[test]
    fn mirrors_and_incomplete_games_are_excluded() {
        let mut missing = game("Mario", "Link", 1, None);
        missing.char2 = None;
        let games = vec![game("Mario", "Mario", 2, None), missing];
        let report = compute_matchups(&games, 1);
        assert!(report.matchups.is_empty());
        assert_eq!(report.mirrors, 1);
        assert_eq!(report.incomplete, 1);
    }

    #[test]
    fn min_games_filters_pairs() {
        let games = vec![game("Mario", "Link", 1, None)];
        assert!(compute_matchups(&games, 2).matchups.is_empty());
        assert_eq!(compute_matchups(&games, 2).characters.len(), 2);
    }

    #[test]
    fn matrix_fills_missing_pairs_with_even_odds() {
        let rows = vec![MatchupRow {
            char1: "Mario".to_string(),
            char2: "Link".to_string(),
            win_rate: 0.7,
            games: 10,
        }];
        let matrix = MatchupMatrix::from_rows(&rows);
        assert_eq!(matrix.names(), &["Link".to_string(), "Mario".to_string()]);
        let mario = matrix.index_of("Mario").unwrap();
        let link = matrix.index_of("Link").unwrap();
        assert!((matrix.value(mario, link) - 0.7).abs() < 1e-12);
        assert!((matrix.value(link, mario) - 0.5).abs() < 1e-12);
        assert!((matrix.payoffs()[mario][link] - 0.4).abs() < 1e-12);
    }
}
