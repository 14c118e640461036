use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::{Workbook, Worksheet};
use serde::{Deserialize, Serialize};

use crate::matchups::MatchupReport;
use crate::sets::GameRecord;

/// Row layout of `game_data.csv`, the flat table the analysis notebooks read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRow {
    pub char1: Option<String>,
    pub char2: Option<String>,
    pub stage: Option<String>,
    pub winner: Option<String>,
    pub entrant1: Option<String>,
    pub entrant2: Option<String>,
}

impl From<&GameRecord> for GameRow {
    fn from(r: &GameRecord) -> Self {
        Self {
            char1: r.char1.clone(),
            char2: r.char2.clone(),
            stage: r.stage.clone(),
            winner: r.winner().map(|w| w.to_string()),
            entrant1: r.entrant1.clone(),
            entrant2: r.entrant2.clone(),
        }
    }
}

pub struct ExportReport {
    pub games: usize,
    pub matchups: usize,
    pub characters: usize,
    pub stages: usize,
}

pub fn write_game_csv(path: &Path, games: &[GameRecord]) -> Result<usize> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for game in games {
        wtr.serialize(GameRow::from(game))
            .context("write game row")?;
    }
    wtr.flush().with_context(|| format!("flush {}", path.display()))?;
    Ok(games.len())
}

pub fn export_workbook(
    path: &Path,
    games: &[GameRecord],
    report: &MatchupReport,
) -> Result<ExportReport> {
    let mut games_rows = vec![vec![
        "Event ID".to_string(),
        "Set ID".to_string(),
        "Game".to_string(),
        "Char 1".to_string(),
        "Char 2".to_string(),
        "Stage".to_string(),
        "Winner".to_string(),
        "Entrant 1".to_string(),
        "Entrant 2".to_string(),
    ]];
    for g in games {
        games_rows.push(vec![
            opt_to_string(g.event_id),
            g.set_id.clone(),
            g.game_index.to_string(),
            g.char1.clone().unwrap_or_default(),
            g.char2.clone().unwrap_or_default(),
            g.stage.clone().unwrap_or_default(),
            g.winner().unwrap_or_default().to_string(),
            g.entrant1.clone().unwrap_or_default(),
            g.entrant2.clone().unwrap_or_default(),
        ]);
    }

    let mut matchup_rows = vec![vec![
        "Character".to_string(),
        "Opponent".to_string(),
        "Wins".to_string(),
        "Games".to_string(),
        "Win Rate".to_string(),
    ]];
    for m in &report.matchups {
        matchup_rows.push(vec![
            m.char1.clone(),
            m.char2.clone(),
            m.record.wins.to_string(),
            m.record.games.to_string(),
            format!("{:.4}", m.record.win_rate()),
        ]);
    }

    let mut character_rows = vec![vec![
        "Character".to_string(),
        "Wins".to_string(),
        "Games".to_string(),
        "Win Rate".to_string(),
    ]];
    for c in &report.characters {
        character_rows.push(vec![
            c.character.clone(),
            c.record.wins.to_string(),
            c.record.games.to_string(),
            format!("{:.4}", c.record.win_rate()),
        ]);
    }

    let mut stage_rows = vec![vec![
        "Character".to_string(),
        "Stage".to_string(),
        "Wins".to_string(),
        "Games".to_string(),
        "Win Rate".to_string(),
    ]];
    for s in &report.stages {
        stage_rows.push(vec![
            s.character.clone(),
            s.stage.clone(),
            s.record.wins.to_string(),
            s.record.games.to_string(),
            format!("{:.4}", s.record.win_rate()),
        ]);
    }

    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Games")?;
        write_rows(sheet, &games_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Matchups")?;
        write_rows(sheet, &matchup_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Characters")?;
        write_rows(sheet, &character_rows)?;
    }
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Stages")?;
        write_rows(sheet, &stage_rows)?;
    }
    workbook
        .save(path)
        .with_context(|| format!("save workbook {}", path.display()))?;

    Ok(ExportReport {
        games: games.len(),
        matchups: report.matchups.len(),
        characters: report.characters.len(),
        stages: report.stages.len(),
    })
}

fn opt_to_string<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_rows(worksheet: &mut Worksheet, rows: &[Vec<String>]) -> Result<()> {
    for (row_idx, row) in rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            worksheet
                .write_string(row_idx as u32, col_idx as u16, value)
                .with_context(|| format!("write cell ({row_idx},{col_idx})"))?;
        }
    }
    Ok(())
}
