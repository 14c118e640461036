use std::cmp::Ordering;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rayon::prelude::*;

use crate::matchups::MatchupMatrix;
use crate::simplex::{LinearProgram, maximize};

const FEASIBILITY_EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct GameSolution {
    pub value: f64,
    pub strategy: Vec<f64>,
}

/// Optimal mixed strategy for the row player of `payoffs` and its guaranteed value.
pub fn solve_game(payoffs: &[Vec<f64>]) -> Result<GameSolution> {
    solve(payoffs, None)?.ok_or_else(|| anyhow!("game has no feasible strategy"))
}

/// Like [`solve_game`] with `row` forced to be played with probability `p`.
///
/// `None` when no strategy sums to one under that constraint, which only happens for a
/// single-row game with `p < 1`.
pub fn solve_game_with_row_constraint(
    payoffs: &[Vec<f64>],
    row: usize,
    p: f64,
) -> Result<Option<GameSolution>> {
    if row >= payoffs.len() {
        return Err(anyhow!("row {row} out of range for {} rows", payoffs.len()));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(anyhow!("row probability {p} outside [0, 1]"));
    }
    solve(payoffs, Some((row, p)))
}

fn solve(payoffs: &[Vec<f64>], fixed: Option<(usize, f64)>) -> Result<Option<GameSolution>> {
    let rows = payoffs.len();
    if rows == 0 {
        return Err(anyhow!("empty payoff matrix"));
    }
    let cols = payoffs[0].len();
    if cols == 0 || payoffs.iter().any(|r| r.len() != cols) {
        return Err(anyhow!("payoff matrix rows must share a non-zero width"));
    }

    // Shift payoffs to be non-negative so every right-hand side below is >= 0 and the
    // slack basis is feasible. The value shifts by the same constant.
    let min = payoffs
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let shift = if min < 0.0 { -min } else { 0.0 };

    let free_rows = (0..rows)
        .filter(|r| fixed.is_none_or(|(k, _)| *r != k))
        .collect::<Vec<_>>();
    let (fixed_row, fixed_p) = match fixed {
        Some((k, p)) => (Some(k), p),
        None => (None, 0.0),
    };
    let budget = (1.0 - fixed_p).max(0.0);
    if free_rows.is_empty() && budget > FEASIBILITY_EPS {
        return Ok(None);
    }

    // Variables: one probability per free row, then the shifted game value w'.
    let nvars = free_rows.len() + 1;
    let w = free_rows.len();
    let mut objective = vec![0.0; nvars];
    objective[w] = 1.0;
    let mut lp = LinearProgram::new(objective);

    // Column c: w' - sum_r (M[r][c] + shift) x_r <= p * (M[k][c] + shift)
    for c in 0..cols {
        let mut coefficients = vec![0.0; nvars];
        for (i, &r) in free_rows.iter().enumerate() {
            coefficients[i] = -(payoffs[r][c] + shift);
        }
        coefficients[w] = 1.0;
        let bound = fixed_row.map_or(0.0, |k| fixed_p * (payoffs[k][c] + shift));
        lp.constrain(coefficients, bound);
    }
    // Free probabilities share what the fixed row leaves over. With non-negative payoffs an
    // optimum can always put the whole budget to use, so `<=` loses nothing over `=`.
    let mut budget_row = vec![1.0; nvars];
    budget_row[w] = 0.0;
    lp.constrain(budget_row, budget);

    let solution = maximize(&lp).map_err(|err| anyhow!("metagame lp failed: {err}"))?;

    let mut strategy = vec![0.0; rows];
    if let Some(k) = fixed_row {
        strategy[k] = fixed_p;
    }
    let mut used = 0.0;
    for (i, &r) in free_rows.iter().enumerate() {
        strategy[r] = solution.x[i].max(0.0);
        used += strategy[r];
    }
    if let Some(&first) = free_rows.first() {
        let slack = budget - used;
        if slack > FEASIBILITY_EPS {
            strategy[first] += slack;
        }
    }

    Ok(Some(GameSolution {
        value: solution.value - shift,
        strategy,
    }))
}

/// `division + 1` evenly spaced probabilities from 0 to 1.
pub fn linspace(division: usize) -> Vec<f64> {
    let division = division.max(1);
    (0..=division).map(|i| i as f64 / division as f64).collect()
}

pub fn win_rates(payoffs: &[Vec<f64>], row: usize, division: usize) -> Result<Vec<Option<f64>>> {
    linspace(division)
        .into_iter()
        .map(|p| Ok(solve_game_with_row_constraint(payoffs, row, p)?.map(|s| s.value)))
        .collect()
}

/// Game value per character (outer) and per forced probability (inner).
#[derive(Debug, Clone, PartialEq)]
pub struct WinRateTable {
    pub names: Vec<String>,
    pub probs: Vec<f64>,
    pub values: Vec<Vec<Option<f64>>>,
}

pub fn all_win_rates(matrix: &MatchupMatrix, division: usize) -> Result<WinRateTable> {
    if matrix.is_empty() {
        return Err(anyhow!("no matchups to solve"));
    }
    let payoffs = matrix.payoffs();
    let values = (0..matrix.len())
        .into_par_iter()
        .map(|row| win_rates(&payoffs, row, division))
        .collect::<Result<Vec<_>>>()?;
    Ok(WinRateTable {
        names: matrix.names().to_vec(),
        probs: linspace(division),
        values,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub name: String,
    pub minv: Option<f64>,
    pub maxv: Option<f64>,
}

impl Interval {
    /// Stacked-bar segments: unplayable below, near-optimal band, unplayable above.
    pub fn bars(&self) -> Option<(f64, f64, f64)> {
        let (lo, hi) = (self.minv?, self.maxv?);
        Some((lo, hi - lo, 1.0 - hi))
    }
}

/// Smallest and largest probabilities whose game value reaches `threshold`.
pub fn intervals(table: &WinRateTable, threshold: f64, sort: bool) -> Vec<Interval> {
    let mut out = table
        .names
        .iter()
        .zip(&table.values)
        .map(|(name, values)| {
            let mut hits = table
                .probs
                .iter()
                .zip(values)
                .filter(|(_, v)| v.is_some_and(|v| v >= threshold))
                .map(|(p, _)| *p);
            let minv = hits.next();
            let maxv = hits.last().or(minv);
            Interval {
                name: name.clone(),
                minv,
                maxv,
            }
        })
        .collect::<Vec<_>>();
    if sort {
        out.sort_by(|a, b| cmp_nan_last(a.maxv, b.maxv).then(cmp_nan_last(a.minv, b.minv)));
    }
    out
}

fn cmp_nan_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn write_win_rates_csv(path: &Path, table: &WinRateTable) -> Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    let mut header = vec!["p".to_string()];
    header.extend(table.names.iter().cloned());
    wtr.write_record(&header).context("write header")?;
    for (i, p) in table.probs.iter().enumerate() {
        let mut record = vec![p.to_string()];
        for values in &table.values {
            record.push(
                values
                    .get(i)
                    .copied()
                    .flatten()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&record).context("write win rate row")?;
    }
    wtr.flush().with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

pub fn read_win_rates_csv(path: &Path) -> Result<WinRateTable> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let names = rdr
        .headers()
        .context("read header")?
        .iter()
        .skip(1)
        .map(|s| s.to_string())
        .collect::<Vec<_>>();

    let mut probs = Vec::new();
    let mut values = vec![Vec::new(); names.len()];
    for (idx, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("{} row {}", path.display(), idx + 1))?;
        let p = record
            .get(0)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .ok_or_else(|| anyhow!("{} row {}: bad probability", path.display(), idx + 1))?;
        probs.push(p);
        for (col, column) in values.iter_mut().enumerate() {
            column.push(record.get(col + 1).and_then(|s| s.trim().parse::<f64>().ok()));
        }
    }
    Ok(WinRateTable {
        names,
        probs,
        values,
    })
}

pub fn write_intervals_csv(path: &Path, intervals: &[Interval]) -> Result<()> {
    let mut wtr =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    wtr.write_record(["character", "minv", "maxv", "bar1", "bar2", "bar3"])
        .context("write header")?;
    let fmt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for interval in intervals {
        let bars = interval.bars();
        wtr.write_record([
            interval.name.clone(),
            fmt(interval.minv),
            fmt(interval.maxv),
            fmt(bars.map(|b| b.0)),
            fmt(bars.map(|b| b.1)),
            fmt(bars.map(|b| b.2)),
        ])
        .context("write interval row")?;
    }
    wtr.flush().with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}
