use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::dataset::{self, RunKind, RunTotals};
use crate::export::GameRow;
use crate::http_client::download_client;
use crate::sets::GameRecord;

pub const IMPORT_SOURCE: &str = "import";
const DOWNLOAD_ATTEMPTS: u64 = 4;

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub digest: String,
    pub rows: usize,
    pub rows_skipped: usize,
    pub games_inserted: usize,
}

/// Reads `source` as a URL when it has an http(s) scheme, else as a local path.
pub fn fetch_archive(source: &str) -> Result<Vec<u8>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        return download_bytes(source);
    }
    fs::read(source).with_context(|| format!("read dataset archive {source}"))
}

fn download_bytes(url: &str) -> Result<Vec<u8>> {
    let client = download_client()?;
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        let fetched = client
            .get(url)
            .send()
            .with_context(|| format!("request {url}"))
            .and_then(|res| {
                res.error_for_status()
                    .with_context(|| format!("status for {url}"))
            })
            .and_then(|res| res.bytes().with_context(|| format!("read body {url}")));
        match fetched {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                tracing::warn!(attempt, error = %err, "dataset download failed");
                last_err = Some(err);
                if attempt < DOWNLOAD_ATTEMPTS {
                    thread::sleep(Duration::from_millis(500 * attempt));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("download failed for {url}")))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<String> {
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(anyhow!(
            "dataset checksum mismatch: expected {}, got {actual}",
            expected.trim()
        ));
    }
    Ok(actual)
}

/// Parses a `game_data.csv` archive. Rows whose winner is neither character are skipped.
///
/// Keys derive from the archive digest and row number, so the same archive always maps
/// onto the same records.
pub fn parse_archive(bytes: &[u8], digest: &str) -> Result<(Vec<GameRecord>, usize)> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let key_prefix = &digest[..digest.len().min(16)];

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (idx, row) in rdr.deserialize::<GameRow>().enumerate() {
        let row = row.with_context(|| format!("archive row {}", idx + 1))?;
        let winner_side = match row.winner.as_deref() {
            Some(w) if row.char1.as_deref() == Some(w) => 1,
            Some(w) if row.char2.as_deref() == Some(w) => 2,
            _ => {
                skipped += 1;
                continue;
            }
        };
        records.push(GameRecord {
            set_id: format!("{IMPORT_SOURCE}:{key_prefix}:{}", idx + 1),
            game_index: 1,
            event_id: None,
            char1: row.char1,
            char2: row.char2,
            stage: row.stage,
            winner_side,
            entrant1: row.entrant1,
            entrant2: row.entrant2,
        });
    }
    Ok((records, skipped))
}

pub fn import_archive(
    conn: &mut Connection,
    bytes: &[u8],
    expected_sha256: Option<&str>,
) -> Result<ImportSummary> {
    let digest = match expected_sha256 {
        Some(expected) => verify_sha256(bytes, expected)?,
        None => sha256_hex(bytes),
    };
    let (records, rows_skipped) = parse_archive(bytes, &digest)?;

    let run_id = dataset::begin_run(conn, RunKind::Import)?;
    let tx = conn.transaction().context("begin import transaction")?;
    let games_inserted = dataset::insert_games(&tx, &records, IMPORT_SOURCE)?;
    tx.commit().context("commit import transaction")?;
    dataset::finish_run(
        conn,
        run_id,
        &RunTotals {
            events_total: 0,
            events_succeeded: 0,
            games_inserted,
            errors: Vec::new(),
        },
    )?;

    tracing::info!(
        digest = %digest,
        rows = records.len(),
        rows_skipped,
        games_inserted,
        "dataset archive imported"
    );
    Ok(ImportSummary {
        digest,
        rows: records.len(),
        rows_skipped,
        games_inserted,
    })
}

pub fn import_from_source(
    conn: &mut Connection,
    source: &str,
    expected_sha256: Option<&str>,
) -> Result<ImportSummary> {
    let bytes = fetch_archive(source)?;
    if bytes.is_empty() {
        return Err(anyhow!("dataset archive {source} is empty"));
    }
    import_archive(conn, &bytes, expected_sha256)
}
