use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

/// Hand-curated mapping from the API's character selection values to names.
#[derive(Debug, Clone, Default)]
pub struct CharacterMap {
    by_id: HashMap<u64, String>,
}

impl CharacterMap {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open character map {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("parse character map {}", path.display()))
    }

    /// Rows are `name,id`; blank rows are skipped.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut by_id = HashMap::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("character map row {}", idx + 1))?;
            if record.iter().all(|field| field.is_empty()) {
                continue;
            }
            let (Some(name), Some(raw_id)) = (record.get(0), record.get(1)) else {
                return Err(anyhow!("character map row {} needs name,id", idx + 1));
            };
            let id = raw_id
                .parse::<u64>()
                .with_context(|| format!("character map row {}: bad id {raw_id:?}", idx + 1))?;
            by_id.insert(id, name.to_string());
        }
        Ok(Self { by_id })
    }

    pub fn name(&self, id: u64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl FromIterator<(u64, String)> for CharacterMap {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        Self {
            by_id: iter.into_iter().collect(),
        }
    }
}
