//! Persistent store of scored decks.
//!
//! One SQLite file per session tag. Entries are keyed by the SHA-256 of the
//! normalized card set, so re-inserting a deck updates its row in place.
//! Aggregate stats are cached in a single-row table and only refreshed by
//! [`ResultStore::recalculate_stats`].

mod export;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::schema::{DECK_SIZE, ScoreResult, Strategy, SubScores, deck_hash, deck_key};

pub use export::{EXPORT_VERSION, StoreExport};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS decks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deck_hash TEXT NOT NULL UNIQUE,
    cards TEXT NOT NULL,
    overall_score REAL NOT NULL,
    attack_score REAL NOT NULL,
    defense_score REAL NOT NULL,
    synergy_score REAL NOT NULL,
    versatility_score REAL NOT NULL,
    economy_score REAL NOT NULL,
    playability_score REAL NOT NULL,
    archetype TEXT NOT NULL,
    archetype_conf REAL NOT NULL,
    strategy TEXT,
    avg_elixir REAL NOT NULL,
    evaluated_at TEXT NOT NULL,
    tag TEXT NOT NULL,
    evaluation_version TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_overall_score ON decks(overall_score DESC);
CREATE INDEX IF NOT EXISTS idx_archetype ON decks(archetype);
CREATE INDEX IF NOT EXISTS idx_archetype_score ON decks(archetype, overall_score DESC);
CREATE INDEX IF NOT EXISTS idx_strategy ON decks(strategy);
CREATE INDEX IF NOT EXISTS idx_evaluated_at ON decks(evaluated_at DESC);

CREATE TABLE IF NOT EXISTS stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    tag TEXT NOT NULL,
    total_entries INTEGER NOT NULL,
    top_score REAL NOT NULL,
    avg_score REAL NOT NULL,
    last_updated TEXT NOT NULL
);
";

const COLUMNS: &str = "id, deck_hash, cards, overall_score, attack_score, defense_score, \
     synergy_score, versatility_score, economy_score, playability_score, archetype, \
     archetype_conf, strategy, avg_elixir, evaluated_at, tag, evaluation_version";

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("An entry needs exactly {DECK_SIZE} distinct cards, got {0}")]
    InvalidEntry(usize),
    #[error("Cleanup needs at least one filter")]
    EmptyCleanup,
    #[error("Prune count must be at least 1")]
    InvalidPruneCount,
    #[error("Unsupported export version {0}")]
    UnsupportedVersion(u32),
}

/// A scored deck to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub cards: Vec<String>,
    pub score: ScoreResult,
    pub strategy: Option<Strategy>,
    pub evaluated_at: DateTime<Utc>,
    pub evaluation_version: String,
}

impl NewEntry {
    pub fn new(cards: Vec<String>, score: ScoreResult) -> Self {
        Self {
            cards,
            score,
            strategy: None,
            evaluated_at: Utc::now(),
            evaluation_version: "v1".to_string(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// A stored deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub id: i64,
    pub deck_hash: String,
    pub cards: Vec<String>,
    pub score: ScoreResult,
    #[serde(default)]
    pub strategy: Option<Strategy>,
    pub evaluated_at: DateTime<Utc>,
    pub tag: String,
    pub evaluation_version: String,
}

/// Column to sort query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Overall,
    Attack,
    Defense,
    Synergy,
    Versatility,
    Economy,
    Playability,
    AvgElixir,
    EvaluatedAt,
}

impl SortField {
    fn column(self) -> &'static str {
        match self {
            SortField::Overall => "overall_score",
            SortField::Attack => "attack_score",
            SortField::Defense => "defense_score",
            SortField::Synergy => "synergy_score",
            SortField::Versatility => "versatility_score",
            SortField::Economy => "economy_score",
            SortField::Playability => "playability_score",
            SortField::AvgElixir => "avg_elixir",
            SortField::EvaluatedAt => "evaluated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Query filters. `None` and empty lists mean no filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    pub archetype: Option<String>,
    pub strategy: Option<Strategy>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub min_elixir: Option<f64>,
    pub max_elixir: Option<f64>,
    /// Decks containing every one of these cards.
    pub require_all: Vec<String>,
    /// Decks containing none of these cards.
    pub exclude: Vec<String>,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryFilter {
    /// Best `n` by overall score.
    pub fn top(n: usize) -> Self {
        Self {
            limit: Some(n),
            ..Default::default()
        }
    }

    /// Best `limit` of one archetype.
    pub fn archetype(name: impl Into<String>, limit: usize) -> Self {
        Self {
            archetype: Some(name.into()),
            limit: Some(limit),
            ..Default::default()
        }
    }
}

/// Deletion filters for [`ResultStore::cleanup`]; all set filters must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupOptions {
    /// Entries scoring strictly below this.
    pub below_score: Option<f64>,
    /// Entries evaluated longer ago than this.
    pub older_than: Option<Duration>,
    pub archetype: Option<String>,
}

/// Cached aggregate statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub tag: String,
    pub total_entries: u64,
    pub top_score: f64,
    pub avg_score: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchetypeCount {
    pub archetype: String,
    pub count: u64,
}

/// SQLite-backed result store for one session tag.
pub struct ResultStore {
    conn: Connection,
    tag: String,
    path: PathBuf,
}

impl ResultStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P, tag: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        log::debug!("Opened result store {}", path.display());
        Ok(Self {
            conn,
            tag: tag.into(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Insert a deck, or update the entry with the same card set.
    ///
    /// Returns the entry id and whether a new entry was created.
    pub fn insert(&self, entry: &NewEntry) -> Result<(i64, bool), StoreError> {
        let key = deck_key(entry.cards.iter().map(String::as_str));
        let distinct = entry
            .cards
            .iter()
            .collect::<std::collections::HashSet<_>>()
            .len();
        if entry.cards.len() != DECK_SIZE || distinct != DECK_SIZE {
            return Err(StoreError::InvalidEntry(distinct.min(entry.cards.len())));
        }
        let hash = deck_hash(&key);
        let cards = serde_json::to_string(&entry.cards)?;
        let s = &entry.score;
        let sub = &s.sub_scores;
        let strategy = entry.strategy.map(|st| st.as_str());
        let evaluated_at = timestamp(&entry.evaluated_at);

        let tx = self.conn.unchecked_transaction()?;
        let existing: Option<i64> = tx
            .query_row("SELECT id FROM decks WHERE deck_hash = ?1", [&hash], |row| {
                row.get(0)
            })
            .optional()?;

        let result = match existing {
            None => {
                tx.execute(
                    "INSERT INTO decks (
                        deck_hash, cards, overall_score, attack_score, defense_score,
                        synergy_score, versatility_score, economy_score, playability_score,
                        archetype, archetype_conf, strategy, avg_elixir,
                        evaluated_at, tag, evaluation_version
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        hash,
                        cards,
                        s.overall,
                        sub.attack,
                        sub.defense,
                        sub.synergy,
                        sub.versatility,
                        sub.economy,
                        sub.playability,
                        s.archetype,
                        s.archetype_confidence,
                        strategy,
                        s.avg_elixir,
                        evaluated_at,
                        self.tag,
                        entry.evaluation_version,
                    ],
                )?;
                (tx.last_insert_rowid(), true)
            }
            Some(id) => {
                tx.execute(
                    "UPDATE decks SET
                        overall_score = ?1, attack_score = ?2, defense_score = ?3,
                        synergy_score = ?4, versatility_score = ?5, economy_score = ?6,
                        playability_score = ?7, archetype = ?8, archetype_conf = ?9,
                        strategy = ?10, avg_elixir = ?11, evaluated_at = ?12,
                        evaluation_version = ?13
                    WHERE id = ?14",
                    params![
                        s.overall,
                        sub.attack,
                        sub.defense,
                        sub.synergy,
                        sub.versatility,
                        sub.economy,
                        sub.playability,
                        s.archetype,
                        s.archetype_confidence,
                        strategy,
                        s.avg_elixir,
                        evaluated_at,
                        entry.evaluation_version,
                        id,
                    ],
                )?;
                (id, false)
            }
        };
        tx.commit()?;
        Ok(result)
    }

    /// Entries matching `filter`, sorted as requested. Ties fall back to id.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<StoreEntry>, StoreError> {
        let mut sql = format!("SELECT {COLUMNS} FROM decks WHERE 1=1");
        let mut args: Vec<Value> = Vec::new();

        let bounds = [
            ("overall_score >=", filter.min_score),
            ("overall_score <=", filter.max_score),
            ("avg_elixir >=", filter.min_elixir),
            ("avg_elixir <=", filter.max_elixir),
        ];
        for (cond, value) in bounds {
            if let Some(v) = value {
                sql.push_str(&format!(" AND {cond} ?"));
                args.push(Value::Real(v));
            }
        }
        if let Some(archetype) = &filter.archetype {
            sql.push_str(" AND archetype = ?");
            args.push(Value::Text(archetype.clone()));
        }
        if let Some(strategy) = filter.strategy {
            sql.push_str(" AND strategy = ?");
            args.push(Value::Text(strategy.as_str().to_string()));
        }
        for card in &filter.require_all {
            sql.push_str(" AND cards LIKE ? ESCAPE '\\'");
            args.push(Value::Text(card_pattern(card)));
        }
        for card in &filter.exclude {
            sql.push_str(" AND cards NOT LIKE ? ESCAPE '\\'");
            args.push(Value::Text(card_pattern(card)));
        }

        let order = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        sql.push_str(&format!(
            " ORDER BY {} {}, id ASC",
            filter.sort.column(),
            order
        ));

        match filter.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ?");
                args.push(Value::Integer(limit as i64));
            }
            None => sql.push_str(" LIMIT -1"),
        }
        if filter.offset > 0 {
            sql.push_str(" OFFSET ?");
            args.push(Value::Integer(filter.offset as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), read_entry)?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn top_n(&self, n: usize) -> Result<Vec<StoreEntry>, StoreError> {
        self.query(&QueryFilter::top(n))
    }

    pub fn by_archetype(&self, archetype: &str, limit: usize) -> Result<Vec<StoreEntry>, StoreError> {
        self.query(&QueryFilter::archetype(archetype, limit))
    }

    /// Look up one entry by card set, in any order.
    pub fn get_by_cards<S: AsRef<str>>(&self, cards: &[S]) -> Result<Option<StoreEntry>, StoreError> {
        let hash = deck_hash(&deck_key(cards.iter().map(|c| c.as_ref())));
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM decks WHERE deck_hash = ?1"),
                [&hash],
                read_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM decks", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Entries per archetype, most common first.
    pub fn archetype_counts(&self) -> Result<Vec<ArchetypeCount>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT archetype, COUNT(*) FROM decks GROUP BY archetype ORDER BY COUNT(*) DESC, archetype ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ArchetypeCount {
                archetype: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Recompute and cache the aggregate stats.
    ///
    /// Not run on insert; call it after bulk inserts or deletes.
    pub fn recalculate_stats(&self) -> Result<StoreSummary, StoreError> {
        let (total, top, avg): (i64, Option<f64>, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), MAX(overall_score), AVG(overall_score) FROM decks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let summary = StoreSummary {
            tag: self.tag.clone(),
            total_entries: total as u64,
            top_score: top.unwrap_or(0.0),
            avg_score: avg.unwrap_or(0.0),
            last_updated: Utc::now(),
        };

        self.conn.execute(
            "INSERT INTO stats (id, tag, total_entries, top_score, avg_score, last_updated)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                tag = excluded.tag,
                total_entries = excluded.total_entries,
                top_score = excluded.top_score,
                avg_score = excluded.avg_score,
                last_updated = excluded.last_updated",
            params![
                summary.tag,
                total,
                summary.top_score,
                summary.avg_score,
                timestamp(&summary.last_updated),
            ],
        )?;
        Ok(summary)
    }

    /// Cached stats from the last [`recalculate_stats`](Self::recalculate_stats).
    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let cached = self
            .conn
            .query_row(
                "SELECT tag, total_entries, top_score, avg_score, last_updated FROM stats WHERE id = 1",
                [],
                |row| {
                    Ok(StoreSummary {
                        tag: row.get(0)?,
                        total_entries: row.get::<_, i64>(1)? as u64,
                        top_score: row.get(2)?,
                        avg_score: row.get(3)?,
                        last_updated: parse_timestamp(row, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(cached.unwrap_or_else(|| StoreSummary {
            tag: self.tag.clone(),
            total_entries: 0,
            top_score: 0.0,
            avg_score: 0.0,
            last_updated: Utc::now(),
        }))
    }

    /// Delete entries matching every set filter. Returns the number deleted.
    pub fn cleanup(&self, options: &CleanupOptions) -> Result<u64, StoreError> {
        let (clause, args) = cleanup_clause(options)?;
        let deleted = self.conn.execute(
            &format!("DELETE FROM decks WHERE {clause}"),
            params_from_iter(args.iter()),
        )?;
        log::info!("Cleanup removed {} entries from {}", deleted, self.tag);
        Ok(deleted as u64)
    }

    /// Number of entries [`cleanup`](Self::cleanup) would delete.
    pub fn count_cleanup_matches(&self, options: &CleanupOptions) -> Result<u64, StoreError> {
        let (clause, args) = cleanup_clause(options)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM decks WHERE {clause}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Keep only the best `n` entries of each archetype. Equal scores keep the
    /// earlier insert.
    pub fn prune_top_n_per_archetype(&self, n: usize) -> Result<u64, StoreError> {
        if n == 0 {
            return Err(StoreError::InvalidPruneCount);
        }
        let deleted = self.conn.execute(
            "DELETE FROM decks WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY archetype ORDER BY overall_score DESC, id ASC
                    ) AS rank
                    FROM decks
                ) WHERE rank > ?1
            )",
            [n as i64],
        )?;
        log::info!("Pruned {} entries to top {} per archetype", deleted, n);
        Ok(deleted as u64)
    }

    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = self.conn.execute("DELETE FROM decks WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> Result<u64, StoreError> {
        let deleted = self.conn.execute("DELETE FROM decks", [])?;
        Ok(deleted as u64)
    }

    /// Reclaim free pages.
    pub fn vacuum(&self) -> Result<(), StoreError> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

fn cleanup_clause(options: &CleanupOptions) -> Result<(String, Vec<Value>), StoreError> {
    let mut conds: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(score) = options.below_score {
        conds.push("overall_score < ?");
        args.push(Value::Real(score));
    }
    if let Some(age) = options.older_than {
        let cutoff = TimeDelta::from_std(age)
            .ok()
            .and_then(|delta| Utc::now().checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        conds.push("evaluated_at < ?");
        args.push(Value::Text(timestamp(&cutoff)));
    }
    if let Some(archetype) = &options.archetype {
        conds.push("archetype = ?");
        args.push(Value::Text(archetype.clone()));
    }

    if conds.is_empty() {
        return Err(StoreError::EmptyCleanup);
    }
    Ok((conds.join(" AND "), args))
}

/// Fixed-width RFC 3339 so text order matches time order.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// LIKE pattern matching one name inside the JSON card array. `%`, `_` and
/// the escape character itself are matched literally.
fn card_pattern(card: &str) -> String {
    let quoted = serde_json::to_string(card).unwrap_or_else(|_| format!("\"{card}\""));
    let mut pattern = String::with_capacity(quoted.len() + 2);
    pattern.push('%');
    for c in quoted.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<StoreEntry> {
    let cards_json: String = row.get(2)?;
    let cards: Vec<String> = serde_json::from_str(&cards_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let strategy: Option<String> = row.get(12)?;

    Ok(StoreEntry {
        id: row.get(0)?,
        deck_hash: row.get(1)?,
        cards,
        score: ScoreResult {
            overall: row.get(3)?,
            sub_scores: SubScores {
                attack: row.get(4)?,
                defense: row.get(5)?,
                synergy: row.get(6)?,
                versatility: row.get(7)?,
                economy: row.get(8)?,
                playability: row.get(9)?,
            },
            archetype: row.get(10)?,
            archetype_confidence: row.get(11)?,
            avg_elixir: row.get(13)?,
        },
        strategy: strategy.and_then(|s| s.parse().ok()),
        evaluated_at: parse_timestamp(row, 14)?,
        tag: row.get(15)?,
        evaluation_version: row.get(16)?,
    })
}
