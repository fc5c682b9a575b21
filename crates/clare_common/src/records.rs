//! Read-only access to the registry's sister and community records.
//!
//! The records database belongs to the CRUD side of the application; the
//! query pipeline only reads from it, through the `RecordsStore` trait.
//! `SqliteRecordsStore` is the production implementation,
//! `InMemoryRecordsStore` the instrumented test double.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::entities::Stage;

/// One record a name scan can resolve against: every identifying string
/// (full name, religious name, short code) plus the id and display name.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCandidate {
    pub id: i64,
    pub display_name: String,
    pub aliases: Vec<String>,
}

impl EntityCandidate {
    /// Length of the longest identifying string, used for the
    /// longest-name-first disambiguation order.
    pub fn longest_alias(&self) -> usize {
        self.aliases.iter().map(|a| a.chars().count()).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SisterProfile {
    pub id: i64,
    pub full_name: String,
    pub religious_name: Option<String>,
    pub code: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub community: Option<String>,
    pub stage: Option<Stage>,
    pub entered_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommunityProfile {
    pub id: i64,
    pub name: String,
    pub address: Option<String>,
    pub established: Option<NaiveDate>,
    pub members: Vec<String>,
}

/// Corpus-wide counts for aggregate answers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordsSummary {
    pub total_sisters: u32,
    pub total_communities: u32,
    pub by_stage: Vec<(Stage, u32)>,
}

/// Read-only queries the pipeline needs from the records subsystem.
pub trait RecordsStore: Send + Sync {
    fn sister_candidates(&self) -> Result<Vec<EntityCandidate>>;
    fn community_candidates(&self) -> Result<Vec<EntityCandidate>>;
    fn sister_profile(&self, id: i64) -> Result<Option<SisterProfile>>;
    fn community_profile(&self, id: i64) -> Result<Option<CommunityProfile>>;
    fn communities(&self) -> Result<Vec<CommunityProfile>>;
    fn sisters_in_stage(&self, stage: Stage) -> Result<Vec<String>>;
    fn summary(&self) -> Result<RecordsSummary>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

pub struct SqliteRecordsStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordsStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create records directory")?;
        }
        let conn = Connection::open(path).context("Failed to open records database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS communities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                address TEXT,
                established TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sisters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                full_name TEXT NOT NULL,
                religious_name TEXT,
                code TEXT,
                birth_date TEXT,
                community_id INTEGER,
                stage TEXT,
                entered_on TEXT,
                FOREIGN KEY(community_id) REFERENCES communities(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sisters_community
             ON sisters(community_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sisters_stage
             ON sisters(stage)",
            [],
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("records database mutex poisoned"))
    }

    /// Insert a community record. The pipeline never writes records; this
    /// exists for seeding and tests.
    pub fn insert_community(
        &self,
        name: &str,
        address: Option<&str>,
        established: Option<NaiveDate>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO communities (name, address, established) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, address, established.map(|d| d.to_string())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a sister record. Seeding and tests only.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_sister(
        &self,
        full_name: &str,
        religious_name: Option<&str>,
        code: Option<&str>,
        birth_date: Option<NaiveDate>,
        community_id: Option<i64>,
        stage: Option<Stage>,
        entered_on: Option<NaiveDate>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sisters
                (full_name, religious_name, code, birth_date, community_id, stage, entered_on)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                full_name,
                religious_name,
                code,
                birth_date.map(|d| d.to_string()),
                community_id,
                stage.map(|s| s.tag()),
                entered_on.map(|d| d.to_string()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

impl RecordsStore for SqliteRecordsStore {
    fn sister_candidates(&self) -> Result<Vec<EntityCandidate>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, full_name, religious_name, code FROM sisters")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let full_name: String = row.get(1)?;
            let religious_name: Option<String> = row.get(2)?;
            let code: Option<String> = row.get(3)?;
            let mut aliases = vec![full_name.clone()];
            aliases.extend(religious_name);
            aliases.extend(code);
            Ok(EntityCandidate { id, display_name: full_name, aliases })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn community_candidates(&self) -> Result<Vec<EntityCandidate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM communities")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(EntityCandidate {
                id,
                display_name: name.clone(),
                aliases: vec![name],
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn sister_profile(&self, id: i64) -> Result<Option<SisterProfile>> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT s.id, s.full_name, s.religious_name, s.code, s.birth_date,
                    c.name, s.stage, s.entered_on
             FROM sisters s
             LEFT JOIN communities c ON c.id = s.community_id
             WHERE s.id = ?1",
            [id],
            |row| {
                Ok(SisterProfile {
                    id: row.get(0)?,
                    full_name: row.get(1)?,
                    religious_name: row.get(2)?,
                    code: row.get(3)?,
                    birth_date: parse_date(row.get(4)?),
                    community: row.get(5)?,
                    stage: row
                        .get::<_, Option<String>>(6)?
                        .and_then(|s| Stage::parse(&s)),
                    entered_on: parse_date(row.get(7)?),
                })
            },
        );
        match result {
            Ok(profile) => Ok(Some(profile)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn community_profile(&self, id: i64) -> Result<Option<CommunityProfile>> {
        let conn = self.conn()?;
        let header = conn.query_row(
            "SELECT id, name, address, established FROM communities WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        );
        let (id, name, address, established) = match header {
            Ok(h) => h,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            "SELECT full_name FROM sisters WHERE community_id = ?1 ORDER BY full_name",
        )?;
        let members = stmt
            .query_map([id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(CommunityProfile {
            id,
            name,
            address,
            established: parse_date(established),
            members,
        }))
    }

    fn communities(&self) -> Result<Vec<CommunityProfile>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, address, established FROM communities ORDER BY name")?;
        let headers = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut result = Vec::with_capacity(headers.len());
        let mut member_stmt = conn.prepare(
            "SELECT full_name FROM sisters WHERE community_id = ?1 ORDER BY full_name",
        )?;
        for (id, name, address, established) in headers {
            let members = member_stmt
                .query_map([id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result.push(CommunityProfile {
                id,
                name,
                address,
                established: parse_date(established),
                members,
            });
        }
        Ok(result)
    }

    fn sisters_in_stage(&self, stage: Stage) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT full_name FROM sisters WHERE stage = ?1 ORDER BY full_name")?;
        let rows = stmt
            .query_map([stage.tag()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn summary(&self) -> Result<RecordsSummary> {
        let conn = self.conn()?;
        let total_sisters: u32 =
            conn.query_row("SELECT COUNT(*) FROM sisters", [], |row| row.get(0))?;
        let total_communities: u32 =
            conn.query_row("SELECT COUNT(*) FROM communities", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(
            "SELECT stage, COUNT(*) FROM sisters
             WHERE stage IS NOT NULL GROUP BY stage",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Fixed stage order regardless of what GROUP BY returned.
        let by_stage = Stage::ALL
            .iter()
            .filter_map(|stage| {
                counts
                    .iter()
                    .find(|(tag, _)| tag == stage.tag())
                    .map(|(_, n)| (*stage, *n))
            })
            .collect();

        Ok(RecordsSummary {
            total_sisters,
            total_communities,
            by_stage,
        })
    }
}

// ============================================================================
// In-memory test double with read-count instrumentation
// ============================================================================

/// In-memory records store. Counts every read so tests can assert that a
/// cache hit performed zero additional database reads.
#[derive(Default)]
pub struct InMemoryRecordsStore {
    sisters: Vec<SisterProfile>,
    communities: Vec<CommunityProfile>,
    reads: AtomicUsize,
}

impl InMemoryRecordsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sister(mut self, sister: SisterProfile) -> Self {
        self.sisters.push(sister);
        self
    }

    pub fn with_community(mut self, community: CommunityProfile) -> Self {
        self.communities.push(community);
        self
    }

    /// Total reads performed through the trait since construction.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordsStore for InMemoryRecordsStore {
    fn sister_candidates(&self) -> Result<Vec<EntityCandidate>> {
        self.record_read();
        Ok(self
            .sisters
            .iter()
            .map(|s| {
                let mut aliases = vec![s.full_name.clone()];
                aliases.extend(s.religious_name.clone());
                aliases.extend(s.code.clone());
                EntityCandidate {
                    id: s.id,
                    display_name: s.full_name.clone(),
                    aliases,
                }
            })
            .collect())
    }

    fn community_candidates(&self) -> Result<Vec<EntityCandidate>> {
        self.record_read();
        Ok(self
            .communities
            .iter()
            .map(|c| EntityCandidate {
                id: c.id,
                display_name: c.name.clone(),
                aliases: vec![c.name.clone()],
            })
            .collect())
    }

    fn sister_profile(&self, id: i64) -> Result<Option<SisterProfile>> {
        self.record_read();
        Ok(self.sisters.iter().find(|s| s.id == id).cloned())
    }

    fn community_profile(&self, id: i64) -> Result<Option<CommunityProfile>> {
        self.record_read();
        Ok(self.communities.iter().find(|c| c.id == id).cloned())
    }

    fn communities(&self) -> Result<Vec<CommunityProfile>> {
        self.record_read();
        Ok(self.communities.clone())
    }

    fn sisters_in_stage(&self, stage: Stage) -> Result<Vec<String>> {
        self.record_read();
        Ok(self
            .sisters
            .iter()
            .filter(|s| s.stage == Some(stage))
            .map(|s| s.full_name.clone())
            .collect())
    }

    fn summary(&self) -> Result<RecordsSummary> {
        self.record_read();
        let by_stage = Stage::ALL
            .iter()
            .filter_map(|stage| {
                let n = self
                    .sisters
                    .iter()
                    .filter(|s| s.stage == Some(*stage))
                    .count() as u32;
                (n > 0).then_some((*stage, n))
            })
            .collect();
        Ok(RecordsSummary {
            total_sisters: self.sisters.len() as u32,
            total_communities: self.communities.len() as u32,
            by_stage,
        })
    }
}
