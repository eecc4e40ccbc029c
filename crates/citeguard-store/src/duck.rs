//! DuckDB-backed section source for direct datastore access.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use citeguard_core::{
    CodeId, FetchOutcome, SectionPayload, SectionSource, SectionVersion, SourceError,
};
use duckdb::{Connection, params};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS section_contents (
    code                VARCHAR NOT NULL,
    section             VARCHAR NOT NULL,
    content             VARCHAR,
    legislative_history VARCHAR,
    url                 VARCHAR,
    division            VARCHAR,
    part                VARCHAR,
    chapter             VARCHAR,
    article             VARCHAR,
    is_multi_version    BOOLEAN DEFAULT false,
    is_current          BOOLEAN DEFAULT true,
    updated_at          VARCHAR
);
CREATE TABLE IF NOT EXISTS section_versions (
    code                VARCHAR NOT NULL,
    section             VARCHAR NOT NULL,
    version_no          INTEGER NOT NULL,
    content             VARCHAR,
    legislative_history VARCHAR,
    operative_date      VARCHAR,
    status              VARCHAR
);
";

/// Section store holding the current text of every code section.
///
/// `section_contents` has one row per `(code, section)` revision; only rows
/// with `is_current = true` are served. Multi-version sections keep their
/// version blocks in `section_versions`, ordered by `version_no`.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
pub struct DuckSectionSource {
    conn: Arc<Mutex<Connection>>,
}

impl DuckSectionSource {
    /// Open an in-memory DuckDB database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened section store");
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Create `section_contents` and `section_versions` if they do not exist.
    pub fn create_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert one section row and its version blocks.
    pub fn insert_section(
        &self,
        payload: &SectionPayload,
        is_current: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO section_contents
                (code, section, content, legislative_history, url,
                 division, part, chapter, article, is_multi_version, is_current, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                payload.code,
                payload.section,
                payload.content,
                payload.legislative_history,
                payload.url,
                payload.division,
                payload.part,
                payload.chapter,
                payload.article,
                payload.is_multi_version,
                is_current,
                payload.updated_at,
            ],
        )?;
        for (i, version) in payload.versions.iter().enumerate() {
            conn.execute(
                "INSERT INTO section_versions
                    (code, section, version_no, content, legislative_history, operative_date, status)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    payload.code,
                    payload.section,
                    (i + 1) as i32,
                    version.content,
                    version.legislative_history,
                    version.operative_date,
                    version.status,
                ],
            )?;
        }
        Ok(())
    }

    /// Number of current sections.
    pub fn section_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT count(*)::BIGINT FROM section_contents WHERE is_current = true",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Blocking keyed lookup of the current row for `(code, section)`.
    pub fn get_section(
        &self,
        code: CodeId,
        section: &str,
    ) -> Result<Option<SectionPayload>, StoreError> {
        let conn = self.conn.lock();
        query_section(&conn, code, section)
    }
}

fn query_section(
    conn: &Connection,
    code: CodeId,
    section: &str,
) -> Result<Option<SectionPayload>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT code, section, content, legislative_history, url,
                division, part, chapter, article, is_multi_version, updated_at
         FROM section_contents
         WHERE code = ? AND section = ? AND is_current = true
         LIMIT 1",
    )?;
    let mut rows = stmt.query(params![code.abbreviation(), section])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let mut payload = SectionPayload {
        code: row.get(0)?,
        section: row.get(1)?,
        content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        legislative_history: row.get(3)?,
        url: row.get(4)?,
        division: row.get(5)?,
        part: row.get(6)?,
        chapter: row.get(7)?,
        article: row.get(8)?,
        is_multi_version: row.get::<_, Option<bool>>(9)?.unwrap_or(false),
        versions: Vec::new(),
        updated_at: row.get(10)?,
    };

    if payload.is_multi_version {
        payload.versions = query_versions(conn, &payload.code, &payload.section)?;
        debug!(
            code = %code,
            section,
            versions = payload.versions.len(),
            "loaded section versions"
        );
    }
    Ok(Some(payload))
}

fn query_versions(
    conn: &Connection,
    code: &str,
    section: &str,
) -> Result<Vec<SectionVersion>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT content, legislative_history, operative_date, status
         FROM section_versions
         WHERE code = ? AND section = ?
         ORDER BY version_no",
    )?;
    let mut rows = stmt.query(params![code, section])?;
    let mut versions = Vec::new();
    while let Some(row) = rows.next()? {
        versions.push(SectionVersion {
            content: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
            legislative_history: row.get(1)?,
            operative_date: row.get(2)?,
            status: row.get(3)?,
        });
    }
    Ok(versions)
}

#[async_trait]
impl SectionSource for DuckSectionSource {
    fn name(&self) -> &str {
        "duckdb"
    }

    async fn fetch_section(
        &self,
        code: CodeId,
        section: &str,
    ) -> Result<FetchOutcome, SourceError> {
        let conn = Arc::clone(&self.conn);
        let section = section.to_string();
        let found = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            query_section(&conn, code, &section)
        })
        .await
        .map_err(StoreError::from)
        .and_then(|r| r)
        .map_err(|e| SourceError::Other(e.to_string()))?;

        Ok(match found {
            Some(payload) => FetchOutcome::Found(payload),
            None => FetchOutcome::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(code: &str, section: &str, content: &str) -> SectionPayload {
        SectionPayload {
            code: code.into(),
            section: section.into(),
            content: content.into(),
            legislative_history: Some("Enacted 1872.".into()),
            url: Some(format!("https://example.test/{code}/{section}")),
            division: None,
            part: Some("1".into()),
            chapter: Some("1".into()),
            article: None,
            is_multi_version: false,
            versions: vec![],
            updated_at: Some("2024-06-01".into()),
        }
    }

    fn seeded() -> DuckSectionSource {
        let store = DuckSectionSource::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store
            .insert_section(&payload("PEN", "187", "Murder is the unlawful killing..."), true)
            .unwrap();
        store
            .insert_section(&payload("PEN", "188", "Old text."), false)
            .unwrap();
        store
            .insert_section(&payload("PEN", "188", "Current text."), true)
            .unwrap();
        store
    }

    #[tokio::test]
    async fn found_returns_current_row() {
        let store = seeded();
        match store.fetch_section(CodeId::Pen, "187").await.unwrap() {
            FetchOutcome::Found(p) => {
                assert_eq!(p.code, "PEN");
                assert!(p.content.starts_with("Murder"));
                assert_eq!(p.part.as_deref(), Some("1"));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn superseded_rows_are_ignored() {
        let store = seeded();
        match store.fetch_section(CodeId::Pen, "188").await.unwrap() {
            FetchOutcome::Found(p) => assert_eq!(p.content, "Current text."),
            other => panic!("expected Found, got {other:?}"),
        }
        assert_eq!(store.section_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_section_is_not_found() {
        let store = seeded();
        assert_eq!(
            store.fetch_section(CodeId::Pen, "9999").await.unwrap(),
            FetchOutcome::NotFound
        );
        assert_eq!(
            store.fetch_section(CodeId::Fam, "187").await.unwrap(),
            FetchOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn versions_come_back_in_order() {
        let store = seeded();
        let mut p = payload("CCP", "35", "");
        p.is_multi_version = true;
        p.versions = vec![
            SectionVersion {
                content: "First.".into(),
                legislative_history: None,
                operative_date: Some("2021-01-01".into()),
                status: Some("active".into()),
            },
            SectionVersion {
                content: "Second.".into(),
                legislative_history: None,
                operative_date: Some("2026-01-01".into()),
                status: Some("pending".into()),
            },
        ];
        store.insert_section(&p, true).unwrap();

        let FetchOutcome::Found(found) = store.fetch_section(CodeId::Ccp, "35").await.unwrap()
        else {
            panic!("expected Found");
        };
        assert!(found.is_multi_version);
        let contents: Vec<_> = found.versions.iter().map(|v| v.content.as_str()).collect();
        assert_eq!(contents, ["First.", "Second."]);
    }

    #[tokio::test]
    async fn missing_schema_is_a_source_error() {
        let store = DuckSectionSource::open_in_memory().unwrap();
        assert!(store.fetch_section(CodeId::Pen, "187").await.is_err());
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sections.duckdb");
        {
            let store = DuckSectionSource::open(&path).unwrap();
            store.create_schema().unwrap();
            store
                .insert_section(&payload("EVID", "761", "Cross-examination..."), true)
                .unwrap();
        }
        assert!(path.exists());

        let store = DuckSectionSource::open(&path).unwrap();
        let found = store.get_section(CodeId::Evid, "761").unwrap().unwrap();
        assert_eq!(found.content, "Cross-examination...");
    }
}
