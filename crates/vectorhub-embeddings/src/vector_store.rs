//! Vector store capability and a `SQLite` brute-force implementation.
//!
//! The store scans caller-owned tables addressed by a [`TableRef`]. Vectors
//! may be stored as little-endian `f32` BLOBs or as JSON arrays in TEXT
//! columns. Identifiers are validated and quoted before they reach SQL.

use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::{cosine_similarity, euclidean_distance};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Convert an f32 slice to a byte blob for storage.
pub fn f32_slice_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert a byte blob back to an f32 vector.
pub fn blob_to_f32_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Distance function used to rank rows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Cosine distance; similarity is cosine similarity.
    #[default]
    Cosine,
    /// Euclidean distance; similarity is `1 - distance`.
    Euclidean,
}

impl DistanceMetric {
    /// Similarity of `row` to `query` under this metric.
    pub fn similarity(self, query: &[f32], row: &[f32]) -> Result<f32> {
        match self {
            Self::Cosine => cosine_similarity(query, row),
            Self::Euclidean => euclidean_distance(query, row).map(|d| 1.0 - d),
        }
    }
}

/// Reference to a caller-owned table holding vectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    /// Table name, optionally `schema.table`.
    pub table: String,
    /// Column holding the row id.
    pub id_column: String,
    /// Column holding the vector.
    pub vector_column: String,
    /// Optional column returned alongside each hit.
    pub text_column: Option<String>,
}

impl TableRef {
    /// Reference without a text column.
    pub fn new(
        table: impl Into<String>,
        id_column: impl Into<String>,
        vector_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            id_column: id_column.into(),
            vector_column: vector_column.into(),
            text_column: None,
        }
    }

    /// Also return `column` with every hit.
    #[must_use]
    pub fn with_text_column(mut self, column: impl Into<String>) -> Self {
        self.text_column = Some(column.into());
        self
    }

    /// Reject anything that is not a plain (or schema-qualified) identifier.
    pub fn validate(&self) -> Result<()> {
        let mut parts = self.table.split('.');
        let qualified_ok = match (parts.next(), parts.next(), parts.next()) {
            (Some(t), None, None) => is_identifier(t),
            (Some(s), Some(t), None) => is_identifier(s) && is_identifier(t),
            _ => false,
        };
        if !qualified_ok {
            return Err(invalid_identifier("table", &self.table));
        }
        if !is_identifier(&self.id_column) {
            return Err(invalid_identifier("id column", &self.id_column));
        }
        if !is_identifier(&self.vector_column) {
            return Err(invalid_identifier("vector column", &self.vector_column));
        }
        if let Some(text) = &self.text_column {
            if !is_identifier(text) {
                return Err(invalid_identifier("text column", text));
            }
        }
        Ok(())
    }

    fn quoted_table(&self) -> String {
        self.table
            .split('.')
            .map(quote)
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn is_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

fn invalid_identifier(what: &str, value: &str) -> EmbeddingError {
    EmbeddingError::InvalidArgument(format!("invalid {what} identifier: {value:?}"))
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// A scan over one table.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    /// Table and columns to scan.
    pub target: TableRef,
    /// Query vector.
    pub query: Vec<f32>,
    /// Ranking metric.
    pub metric: DistanceMetric,
    /// Maximum rows returned.
    pub top_k: usize,
    /// Minimum similarity for a row to be returned.
    pub threshold: f32,
}

/// One ranked row.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanRow {
    /// Row id, stringified.
    pub id: String,
    /// Similarity to the query (higher is closer).
    pub similarity: f32,
    /// Text column value, when requested and non-null.
    pub text: Option<String>,
}

/// Backend that ranks stored vectors against a query.
pub trait VectorStore: Send + Sync {
    /// Rows with `similarity >= threshold`, most similar first, at most `top_k`.
    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanRow>>;

    /// Cheap liveness probe.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Vector store over a `SQLite` connection using brute-force ranking.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Wrap an open connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// In-memory store, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    /// Create a simple `(id TEXT PRIMARY KEY, embedding BLOB, content TEXT)` table.
    pub fn create_table(&self, table: &str) -> Result<()> {
        if !is_identifier(table) {
            return Err(invalid_identifier("table", table));
        }
        self.conn.lock().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                content TEXT
            )",
            quote(table)
        ))?;
        Ok(())
    }

    /// Insert or replace a row in a table made by [`Self::create_table`].
    pub fn insert(&self, table: &str, id: &str, embedding: &[f32], content: Option<&str>) -> Result<()> {
        if !is_identifier(table) {
            return Err(invalid_identifier("table", table));
        }
        let _ = self.conn.lock().execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, embedding, content) VALUES (?1, ?2, ?3)",
                quote(table)
            ),
            params![id, f32_slice_to_blob(embedding), content],
        )?;
        Ok(())
    }

    fn load_rows(&self, target: &TableRef) -> Result<Vec<(Value, Value, Option<String>)>> {
        let text_select = target
            .text_column
            .as_deref()
            .map_or_else(|| "NULL".to_string(), quote);
        let sql = format!(
            "SELECT {}, {}, {} FROM {}",
            quote(&target.id_column),
            quote(&target.vector_column),
            text_select,
            target.quoted_table()
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, Value>(0)?,
                    row.get::<_, Value>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn id_to_string(id: Value) -> Option<String> {
    match id {
        Value::Text(s) => Some(s),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Blob(_) | Value::Null => None,
    }
}

fn decode_vector(raw: Value) -> Option<Vec<f32>> {
    match raw {
        Value::Blob(bytes) if bytes.len() % 4 == 0 => Some(blob_to_f32_vec(&bytes)),
        Value::Text(json) => serde_json::from_str(&json).ok(),
        _ => None,
    }
}

/// Score raw rows against the query. Returns the scored rows and how many
/// were skipped for an unreadable id or vector, a dimension mismatch, or
/// zero magnitude.
fn rank_rows(
    raw: Vec<(Value, Value, Option<String>)>,
    request: &ScanRequest,
) -> (Vec<ScanRow>, usize) {
    let total = raw.len();
    let ranked: Vec<ScanRow> = raw
        .into_iter()
        .filter_map(|(id, vector, text)| {
            let id = id_to_string(id)?;
            let vector = decode_vector(vector)?;
            let similarity = request.metric.similarity(&request.query, &vector).ok()?;
            Some(ScanRow {
                id,
                similarity,
                text,
            })
        })
        .collect();
    let skipped = total - ranked.len();
    (ranked, skipped)
}

/// Filter, sort descending, and truncate ranked rows.
pub fn shape_rows(mut rows: Vec<ScanRow>, threshold: f32, top_k: usize) -> Vec<ScanRow> {
    rows.retain(|r| r.similarity >= threshold);
    rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    rows.truncate(top_k);
    rows
}

impl VectorStore for SqliteVectorStore {
    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanRow>> {
        request.target.validate()?;
        let raw = self.load_rows(&request.target)?;
        let total = raw.len();
        let (ranked, skipped) = rank_rows(raw, request);
        if skipped > 0 {
            warn!(
                table = %request.target.table,
                skipped,
                dimensions = request.query.len(),
                "vector scan skipped unreadable or mismatched rows"
            );
        }
        debug!(
            table = %request.target.table,
            scanned = total,
            ranked = ranked.len(),
            "vector scan complete"
        );
        Ok(shape_rows(ranked, request.threshold, request.top_k))
    }

    fn ping(&self) -> Result<()> {
        let _: i64 = self.conn.lock().query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(target: TableRef, query: Vec<f32>, top_k: usize, threshold: f32) -> ScanRequest {
        ScanRequest {
            target,
            query,
            metric: DistanceMetric::Cosine,
            top_k,
            threshold,
        }
    }

    fn seeded_store() -> SqliteVectorStore {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        store.create_table("docs").unwrap();
        store.insert("docs", "a", &[1.0, 0.0], Some("alpha")).unwrap();
        store.insert("docs", "b", &[0.8, 0.6], Some("beta")).unwrap();
        store.insert("docs", "c", &[0.0, 1.0], None).unwrap();
        store.insert("docs", "d", &[-1.0, 0.0], Some("delta")).unwrap();
        store
    }

    #[test]
    fn blob_roundtrip() {
        let original = vec![1.0f32, -2.5, 3.25, 0.0, f32::MAX, f32::MIN];
        let blob = f32_slice_to_blob(&original);
        assert_eq!(blob.len(), original.len() * 4);
        assert_eq!(blob_to_f32_vec(&blob), original);
    }

    #[test]
    fn scan_ranks_filters_and_truncates() {
        let store = seeded_store();
        let target = TableRef::new("docs", "id", "embedding").with_text_column("content");
        let rows = store.scan(&request(target, vec![1.0, 0.0], 10, 0.5)).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((rows[0].similarity - 1.0).abs() < 1e-6);
        assert!((rows[1].similarity - 0.8).abs() < 1e-6);
        assert_eq!(rows[0].text.as_deref(), Some("alpha"));
    }

    #[test]
    fn scan_top_k_limits() {
        let store = seeded_store();
        let target = TableRef::new("docs", "id", "embedding");
        let rows = store.scan(&request(target, vec![1.0, 0.0], 1, -1.0)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "a");
        assert!(rows[0].text.is_none());
    }

    #[test]
    fn scan_threshold_is_inclusive() {
        let store = seeded_store();
        let target = TableRef::new("docs", "id", "embedding");
        let rows = store.scan(&request(target, vec![1.0, 0.0], 10, 0.0)).unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn scan_skips_mismatched_dimensions() {
        let store = seeded_store();
        store.insert("docs", "wide", &[1.0, 0.0, 0.0], None).unwrap();
        let target = TableRef::new("docs", "id", "embedding");
        let rows = store.scan(&request(target, vec![1.0, 0.0], 10, -1.0)).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.id != "wide"));
    }

    #[test]
    fn rank_rows_counts_skipped() {
        let store = seeded_store();
        store.insert("docs", "wide", &[1.0, 0.0, 0.0], None).unwrap();
        store.insert("docs", "zero", &[0.0, 0.0], None).unwrap();
        let target = TableRef::new("docs", "id", "embedding");
        let raw = store.load_rows(&target).unwrap();
        let (ranked, skipped) = rank_rows(raw, &request(target, vec![1.0, 0.0], 10, -1.0));
        assert_eq!(ranked.len(), 4);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn scan_reads_json_vectors_and_integer_ids() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute_batch(
                "CREATE TABLE items (item_id INTEGER PRIMARY KEY, vec TEXT, body TEXT);
                 INSERT INTO items VALUES (7, '[0.0, 1.0]', 'seven');
                 INSERT INTO items VALUES (8, 'not json', 'broken');",
            )
            .unwrap();
        }
        let target = TableRef::new("main.items", "item_id", "vec").with_text_column("body");
        let rows = store.scan(&request(target, vec![0.0, 2.0], 5, 0.9)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "7");
        assert_eq!(rows[0].text.as_deref(), Some("seven"));
    }

    #[test]
    fn scan_missing_table_is_storage_error() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let target = TableRef::new("nope", "id", "embedding");
        assert_matches!(
            store.scan(&request(target, vec![1.0], 1, 0.0)),
            Err(EmbeddingError::Sqlite(_))
        );
    }

    #[test]
    fn euclidean_metric_ranks_by_distance() {
        let store = seeded_store();
        let mut req = request(TableRef::new("docs", "id", "embedding"), vec![1.0, 0.0], 2, -10.0);
        req.metric = DistanceMetric::Euclidean;
        let rows = store.scan(&req).unwrap();
        assert_eq!(rows[0].id, "a");
        assert!((rows[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(rows[1].id, "b");
    }

    #[test]
    fn validate_accepts_plain_and_qualified() {
        assert!(TableRef::new("docs", "id", "v").validate().is_ok());
        assert!(TableRef::new("app_schema.docs_2", "_id", "v").validate().is_ok());
    }

    #[test]
    fn validate_rejects_injection() {
        let bad = [
            TableRef::new("docs; DROP TABLE docs", "id", "v"),
            TableRef::new("a.b.c", "id", "v"),
            TableRef::new("docs", "id\"", "v"),
            TableRef::new("docs", "id", "1v"),
            TableRef::new("docs", "id", "v").with_text_column("t t"),
            TableRef::new("", "id", "v"),
        ];
        for target in bad {
            assert_matches!(target.validate(), Err(EmbeddingError::InvalidArgument(_)));
        }
    }

    #[test]
    fn create_table_rejects_bad_name() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        assert_matches!(
            store.create_table("x y"),
            Err(EmbeddingError::InvalidArgument(_))
        );
    }

    #[test]
    fn ping_succeeds() {
        assert!(SqliteVectorStore::open_in_memory().unwrap().ping().is_ok());
    }

    #[test]
    fn shape_rows_sorts_descending() {
        let rows = vec![
            ScanRow { id: "x".into(), similarity: 0.2, text: None },
            ScanRow { id: "y".into(), similarity: 0.9, text: None },
            ScanRow { id: "z".into(), similarity: 0.5, text: None },
        ];
        let shaped = shape_rows(rows, 0.3, 5);
        let ids: Vec<&str> = shaped.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);
    }
}
