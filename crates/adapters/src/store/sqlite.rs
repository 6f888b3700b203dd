use super::codec::{decode_embedding, encode_embedding};
use super::error::{CorruptReason, InvalidEmbeddingReason, StoreError};
use kwcache_ports::{EmbeddingVector, InsertSummary, KeywordEntry, KeywordStorePort};
use kwcache_shared::Result;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Table holding every cached entry.
pub const TABLE_NAME: &str = "keyword_embeddings";

/// Schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Keywords bound per `IN (...)` query. Stays under SQLite's parameter limit.
pub const MAX_PARAMS_PER_QUERY: usize = 500;

/// Default time a writer waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS keyword_embeddings (
    keyword TEXT PRIMARY KEY NOT NULL,
    embedding BLOB NOT NULL
);";

const INSERT_SQL: &str =
    "INSERT OR IGNORE INTO keyword_embeddings (keyword, embedding) VALUES (?1, ?2)";

/// Options applied when opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long an operation waits for a competing writer before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Persistent keyword to embedding cache backed by a single SQLite file.
///
/// Entries are immutable once written: inserting a keyword that is already
/// present leaves the stored vector untouched. The connection is released on
/// [`close`](Self::close) or when the handle is dropped.
#[derive(Debug)]
pub struct KeywordEmbeddingStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl KeywordEmbeddingStore {
    /// Open (or create) the store at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_options(path, StoreOptions::default())
    }

    /// Open (or create) the store at `path`.
    ///
    /// Missing parent directories are created and the schema is ensured.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path, options)?;
        tracing::debug!(path = %path.display(), "opened keyword store");
        Ok(Self {
            path,
            conn: Some(conn),
        })
    }

    /// Open the store, run `body`, then close it.
    ///
    /// An error from `body` wins over a close failure.
    pub fn scoped<T, E>(
        path: impl AsRef<Path>,
        body: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        Self::scoped_with_options(path, StoreOptions::default(), body)
    }

    /// [`Self::scoped`] with explicit open options.
    pub fn scoped_with_options<T, E>(
        path: impl AsRef<Path>,
        options: StoreOptions,
        body: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut store = Self::open_with_options(path, options)?;
        let outcome = body(&mut store);
        let closed = store.close();
        let value = outcome?;
        closed?;
        Ok(value)
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Fetch the stored embeddings for `keywords`.
    ///
    /// Absent keywords are omitted and duplicates are harmless. The batch is
    /// read inside one transaction so it observes a single snapshot.
    pub fn get<S: AsRef<str>>(
        &self,
        keywords: &[S],
    ) -> Result<BTreeMap<String, EmbeddingVector>, StoreError> {
        const OP: &str = "get";
        let conn = self.connection(OP)?;
        if keywords.is_empty() {
            return Ok(BTreeMap::new());
        }

        let unique: BTreeSet<&str> = keywords.iter().map(AsRef::as_ref).collect();
        let unique: Vec<&str> = unique.into_iter().collect();

        let tx = conn.unchecked_transaction().map_err(StoreError::storage(OP))?;
        let mut found = BTreeMap::new();
        for chunk in unique.chunks(MAX_PARAMS_PER_QUERY) {
            let mut stmt = tx
                .prepare(&select_sql(chunk.len()))
                .map_err(StoreError::storage(OP))?;
            let mut rows = stmt
                .query(params_from_iter(chunk.iter()))
                .map_err(StoreError::storage(OP))?;
            while let Some(row) = rows.next().map_err(StoreError::storage(OP))? {
                let keyword: String = row.get(0).map_err(StoreError::storage(OP))?;
                let value = row.get_ref(1).map_err(StoreError::storage(OP))?;
                let vector = decode_value(&keyword, value)?;
                found.insert(keyword, vector);
            }
        }
        tx.commit().map_err(StoreError::storage(OP))?;

        tracing::debug!(
            requested = unique.len(),
            hits = found.len(),
            "keyword store lookup"
        );
        Ok(found)
    }

    /// Insert every entry whose keyword is not stored yet.
    ///
    /// All entries are validated before anything is written, and the batch
    /// commits in one transaction. On error the store is unchanged.
    pub fn add(&mut self, entries: &[KeywordEntry]) -> Result<InsertSummary, StoreError> {
        const OP: &str = "add";
        let Some(conn) = self.conn.as_mut() else {
            return Err(StoreError::UseAfterClose { operation: OP });
        };
        if entries.is_empty() {
            return Ok(InsertSummary::default());
        }

        let rows = entries
            .iter()
            .map(encode_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::storage(OP))?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare_cached(INSERT_SQL).map_err(StoreError::storage(OP))?;
            for (keyword, blob) in &rows {
                inserted += stmt
                    .execute(params![keyword, blob])
                    .map_err(StoreError::storage(OP))?;
            }
        }
        tx.commit().map_err(StoreError::storage(OP))?;

        let summary = InsertSummary {
            inserted,
            skipped: entries.len() - inserted,
        };
        tracing::debug!(
            path = %self.path.display(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            "keyword store insert"
        );
        Ok(summary)
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<u64, StoreError> {
        const OP: &str = "count";
        let conn = self.connection(OP)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM keyword_embeddings", [], |row| {
                row.get(0)
            })
            .map_err(StoreError::storage(OP))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Release the connection. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, source)| StoreError::Storage {
                operation: "close",
                source,
            })?;
        tracing::debug!(path = %self.path.display(), "closed keyword store");
        Ok(())
    }

    fn connection(&self, operation: &'static str) -> Result<&Connection, StoreError> {
        self.conn
            .as_ref()
            .ok_or(StoreError::UseAfterClose { operation })
    }
}

impl KeywordStorePort for KeywordEmbeddingStore {
    fn get_many(&self, keywords: &[String]) -> Result<BTreeMap<String, EmbeddingVector>> {
        Ok(self.get(keywords)?)
    }

    fn add_many(&mut self, entries: &[KeywordEntry]) -> Result<InsertSummary> {
        Ok(self.add(entries)?)
    }

    fn count(&self) -> Result<u64> {
        Ok(Self::count(self)?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(Self::close(self)?)
    }
}

fn open_connection(path: &Path, options: StoreOptions) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            operation: "create store directory",
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let conn = Connection::open(path).map_err(StoreError::storage("open"))?;
    conn.busy_timeout(options.busy_timeout)
        .map_err(StoreError::storage("open"))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .map_err(StoreError::storage("open"))?;

    ensure_schema(&conn)?;
    Ok(conn)
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StoreError::storage("read schema version"))?;
    if !(0..=SCHEMA_VERSION).contains(&version) {
        return Err(StoreError::UnsupportedSchema {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    conn.execute_batch(CREATE_TABLE_SQL)
        .map_err(StoreError::storage("create schema"))?;

    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
            .map_err(StoreError::storage("write schema version"))?;
    }
    Ok(())
}

fn select_sql(count: usize) -> String {
    let placeholders = vec!["?"; count].join(", ");
    format!("SELECT keyword, embedding FROM {TABLE_NAME} WHERE keyword IN ({placeholders})")
}

fn encode_entry(entry: &KeywordEntry) -> Result<(&str, Vec<u8>), StoreError> {
    let invalid = |reason| StoreError::InvalidEmbedding {
        keyword: entry.keyword.clone(),
        reason,
    };
    if entry.keyword.is_empty() {
        return Err(invalid(InvalidEmbeddingReason::EmptyKeyword));
    }
    let Some(values) = entry.embedding.as_f32() else {
        return Err(invalid(InvalidEmbeddingReason::WrongElementType(
            entry.embedding.element_type(),
        )));
    };
    if values.is_empty() {
        return Err(invalid(InvalidEmbeddingReason::EmptyVector));
    }
    Ok((entry.keyword.as_str(), encode_embedding(values)))
}

fn decode_value(keyword: &str, value: ValueRef<'_>) -> Result<EmbeddingVector, StoreError> {
    let corrupt = |reason| StoreError::CorruptEntry {
        keyword: keyword.to_string(),
        reason,
    };
    match value {
        ValueRef::Blob(bytes) => decode_embedding(bytes)
            .map(EmbeddingVector::from_vec)
            .ok_or_else(|| corrupt(CorruptReason::Length(bytes.len()))),
        ValueRef::Null => Err(corrupt(CorruptReason::Null)),
        ValueRef::Integer(_) => Err(corrupt(CorruptReason::NotBlob("integer"))),
        ValueRef::Real(_) => Err(corrupt(CorruptReason::NotBlob("real"))),
        ValueRef::Text(_) => Err(corrupt(CorruptReason::NotBlob("text"))),
    }
}
