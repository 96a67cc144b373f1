use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, params};
use tracing::debug;

use super::{error::SeriesError, payload::Payload};

pub const TABLE: &str = "series";

/// Literal location string that selects an ephemeral in-memory store.
pub const MEMORY: &str = ":memory:";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS series (
    ts   REAL NOT NULL PRIMARY KEY,
    data TEXT NOT NULL
)";

const SCHEMA_STRICT: &str = "CREATE TABLE series (
    ts   REAL NOT NULL PRIMARY KEY,
    data TEXT NOT NULL
)";

const INSERT: &str = "INSERT INTO series (ts, data) VALUES (?1, ?2)";
const MIN_TS: &str = "SELECT MIN(ts) FROM series";
const MAX_TS: &str = "SELECT MAX(ts) FROM series";

/// Where the backing table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    pub fn to_path_buf(&self) -> PathBuf {
        match self {
            Self::File(p) => p.clone(),
            Self::Memory => PathBuf::from(MEMORY),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(p) => write!(f, "{}", p.display()),
            Self::Memory => f.write_str(MEMORY),
        }
    }
}

impl From<&str> for Location {
    fn from(value: &str) -> Self {
        match value {
            MEMORY => Self::Memory,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

impl From<String> for Location {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<&Path> for Location {
    fn from(value: &Path) -> Self {
        match value.to_str() {
            Some(MEMORY) => Self::Memory,
            _ => Self::File(value.to_path_buf()),
        }
    }
}

impl From<PathBuf> for Location {
    fn from(value: PathBuf) -> Self {
        Self::from(value.as_path())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the table if absent, otherwise reuse it when its shape matches.
    #[default]
    CreateIfMissing,
    /// Fail with `AlreadyExists` if the table is already there.
    CreateNew,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub mode: OpenMode,
    /// Upper bound on how long a call waits for another handle's lock.
    pub busy_timeout: Duration,
    /// Rows pulled from the index per fetch while iterating a range.
    pub page_size: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::CreateIfMissing,
            busy_timeout: Duration::from_secs(5),
            page_size: 256,
        }
    }
}

/// An open, exclusively owned session to one series table.
///
/// `close` consumes the handle, so nothing can be called on a closed store.
/// Dropping the handle releases the connection as well.
pub struct Storage {
    pub(super) conn: Connection,
    pub(super) page_size: usize,
    location: Location,
}

impl Storage {
    pub fn open(location: impl Into<Location>) -> Result<Self, SeriesError> {
        Self::open_with(location, StoreOptions::default())
    }

    pub fn open_in_memory() -> Result<Self, SeriesError> {
        Self::open_with(Location::Memory, StoreOptions::default())
    }

    pub fn open_with(location: impl Into<Location>, opts: StoreOptions) -> Result<Self, SeriesError> {
        let location = location.into();
        let conn = match &location {
            Location::File(path) => Connection::open(path),
            Location::Memory => Connection::open_in_memory(),
        }
        .map_err(|source| SeriesError::ConnectionFailed {
            location: location.to_path_buf(),
            source,
        })?;

        prepare(&conn, &location, &opts)?;
        debug!("opened series store at {location}");

        Ok(Self {
            conn,
            page_size: opts.page_size.max(1),
            location,
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Appends one reading. Returns once the row is committed.
    pub fn write(&self, timestamp: f64, payload: &Payload) -> Result<(), SeriesError> {
        insert(&self.conn, timestamp, payload)
    }

    pub fn min_timestamp(&self) -> Result<Option<f64>, SeriesError> {
        min_timestamp(&self.conn)
    }

    pub fn max_timestamp(&self) -> Result<Option<f64>, SeriesError> {
        max_timestamp(&self.conn)
    }

    pub fn close(self) -> Result<(), SeriesError> {
        let location = self.location;
        self.conn.close().map_err(|(_, e)| SeriesError::Sqlite(e))?;
        debug!("closed series store at {location}");
        Ok(())
    }
}

/// Configures a fresh connection and makes sure the series table is usable.
pub(crate) fn prepare(
    conn: &Connection,
    location: &Location,
    opts: &StoreOptions,
) -> Result<(), SeriesError> {
    let classify = |err: rusqlite::Error| {
        if SeriesError::is_connection_failure(&err) {
            SeriesError::ConnectionFailed {
                location: location.to_path_buf(),
                source: err,
            }
        } else {
            SeriesError::Sqlite(err)
        }
    };

    conn.busy_timeout(opts.busy_timeout).map_err(classify)?;
    if let Location::File(_) = location {
        // lets the sampling loop and the server hold separate handles on one file
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(classify)?;
    }

    let columns = table_columns(conn).map_err(classify)?;
    if columns.is_empty() {
        let sql = match opts.mode {
            OpenMode::CreateIfMissing => SCHEMA,
            OpenMode::CreateNew => SCHEMA_STRICT,
        };
        return match conn.execute(sql, ()) {
            Ok(_) => Ok(()),
            // another handle created it between the check and the CREATE
            Err(rusqlite::Error::SqliteFailure(_, Some(msg))) if msg.contains("already exists") => {
                Err(SeriesError::AlreadyExists {
                    table: TABLE,
                    reason: None,
                })
            }
            Err(e) => Err(classify(e)),
        };
    }

    match opts.mode {
        OpenMode::CreateNew => Err(SeriesError::AlreadyExists {
            table: TABLE,
            reason: None,
        }),
        OpenMode::CreateIfMissing => check_shape(&columns),
    }
}

struct Column {
    name: String,
    decl_type: String,
    pk: bool,
}

fn table_columns(conn: &Connection) -> Result<Vec<Column>, rusqlite::Error> {
    let mut stmt = conn.prepare("PRAGMA table_info(series)")?;
    let rows = stmt.query_map((), |row| {
        Ok(Column {
            name: row.get(1)?,
            decl_type: row.get(2)?,
            pk: row.get::<_, i64>(5)? != 0,
        })
    })?;
    let columns = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn check_shape(columns: &[Column]) -> Result<(), SeriesError> {
    let incompatible = |reason: String| SeriesError::AlreadyExists {
        table: TABLE,
        reason: Some(reason),
    };

    if columns.len() != 2 {
        return Err(incompatible(format!("expected 2 columns, found {}", columns.len())));
    }

    for (name, decl_type, pk) in [("ts", "REAL", true), ("data", "TEXT", false)] {
        let Some(col) = columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)) else {
            return Err(incompatible(format!("missing column `{name}`")));
        };
        if !col.decl_type.eq_ignore_ascii_case(decl_type) {
            return Err(incompatible(format!(
                "column `{name}` is {}, expected {decl_type}",
                col.decl_type
            )));
        }
        if col.pk != pk {
            return Err(incompatible(format!("column `{name}` primary key mismatch")));
        }
    }

    Ok(())
}

pub(crate) fn insert(conn: &Connection, timestamp: f64, payload: &Payload) -> Result<(), SeriesError> {
    if !timestamp.is_finite() {
        return Err(SeriesError::InvalidTimestamp);
    }
    let data = payload.encode()?;
    conn.prepare_cached(INSERT)?
        .execute(params![timestamp, data])
        .map_err(|e| SeriesError::from_insert(e, timestamp))?;
    Ok(())
}

pub(crate) fn min_timestamp(conn: &Connection) -> Result<Option<f64>, SeriesError> {
    bound(conn, MIN_TS)
}

pub(crate) fn max_timestamp(conn: &Connection) -> Result<Option<f64>, SeriesError> {
    bound(conn, MAX_TS)
}

/// MIN/MAX on the primary key are answered from its index.
fn bound(conn: &Connection, sql: &str) -> Result<Option<f64>, SeriesError> {
    Ok(conn
        .prepare_cached(sql)?
        .query_row((), |row| row.get::<_, Option<f64>>(0))?)
}
