use std::collections::VecDeque;

use rusqlite::{Connection, Transaction, TransactionBehavior, params, types::ValueRef};
use serde::Serialize;

use super::{
    error::SeriesError,
    payload::Payload,
    storage::{Storage, max_timestamp, min_timestamp},
};

const RANGE_FIRST: &str = "SELECT ts, data FROM series
    WHERE ts >= ?1 AND ts <= ?2 ORDER BY ts ASC LIMIT ?3";
const RANGE_NEXT: &str = "SELECT ts, data FROM series
    WHERE ts > ?1 AND ts <= ?2 ORDER BY ts ASC LIMIT ?3";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub timestamp: f64,
    pub payload: Payload,
}

/// One window of the series plus whether data exists on either side of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub readings: Vec<Reading>,
    pub has_prev: bool,
    pub has_more: bool,
}

/// Lazy ascending scan over `start <= ts <= end`.
///
/// Rows are pulled from the primary key index `page_size` at a time, resuming
/// after the last timestamp seen, and each payload is decoded only when its
/// element is produced. A payload that fails to decode yields a single
/// `CorruptRecord` item and the scan carries on with the next row; collect into
/// a `Result` to stop at the first one instead. Any other error ends the scan.
pub struct Readings<'c> {
    conn: &'c Connection,
    after: Option<f64>,
    start: f64,
    end: f64,
    page_size: usize,
    buf: VecDeque<(f64, Vec<u8>)>,
    exhausted: bool,
}

impl<'c> Readings<'c> {
    pub(crate) fn new(conn: &'c Connection, start: f64, end: f64, page_size: usize) -> Self {
        Self {
            conn,
            after: None,
            start,
            end,
            page_size: page_size.max(1),
            buf: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch(&mut self) -> Result<(), rusqlite::Error> {
        let (sql, lower) = match self.after {
            Some(ts) => (RANGE_NEXT, ts),
            None => (RANGE_FIRST, self.start),
        };

        let conn = self.conn;
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params![lower, self.end, self.page_size as i64])?;
        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            let ts: f64 = row.get(0)?;
            // keep the raw bytes so a bad row only fails its own decode
            let raw = match row.get_ref(1)? {
                ValueRef::Text(b) | ValueRef::Blob(b) => b.to_vec(),
                _ => Vec::new(),
            };
            self.buf.push_back((ts, raw));
            fetched += 1;
        }

        if fetched < self.page_size {
            self.exhausted = true;
        }
        if let Some((ts, _)) = self.buf.back() {
            self.after = Some(*ts);
        }
        Ok(())
    }
}

impl Iterator for Readings<'_> {
    type Item = Result<Reading, SeriesError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch() {
                self.buf.clear();
                self.exhausted = true;
                return Some(Err(e.into()));
            }
        }

        let (timestamp, raw) = self.buf.pop_front()?;
        Some(Payload::decode(timestamp, &raw).map(|payload| Reading { timestamp, payload }))
    }
}

impl std::iter::FusedIterator for Readings<'_> {}

pub(crate) fn has_before(conn: &Connection, start: f64) -> Result<bool, SeriesError> {
    Ok(min_timestamp(conn)?.is_some_and(|min| min < start))
}

pub(crate) fn has_after(conn: &Connection, end: f64) -> Result<bool, SeriesError> {
    Ok(max_timestamp(conn)?.is_some_and(|max| max > end))
}

/// Reads the window and both flags inside one read transaction.
pub(crate) fn page(
    conn: &Connection,
    start: f64,
    end: f64,
    page_size: usize,
) -> Result<Page, SeriesError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
    let has_prev = has_before(&tx, start)?;
    let has_more = has_after(&tx, end)?;
    let readings = Readings::new(&tx, start, end, page_size).collect::<Result<Vec<_>, _>>()?;
    tx.commit()?;

    Ok(Page {
        readings,
        has_prev,
        has_more,
    })
}

impl Storage {
    /// Every reading with `start <= ts <= end`, ascending. Reissue to restart.
    pub fn range(&self, start: f64, end: f64) -> Readings<'_> {
        Readings::new(&self.conn, start, end, self.page_size)
    }

    /// True when something older than `start` is stored.
    pub fn has_before(&self, start: f64) -> Result<bool, SeriesError> {
        has_before(&self.conn, start)
    }

    /// True when something newer than `end` is stored.
    pub fn has_after(&self, end: f64) -> Result<bool, SeriesError> {
        has_after(&self.conn, end)
    }

    pub fn page(&self, start: f64, end: f64) -> Result<Page, SeriesError> {
        page(&self.conn, start, end, self.page_size)
    }
}
