use tokio_rusqlite::Connection;
use tracing::debug;

use super::{
    error::SeriesError,
    payload::Payload,
    query::{self, Page},
    storage::{self, Location, StoreOptions},
};

/// Async handle to a series store.
///
/// Every call runs on the connection's own SQLite thread, one at a time, so
/// clones can be handed to any number of tasks. Closing one clone closes the
/// connection for all of them.
#[derive(Clone)]
pub struct SharedStorage {
    conn: Connection,
    page_size: usize,
}

impl SharedStorage {
    pub async fn open(
        location: impl Into<Location>,
        opts: StoreOptions,
    ) -> Result<Self, SeriesError> {
        let location = location.into();
        let conn = match &location {
            Location::File(path) => Connection::open(path).await,
            Location::Memory => Connection::open_in_memory().await,
        }
        .map_err(|e| match e {
            tokio_rusqlite::Error::Rusqlite(source) => SeriesError::ConnectionFailed {
                location: location.to_path_buf(),
                source,
            },
            other => SeriesError::Worker(other),
        })?;

        let page_size = opts.page_size.max(1);
        let setup_location = location.clone();
        conn.call(move |conn| Ok(storage::prepare(conn, &setup_location, &opts)))
            .await??;
        debug!("opened shared series store at {location}");

        Ok(Self { conn, page_size })
    }

    pub async fn write(&self, timestamp: f64, payload: Payload) -> Result<(), SeriesError> {
        self.conn
            .call(move |conn| Ok(storage::insert(conn, timestamp, &payload)))
            .await?
    }

    pub async fn min_timestamp(&self) -> Result<Option<f64>, SeriesError> {
        self.conn
            .call(|conn| Ok(storage::min_timestamp(conn)))
            .await?
    }

    pub async fn max_timestamp(&self) -> Result<Option<f64>, SeriesError> {
        self.conn
            .call(|conn| Ok(storage::max_timestamp(conn)))
            .await?
    }

    pub async fn has_before(&self, start: f64) -> Result<bool, SeriesError> {
        self.conn
            .call(move |conn| Ok(query::has_before(conn, start)))
            .await?
    }

    pub async fn has_after(&self, end: f64) -> Result<bool, SeriesError> {
        self.conn
            .call(move |conn| Ok(query::has_after(conn, end)))
            .await?
    }

    /// The window `start..=end` and both boundary flags from one snapshot.
    pub async fn page(&self, start: f64, end: f64) -> Result<Page, SeriesError> {
        let page_size = self.page_size;
        self.conn
            .call(move |conn| Ok(query::page(conn, start, end, page_size)))
            .await?
    }

    pub async fn close(self) -> Result<(), SeriesError> {
        self.conn.close().await?;
        debug!("closed shared series store");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::SharedStorage;
    use crate::tseries::{Location, OpenMode, Payload, SeriesError, Storage, StoreOptions};

    fn th(t: f64, h: f64) -> Payload {
        Payload::new().with("t", t).with("h", h)
    }

    #[tokio::test]
    async fn test_write_and_page() {
        let store = SharedStorage::open(Location::Memory, StoreOptions::default())
            .await
            .unwrap();
        store.write(1.0, th(1.0, 2.0)).await.unwrap();
        store.write(2.0, th(2.0, 2.0)).await.unwrap();

        let page = store.page(1.0, 200.0).await.unwrap();
        assert_eq!(page.readings.len(), 2);
        assert!(!page.has_prev);
        assert!(!page.has_more);

        assert_eq!(store.min_timestamp().await.unwrap(), Some(1.0));
        assert_eq!(store.max_timestamp().await.unwrap(), Some(2.0));
        assert!(store.has_before(1.5).await.unwrap());
        assert!(store.has_after(1.5).await.unwrap());

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate() {
        let store = SharedStorage::open(":memory:", StoreOptions::default())
            .await
            .unwrap();
        store.write(7.0, th(1.0, 1.0)).await.unwrap();
        assert!(matches!(
            store.write(7.0, th(2.0, 2.0)).await,
            Err(SeriesError::DuplicateTimestamp(_))
        ));
        let page = store.page(0.0, 10.0).await.unwrap();
        assert_eq!(page.readings[0].payload, th(1.0, 1.0));
    }

    #[tokio::test]
    async fn test_producer_and_consumer_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("measurements.sqlite");

        let producer = SharedStorage::open(path.clone(), StoreOptions::default())
            .await
            .unwrap();
        let consumer = SharedStorage::open(path.clone(), StoreOptions::default())
            .await
            .unwrap();

        producer.write(100.0, th(20.0, 50.0)).await.unwrap();
        let page = consumer.page(0.0, 50.0).await.unwrap();
        assert!(page.readings.is_empty());
        assert!(page.has_more);

        producer.close().await.unwrap();
        consumer.close().await.unwrap();

        // the synchronous handle reads the same file
        let store = Storage::open(path).unwrap();
        assert_eq!(store.max_timestamp().unwrap(), Some(100.0));
    }

    #[tokio::test]
    async fn test_strict_and_unopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strict.sqlite");
        let strict = StoreOptions {
            mode: OpenMode::CreateNew,
            ..Default::default()
        };

        SharedStorage::open(path.clone(), strict.clone())
            .await
            .unwrap()
            .close()
            .await
            .unwrap();
        assert!(matches!(
            SharedStorage::open(path, strict).await,
            Err(SeriesError::AlreadyExists { .. })
        ));

        let missing = dir.path().join("no").join("such").join("dir.sqlite");
        assert!(matches!(
            SharedStorage::open(missing, StoreOptions::default()).await,
            Err(SeriesError::ConnectionFailed { .. })
        ));
    }
}
