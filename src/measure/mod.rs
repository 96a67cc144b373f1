//! The sampling loop: read every sensor, merge their fields into one
//! payload, and append it to the series store once per interval.

use std::{future::Future, time::Duration};

use jiff::{Timestamp, tz::TimeZone};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    config::MeasureConfig,
    tseries::{Payload, SeriesError, SharedStorage},
};

pub mod sensor;

use sensor::{PowerSensor, Sensor};

#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("series error `{0}`")]
    Series(#[from] SeriesError),
    #[error("http client error `{0}`")]
    Http(#[from] reqwest::Error),
    #[error("bad scrape pattern `{0}`")]
    Pattern(#[from] regex::Error),
    #[error("no sensors configured")]
    NoSensors,
}

pub struct Sample {
    pub at: Timestamp,
    pub payload: Payload,
}

impl Sample {
    pub fn epoch_seconds(&self) -> f64 {
        self.at.as_duration().as_secs_f64()
    }
}

pub fn sensors(cfg: &MeasureConfig) -> Result<Vec<Sensor>, MeasureError> {
    let mut sensors = Vec::new();
    if cfg.random {
        sensors.push(Sensor::Random);
    }
    if let Some(url) = cfg.power_url.as_deref().filter(|u| !u.is_empty()) {
        sensors.push(Sensor::Power(PowerSensor::new(
            url,
            Duration::from_secs(cfg.power_timeout_s),
        )?));
    }
    if sensors.is_empty() {
        return Err(MeasureError::NoSensors);
    }
    Ok(sensors)
}

pub async fn sample(sensors: &[Sensor]) -> Sample {
    let mut payload = Payload::new();
    for sensor in sensors {
        payload.merge(sensor.read().await);
    }
    Sample {
        at: Timestamp::now(),
        payload,
    }
}

/// Runs the loop until `shutdown` resolves or the store fails, then closes
/// the store whichever way the loop ended.
pub async fn run(
    cfg: &MeasureConfig,
    sensors: Vec<Sensor>,
    store: SharedStorage,
    shutdown: impl Future<Output = ()>,
) -> Result<(), MeasureError> {
    let interval = Duration::from_secs(cfg.interval_s.max(1));
    let res = sample_loop(&sensors, &store, interval, cfg.print, shutdown).await;
    if let Err(e) = store.close().await {
        warn!("closing series store: {e}");
    }
    res
}

async fn sample_loop(
    sensors: &[Sensor],
    store: &SharedStorage,
    interval: Duration,
    print: bool,
    shutdown: impl Future<Output = ()>,
) -> Result<(), MeasureError> {
    info!("sampling {} sensor(s) every {interval:?}", sensors.len());

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("stopping");
                return Ok(());
            }

            _ = ticker.tick() => {
                let sample = sample(sensors).await;
                if print {
                    print_sample(&sample);
                }

                record(store, sample).await?;
            }
        }
    }
}

/// Appends one sample. A sample landing on an already stored timestamp is
/// skipped; any other store error is returned.
pub async fn record(store: &SharedStorage, sample: Sample) -> Result<(), MeasureError> {
    let ts = sample.epoch_seconds();
    match store.write(ts, sample.payload).await {
        Ok(()) => debug!("stored sample at {ts}"),
        Err(SeriesError::DuplicateTimestamp(ts)) => {
            warn!("a reading at {ts} is already stored, skipping sample");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn print_sample(sample: &Sample) {
    let local = sample.at.to_zoned(TimeZone::system());
    println!("{} {}", local.strftime("%Y-%m-%dT%H:%M:%S"), sample.payload);
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use jiff::Timestamp;

    use super::{MeasureError, Sample, record, sample, sample_loop, sensor::Sensor, sensors};
    use crate::{
        config::MeasureConfig,
        tseries::{Location, Payload, SeriesError, SharedStorage, StoreOptions},
    };

    fn sample_at(secs: i64, t: f64) -> Sample {
        Sample {
            at: Timestamp::from_second(secs).unwrap(),
            payload: Payload::new().with("t", t),
        }
    }

    #[test]
    fn test_sensor_selection() {
        let cfg = MeasureConfig::default();
        assert!(matches!(sensors(&cfg), Err(MeasureError::NoSensors)));

        let cfg = MeasureConfig {
            random: true,
            power_url: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(sensors(&cfg).unwrap().len(), 1);

        let cfg = MeasureConfig {
            random: true,
            power_url: Some("http://localhost/".to_string()),
            ..Default::default()
        };
        assert_eq!(sensors(&cfg).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sample_merges_sensors() {
        let sample = sample(&[Sensor::Random]).await;
        assert!(sample.payload.contains_key("t"));
        assert!(sample.payload.contains_key("h"));
        assert!(sample.epoch_seconds() > 1_600_000_000.0);
    }

    #[tokio::test]
    async fn test_loop_appends_samples() {
        let store = SharedStorage::open(Location::Memory, StoreOptions::default())
            .await
            .unwrap();

        sample_loop(
            &[Sensor::Random],
            &store,
            Duration::from_millis(20),
            false,
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await
        .unwrap();

        let page = store
            .page(f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert!(page.readings.len() >= 2);
        assert!(
            page.readings
                .windows(2)
                .all(|w| w[0].timestamp < w[1].timestamp)
        );
        assert!(page.readings.iter().all(|r| r.payload.contains_key("t")));
    }

    #[tokio::test]
    async fn test_record_skips_duplicate() {
        let store = SharedStorage::open(Location::Memory, StoreOptions::default())
            .await
            .unwrap();

        record(&store, sample_at(1_700_000_000, 20.0)).await.unwrap();
        record(&store, sample_at(1_700_000_000, 99.0)).await.unwrap();
        record(&store, sample_at(1_700_000_060, 21.0)).await.unwrap();

        let page = store.page(0.0, 2e9).await.unwrap();
        assert_eq!(page.readings.len(), 2);
        assert_eq!(page.readings[0].timestamp, 1_700_000_000.0);
        assert_eq!(page.readings[0].payload, Payload::new().with("t", 20.0));
        assert_eq!(page.readings[1].payload, Payload::new().with("t", 21.0));
    }

    #[tokio::test]
    async fn test_record_stops_on_other_errors() {
        let store = SharedStorage::open(Location::Memory, StoreOptions::default())
            .await
            .unwrap();

        let res = record(
            &store,
            Sample {
                at: Timestamp::from_second(1_700_000_000).unwrap(),
                payload: Payload::new().with("t", f64::NAN),
            },
        )
        .await;
        assert!(matches!(
            res,
            Err(MeasureError::Series(SeriesError::NonFiniteValue(_)))
        ));
    }
}
