use std::time::Duration;

use rand::Rng;
use regex::Regex;
use tracing::warn;

use super::MeasureError;
use crate::tseries::Payload;

const NOW_POWER_PATTERN: &str = r#"webdata_now_p = "([.0-9]+)""#;
const TODAY_ENERGY_PATTERN: &str = r#"webdata_today_e = "([.0-9]+)""#;

/// Something that contributes fields to a sample.
pub enum Sensor {
    /// `h` in 0..100 and `t` in -20..40, for running without hardware
    Random,
    Power(PowerSensor),
}

impl Sensor {
    pub async fn read(&self) -> Payload {
        match self {
            Self::Random => {
                let mut rng = rand::thread_rng();
                Payload::new()
                    .with("h", rng.gen_range(0..100) as f64)
                    .with("t", rng.gen_range(-20..40) as f64)
            }
            Self::Power(sensor) => sensor.read().await,
        }
    }
}

/// Scrapes current power (`p`) and today's energy (`e`) from an inverter's
/// status page.
pub struct PowerSensor {
    client: reqwest::Client,
    url: String,
    now_power: Regex,
    today_energy: Regex,
}

impl PowerSensor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, MeasureError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
            now_power: Regex::new(NOW_POWER_PATTERN)?,
            today_energy: Regex::new(TODAY_ENERGY_PATTERN)?,
        })
    }

    /// Empty when the page cannot be fetched, so one offline inverter does
    /// not cost the other sensors their sample.
    pub async fn read(&self) -> Payload {
        match self.fetch().await {
            Ok(body) => {
                let (p, e) = self.extract(&body);
                Payload::new().with("p", p).with("e", e)
            }
            Err(e) => {
                warn!("reading power page {}: {e}", self.url);
                Payload::new()
            }
        }
    }

    async fn fetch(&self) -> Result<String, reqwest::Error> {
        self.client.get(&self.url).send().await?.text().await
    }

    /// Finds `webdata_now_p = "12.34"` and `webdata_today_e = "56.78"`.
    /// A missing or malformed value reads as 0.
    pub fn extract(&self, body: &str) -> (f64, f64) {
        (
            quoted_number(&self.now_power, body).unwrap_or(0.0),
            quoted_number(&self.today_energy, body).unwrap_or(0.0),
        )
    }
}

/// First match of `re`; values like `1.2.3` match but do not parse.
fn quoted_number(re: &Regex, body: &str) -> Option<f64> {
    re.captures(body)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{PowerSensor, Sensor};

    fn sensor() -> PowerSensor {
        PowerSensor::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_extraction() {
        let body = r#"
        var webdata_now_p = "12.34";
        var webdata_today_e = "56.78";
        "#;
        assert_eq!(sensor().extract(body), (12.34, 56.78));
    }

    #[test]
    fn test_extraction_missing_values() {
        let sensor = sensor();
        assert_eq!(sensor.extract(""), (0.0, 0.0));
        assert_eq!(sensor.extract(r#"var webdata_today_e = "7";"#), (0.0, 7.0));
        assert_eq!(sensor.extract(r#"var webdata_now_p = "";"#), (0.0, 0.0));
        assert_eq!(sensor.extract(r#"var webdata_now_p = "-3";"#), (0.0, 0.0));
        assert_eq!(sensor.extract(r#"var webdata_now_p = "1.2.3";"#), (0.0, 0.0));
    }

    #[test]
    fn test_extraction_skips_placeholder() {
        let body = r#"var webdata_now_p = "--"; var webdata_now_p = "5.5"; var webdata_today_e = "1";"#;
        assert_eq!(sensor().extract(body), (5.5, 1.0));
    }

    #[tokio::test]
    async fn test_random_ranges() {
        for _ in 0..50 {
            let payload = Sensor::Random.read().await;
            let h = payload["h"];
            let t = payload["t"];
            assert!((0.0..100.0).contains(&h));
            assert!((-20.0..40.0).contains(&t));
        }
    }

    #[tokio::test]
    async fn test_unreachable_power_page() {
        assert!(Sensor::Power(sensor()).read().await.is_empty());
    }
}
