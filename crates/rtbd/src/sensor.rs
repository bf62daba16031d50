//! DS18B20 temperature sensing.
//!
//! The sensor is located once at startup: an explicitly configured serial
//! is used as-is, otherwise the first entry of the bus master's slave
//! listing is taken. A bridge without a sensor reports a fixed 0.0
//! reading rather than failing. Sensor errors never touch door state.

use std::path::PathBuf;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use rtb_core::{parse_w1_reading, ReadingError, SensorConfig};

/// Errors reading the temperature sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensor file could not be read.
    #[error("failed to read sensor: {0}")]
    Io(#[from] std::io::Error),

    /// The payload was read but could not be trusted or parsed.
    #[error(transparent)]
    Reading(#[from] ReadingError),
}

impl SensorError {
    /// Returns true for CRC-validation failures, which are reported
    /// distinctly from I/O errors.
    #[must_use]
    pub fn is_crc(&self) -> bool {
        matches!(self, Self::Reading(ReadingError::CrcCheckFailed))
    }
}

/// The DS18B20 sensor this bridge reads, if one exists.
pub struct TemperatureSensor {
    slave_path: Option<PathBuf>,
}

impl TemperatureSensor {
    /// Locates the sensor for this configuration.
    pub async fn detect(config: &SensorConfig) -> Self {
        let mut serial = config.serial.trim().to_string();
        if serial.is_empty() {
            serial = match fs::read_to_string(config.path.join("w1_master_slaves")).await {
                Ok(listing) => listing.lines().next().unwrap_or("").trim().to_string(),
                Err(e) => {
                    debug!(error = %e, "no sensor bus listing");
                    String::new()
                }
            };
        }

        if serial.is_empty() {
            info!("no DS18B20 sensor configured or detected");
            return Self { slave_path: None };
        }

        let slave_path = config.path.join(&serial).join("w1_slave");
        info!(%serial, path = %slave_path.display(), "DS18B20 sensor located");
        Self {
            slave_path: Some(slave_path),
        }
    }

    /// Creates a sensor that is known to be absent.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self { slave_path: None }
    }

    /// Returns true when a sensor file will be read.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.slave_path.is_some()
    }

    /// Reads the temperature in degrees Celsius.
    ///
    /// An unconfigured sensor reads as 0.0.
    pub async fn read(&self) -> Result<f64, SensorError> {
        let Some(path) = &self.slave_path else {
            debug!("no sensor; reporting 0.0");
            return Ok(0.0);
        };

        let payload = fs::read_to_string(path).await?;
        let celsius = parse_w1_reading(&payload)?;
        debug!(celsius, "sensor read");
        Ok(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const GOOD_PAYLOAD: &str = "2d 00 4b 46 ff ff 02 10 19 : crc=19 YES\n\
                                2d 00 4b 46 ff ff 02 10 19 t=21500\n";

    fn fake_bus(dir: &Path, serial: &str, payload: &str) -> SensorConfig {
        std::fs::write(dir.join("w1_master_slaves"), format!("{serial}\n")).unwrap();
        let slave_dir = dir.join(serial);
        std::fs::create_dir_all(&slave_dir).unwrap();
        std::fs::write(slave_dir.join("w1_slave"), payload).unwrap();
        SensorConfig {
            path: dir.to_path_buf(),
            serial: String::new(),
        }
    }

    #[tokio::test]
    async fn test_autodetect_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_bus(dir.path(), "28-0316a2891bff", GOOD_PAYLOAD);

        let sensor = TemperatureSensor::detect(&config).await;
        assert!(sensor.is_configured());
        assert_eq!(sensor.read().await.unwrap(), 21.5);
    }

    #[tokio::test]
    async fn test_explicit_serial_skips_autodetect() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_bus(dir.path(), "28-0316a2891bff", GOOD_PAYLOAD);
        // Listing points elsewhere; the explicit serial must win.
        std::fs::write(dir.path().join("w1_master_slaves"), "28-dead\n").unwrap();
        config.serial = "28-0316a2891bff".to_string();

        let sensor = TemperatureSensor::detect(&config).await;
        assert_eq!(sensor.read().await.unwrap(), 21.5);
    }

    #[tokio::test]
    async fn test_missing_bus_means_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let config = SensorConfig {
            path: dir.path().join("nope"),
            serial: String::new(),
        };

        let sensor = TemperatureSensor::detect(&config).await;
        assert!(!sensor.is_configured());
        assert_eq!(sensor.read().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_crc_failure_is_distinct_from_io() {
        let dir = tempfile::tempdir().unwrap();
        let payload = "2d 00 : crc=19 NO\n2d 00 t=21500\n";
        let config = fake_bus(dir.path(), "28-0316a2891bff", payload);

        let sensor = TemperatureSensor::detect(&config).await;
        let err = sensor.read().await.unwrap_err();
        assert!(err.is_crc());
    }

    #[tokio::test]
    async fn test_unreadable_slave_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_bus(dir.path(), "28-0316a2891bff", GOOD_PAYLOAD);
        std::fs::remove_file(dir.path().join("28-0316a2891bff").join("w1_slave")).unwrap();

        let sensor = TemperatureSensor::detect(&config).await;
        let err = sensor.read().await.unwrap_err();
        assert!(matches!(err, SensorError::Io(_)));
        assert!(!err.is_crc());
    }
}
