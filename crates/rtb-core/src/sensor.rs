//! DS18B20 1-wire payload parsing.
//!
//! The kernel w1 driver exposes each sensor as a `w1_slave` file of two
//! lines: the first ends with `YES` when the CRC check passed, the second
//! carries the reading as a `t=` field in millidegrees Celsius:
//!
//! ```text
//! 2d 00 4b 46 ff ff 02 10 19 : crc=19 YES
//! 2d 00 4b 46 ff ff 02 10 19 t=21500
//! ```

use thiserror::Error;

/// Errors from interpreting a `w1_slave` payload.
///
/// CRC failures are reported distinctly from I/O failures, which are the
/// caller's concern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadingError {
    /// Payload had fewer than two lines.
    #[error("sensor payload truncated")]
    Truncated,

    /// The CRC marker line did not end with YES.
    #[error("CRC check failed on sensor payload")]
    CrcCheckFailed,

    /// No `t=` field on the data line.
    #[error("no t= field in sensor payload")]
    MissingTemperature,

    /// The `t=` field was not a millidegree integer.
    #[error("invalid millidegree value: {0}")]
    InvalidMillidegrees(String),
}

/// Parses a `w1_slave` payload into degrees Celsius.
pub fn parse_w1_reading(payload: &str) -> Result<f64, ReadingError> {
    let mut lines = payload.lines();

    let crc_line = lines.next().ok_or(ReadingError::Truncated)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(ReadingError::CrcCheckFailed);
    }

    let data_line = lines.next().ok_or(ReadingError::Truncated)?;
    let (_, value) = data_line
        .split_once("t=")
        .ok_or(ReadingError::MissingTemperature)?;
    let millidegrees: i32 = value
        .trim()
        .parse()
        .map_err(|_| ReadingError::InvalidMillidegrees(value.trim().to_string()))?;

    Ok(f64::from(millidegrees) / 1000.0)
}
