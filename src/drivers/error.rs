use thiserror::Error;

/// Result codes returned by every `libdaqhats` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HatResult {
    Success,
    BadParameter,
    Busy,
    Timeout,
    LockTimeout,
    InvalidDevice,
    ResourceUnavailable,
    CommsFailure,
    Undefined,
}

impl From<i32> for HatResult {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Success,
            -1 => Self::BadParameter,
            -2 => Self::Busy,
            -3 => Self::Timeout,
            -4 => Self::LockTimeout,
            -5 => Self::InvalidDevice,
            -6 => Self::ResourceUnavailable,
            -7 => Self::CommsFailure,
            _ => Self::Undefined,
        }
    }
}

#[derive(Debug, Error)]
pub enum HatError {
    #[error("failed to load the DAQ HAT library: {0}")]
    Library(String),
    #[error("{call} failed ({code:?})")]
    Driver { call: &'static str, code: HatResult },
    #[error("no board open")]
    NotOpen,
    #[error("no scan running")]
    NoScan,
    #[error("scan returned {actual} samples per channel, expected {expected}")]
    ShortRead { expected: usize, actual: usize },
    #[error("clock did not synchronize after {attempts} polls")]
    ClockNotSynced { attempts: u32 },
    #[error("bad scan buffer shape: {0}")]
    Shape(String),
    #[error("simulated fault: {0}")]
    Simulated(&'static str),
}

impl HatError {
    /// Maps a raw C return code to `Ok` or a `Driver` error naming the call.
    pub fn check(call: &'static str, code: i32) -> Result<(), HatError> {
        match HatResult::from(code) {
            HatResult::Success => Ok(()),
            code => Err(HatError::Driver { call, code }),
        }
    }
}

impl From<ndarray::ShapeError> for HatError {
    fn from(value: ndarray::ShapeError) -> Self {
        HatError::Shape(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_result_codes() {
        assert!(HatError::check("mcc118_open", 0).is_ok());
        match HatError::check("mcc118_open", -6) {
            Err(HatError::Driver { call, code }) => {
                assert_eq!(call, "mcc118_open");
                assert_eq!(code, HatResult::ResourceUnavailable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(HatResult::from(-42), HatResult::Undefined);
    }
}
