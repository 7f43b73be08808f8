//! Packet and stream metadata types carried by the dataflow ports

use chrono::{DateTime, Utc};

use crate::hardware::{Sample, TimeSpec};

/// Packet timestamp: whole and fractional seconds, both as `f64`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PrecisionTime {
    pub twsec: f64,
    pub tfsec: f64,
}

impl PrecisionTime {
    pub fn new(twsec: f64, tfsec: f64) -> Self {
        Self { twsec, tfsec }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self {
            twsec: time.timestamp() as f64,
            tfsec: f64::from(time.timestamp_subsec_nanos()) * 1e-9,
        }
    }
}

impl From<TimeSpec> for PrecisionTime {
    fn from(time: TimeSpec) -> Self {
        Self {
            twsec: time.full_secs as f64,
            tfsec: time.frac_secs,
        }
    }
}

impl From<PrecisionTime> for TimeSpec {
    fn from(time: PrecisionTime) -> Self {
        let whole = time.twsec.trunc();
        TimeSpec::new(whole as i64, time.tfsec + (time.twsec - whole))
    }
}

/// Stream metadata announced ahead of a stream's packets
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSri {
    pub stream_id: String,
    /// Seconds between samples
    pub xdelta: f64,
    /// Complex samples
    pub complex: bool,
    /// Start time of the stream, if known
    pub start: Option<PrecisionTime>,
}

impl StreamSri {
    pub fn new(stream_id: impl Into<String>, sample_rate: f64) -> Self {
        Self {
            stream_id: stream_id.into(),
            xdelta: 1.0 / sample_rate,
            complex: true,
            start: None,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        1.0 / self.xdelta
    }
}

/// A block pulled from the input port
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputPacket {
    pub payload: Vec<Sample>,
    /// Timestamp of the first sample
    pub timestamp: Option<PrecisionTime>,
    pub end_of_stream: bool,
    pub stream_id: String,
}

impl InputPacket {
    pub fn new(stream_id: impl Into<String>, payload: Vec<Sample>, timestamp: PrecisionTime) -> Self {
        Self {
            payload,
            timestamp: Some(timestamp),
            end_of_stream: false,
            stream_id: stream_id.into(),
        }
    }

    /// An empty packet that only signals end of stream
    pub fn end_of_stream(stream_id: impl Into<String>) -> Self {
        Self {
            end_of_stream: true,
            stream_id: stream_id.into(),
            ..Self::default()
        }
    }
}

/// A block pushed to the output port
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPacket {
    pub payload: Vec<Sample>,
    pub timestamp: PrecisionTime,
    pub end_of_burst: bool,
    pub stream_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_conversions() {
        let spec = TimeSpec::new(42, 0.25);
        let time = PrecisionTime::from(spec);
        assert_eq!(time, PrecisionTime::new(42.0, 0.25));
        assert_eq!(TimeSpec::from(time), spec);

        // Fractional whole seconds fold into the fraction
        let spec = TimeSpec::from(PrecisionTime::new(10.5, 0.75));
        assert_eq!(spec.full_secs, 11);
        assert!((spec.frac_secs - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_from_datetime() {
        let time = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
        let precise = PrecisionTime::from_datetime(time);
        assert_eq!(precise.twsec, 1_700_000_000.0);
        assert!((precise.tfsec - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sri_rate() {
        let sri = StreamSri::new("rx", 2_000_000.0);
        assert!((sri.sample_rate() - 2_000_000.0).abs() < 1e-3);
        assert!(sri.complex);
    }
}
