//! Telemetry samples produced by simulated machines.
//!
//! The wire form is JSON. `padding` exists only to bring the payload up to a
//! configurable target size, to make the bus move realistic message volumes.

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::sink::TelemetryRecord;
use crate::utils::now_rfc3339;

/// JSON framing cost of a non-empty `"padding":"..."` field.
const PADDING_OVERHEAD: usize = 13;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub machine_id: String,
    pub temperature: f64,
    pub vibration: f64,
    pub observed_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub padding: String,
}

impl TelemetrySample {
    pub fn generate<R: Rng>(machine_id: &str, rng: &mut R, target_bytes: usize) -> Self {
        let mut sample = Self {
            machine_id: machine_id.to_string(),
            temperature: round2(rng.gen_range(20.0..30.0)),
            vibration: round2(rng.gen_range(0.1..5.0)),
            observed_at: now_rfc3339(),
            padding: String::new(),
        };

        let base_len = sample.encode().len();
        if target_bytes > base_len + PADDING_OVERHEAD {
            sample.padding = "x".repeat(target_bytes - base_len - PADDING_OVERHEAD);
        }
        sample
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(payload: &Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn to_record(&self) -> TelemetryRecord {
        TelemetryRecord {
            machine_id: self.machine_id.clone(),
            temperature: self.temperature,
            vibration: self.vibration,
            observed_at: self.observed_at.clone(),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let sample = TelemetrySample::generate("machine_1", &mut rng, 0);
            assert!((20.0..=30.0).contains(&sample.temperature));
            assert!((0.1..=5.0).contains(&sample.vibration));
            assert!(sample.padding.is_empty());
        }
    }

    #[test]
    fn test_padding_reaches_target_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = TelemetrySample::generate("machine_1", &mut rng, 256);
        assert_eq!(sample.encode().len(), 256);
    }

    #[test]
    fn test_encode_decode() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = TelemetrySample::generate("machine_9", &mut rng, 128);
        let decoded = TelemetrySample::decode(&sample.encode()).unwrap();
        assert_eq!(decoded.machine_id, "machine_9");
        assert_eq!(decoded.temperature, sample.temperature);
        assert_eq!(decoded.vibration, sample.vibration);
    }
}
