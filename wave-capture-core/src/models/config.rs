use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::wave_format::WaveFormat;

/// Capacity and latency parameters for a capture engine.
///
/// Set before `start`; the engine rejects changes while capture is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Size of each capture buffer in samples (frames). Default: 200.
    pub buffer_size_samples: usize,

    /// Number of buffers kept submitted to the device. Default: 30.
    pub queue_depth: usize,

    /// Fire `on_data_ready` for completions that recorded zero bytes
    /// (default: false; the buffer is still drained and recycled).
    pub deliver_empty_chunks: bool,

    /// Deliver completions drained after `stop` was requested (default: true).
    pub notify_during_drain: bool,

    /// Periodic wake of the maintenance loop's backpressure wait, in ms.
    pub wait_poll_ms: u64,

    /// Poll interval while waiting for the device to return its buffers
    /// after `stop`, in ms. Only a liveness check; correctness does not
    /// depend on it.
    pub drain_poll_ms: u64,
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.buffer_size_samples == 0 {
            return Err(CaptureError::InvalidConfiguration(
                "buffer size must be positive".into(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(CaptureError::InvalidConfiguration(
                "queue depth must be positive".into(),
            ));
        }
        if self.wait_poll_ms == 0 || self.drain_poll_ms == 0 {
            return Err(CaptureError::InvalidConfiguration(
                "poll intervals must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from JSON. Missing fields take
    /// their defaults.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::InvalidConfiguration(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Byte capacity of one buffer for the given format. Drivers take the
    /// length as a 32-bit count, so anything larger is rejected.
    pub fn buffer_bytes(&self, format: &WaveFormat) -> Result<usize, CaptureError> {
        let block_align = format
            .checked_block_align()
            .ok_or(CaptureError::UnsupportedFormat)?;
        self.buffer_size_samples
            .checked_mul(usize::from(block_align))
            .filter(|&bytes| u32::try_from(bytes).is_ok())
            .ok_or_else(|| {
                CaptureError::InvalidConfiguration(format!(
                    "{} samples of {} bytes do not fit in one buffer",
                    self.buffer_size_samples, block_align
                ))
            })
    }

    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_size_samples: 200,
            queue_depth: 30,
            deliver_empty_chunks: false,
            notify_during_drain: true,
            wait_poll_ms: 100,
            drain_poll_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = CaptureConfig {
            buffer_size_samples: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::InvalidConfiguration(_))
        ));

        let config = CaptureConfig {
            queue_depth: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CaptureError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = CaptureConfig::from_json(r#"{ "buffer_size_samples": 64, "queue_depth": 4 }"#).unwrap();
        assert_eq!(config.buffer_size_samples, 64);
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.drain_poll_ms, 1000);
        assert!(!config.deliver_empty_chunks);
    }

    #[test]
    fn json_negative_depth_fails() {
        assert!(matches!(
            CaptureConfig::from_json(r#"{ "queue_depth": -1 }"#),
            Err(CaptureError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            CaptureConfig::from_json(r#"{ "queue_depth": 0 }"#),
            Err(CaptureError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn buffer_bytes_uses_block_align() {
        let config = CaptureConfig {
            buffer_size_samples: 64,
            ..Default::default()
        };
        assert_eq!(config.buffer_bytes(&WaveFormat::pcm(44100, 16, 2)), Ok(256));
        assert_eq!(config.buffer_bytes(&WaveFormat::pcm(8000, 8, 1)), Ok(64));
    }

    #[test]
    fn buffer_bytes_rejects_overflow() {
        let config = CaptureConfig {
            buffer_size_samples: usize::MAX,
            queue_depth: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.buffer_bytes(&WaveFormat::PCM_44KHZ_16BIT_STEREO),
            Err(CaptureError::InvalidConfiguration(_))
        ));

        // One byte past a 32-bit length.
        let config = CaptureConfig {
            buffer_size_samples: (u32::MAX as usize) / 4 + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.buffer_bytes(&WaveFormat::PCM_44KHZ_16BIT_STEREO),
            Err(CaptureError::InvalidConfiguration(_))
        ));
        assert_eq!(
            config.buffer_bytes(&WaveFormat::PCM_44KHZ_8BIT_MONO),
            Ok((u32::MAX as usize) / 4 + 1)
        );
    }
}
