use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Wave format tag as understood by the device driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveFormatTag {
    Pcm,
    IeeeFloat,
}

impl WaveFormatTag {
    /// Numeric tag used in `WAVEFORMATEX`.
    pub fn code(self) -> u16 {
        match self {
            Self::Pcm => 1,
            Self::IeeeFloat => 3,
        }
    }
}

/// Format of the captured stream.
///
/// Layout of one frame: `channels * bits_per_sample / 8` bytes
/// (`block_align`), interleaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WaveFormat {
    pub format_tag: WaveFormatTag,
    pub channels: u16,
    pub samples_per_second: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub const PCM_44KHZ_16BIT_STEREO: Self = Self::pcm(44100, 16, 2);
    pub const PCM_44KHZ_16BIT_MONO: Self = Self::pcm(44100, 16, 1);
    pub const PCM_44KHZ_8BIT_STEREO: Self = Self::pcm(44100, 8, 2);
    pub const PCM_44KHZ_8BIT_MONO: Self = Self::pcm(44100, 8, 1);
    pub const PCM_32KHZ_16BIT_STEREO: Self = Self::pcm(32000, 16, 2);
    pub const PCM_32KHZ_16BIT_MONO: Self = Self::pcm(32000, 16, 1);
    pub const PCM_24KHZ_16BIT_STEREO: Self = Self::pcm(24000, 16, 2);
    pub const PCM_24KHZ_16BIT_MONO: Self = Self::pcm(24000, 16, 1);
    pub const PCM_22KHZ_16BIT_STEREO: Self = Self::pcm(22050, 16, 2);
    pub const PCM_22KHZ_16BIT_MONO: Self = Self::pcm(22050, 16, 1);
    pub const PCM_16KHZ_16BIT_MONO: Self = Self::pcm(16000, 16, 1);
    pub const PCM_11KHZ_8BIT_MONO: Self = Self::pcm(11025, 8, 1);
    pub const PCM_8KHZ_16BIT_MONO: Self = Self::pcm(8000, 16, 1);
    pub const PCM_8KHZ_8BIT_MONO: Self = Self::pcm(8000, 8, 1);

    /// Integer PCM format.
    pub const fn pcm(samples_per_second: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            format_tag: WaveFormatTag::Pcm,
            channels,
            samples_per_second,
            bits_per_sample,
        }
    }

    /// Bytes per frame (all channels of one sample). Exact for formats that
    /// pass `validate`; saturates otherwise.
    pub fn block_align(&self) -> u16 {
        self.checked_block_align().unwrap_or(u16::MAX)
    }

    /// Exact for formats that pass `validate`; saturates otherwise.
    pub fn average_bytes_per_second(&self) -> u32 {
        self.checked_average_bytes_per_second().unwrap_or(u32::MAX)
    }

    pub fn checked_block_align(&self) -> Option<u16> {
        let bits = u32::from(self.channels) * u32::from(self.bits_per_sample);
        u16::try_from(bits / 8).ok()
    }

    pub fn checked_average_bytes_per_second(&self) -> Option<u32> {
        self.samples_per_second
            .checked_mul(u32::from(self.checked_block_align()?))
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.channels == 0 || self.samples_per_second == 0 {
            return Err(CaptureError::UnsupportedFormat);
        }
        if self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(CaptureError::UnsupportedFormat);
        }
        if self.format_tag == WaveFormatTag::IeeeFloat && self.bits_per_sample != 32 {
            return Err(CaptureError::UnsupportedFormat);
        }
        if self.checked_average_bytes_per_second().is_none() {
            return Err(CaptureError::UnsupportedFormat);
        }
        Ok(())
    }
}

impl Default for WaveFormat {
    fn default() -> Self {
        Self::PCM_44KHZ_16BIT_STEREO
    }
}
