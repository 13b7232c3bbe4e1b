//! Conversions between winmm device structures and core models.

use wave_capture_core::{describe_manufacturer, DeviceSelector, InputDeviceCaps};

/// Device id winmm uses for the wave mapper.
pub const WAVE_MAPPER: u32 = u32::MAX;

/// The id to pass to `waveInOpen` for `selector`.
pub fn raw_device_id(selector: DeviceSelector) -> u32 {
    match selector {
        DeviceSelector::Mapper => WAVE_MAPPER,
        DeviceSelector::Id(id) => id,
    }
}

/// Decode a fixed-size, nul-terminated UTF-16 name field.
pub fn decode_name(raw: &[u16]) -> String {
    let len = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..len])
}

/// Fields of `WAVEINCAPSW` the engine cares about.
#[derive(Debug, Clone, Copy)]
pub struct RawInputCaps<'a> {
    pub manufacturer_id: u16,
    pub product_id: u16,
    pub driver_version: u32,
    pub name: &'a [u16],
    pub channels: u16,
}

impl RawInputCaps<'_> {
    pub fn into_caps(self, device_id: u32) -> InputDeviceCaps {
        InputDeviceCaps {
            device_id: DeviceSelector::Id(device_id),
            name: decode_name(self.name),
            manufacturer: describe_manufacturer(self.manufacturer_id),
            product_id: self.product_id,
            driver_version: self.driver_version,
            channels: self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> [u16; 32] {
        let mut out = [0u16; 32];
        for (slot, c) in out.iter_mut().zip(s.encode_utf16()) {
            *slot = c;
        }
        out
    }

    #[test]
    fn name_stops_at_nul() {
        assert_eq!(decode_name(&wide("Line In (USB)")), "Line In (USB)");
        assert_eq!(decode_name(&[]), "");
        let full: Vec<u16> = "x".repeat(32).encode_utf16().collect();
        assert_eq!(decode_name(&full).len(), 32);
    }

    #[test]
    fn raw_caps_become_model() {
        let name = wide("Microphone");
        let caps = RawInputCaps {
            manufacturer_id: 1,
            product_id: 65,
            driver_version: 0x0A01,
            name: &name,
            channels: 2,
        }
        .into_caps(3);

        assert_eq!(caps.device_id, DeviceSelector::Id(3));
        assert_eq!(caps.name, "Microphone");
        assert_eq!(caps.manufacturer, describe_manufacturer(1));
        assert_eq!(caps.driver_version_parts(), (10, 1));
        assert_eq!(caps.channels, 2);
    }

    #[test]
    fn mapper_uses_reserved_id() {
        assert_eq!(raw_device_id(DeviceSelector::Mapper), WAVE_MAPPER);
        assert_eq!(raw_device_id(DeviceSelector::Id(2)), 2);
    }
}
