use std::fmt;

use serde::{Deserialize, Serialize};

/// Which input device to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// The system's preferred input device (the wave mapper).
    Mapper,
    /// A device by its zero-based index in the device list.
    Id(u32),
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapper => write!(f, "mapper"),
            Self::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Capabilities of an input device, as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDeviceCaps {
    pub device_id: DeviceSelector,
    pub name: String,
    pub manufacturer: String,
    pub product_id: u16,
    pub driver_version: u32,
    pub channels: u16,
}

impl InputDeviceCaps {
    /// Driver version as `(major, minor)`.
    pub fn driver_version_parts(&self) -> (u8, u8) {
        (
            ((self.driver_version >> 8) & 0xff) as u8,
            (self.driver_version & 0xff) as u8,
        )
    }
}

/// Registered multimedia manufacturer identifiers.
static MANUFACTURERS: &[(u16, &str)] = &[
    (1, "Microsoft Corporation"),
    (2, "Creative Labs, Inc."),
    (3, "Media Vision, Inc."),
    (4, "Fujitsu Corp."),
    (20, "Artisoft, Inc."),
    (21, "Turtle Beach, Inc."),
    (22, "IBM Corporation"),
    (23, "Vocaltec Ltd."),
    (24, "Roland"),
    (25, "DSP Solutions, Inc."),
    (26, "NEC"),
    (27, "ATI Technologies Inc."),
    (28, "Wang Laboratories, Inc."),
    (29, "Tandy Corporation"),
    (30, "Voyetra"),
    (31, "Antex Electronics Corporation"),
    (32, "ICL Personal Systems"),
    (33, "Intel Corporation"),
    (34, "Advanced Gravis"),
    (35, "Video Associates Labs, Inc."),
    (36, "InterActive Inc."),
    (37, "Yamaha Corporation of America"),
    (38, "Everex Systems, Inc."),
    (39, "Echo Speech Corporation"),
    (40, "Sierra Semiconductor Corp"),
    (41, "Computer Aided Technologies"),
    (42, "APPS Software International"),
    (43, "DSP Group, Inc."),
    (44, "microEngineering Labs"),
    (45, "Computer Friends, Inc."),
    (46, "ESS Technology"),
    (47, "Audio, Inc."),
    (48, "Motorola, Inc."),
    (49, "Canopus, co., Ltd."),
    (50, "Seiko Epson Corporation"),
    (51, "Truevision"),
    (52, "Aztech Labs, Inc."),
    (53, "Videologic"),
    (54, "SCALACS"),
    (55, "Korg Inc."),
    (56, "Audio Processing Technology"),
    (57, "Integrated Circuit Systems, Inc."),
    (58, "Iterated Systems, Inc."),
    (59, "Metheus"),
    (60, "Logitech, Inc."),
    (61, "Winnov, Inc."),
    (62, "NCR Corporation"),
    (63, "EXAN"),
    (64, "AST Research Inc."),
    (65, "Willow Pond Corporation"),
    (66, "Sonic Foundry"),
    (67, "Vitec Multimedia"),
    (68, "MOSCOM Corporation"),
    (69, "Silicon Soft, Inc."),
];

/// Look up a manufacturer name by its multimedia manufacturer id.
pub fn manufacturer_name(id: u16) -> Option<&'static str> {
    MANUFACTURERS
        .binary_search_by_key(&id, |&(mid, _)| mid)
        .ok()
        .map(|index| MANUFACTURERS[index].1)
}

/// Manufacturer name, or `"Unknown [<id>]"` for unregistered ids.
pub fn describe_manufacturer(id: u16) -> String {
    manufacturer_name(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Unknown [{}]", id))
}
