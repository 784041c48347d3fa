// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Device kinds and their kernel major numbers

use std::fmt;

use serde::Serialize;

/// SCSI generic
pub const SG_MAJOR: u32 = 21;
/// SCSI tape
pub const ST_MAJOR: u32 = 9;
/// SCSI CD-ROM
pub const SR_MAJOR: u32 = 11;
/// SCSI medium changer
pub const SCH_MAJOR: u32 = 86;
/// OnStream tape
pub const OSST_MAJOR: u32 = 206;

/// Minor bit selecting the non-rewinding tape node
pub const NO_REWIND: u32 = 0x80;

/// Peripheral device types from the standard INQUIRY
mod peripheral {
    pub const DISK: u8 = 0x00;
    pub const TAPE: u8 = 0x01;
    pub const WORM: u8 = 0x04;
    pub const ROM: u8 = 0x05;
    pub const MOD: u8 = 0x07;
    pub const MEDIUM_CHANGER: u8 = 0x08;
}

const ONSTREAM_VENDOR: &str = "OnStream";
const ONSTREAM_MODELS: [&str; 5] = ["SC-", "DI-", "DP-", "FW-", "USB"];

/// The kind of kernel interface an entry stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Generic,
    Disk,
    Rom,
    Tape,
    OnStreamTape,
    Changer,
}

/// Type of a device special file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Block,
    Char,
}

impl DeviceKind {
    /// Classify a unit from its INQUIRY data
    pub fn from_inquiry(peripheral_type: u8, manufacturer: Option<&str>, model: Option<&str>) -> Self {
        match peripheral_type {
            peripheral::DISK | peripheral::MOD => DeviceKind::Disk,
            peripheral::TAPE if is_onstream(manufacturer, model) => DeviceKind::OnStreamTape,
            peripheral::TAPE => DeviceKind::Tape,
            peripheral::WORM | peripheral::ROM => DeviceKind::Rom,
            peripheral::MEDIUM_CHANGER => DeviceKind::Changer,
            _ => DeviceKind::Generic,
        }
    }

    /// Special file type used for this kind's nodes
    pub fn node_type(&self) -> NodeType {
        match self {
            DeviceKind::Disk | DeviceKind::Rom => NodeType::Block,
            DeviceKind::Generic | DeviceKind::Tape | DeviceKind::OnStreamTape | DeviceKind::Changer => NodeType::Char,
        }
    }

    pub fn is_tape(&self) -> bool {
        matches!(self, DeviceKind::Tape | DeviceKind::OnStreamTape)
    }

    /// Number of indices the kernel can hand out for this kind
    pub fn index_limit(&self) -> u32 {
        match self {
            DeviceKind::Tape | DeviceKind::OnStreamTape => NO_REWIND,
            DeviceKind::Disk => 256 * 16,
            DeviceKind::Generic | DeviceKind::Rom | DeviceKind::Changer => 256,
        }
    }

    /// Node numbers of the `index`th device of this kind
    pub fn node_for_index(&self, index: u32) -> Option<(u32, u32)> {
        match self {
            DeviceKind::Generic => Some((SG_MAJOR, index)),
            DeviceKind::Rom => Some((SR_MAJOR, index)),
            DeviceKind::Tape => Some((ST_MAJOR, index)),
            DeviceKind::OnStreamTape => Some((OSST_MAJOR, index)),
            DeviceKind::Changer => Some((SCH_MAJOR, index)),
            DeviceKind::Disk => Some((disk_major(index)?, (index & 0x0f) << 4)),
        }
    }

    /// The kernel's index of a node of this kind
    pub fn index_for_node(&self, major: u32, minor: u32) -> Option<u32> {
        match self {
            DeviceKind::Disk => disk_index(major, minor),
            DeviceKind::Tape | DeviceKind::OnStreamTape => Some(minor & !NO_REWIND),
            DeviceKind::Generic | DeviceKind::Rom | DeviceKind::Changer => Some(minor),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Generic => f.write_str("Generic"),
            DeviceKind::Disk => f.write_str("Disk"),
            DeviceKind::Rom => f.write_str("Rom"),
            DeviceKind::Tape => f.write_str("Tape"),
            DeviceKind::OnStreamTape => f.write_str("OnStreamTape"),
            DeviceKind::Changer => f.write_str("Changer"),
        }
    }
}

fn is_onstream(manufacturer: Option<&str>, model: Option<&str>) -> bool {
    manufacturer == Some(ONSTREAM_VENDOR)
        && model.is_some_and(|m| ONSTREAM_MODELS.iter().any(|prefix| m.starts_with(prefix)))
}

/// Block major holding the `index`th SCSI disk
///
/// Beyond the sixteen registered disk majors the kernel allocates dynamically;
/// those ranges follow the allocation order seen in practice.
pub fn disk_major(index: u32) -> Option<u32> {
    let mj = index >> 4;
    match mj {
        0 => Some(8),
        1..=7 => Some(64 + mj),
        8..=15 => Some(120 + mj),
        16..=126 => Some(128 + mj),
        127..=182 => Some(mj - 55),
        183..=190 => Some(mj - 47),
        191..=243 => Some(mj - 179),
        _ => None,
    }
}

/// Index of the SCSI disk owning block node `major:minor`
pub fn disk_index(major: u32, minor: u32) -> Option<u32> {
    let base = match major {
        8 => 0,
        65..=71 => major - 64,
        128..=135 => major - 120,
        144.. => major - 128,
        72..=127 => major + 55,
        136..=143 => major + 47,
        12..=64 => major + 179,
        _ => return None,
    };
    Some((base << 4) + (minor >> 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(DeviceKind::from_inquiry(0x00, None, None), DeviceKind::Disk);
        assert_eq!(DeviceKind::from_inquiry(0x07, None, None), DeviceKind::Disk);
        assert_eq!(DeviceKind::from_inquiry(0x05, None, None), DeviceKind::Rom);
        assert_eq!(DeviceKind::from_inquiry(0x04, None, None), DeviceKind::Rom);
        assert_eq!(DeviceKind::from_inquiry(0x08, None, None), DeviceKind::Changer);
        assert_eq!(DeviceKind::from_inquiry(0x03, None, None), DeviceKind::Generic);
        assert_eq!(
            DeviceKind::from_inquiry(0x01, Some("HP"), Some("Ultrium 3-SCSI")),
            DeviceKind::Tape
        );
        assert_eq!(
            DeviceKind::from_inquiry(0x01, Some("OnStream"), Some("DI-30")),
            DeviceKind::OnStreamTape
        );
        assert_eq!(
            DeviceKind::from_inquiry(0x01, Some("OnStream"), Some("ADR50")),
            DeviceKind::Tape
        );
    }

    #[test]
    fn test_disk_majors() {
        assert_eq!(disk_major(0), Some(8));
        assert_eq!(disk_major(15), Some(8));
        assert_eq!(disk_major(16), Some(65));
        assert_eq!(disk_major(127), Some(71));
        assert_eq!(disk_major(128), Some(128));
        assert_eq!(disk_major(255), Some(135));

        for index in [0, 1, 17, 200, 255, 300, 2100, 3000, 3800] {
            let (major, minor) = DeviceKind::Disk.node_for_index(index).unwrap();
            assert_eq!(disk_index(major, minor | 3), Some(index), "index {index}");
        }
        assert_eq!(disk_index(9, 0), None);
    }

    #[test]
    fn test_node_types() {
        assert_eq!(DeviceKind::Disk.node_type(), NodeType::Block);
        assert_eq!(DeviceKind::Rom.node_type(), NodeType::Block);
        assert_eq!(DeviceKind::Tape.node_type(), NodeType::Char);
        assert_eq!(DeviceKind::Generic.node_type(), NodeType::Char);
        assert_eq!(DeviceKind::Tape.index_for_node(ST_MAJOR, 0x83), Some(3));
    }
}
