// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Canonical and legacy device names
//!
//! Canonical names encode the SCSI address, so they survive the kernel
//! renumbering its devices. Legacy names are the kernel's own `/dev` names,
//! which the canonical names point at in symlink mode.

use std::path::PathBuf;

use crate::{disk_index, DeviceEntry, DeviceKind, NO_REWIND};

/// How the address part of a canonical name is spelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NameStyle {
    /// `h<host>-<hostid>c<channel>i<id>l<lun>`
    #[default]
    HostId,
    /// `c<host>b<channel>t<id>u<lun>`
    Cbtu,
}

/// Naming configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    pub style: NameStyle,
    /// Spell legacy optical drives `scd<N>` instead of `sr<N>`
    pub scd: bool,
    /// Directory holding the kernel's own device nodes
    pub dev_root: PathBuf,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            style: NameStyle::default(),
            scd: false,
            dev_root: PathBuf::from("/dev"),
        }
    }
}

fn tape_prefix(entry: &DeviceEntry, rewinding: &'static str, non_rewinding: &'static str) -> &'static str {
    if entry.minor & NO_REWIND != 0 {
        non_rewinding
    } else {
        rewinding
    }
}

/// Disk letters in the kernel's base-26 scheme: a..z, aa..zz, aaa..
pub fn disk_letters(index: u32) -> String {
    let letter = |n: u32| char::from(b'a' + (n % 26) as u8);
    if index < 26 {
        letter(index).to_string()
    } else if index < 26 * 27 {
        [letter(index / 26 - 1), letter(index)].iter().collect()
    } else {
        let high = index / 26 - 1;
        [letter(high / 26 - 1), letter(high), letter(index)].iter().collect()
    }
}

impl Naming {
    /// Canonical basename for an entry, relative to the managed directory
    pub fn canonical(&self, entry: &DeviceEntry) -> String {
        let prefix = match entry.kind {
            DeviceKind::Generic => "sg",
            DeviceKind::Disk => "sd",
            DeviceKind::Rom => "sr",
            DeviceKind::Tape => tape_prefix(entry, "st", "nst"),
            DeviceKind::OnStreamTape => tape_prefix(entry, "osst", "nosst"),
            DeviceKind::Changer => "sch",
        };
        let address = &entry.topology.address;
        let mut name = match self.style {
            NameStyle::HostId => format!(
                "{prefix}h{}-{:x}c{}i{}l{}",
                address.host, entry.topology.host_id, address.channel, address.id, address.lun
            ),
            NameStyle::Cbtu => format!(
                "{prefix}c{}b{}t{}u{}",
                address.host, address.channel, address.id, address.lun
            ),
        };
        if entry.kind == DeviceKind::Disk {
            if let Some(partition) = entry.partition.filter(|p| *p > 0) {
                name.push_str(&format!("p{partition}"));
            }
        }
        name
    }

    /// The kernel's own basename for an entry's node
    pub fn legacy_name(&self, entry: &DeviceEntry) -> String {
        let minor = entry.minor;
        match entry.kind {
            DeviceKind::Generic => format!("sg{minor}"),
            DeviceKind::Rom if self.scd => format!("scd{minor}"),
            DeviceKind::Rom => format!("sr{minor}"),
            DeviceKind::Tape => format!("{}{}", tape_prefix(entry, "st", "nst"), minor & !NO_REWIND),
            DeviceKind::OnStreamTape => format!("{}{}", tape_prefix(entry, "osst", "nosst"), minor & !NO_REWIND),
            DeviceKind::Changer => format!("sch{minor}"),
            DeviceKind::Disk => {
                let letters = disk_index(entry.major, minor)
                    .map(disk_letters)
                    .unwrap_or_else(|| format!("{}:", entry.major));
                match minor & 0x0f {
                    0 => format!("sd{letters}"),
                    part => format!("sd{letters}{part}"),
                }
            }
        }
    }

    /// Full path of the kernel's own node for an entry
    pub fn legacy(&self, entry: &DeviceEntry) -> PathBuf {
        self.dev_root.join(self.legacy_name(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mock, Address};

    fn disk(minor: u32, partition: Option<u8>) -> DeviceEntry {
        let mut entry = mock::entry(DeviceKind::Disk, Address::new(2, 0, 5, 0));
        entry.topology.host_id = 0x1e;
        entry.major = 8;
        entry.minor = minor;
        entry.partition = partition;
        entry
    }

    #[test]
    fn test_canonical_styles() {
        let naming = Naming::default();
        assert_eq!(naming.canonical(&disk(16, None)), "sdh2-1ec0i5l0");

        let cbtu = Naming {
            style: NameStyle::Cbtu,
            ..Default::default()
        };
        assert_eq!(cbtu.canonical(&disk(16, None)), "sdc2b0t5u0");
    }

    #[test]
    fn test_partition_suffix() {
        let naming = Naming::default();
        assert!(!naming.canonical(&disk(16, None)).contains('p'));
        assert!(!naming.canonical(&disk(16, Some(0))).ends_with("p0"));
        for k in 1..16u8 {
            let name = naming.canonical(&disk(16 + u32::from(k), Some(k)));
            assert!(name.ends_with(&format!("p{k}")), "{name}");
        }
    }

    #[test]
    fn test_deterministic() {
        let naming = Naming::default();
        let entry = disk(17, Some(1));
        let first = (naming.canonical(&entry), naming.legacy(&entry));
        for _ in 0..3 {
            assert_eq!((naming.canonical(&entry), naming.legacy(&entry)), first);
        }
    }

    #[test]
    fn test_legacy_names() {
        let naming = Naming::default();
        assert_eq!(naming.legacy(&disk(0, None)), PathBuf::from("/dev/sda"));
        assert_eq!(naming.legacy_name(&disk(17, Some(1))), "sdb1");

        let mut tape = mock::entry(DeviceKind::Tape, Address::new(0, 0, 4, 0));
        tape.minor = 0x81;
        assert_eq!(naming.legacy_name(&tape), "nst1");
        assert!(naming.canonical(&tape).starts_with("nsth0-"));

        let mut rom = mock::entry(DeviceKind::Rom, Address::new(0, 0, 0, 0));
        rom.minor = 1;
        assert_eq!(naming.legacy_name(&rom), "sr1");
        let scd = Naming {
            scd: true,
            ..Default::default()
        };
        assert_eq!(scd.legacy_name(&rom), "scd1");
    }

    #[test]
    fn test_disk_letters() {
        assert_eq!(disk_letters(0), "a");
        assert_eq!(disk_letters(25), "z");
        assert_eq!(disk_letters(26), "aa");
        assert_eq!(disk_letters(51), "az");
        assert_eq!(disk_letters(52), "ba");
        assert_eq!(disk_letters(701), "zz");
        assert_eq!(disk_letters(702), "aaa");
    }
}
