// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Candidate discovery
//!
//! Discovery back-ends only say where SCSI generic devices might be. The
//! [`Builder`](crate::Builder) does the actual identification.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use log::{debug, trace};
use regex::Regex;

use crate::{
    sysfs::{first_dev, sysfs_read},
    Address, DeviceKind, NodeOpener, NodeType, SG_MAJOR,
};

const SCSI_DEVICE_DIR: &str = "sys/class/scsi_device";
const SCSI_HOST_DIR: &str = "sys/class/scsi_host";

/// Where a SCSI unit might be found, as far as the back-end knows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    /// Minor of the `sg` node
    pub generic_minor: u32,
    pub address: Option<Address>,
    pub host_id: Option<u32>,
    pub host_name: Option<String>,
    pub host_short_name: Option<String>,
    /// Kind the back-end believes the unit to be
    pub kind_hint: Option<DeviceKind>,
    /// Node numbers of the high level interface, if known
    pub view: Option<(u32, u32)>,
}

impl Candidate {
    pub fn new(generic_minor: u32) -> Self {
        Self {
            generic_minor,
            ..Default::default()
        }
    }
}

static ADDRESS_PATTERN: OnceLock<Regex> = OnceLock::new();
static SG_PATTERN: OnceLock<Regex> = OnceLock::new();
static ST_PATTERN: OnceLock<Regex> = OnceLock::new();
static OSST_PATTERN: OnceLock<Regex> = OnceLock::new();

fn parse_address(name: &str) -> Option<Address> {
    let regex = ADDRESS_PATTERN
        .get_or_init(|| Regex::new(r"^(\d+):(\d+):(\d+):(\d+)$").expect("Failed to initialise known-working regex"));
    let captures = regex.captures(name)?;
    let field = |i: usize| captures.get(i)?.as_str().parse::<u32>().ok();
    Some(Address::new(field(1)?, field(2)?, field(3)?, field(4)?))
}

/// Matches plain `<prefix><N>` class device names, skipping mode suffixed tape nodes
fn numbered(cell: &'static OnceLock<Regex>, prefix: &'static str) -> impl Fn(&str) -> bool {
    let regex = cell.get_or_init(|| {
        Regex::new(&format!(r"^{prefix}\d+$")).expect("Failed to initialise known-working regex")
    });
    move |name| regex.is_match(name)
}

/// Driver name of a host adapter
pub fn host_short_name(sysroot: &Path, host: u32) -> Option<String> {
    sysfs_read(sysroot, &Path::new(SCSI_HOST_DIR).join(format!("host{host}")), "proc_name")
}

fn from_sysfs_device(sysroot: &Path, address: Address) -> Option<Candidate> {
    let device = PathBuf::from(SCSI_DEVICE_DIR).join(address.to_string()).join("device");
    let (_, generic_minor) = first_dev(sysroot, &device, "scsi_generic", numbered(&SG_PATTERN, "sg"))?;

    let kind_hint = sysfs_read::<u8>(sysroot, &device, "type").map(|t| {
        let vendor = sysfs_read::<String>(sysroot, &device, "vendor");
        let model = sysfs_read::<String>(sysroot, &device, "model");
        DeviceKind::from_inquiry(t, vendor.as_deref(), model.as_deref())
    });
    let view = match kind_hint {
        Some(DeviceKind::Disk | DeviceKind::Rom) => first_dev(sysroot, &device, "block", |_| true),
        Some(DeviceKind::Tape) => first_dev(sysroot, &device, "scsi_tape", numbered(&ST_PATTERN, "st")),
        Some(DeviceKind::OnStreamTape) => first_dev(sysroot, &device, "onstream_tape", numbered(&OSST_PATTERN, "osst")),
        Some(DeviceKind::Changer) => first_dev(sysroot, &device, "scsi_changer", |_| true),
        Some(DeviceKind::Generic) | None => None,
    };

    let host = Path::new(SCSI_HOST_DIR).join(format!("host{}", address.host));
    Some(Candidate {
        generic_minor,
        address: Some(address),
        host_id: sysfs_read(sysroot, &host, "unique_id"),
        host_name: None,
        host_short_name: sysfs_read(sysroot, &host, "proc_name"),
        kind_hint,
        view,
    })
}

/// Walk `<sysroot>/sys/class/scsi_device`
///
/// Candidates are returned in address order.
pub fn enumerate_sysfs(sysroot: impl AsRef<Path>) -> io::Result<Vec<Candidate>> {
    let sysroot = sysroot.as_ref();
    let mut addresses = fs::read_dir(sysroot.join(SCSI_DEVICE_DIR))?
        .filter_map(Result::ok)
        .filter_map(|e| parse_address(e.file_name().to_str()?))
        .collect::<Vec<_>>();
    addresses.sort();

    let candidates = addresses
        .into_iter()
        .filter_map(|address| {
            let candidate = from_sysfs_device(sysroot, address);
            if candidate.is_none() {
                debug!("{address} has no generic device");
            }
            candidate
        })
        .collect();
    Ok(candidates)
}

/// Try generic minors in order until more than `max_miss` of them failed to open
pub fn probe_generic<O: NodeOpener>(opener: &mut O, max_miss: u32) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut misses = 0;
    let mut minor = 0;
    while misses <= max_miss && minor < DeviceKind::Generic.index_limit() * 128 {
        match opener.open(NodeType::Char, SG_MAJOR, minor) {
            Ok(_) => candidates.push(Candidate::new(minor)),
            Err(e) => {
                trace!("sg{minor}: {e}");
                misses += 1;
            }
        }
        minor += 1;
    }
    candidates
}
