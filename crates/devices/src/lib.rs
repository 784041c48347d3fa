// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! SCSI device registry
//!
//! Every discovered SCSI logical unit is recorded as one [`DeviceEntry`] per
//! kernel interface it exposes (generic, disk, tape, cdrom, changer and disk
//! partitions). Entries live in an append-only [`Registry`] and refer to each
//! other through [`EntryId`]s.

use std::{io, path::PathBuf};

use inquiry::Identity;
use serde::Serialize;
use thiserror::Error;

mod builder;
pub mod discovery;
mod kind;
pub mod mock;
mod naming;
mod opener;
mod registry;
mod sysfs;

pub use builder::{Builder, ScanOptions};
pub use kind::*;
pub use naming::{disk_letters, NameStyle, Naming};
pub use opener::{DevHandle, DevOpener, DeviceHandle, NodeOpener};
pub use registry::{EntryId, Mismatch, Registry};

/// Errors that can occur while building the registry
#[derive(Debug, Error)]
pub enum Error {
    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The device did not answer the identity probe
    #[error("inquiry: {0}")]
    Inquiry(#[from] inquiry::Error),

    /// Two views of one unit disagree
    #[error("{0}")]
    Mismatch(#[from] Mismatch),

    /// No SCSI address could be determined for a candidate
    #[error("no SCSI address for sg{0}")]
    NoAddress(u32),
}

/// Host, channel, target id and LUN of a logical unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Address {
    pub host: u32,
    pub channel: u32,
    pub id: u32,
    pub lun: u32,
}

impl Address {
    pub fn new(host: u32, channel: u32, id: u32, lun: u32) -> Self {
        Self { host, channel, id, lun }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}:{}", self.host, self.channel, self.id, self.lun)
    }
}

/// Where a unit sits on the bus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub address: Address,
    /// Host adapter unique id
    pub host_id: u32,
    /// Descriptive adapter name as reported by the driver
    pub host_name: Option<String>,
    /// Driver name of the adapter (`proc_name`)
    pub host_short_name: Option<String>,
}

/// One kernel interface of a SCSI logical unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    /// Basename inside the managed directory
    pub name: String,
    /// The kernel's node for this interface
    pub legacy: PathBuf,
    pub kind: DeviceKind,
    pub major: u32,
    pub minor: u32,
    /// Partition number, `None` for whole devices
    pub partition: Option<u8>,
    pub identity: Identity,
    pub topology: Topology,
    /// The node could not be opened when it was discovered
    pub inaccessible: bool,
    /// The other view of the same unit
    pub related: Option<EntryId>,
    /// Set on user defined aliases, pointing at the aliased entry
    pub alias_of: Option<EntryId>,
}

impl DeviceEntry {
    /// A generic (`sg`) entry for a freshly probed unit
    pub fn generic(identity: Identity, topology: Topology, minor: u32, naming: &Naming) -> Self {
        let mut entry = Self {
            name: String::new(),
            legacy: PathBuf::new(),
            kind: DeviceKind::Generic,
            major: SG_MAJOR,
            minor,
            partition: None,
            identity,
            topology,
            inaccessible: false,
            related: None,
            alias_of: None,
        };
        entry.name = naming.canonical(&entry);
        entry.legacy = naming.legacy(&entry);
        entry
    }

    /// Start deriving a new entry from this one
    pub fn derive(&self) -> Derive<'_> {
        Derive {
            base: self,
            kind: self.kind,
            major: self.major,
            minor: self.minor,
            partition: self.partition,
            inaccessible: self.inaccessible,
            identity: None,
            alias: None,
        }
    }

    /// Whole device, rewinding interface
    pub fn is_primary(&self) -> bool {
        self.partition.is_none() && !(self.kind.is_tape() && self.minor & NO_REWIND != 0)
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// Overrides applied when deriving one entry from another
///
/// Derived entries own copies of every field; the base is never touched.
#[must_use]
pub struct Derive<'a> {
    base: &'a DeviceEntry,
    kind: DeviceKind,
    major: u32,
    minor: u32,
    partition: Option<u8>,
    inaccessible: bool,
    identity: Option<Identity>,
    alias: Option<(String, EntryId, PathBuf)>,
}

impl Derive<'_> {
    pub fn kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn node(mut self, major: u32, minor: u32) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    pub fn partition(mut self, partition: Option<u8>) -> Self {
        self.partition = partition;
        self
    }

    pub fn inaccessible(mut self, inaccessible: bool) -> Self {
        self.inaccessible = inaccessible;
        self
    }

    /// Replace the identity with one probed through this interface
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Make the new entry a user alias of `target`, with the given node as link target
    pub fn alias(mut self, name: impl Into<String>, target: EntryId, link_target: PathBuf) -> Self {
        self.alias = Some((name.into(), target, link_target));
        self
    }

    /// Produce the new entry, naming it unless it is an alias
    pub fn build(self, naming: &Naming) -> DeviceEntry {
        let mut entry = DeviceEntry {
            name: String::new(),
            legacy: PathBuf::new(),
            kind: self.kind,
            major: self.major,
            minor: self.minor,
            partition: self.partition,
            identity: self.identity.unwrap_or_else(|| self.base.identity.clone()),
            topology: self.base.topology.clone(),
            inaccessible: self.inaccessible,
            related: None,
            alias_of: None,
        };
        match self.alias {
            Some((name, target, link_target)) => {
                entry.name = name;
                entry.legacy = link_target;
                entry.alias_of = Some(target);
            }
            None => {
                entry.name = naming.canonical(&entry);
                entry.legacy = naming.legacy(&entry);
            }
        }
        entry
    }
}
