// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Registry construction
//!
//! For each candidate the generic node is identified first. Units with a
//! high level driver then get their disk/tape/cdrom/changer node located by
//! address, cross-checked against the generic view, and expanded into
//! partition or non-rewinding entries.

use std::{collections::BTreeMap, path::PathBuf};

use log::{debug, info, warn};

use crate::{
    discovery::{host_short_name, Candidate},
    DeviceEntry, DeviceHandle, DeviceKind, EntryId, Error, Naming, NodeOpener, NodeType, Registry, Topology,
    NO_REWIND, SG_MAJOR,
};

/// Highest partition number of a SCSI disk
const MAX_PARTITION: u32 = 15;

/// Knobs for registry construction
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Minimum search radius around the expected node index
    pub full_scan: u32,
    /// Register removable media (and OnStream tapes) even when they cannot be opened
    pub trust_removable: bool,
    /// Where to look up host adapter driver names
    pub sysroot: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            full_scan: 32,
            trust_removable: false,
            sysroot: None,
        }
    }
}

/// Builds a [`Registry`] from discovery candidates
pub struct Builder<'a, O: NodeOpener> {
    opener: &'a mut O,
    naming: &'a Naming,
    options: ScanOptions,
    next_index: BTreeMap<DeviceKind, u32>,
}

/// Indices `guess`, `guess - 1`, `guess + 1`, `guess - 2`, ... within `radius`
fn search_order(guess: u32, radius: u32, limit: u32) -> impl Iterator<Item = u32> {
    std::iter::once(guess)
        .chain((1..=radius).flat_map(move |d| [guess.checked_sub(d), guess.checked_add(d)].into_iter().flatten()))
        .filter(move |i| *i < limit)
}

impl<'a, O: NodeOpener> Builder<'a, O> {
    pub fn new(opener: &'a mut O, naming: &'a Naming, options: ScanOptions) -> Self {
        Self {
            opener,
            naming,
            options,
            next_index: BTreeMap::new(),
        }
    }

    /// Identify every candidate, in order
    pub fn build(&mut self, candidates: impl IntoIterator<Item = Candidate>) -> Registry {
        let mut registry = Registry::new();
        for candidate in candidates {
            let minor = candidate.generic_minor;
            if let Err(e) = self.add(&mut registry, candidate) {
                warn!("sg{minor}: {e}");
            }
        }
        registry
    }

    /// Identify one candidate and register all of its views
    ///
    /// Returns the generic entry. Failing to register a high level view is
    /// logged, not returned.
    pub fn add(&mut self, registry: &mut Registry, candidate: Candidate) -> Result<EntryId, Error> {
        let minor = candidate.generic_minor;
        let mut handle = self.opener.open(NodeType::Char, SG_MAJOR, minor)?;

        let (address, host_id) = match handle.address() {
            Ok(found) => found,
            Err(e) => {
                debug!("sg{minor}: address lookup failed: {e}");
                let address = candidate.address.ok_or(Error::NoAddress(minor))?;
                (address, candidate.host_id.unwrap_or_default())
            }
        };
        if let Some(expected) = candidate.address.filter(|a| *a != address) {
            warn!("sg{minor} moved from {expected} to {address}");
        }

        let identity = inquiry::probe(&mut handle, address.lun)?;
        let host_name = match candidate.host_name {
            Some(name) => Some(name),
            None => handle.host_name().unwrap_or_else(|e| {
                debug!("sg{minor}: no host name: {e}");
                None
            }),
        };
        let host_short_name = candidate.host_short_name.or_else(|| {
            let sysroot = self.options.sysroot.as_deref()?;
            host_short_name(sysroot, address.host)
        });
        drop(handle);

        let kind = DeviceKind::from_inquiry(
            identity.peripheral_type,
            identity.manufacturer.as_deref(),
            identity.model.as_deref(),
        );
        if let Some(hint) = candidate.kind_hint.filter(|h| *h != kind) {
            debug!("sg{minor}: discovered as {hint}, identifies as {kind}");
        }

        let topology = Topology {
            address,
            host_id,
            host_name,
            host_short_name,
        };
        let entry = DeviceEntry::generic(identity, topology, minor, self.naming);
        info!(
            "Found {} ({}) {} {} {}",
            entry.name,
            kind,
            entry.identity.manufacturer.as_deref().unwrap_or("?"),
            entry.identity.model.as_deref().unwrap_or("?"),
            entry.identity.revision.as_deref().unwrap_or("?"),
        );
        let generic = registry.push(entry);

        if kind != DeviceKind::Generic {
            self.add_view(registry, generic, kind, candidate.view);
        }
        Ok(generic)
    }

    fn next_index(&self, kind: DeviceKind) -> u32 {
        self.next_index.get(&kind).copied().unwrap_or_default()
    }

    /// Open `major:minor` and keep it if it answers for `entry`'s address
    fn try_node(&mut self, entry: &DeviceEntry, kind: DeviceKind, major: u32, minor: u32) -> Option<O::Handle> {
        let mut handle = self.opener.open(kind.node_type(), major, minor).ok()?;
        let (address, _) = handle.address().ok()?;
        (address == entry.topology.address).then_some(handle)
    }

    /// Find the high level node answering for the generic entry's address
    fn locate(
        &mut self,
        generic: &DeviceEntry,
        kind: DeviceKind,
        hint: Option<(u32, u32)>,
    ) -> Option<(u32, u32, O::Handle)> {
        if let Some((major, minor)) = hint {
            if let Some(handle) = self.try_node(generic, kind, major, minor) {
                return Some((major, minor, handle));
            }
            debug!("{}: hinted node {major}:{minor} does not match", generic.name);
        }

        let guess = self.next_index(kind);
        let radius = guess.max(self.options.full_scan);
        for index in search_order(guess, radius, kind.index_limit()) {
            let Some((major, minor)) = kind.node_for_index(index) else {
                continue;
            };
            if Some((major, minor)) == hint {
                continue;
            }
            if let Some(handle) = self.try_node(generic, kind, major, minor) {
                return Some((major, minor, handle));
            }
        }
        None
    }

    fn add_view(
        &mut self,
        registry: &mut Registry,
        generic_id: EntryId,
        kind: DeviceKind,
        hint: Option<(u32, u32)>,
    ) -> Option<EntryId> {
        let generic = registry.get(generic_id)?.clone();

        let view = match self.locate(&generic, kind, hint) {
            Some((major, minor, mut handle)) => {
                let builder = generic.derive().kind(kind).node(major, minor);
                match inquiry::probe(&mut handle, generic.topology.address.lun) {
                    Ok(identity) => builder.identity(identity).build(self.naming),
                    Err(e) => {
                        warn!("Strange: could not get info from {major}:{minor}: {e}");
                        builder.build(self.naming)
                    }
                }
            }
            None => {
                let (major, minor) = hint.or_else(|| kind.node_for_index(self.next_index(kind)))?;
                let view = generic
                    .derive()
                    .kind(kind)
                    .node(major, minor)
                    .inaccessible(true)
                    .build(self.naming);
                let hairy = generic.identity.removable || kind == DeviceKind::OnStreamTape;
                if !(hairy && self.options.trust_removable) {
                    warn!(
                        "Can't access {}removable {}, which should be equal to {}!",
                        if generic.identity.removable { "" } else { "NON-" },
                        view.name,
                        generic.name
                    );
                    return None;
                }
                info!("Can't access {}, registering it anyway", view.name);
                view
            }
        };

        let (major, minor, inaccessible) = (view.major, view.minor, view.inaccessible);
        let id = registry.attach_view(generic_id, view).ok()?;
        if let Some(index) = kind.index_for_node(major, minor) {
            let next = self.next_index.entry(kind).or_default();
            *next = (*next).max(index + 1);
        }
        if let Some(entry) = registry.get(id) {
            info!("Found {} ({})", entry.name, entry.legacy.display());
        }

        match kind {
            DeviceKind::Disk if !inaccessible => self.add_partitions(registry, id),
            DeviceKind::Tape | DeviceKind::OnStreamTape => {
                let rewinding = registry.get(id)?;
                let no_rewind = rewinding
                    .derive()
                    .node(rewinding.major, rewinding.minor | NO_REWIND)
                    .build(self.naming);
                registry.push_view_of(id, no_rewind);
            }
            _ => {}
        }
        Some(id)
    }

    fn add_partitions(&mut self, registry: &mut Registry, disk_id: EntryId) {
        let Some(disk) = registry.get(disk_id).cloned() else {
            return;
        };
        for part in 1..=MAX_PARTITION {
            let minor = disk.minor + part;
            if self.opener.open(NodeType::Block, disk.major, minor).is_err() {
                continue;
            }
            let partition = disk
                .derive()
                .node(disk.major, minor)
                .partition(Some(part as u8))
                .build(self.naming);
            info!("Found {} ({})", partition.name, partition.legacy.display());
            registry.push_view_of(disk_id, partition);
        }
    }
}
