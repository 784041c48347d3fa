// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::BTreeSet;

use log::warn;
use serde::Serialize;
use thiserror::Error;

use crate::{DeviceEntry, DeviceKind};

/// Stable handle of an entry within its [`Registry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The first field on which two views of one unit disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Mismatch {
    #[error("host differs")]
    Host,
    #[error("host id differs")]
    HostId,
    #[error("channel differs")]
    Channel,
    #[error("target id differs")]
    Id,
    #[error("lun differs")]
    Lun,
    #[error("inquiry type differs")]
    PeripheralType,
    #[error("removable flag differs")]
    Removable,
    #[error("manufacturer differs")]
    Manufacturer,
    #[error("model differs")]
    Model,
    #[error("revision differs")]
    Revision,
    #[error("serial number differs")]
    Serial,
    #[error("wwid differs")]
    Wwid,
    #[error("os unit id differs")]
    OsUnitId,
}

impl Mismatch {
    /// Compare two views of what should be the same unit
    pub fn check(a: &DeviceEntry, b: &DeviceEntry) -> Result<(), Mismatch> {
        let (ta, tb) = (&a.topology, &b.topology);
        let (ia, ib) = (&a.identity, &b.identity);
        let checks = [
            (ta.address.host == tb.address.host, Mismatch::Host),
            (ta.host_id == tb.host_id, Mismatch::HostId),
            (ta.address.channel == tb.address.channel, Mismatch::Channel),
            (ta.address.id == tb.address.id, Mismatch::Id),
            (ta.address.lun == tb.address.lun, Mismatch::Lun),
            (ia.peripheral_type == ib.peripheral_type, Mismatch::PeripheralType),
            (ia.removable == ib.removable, Mismatch::Removable),
            (ia.manufacturer == ib.manufacturer, Mismatch::Manufacturer),
            (ia.model == ib.model, Mismatch::Model),
            (ia.revision == ib.revision, Mismatch::Revision),
            (ia.serial.value() == ib.serial.value(), Mismatch::Serial),
            (ia.wwid.value() == ib.wwid.value(), Mismatch::Wwid),
            (ia.os_unit_id.value() == ib.os_unit_id.value(), Mismatch::OsUnitId),
        ];
        match checks.into_iter().find(|(same, _)| !same) {
            Some((_, mismatch)) => Err(mismatch),
            None => Ok(()),
        }
    }
}

/// Append-only, insertion ordered collection of device entries
#[derive(Debug, Default, Serialize)]
pub struct Registry {
    entries: Vec<DeviceEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, returning its handle
    pub fn push(&mut self, entry: DeviceEntry) -> EntryId {
        self.entries.push(entry);
        EntryId(self.entries.len() - 1)
    }

    pub fn get(&self, id: EntryId) -> Option<&DeviceEntry> {
        self.entries.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &DeviceEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    /// Append an entry derived from `owner`, pointing back at it
    pub fn push_view_of(&mut self, owner: EntryId, mut entry: DeviceEntry) -> EntryId {
        entry.related = Some(owner);
        self.push(entry)
    }

    /// Link two views of the same unit to each other
    pub fn relate(&mut self, a: EntryId, b: EntryId) {
        if let Some(entry) = self.entries.get_mut(a.0) {
            entry.related = Some(b);
        }
        if let Some(entry) = self.entries.get_mut(b.0) {
            entry.related = Some(a);
        }
    }

    /// Record a high level view of the generic entry `generic`
    ///
    /// The view is only registered if it agrees with the generic entry on
    /// address and identity, otherwise the unit was renumbered under us.
    pub fn attach_view(&mut self, generic: EntryId, view: DeviceEntry) -> Result<EntryId, Mismatch> {
        if let Some(base) = self.get(generic) {
            if let Err(mismatch) = Mismatch::check(base, &view) {
                warn!("Dev {} is different from {}: {mismatch}", view.name, base.name);
                return Err(mismatch);
            }
        }
        let id = self.push(view);
        self.relate(generic, id);
        Ok(id)
    }

    /// Every name the managed directory should contain
    pub fn names(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Partition entries of the whole disk `disk`
    pub fn partitions_of(&self, disk: EntryId) -> impl Iterator<Item = (EntryId, &DeviceEntry)> {
        let whole = self.get(disk).filter(|d| d.kind == DeviceKind::Disk && d.partition.is_none());
        self.iter().filter(move |(_, e)| {
            whole.is_some_and(|d| {
                e.kind == DeviceKind::Disk
                    && e.alias_of.is_none()
                    && e.partition.is_some()
                    && e.topology.address == d.topology.address
                    && e.topology.host_id == d.topology.host_id
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{mock, Address, Naming};

    #[test]
    fn test_attach_view() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        let generic = mock::generic_entry(Address::new(0, 0, 2, 0), 0, &naming);
        let view = generic.derive().kind(DeviceKind::Disk).node(8, 0).build(&naming);
        let g = registry.push(generic);
        let d = registry.attach_view(g, view).unwrap();
        assert_eq!(registry.get(g).unwrap().related, Some(d));
        assert_eq!(registry.get(d).unwrap().related, Some(g));
    }

    #[test]
    fn test_attach_mismatched_address() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        let generic = mock::generic_entry(Address::new(0, 0, 2, 0), 0, &naming);
        let other = mock::generic_entry(Address::new(0, 0, 3, 0), 1, &naming);
        let view = other.derive().kind(DeviceKind::Disk).node(8, 0).build(&naming);
        let g = registry.push(generic);
        assert_eq!(registry.attach_view(g, view), Err(Mismatch::Id));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(g).unwrap().related, None);
    }

    #[test]
    fn test_attach_mismatched_identity() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        let generic = mock::generic_entry(Address::new(0, 0, 2, 0), 0, &naming);
        let mut identity = generic.identity.clone();
        identity.model = Some("Other".to_owned());
        let view = generic.derive().kind(DeviceKind::Rom).node(11, 0).identity(identity).build(&naming);
        let g = registry.push(generic);
        assert_eq!(registry.attach_view(g, view), Err(Mismatch::Model));
    }

    #[test]
    fn test_partitions_of() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        let generic = mock::generic_entry(Address::new(0, 0, 2, 0), 0, &naming);
        let disk = generic.derive().kind(DeviceKind::Disk).node(8, 0).build(&naming);
        let p1 = disk.derive().node(8, 1).partition(Some(1)).build(&naming);
        let p2 = disk.derive().node(8, 2).partition(Some(2)).build(&naming);
        let stranger = mock::generic_entry(Address::new(0, 0, 3, 0), 1, &naming)
            .derive()
            .kind(DeviceKind::Disk)
            .node(8, 17)
            .partition(Some(1))
            .build(&naming);
        registry.push(generic);
        let d = registry.push(disk);
        registry.push(p1);
        registry.push(p2);
        registry.push(stranger);
        let names: Vec<_> = registry.partitions_of(d).map(|(_, e)| e.name.as_str()).collect();
        assert_eq!(names, ["sdh0-0c0i2l0p1", "sdh0-0c0i2l0p2"]);
    }
}
