// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use devices::{DeviceEntry, DeviceKind, EntryId, Registry, NO_REWIND};

/// Constraints an alias puts on its target; `None` leaves a field free
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    pub id: Option<u32>,
    pub lun: Option<u32>,
    pub channel: Option<u32>,
    pub host_id: Option<u32>,
    /// Host adapter number
    pub host_num: Option<u32>,
    pub os_unit_id: Option<i32>,
    pub wwid: Option<u64>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub revision: Option<String>,
    /// Prefix of the long or short host adapter name
    pub host_name: Option<String>,
    /// Partition of a disk; whole devices when unset
    pub partition: Option<u8>,
}

fn same<T: PartialEq>(want: Option<T>, have: T) -> bool {
    want.map_or(true, |want| want == have)
}

fn same_found<T: PartialEq>(want: Option<&T>, have: Option<&T>) -> bool {
    want.map_or(true, |want| have == Some(want))
}

impl Predicate {
    /// Whether the entry's topology and identity satisfy every set field
    pub fn matches(&self, entry: &DeviceEntry) -> bool {
        let address = &entry.topology.address;
        let identity = &entry.identity;

        let host_name = self.host_name.as_deref().map_or(true, |prefix| {
            [&entry.topology.host_name, &entry.topology.host_short_name]
                .into_iter()
                .any(|name| name.as_deref().is_some_and(|name| name.starts_with(prefix)))
        });

        same(self.id, address.id)
            && same(self.channel, address.channel)
            && same(self.lun, address.lun)
            && same(self.host_id, entry.topology.host_id)
            && same(self.host_num, address.host)
            && same_found(self.os_unit_id.as_ref(), identity.os_unit_id.value())
            && same_found(self.wwid.as_ref(), identity.wwid.value())
            && same_found(self.manufacturer.as_ref(), identity.manufacturer.as_ref())
            && same_found(self.model.as_ref(), identity.model.as_ref())
            && same_found(self.serial.as_ref(), identity.serial.value())
            && same_found(self.revision.as_ref(), identity.revision.as_ref())
            && host_name
    }
}

/// One line of the alias file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    /// Line number, for diagnostics
    pub line: usize,
    /// Name of the alias node
    pub name: String,
    pub kind: DeviceKind,
    pub predicate: Predicate,
}

impl AliasRecord {
    /// Whether `entry` can be the target of this alias
    ///
    /// Aliases and non-rewinding tape nodes are never targets; the latter
    /// get their alias derived from the rewinding one.
    pub fn matches(&self, entry: &DeviceEntry) -> bool {
        if entry.alias_of.is_some() || entry.kind != self.kind || entry.partition != self.predicate.partition {
            return false;
        }
        if entry.kind.is_tape() && entry.minor & NO_REWIND != 0 {
            return false;
        }
        self.predicate.matches(entry)
    }
}

/// Outcome of looking up the target of an alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Unique(EntryId),
    /// Two matches without multipath support; nothing is aliased
    Ambiguous(EntryId, EntryId),
    /// The first match is aliased, the others are further paths to it
    Multipath(EntryId, Vec<EntryId>),
}

impl Resolution {
    /// The entry to alias, if there is one
    pub fn target(&self) -> Option<EntryId> {
        match self {
            Resolution::Unique(id) | Resolution::Multipath(id, _) => Some(*id),
            Resolution::Unresolved | Resolution::Ambiguous(..) => None,
        }
    }
}

/// Find the target of `record` among the registry entries, in insertion order
pub fn resolve(registry: &Registry, record: &AliasRecord, multipath: bool) -> Resolution {
    let mut matches = registry.iter().filter(|(_, e)| record.matches(e)).map(|(id, _)| id);
    let Some(first) = matches.next() else {
        return Resolution::Unresolved;
    };
    if !multipath {
        return match matches.next() {
            Some(second) => Resolution::Ambiguous(first, second),
            None => Resolution::Unique(first),
        };
    }
    let others = matches.collect::<Vec<_>>();
    if others.is_empty() {
        Resolution::Unique(first)
    } else {
        Resolution::Multipath(first, others)
    }
}

#[cfg(test)]
mod tests {
    use devices::{mock, Address, Naming};
    use test_log::test;

    use super::*;

    fn record(kind: DeviceKind, predicate: Predicate) -> AliasRecord {
        AliasRecord {
            line: 1,
            name: "alias".to_owned(),
            kind,
            predicate,
        }
    }

    fn disk(address: Address, minor: u32, naming: &Naming) -> DeviceEntry {
        mock::generic_entry(address, minor, naming)
            .derive()
            .kind(DeviceKind::Disk)
            .node(8, minor * 16)
            .build(naming)
    }

    #[test]
    fn test_ambiguity_and_multipath() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        let first = registry.push(disk(Address::new(0, 0, 1, 0), 0, &naming));
        let second = registry.push(disk(Address::new(0, 1, 1, 0), 1, &naming));
        let record = record(
            DeviceKind::Disk,
            Predicate {
                manufacturer: Some("Mock Vendor".to_owned()),
                ..Default::default()
            },
        );

        assert_eq!(resolve(&registry, &record, false), Resolution::Ambiguous(first, second));
        assert_eq!(resolve(&registry, &record, false).target(), None);
        assert_eq!(resolve(&registry, &record, true), Resolution::Multipath(first, vec![second]));
        assert_eq!(resolve(&registry, &record, true).target(), Some(first));

        let pinned = AliasRecord {
            predicate: Predicate {
                channel: Some(1),
                ..record.predicate.clone()
            },
            ..record
        };
        assert_eq!(resolve(&registry, &pinned, false), Resolution::Unique(second));
    }

    #[test]
    fn test_unresolved() {
        let naming = Naming::default();
        let mut registry = Registry::new();
        registry.push(disk(Address::new(0, 0, 1, 0), 0, &naming));
        let wrong_kind = record(DeviceKind::Tape, Predicate::default());
        assert_eq!(resolve(&registry, &wrong_kind, true), Resolution::Unresolved);
        let wrong_serial = record(
            DeviceKind::Disk,
            Predicate {
                serial: Some("nope".to_owned()),
                ..Default::default()
            },
        );
        assert_eq!(resolve(&registry, &wrong_serial, true), Resolution::Unresolved);
    }

    #[test]
    fn test_partition_matching() {
        let naming = Naming::default();
        let whole = disk(Address::new(0, 0, 1, 0), 0, &naming);
        let part = whole.derive().node(8, 2).partition(Some(2)).build(&naming);

        let any = record(DeviceKind::Disk, Predicate::default());
        assert!(any.matches(&whole));
        assert!(!any.matches(&part));

        let second = record(
            DeviceKind::Disk,
            Predicate {
                partition: Some(2),
                ..Default::default()
            },
        );
        assert!(!second.matches(&whole));
        assert!(second.matches(&part));
    }

    #[test]
    fn test_skips_aliases_and_no_rewind() {
        let naming = Naming::default();
        let generic = mock::generic_entry(Address::new(2, 0, 5, 0), 3, &naming);
        let tape = generic.derive().kind(DeviceKind::Tape).node(9, 0).build(&naming);
        let ntape = tape.derive().node(9, NO_REWIND).build(&naming);
        let mut registry = Registry::new();
        let t = registry.push(tape.clone());
        registry.push(ntape);
        registry.push(tape.derive().alias("backup", t, "/dev/scsi/x".into()).build(&naming));

        let record = record(DeviceKind::Tape, Predicate::default());
        assert_eq!(resolve(&registry, &record, false), Resolution::Unique(t));
    }

    #[test]
    fn test_identity_and_host_fields() {
        let naming = Naming::default();
        let mut entry = disk(Address::new(3, 0, 2, 1), 4, &naming);
        entry.topology.host_id = 0x10;
        entry.identity.wwid = inquiry::Probe::Found(0x5000_c500_0000_0001);

        let check = |predicate: Predicate| record(DeviceKind::Disk, predicate).matches(&entry);
        assert!(check(Predicate {
            host_num: Some(3),
            host_id: Some(0x10),
            id: Some(2),
            lun: Some(1),
            ..Default::default()
        }));
        assert!(!check(Predicate {
            host_num: Some(2),
            ..Default::default()
        }));
        assert!(check(Predicate {
            wwid: Some(0x5000_c500_0000_0001),
            serial: Some("MOCK0004".to_owned()),
            revision: Some("0001".to_owned()),
            model: Some("Mock Device".to_owned()),
            ..Default::default()
        }));
        assert!(!check(Predicate {
            os_unit_id: Some(1),
            ..Default::default()
        }));
        assert!(check(Predicate {
            host_name: Some("mock host".to_owned()),
            ..Default::default()
        }));
        assert!(check(Predicate {
            host_name: Some("mo".to_owned()),
            ..Default::default()
        }));
        assert!(!check(Predicate {
            host_name: Some("ahci".to_owned()),
            ..Default::default()
        }));
    }
}
