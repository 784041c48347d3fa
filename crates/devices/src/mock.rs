// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Mock SCSI bus for testing.
//!
//! This module provides an in-memory bus of device nodes that can be used for
//! testing registry construction without requiring actual hardware devices.

use std::{collections::BTreeMap, io, path::PathBuf};

use inquiry::{cdb::Cdb, mock::MockTransport, Identity, Probe, Transport};

use crate::{
    Address, DeviceEntry, DeviceHandle, DeviceKind, Naming, NodeOpener, NodeType, Topology, SG_MAJOR,
};

/// A device node on the mock bus
#[derive(Debug, Clone)]
pub struct MockHandle {
    pub address: Address,
    pub host_id: u32,
    pub host_name: Option<String>,
    pub transport: MockTransport,
}

impl Transport for MockHandle {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, inquiry::Error> {
        self.transport.execute(cdb, buf)
    }
}

impl DeviceHandle for MockHandle {
    fn address(&mut self) -> io::Result<(Address, u32)> {
        Ok((self.address, self.host_id))
    }

    fn host_name(&mut self) -> io::Result<Option<String>> {
        Ok(self.host_name.clone())
    }
}

fn node_key(node: NodeType) -> u8 {
    match node {
        NodeType::Block => b'b',
        NodeType::Char => b'c',
    }
}

/// Nodes keyed by type and number
#[derive(Debug, Default)]
pub struct MockBus {
    nodes: BTreeMap<(u8, u32, u32), MockHandle>,
    /// Every node opened so far
    pub opened: Vec<(NodeType, u32, u32)>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a node on the bus
    pub fn add(&mut self, node: NodeType, major: u32, minor: u32, address: Address, transport: MockTransport) {
        self.nodes.insert(
            (node_key(node), major, minor),
            MockHandle {
                address,
                host_id: 0,
                host_name: Some(format!("mock host adapter {}", address.host)),
                transport,
            },
        );
    }

    /// Place an `sg` node on the bus
    pub fn add_generic(&mut self, minor: u32, address: Address, transport: MockTransport) {
        self.add(NodeType::Char, SG_MAJOR, minor, address, transport);
    }

    /// Place the high level node for the `index`th device of `kind`
    pub fn add_view(&mut self, kind: DeviceKind, index: u32, address: Address, transport: MockTransport) {
        if let Some((major, minor)) = kind.node_for_index(index) {
            self.add(kind.node_type(), major, minor, address, transport);
        }
    }

    /// Remove a node
    pub fn remove(&mut self, node: NodeType, major: u32, minor: u32) {
        self.nodes.remove(&(node_key(node), major, minor));
    }
}

impl NodeOpener for MockBus {
    type Handle = MockHandle;

    fn open(&mut self, node: NodeType, major: u32, minor: u32) -> io::Result<MockHandle> {
        self.opened.push((node, major, minor));
        self.nodes
            .get(&(node_key(node), major, minor))
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(nix::libc::ENXIO))
    }
}

/// A bare entry of the given kind, unnamed and without identity
pub fn entry(kind: DeviceKind, address: Address) -> DeviceEntry {
    DeviceEntry {
        name: String::new(),
        legacy: PathBuf::new(),
        kind,
        major: 0,
        minor: 0,
        partition: None,
        identity: Identity::default(),
        topology: Topology {
            address,
            ..Default::default()
        },
        inaccessible: false,
        related: None,
        alias_of: None,
    }
}

/// A named generic entry for a typical disk
pub fn generic_entry(address: Address, minor: u32, naming: &Naming) -> DeviceEntry {
    let identity = Identity {
        manufacturer: Some("Mock Vendor".to_owned()),
        model: Some("Mock Device".to_owned()),
        revision: Some("0001".to_owned()),
        serial: Probe::Found(format!("MOCK{minor:04}")),
        ..Default::default()
    };
    let topology = Topology {
        address,
        host_id: 0,
        host_name: Some(format!("mock host adapter {}", address.host)),
        host_short_name: Some("mock".to_owned()),
    };
    DeviceEntry::generic(identity, topology, minor, naming)
}
