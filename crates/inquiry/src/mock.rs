// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! In-memory transport with canned responses
//!
//! Used by tests throughout the workspace in place of real hardware.

use std::collections::BTreeMap;

use crate::{
    cdb::{opcode, Cdb},
    vpd, Error, Transport,
};

/// CHECK CONDITION
const CHECK_CONDITION: u8 = 0x02;

/// A transport that answers from canned pages
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    standard: Vec<u8>,
    pages: BTreeMap<u8, Vec<u8>>,
    os_unit_id: Option<i32>,
    failing: bool,
    /// Every command executed so far
    pub log: Vec<Cdb>,
}

fn padded(value: &str, width: usize) -> Vec<u8> {
    let mut field = value.as_bytes().to_vec();
    field.resize(width, b' ');
    field.truncate(width);
    field
}

impl MockTransport {
    /// Create a device answering the standard INQUIRY only
    pub fn new(peripheral_type: u8, vendor: &str, model: &str, revision: &str) -> Self {
        let mut standard = vec![peripheral_type & 0x1f, 0x00, 0x05, 0x02, 31, 0, 0, 0];
        standard.extend(padded(vendor, 8));
        standard.extend(padded(model, 16));
        standard.extend(padded(revision, 4));
        Self {
            standard,
            ..Default::default()
        }
    }

    /// Set the removable medium bit
    pub fn removable(mut self) -> Self {
        self.standard[1] |= 0x80;
        self
    }

    /// Report the given ANSI version
    pub fn ansi_version(mut self, version: u8) -> Self {
        self.standard[2] = version & 0x07;
        self
    }

    /// Provide a unit serial number page
    pub fn serial(mut self, serial: &str) -> Self {
        let mut page = vec![self.standard[0], vpd::PAGE_SERIAL, 0, serial.len() as u8];
        page.extend_from_slice(serial.as_bytes());
        self.pages.insert(vpd::PAGE_SERIAL, page);
        self
    }

    /// Provide a device identification page with one NAA descriptor
    pub fn naa(self, value: u64) -> Self {
        self.designator(0x01, 0x03, &value.to_be_bytes())
    }

    /// Provide a device identification page with one T10 vendor id descriptor
    pub fn t10(self, id: &str) -> Self {
        self.designator(0x02, 0x01, id.as_bytes())
    }

    /// Append a logical unit designator to the device identification page
    pub fn designator(mut self, code_set: u8, designator_type: u8, payload: &[u8]) -> Self {
        let peripheral = self.standard[0];
        let page = self
            .pages
            .entry(vpd::PAGE_DEVICE_ID)
            .or_insert_with(|| vec![peripheral, vpd::PAGE_DEVICE_ID, 0, 0]);
        page.extend_from_slice(&[code_set, designator_type & 0x0f, 0, payload.len() as u8]);
        page.extend_from_slice(payload);
        let len = (page.len() - 4) as u16;
        page[2..4].copy_from_slice(&len.to_be_bytes());
        self
    }

    /// Answer the OS unit id command
    pub fn os_unit_id(mut self, id: i32) -> Self {
        self.os_unit_id = Some(id);
        self
    }

    /// Fail every command
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    fn supported(&self) -> Vec<u8> {
        let mut page = vec![self.standard[0], vpd::PAGE_SUPPORTED, 0, 0, vpd::PAGE_SUPPORTED];
        page.extend(self.pages.keys());
        page[3] = (page.len() - 4) as u8;
        page
    }

    fn response(&self, cdb: &Cdb) -> Option<Vec<u8>> {
        match cdb.opcode() {
            opcode::INQUIRY if !cdb.evpd() => Some(self.standard.clone()),
            opcode::INQUIRY if cdb.page() == vpd::PAGE_SUPPORTED => Some(self.supported()),
            opcode::INQUIRY => self.pages.get(&cdb.page()).cloned(),
            opcode::MAINTENANCE_IN => self.os_unit_id.map(|id| {
                let mut data = vec![0u8; 8];
                data[4..6].copy_from_slice(&(id as u16).to_be_bytes());
                data
            }),
            _ => None,
        }
    }
}

impl Transport for MockTransport {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, Error> {
        self.log.push(cdb.clone());
        let data = self
            .response(cdb)
            .filter(|_| !self.failing)
            .ok_or(Error::Status {
                opcode: cdb.opcode(),
                status: CHECK_CONDITION,
                host: 0,
                driver: 0,
            })?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}
