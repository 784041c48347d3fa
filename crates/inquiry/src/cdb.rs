// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Command descriptor blocks for the handful of commands we issue

/// SCSI operation codes
pub mod opcode {
    /// Inquiry - get device identification
    pub const INQUIRY: u8 = 0x12;
    /// Maintenance In - used by HSV controllers to report the OS unit id
    pub const MAINTENANCE_IN: u8 = 0xa3;
}

/// Allocation length requested for every INQUIRY we send
pub const INQUIRY_ALLOC_LEN: u8 = 0xfc;

/// SCSI Command Descriptor Block
///
/// Holds the raw command bytes sent to the device. Only 6 and 12 byte
/// commands are built here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; 16],
    len: usize,
}

impl Cdb {
    fn zeroed(len: usize) -> Self {
        Self { bytes: [0; 16], len }
    }

    /// Build a standard INQUIRY (EVPD clear, page 0)
    ///
    /// `lun` is only encoded for pre SCSI-3 devices, callers pass 0 otherwise.
    pub fn inquiry(lun: u8) -> Self {
        Self::inquiry_page(lun, 0, false)
    }

    /// Build an INQUIRY for a vital product data page
    pub fn vpd(lun: u8, page: u8) -> Self {
        Self::inquiry_page(lun, page, true)
    }

    fn inquiry_page(lun: u8, page: u8, evpd: bool) -> Self {
        let mut cdb = Self::zeroed(6);
        cdb.bytes[0] = opcode::INQUIRY;
        cdb.bytes[1] = (lun << 5) | u8::from(evpd);
        cdb.bytes[2] = page;
        cdb.bytes[4] = INQUIRY_ALLOC_LEN;
        cdb
    }

    /// Build the HSV "report OS unit id" MAINTENANCE IN command
    pub fn os_unit_id() -> Self {
        let mut cdb = Self::zeroed(12);
        cdb.bytes[0] = opcode::MAINTENANCE_IN;
        cdb.bytes[1] = 0x05;
        cdb.bytes[9] = INQUIRY_ALLOC_LEN;
        cdb
    }

    /// The command bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Operation code
    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// Whether the EVPD bit is set
    pub fn evpd(&self) -> bool {
        self.opcode() == opcode::INQUIRY && self.bytes[1] & 0x01 != 0
    }

    /// Page code (byte 2)
    pub fn page(&self) -> u8 {
        self.bytes[2]
    }

    /// Number of bytes the device may return
    pub fn allocation_len(&self) -> usize {
        match self.opcode() {
            opcode::INQUIRY => self.bytes[4] as usize,
            _ => u32::from_be_bytes([self.bytes[6], self.bytes[7], self.bytes[8], self.bytes[9]]) as usize,
        }
    }
}
