// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Vital product data page decoding
//!
//! All decoding works on plain byte slices with explicit bounds checks. A
//! device may return fewer bytes than the page header claims, in which case
//! we stop at whatever was actually transferred.

use std::collections::BTreeSet;

use log::{debug, trace};

use crate::{text, Error};

/// Supported VPD pages
pub const PAGE_SUPPORTED: u8 = 0x00;
/// Unit serial number
pub const PAGE_SERIAL: u8 = 0x80;
/// Device identification
pub const PAGE_DEVICE_ID: u8 = 0x83;

const HEADER_LEN: usize = 4;

/// The page body as bounded by the declared length and the transferred bytes
fn body(page: &[u8], code: u8) -> Result<&[u8], Error> {
    if page.len() < HEADER_LEN {
        return Err(Error::ShortResponse {
            expected: HEADER_LEN,
            got: page.len(),
        });
    }
    if page[1] != code {
        return Err(Error::UnexpectedPage {
            expected: code,
            found: page[1],
        });
    }
    let declared = u16::from_be_bytes([page[2], page[3]]) as usize;
    let end = (HEADER_LEN + declared).min(page.len());
    Ok(&page[HEADER_LEN..end])
}

/// Decode the list of supported page codes from page 0x00
pub fn supported_pages(page: &[u8]) -> Result<BTreeSet<u8>, Error> {
    Ok(body(page, PAGE_SUPPORTED)?.iter().copied().collect())
}

/// Decode the unit serial number from page 0x80
pub fn serial_number(page: &[u8]) -> Result<Option<String>, Error> {
    Ok(text(body(page, PAGE_SERIAL)?))
}

/// Which entity an identification descriptor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    /// The addressed logical unit
    LogicalUnit,
    /// The port that received the command
    TargetPort,
    /// The SCSI target device containing the logical unit
    TargetDevice,
    /// Reserved value
    Reserved,
}

impl From<u8> for Association {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            0 => Association::LogicalUnit,
            1 => Association::TargetPort,
            2 => Association::TargetDevice,
            _ => Association::Reserved,
        }
    }
}

/// Code set values of interest
pub mod code_set {
    pub const BINARY: u8 = 1;
    pub const ASCII: u8 = 2;
}

/// Designator type values of interest
pub mod designator_type {
    pub const T10_VENDOR_ID: u8 = 1;
    pub const EUI64: u8 = 2;
    pub const NAA: u8 = 3;
}

/// A single identification descriptor from page 0x83
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Designator<'a> {
    pub code_set: u8,
    pub association: Association,
    pub designator_type: u8,
    pub payload: &'a [u8],
}

/// Iterator over the identification descriptors of page 0x83
pub struct Designators<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Designators<'a> {
    type Item = Designator<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < HEADER_LEN {
            return None;
        }
        let len = self.rest[3] as usize;
        let Some(payload) = self.rest.get(HEADER_LEN..HEADER_LEN + len) else {
            trace!("truncated identification descriptor ({len} bytes declared)");
            self.rest = &[];
            return None;
        };
        let designator = Designator {
            code_set: self.rest[0] & 0x0f,
            association: Association::from(self.rest[1] >> 4),
            designator_type: self.rest[1] & 0x0f,
            payload,
        };
        self.rest = &self.rest[HEADER_LEN + len..];
        Some(designator)
    }
}

/// Walk the identification descriptors of a device identification page
pub fn designators(page: &[u8]) -> Result<Designators<'_>, Error> {
    Ok(Designators {
        rest: body(page, PAGE_DEVICE_ID)?,
    })
}

fn be_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.get(..8)?.try_into().ok()?))
}

impl Designator<'_> {
    /// Reduce this descriptor to a 64 bit world wide id, if it encodes one
    pub fn wwid(&self) -> Option<u64> {
        if self.association != Association::LogicalUnit {
            return None;
        }
        match (self.designator_type, self.code_set) {
            (designator_type::EUI64, code_set::BINARY) => match self.payload.len() {
                8 | 12 => be_u64(self.payload),
                16 => be_u64(&self.payload[4..]),
                _ => None,
            },
            (designator_type::NAA, code_set::BINARY) => {
                let d = self.payload.get(..8)?;
                match d[0] >> 4 {
                    // IEEE extended: 24 bit OUI, top 8 of the 12 vendor specific bits,
                    // 24 bit serial
                    2 => Some(
                        u64::from(d[2]) << 48
                            | u64::from(d[3]) << 40
                            | u64::from(d[4]) << 32
                            | u64::from((d[0] & 0x0f) << 4 | d[1] >> 4) << 24
                            | u64::from(d[5]) << 16
                            | u64::from(d[6]) << 8
                            | u64::from(d[7]),
                    ),
                    // IEEE registered (extended): everything after the NAA nibble
                    5 | 6 => be_u64(d).map(|v| v & 0x0fff_ffff_ffff_ffff),
                    _ => None,
                }
            }
            (designator_type::T10_VENDOR_ID, code_set::ASCII) => {
                let (vendor, ident) = self.payload.split_at(self.payload.len().min(8));
                debug!(
                    "T10 ID: \"{}\" \"{}\"",
                    String::from_utf8_lossy(vendor),
                    String::from_utf8_lossy(ident)
                );
                None
            }
            _ => None,
        }
    }
}

/// Extract the world wide id from a device identification page
///
/// Returns `Ok(None)` when no descriptor yields a usable id. Pre-SPC devices
/// put a bare 8 byte id where the first descriptor would be, recognisable by
/// a non-zero reserved byte.
pub fn wwid(page: &[u8]) -> Result<Option<u64>, Error> {
    let ids = body(page, PAGE_DEVICE_ID)?;
    if ids.get(2).is_some_and(|&reserved| reserved != 0) {
        trace!("pre-SPC identification page");
        return Ok(be_u64(ids));
    }
    Ok(designators(page)?.find_map(|d| d.wwid()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page83(descriptors: &[&[u8]]) -> Vec<u8> {
        let body: Vec<u8> = descriptors.concat();
        let mut page = vec![0x00, PAGE_DEVICE_ID];
        page.extend_from_slice(&(body.len() as u16).to_be_bytes());
        page.extend(body);
        page
    }

    fn descriptor(code_set: u8, assoc: u8, kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut d = vec![code_set, (assoc << 4) | kind, 0, payload.len() as u8];
        d.extend_from_slice(payload);
        d
    }

    #[test_log::test]
    fn test_naa5() {
        let naa = [0x56, 0x00, 0xa0, 0xb8, 0x00, 0x0e, 0x4c, 0x3a];
        let page = page83(&[&descriptor(1, 0, 3, &naa)]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0600_a0b8_000e_4c3a));
    }

    #[test_log::test]
    fn test_naa2() {
        let naa = [0x20, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        let page = page83(&[&descriptor(1, 0, 3, &naa)]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0022_3344_0155_6677));

        // Only the upper byte of the 12 vendor specific bits is kept
        let naa = [0x2a, 0xbc, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let page = page83(&[&descriptor(1, 0, 3, &naa)]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0011_2233_ab44_5566));
    }

    #[test_log::test]
    fn test_pre_spc_page() {
        let page = [0x00, PAGE_DEVICE_ID, 0x00, 0x08, 1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(wwid(&page).unwrap(), Some(0x0102_0304_0506_0708));

        // Too short to carry an id
        let page = [0x00, PAGE_DEVICE_ID, 0x00, 0x04, 1, 2, 3, 4];
        assert_eq!(wwid(&page).unwrap(), None);
    }

    #[test_log::test]
    fn test_unknown_naa_is_skipped() {
        let naa = [0x30, 0, 0, 0, 0, 0, 0, 1];
        let page = page83(&[&descriptor(1, 0, 3, &naa)]);
        assert_eq!(wwid(&page).unwrap(), None);
    }

    #[test_log::test]
    fn test_eui64_lengths() {
        let eight = [1, 2, 3, 4, 5, 6, 7, 8];
        let page = page83(&[&descriptor(1, 0, 2, &eight)]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0102_0304_0506_0708));

        let sixteen = [0xff, 0xff, 0xff, 0xff, 1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0];
        let page = page83(&[&descriptor(1, 0, 2, &sixteen)]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0102_0304_0506_0708));

        let odd = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let page = page83(&[&descriptor(1, 0, 2, &odd)]);
        assert_eq!(wwid(&page).unwrap(), None);
    }

    #[test_log::test]
    fn test_t10_only_is_absent() {
        let page = page83(&[&descriptor(2, 0, 1, b"LINUX   scsi_debug_1")]);
        assert_eq!(wwid(&page).unwrap(), None);
    }

    #[test_log::test]
    fn test_port_association_skipped() {
        let port = descriptor(1, 1, 3, &[0x51, 1, 1, 1, 1, 1, 1, 1]);
        let unit = descriptor(1, 0, 3, &[0x52, 2, 2, 2, 2, 2, 2, 2]);
        let page = page83(&[&port, &unit]);
        assert_eq!(wwid(&page).unwrap(), Some(0x0202_0202_0202_0202));
    }

    #[test_log::test]
    fn test_zero_is_a_valid_id() {
        let page = page83(&[&descriptor(1, 0, 3, &[0x50, 0, 0, 0, 0, 0, 0, 0])]);
        assert_eq!(wwid(&page).unwrap(), Some(0));
    }

    #[test_log::test]
    fn test_wrong_page_is_an_error() {
        let mut page = page83(&[&descriptor(1, 0, 3, &[0x50, 0, 0, 0, 0, 0, 0, 1])]);
        page[1] = PAGE_SERIAL;
        assert!(matches!(
            wwid(&page),
            Err(Error::UnexpectedPage {
                expected: PAGE_DEVICE_ID,
                found: PAGE_SERIAL
            })
        ));
    }

    #[test_log::test]
    fn test_truncated_descriptor_stops() {
        let mut page = page83(&[&descriptor(1, 0, 3, &[0x50, 0, 0, 0, 0, 0, 0, 1])]);
        page.truncate(page.len() - 2);
        assert_eq!(wwid(&page).unwrap(), None);
    }

    #[test]
    fn test_supported_and_serial() {
        let pages = supported_pages(&[0, 0, 0, 3, 0x00, 0x80, 0x83]).unwrap();
        assert!(pages.contains(&PAGE_SERIAL) && pages.contains(&PAGE_DEVICE_ID));

        let mut page = vec![0, PAGE_SERIAL, 0, 12];
        page.extend_from_slice(b"  ABC123    ");
        assert_eq!(serial_number(&page).unwrap().as_deref(), Some("ABC123"));

        let blank = [0, PAGE_SERIAL, 0, 4, b' ', b' ', b' ', b' '];
        assert_eq!(serial_number(&blank).unwrap(), None);
    }
}
