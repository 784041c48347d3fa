// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! SCSI identity probing
//!
//! This crate issues INQUIRY (and the vendor specific OS unit id command)
//! over a [`Transport`] and decodes the responses into an [`Identity`].
//! Vital product data decoding lives in [`vpd`], the Linux `SG_IO`
//! transport in [`sg`].

use std::{collections::BTreeSet, io};

use log::{debug, trace, warn};
use serde::Serialize;
use thiserror::Error;

pub mod cdb;
pub mod mock;
pub mod sg;
pub mod vpd;

use cdb::Cdb;

/// Minimum length of a standard INQUIRY response
pub const STANDARD_INQUIRY_LEN: usize = 36;

/// Model prefix of controllers that answer the OS unit id command
pub const OS_UNIT_ID_MODEL_PREFIX: &str = "HSV";

/// Errors that can occur when talking to a device
#[derive(Debug, Error)]
pub enum Error {
    /// The command completed with a non-zero status
    #[error("command {opcode:#04x} failed: status {status:#04x}, host {host:#x}, driver {driver:#x}")]
    Status {
        opcode: u8,
        status: u8,
        host: u16,
        driver: u16,
    },

    /// Fewer bytes were returned than the response format needs
    #[error("short response: expected at least {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },

    /// A VPD response carried a different page code than requested
    #[error("unexpected vpd page {found:#04x}, wanted {expected:#04x}")]
    UnexpectedPage { expected: u8, found: u8 },

    /// An I/O error occurred
    #[error("io: {0}")]
    IO(#[from] io::Error),
}

/// Anything that can execute a data-in SCSI command
pub trait Transport {
    /// Execute `cdb`, filling `buf` with the returned data
    ///
    /// Returns the number of bytes actually transferred.
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).execute(cdb, buf)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).execute(cdb, buf)
    }
}

/// Outcome of an optional identity query
///
/// Keeps "never asked" apart from "asked and got nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe<T> {
    /// The query was not issued (not advertised, or not applicable)
    #[default]
    Skipped,
    /// The query was issued but yielded no value
    Absent,
    /// The query produced a value
    Found(T),
}

impl<T> Probe<T> {
    /// The found value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Probe::Found(v) => Some(v),
            _ => None,
        }
    }

    fn from_option(value: Option<T>) -> Self {
        value.map_or(Probe::Absent, Probe::Found)
    }
}

/// Decoded standard INQUIRY data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandardInquiry {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
    pub peripheral_type: u8,
    pub removable: bool,
    pub ansi_version: u8,
}

impl StandardInquiry {
    /// Decode a standard INQUIRY response
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() < STANDARD_INQUIRY_LEN {
            return Err(Error::ShortResponse {
                expected: STANDARD_INQUIRY_LEN,
                got: data.len(),
            });
        }
        Ok(Self {
            manufacturer: text(&data[8..16]),
            model: text(&data[16..32]),
            revision: text(&data[32..36]),
            peripheral_type: data[0] & 0x1f,
            removable: data[1] & 0x80 != 0,
            ansi_version: data[2] & 0x07,
        })
    }

    /// LUN to encode in follow-up commands
    ///
    /// SCSI-3 and later devices take the LUN from the transport, not the CDB.
    pub fn cdb_lun(&self, lun: u32) -> u8 {
        if self.ansi_version < 3 {
            (lun & 0x07) as u8
        } else {
            0
        }
    }
}

/// Everything we know about a logical unit's identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
    pub peripheral_type: u8,
    pub removable: bool,
    pub ansi_version: u8,
    pub serial: Probe<String>,
    pub wwid: Probe<u64>,
    pub os_unit_id: Probe<i32>,
}

impl From<StandardInquiry> for Identity {
    fn from(std: StandardInquiry) -> Self {
        Self {
            manufacturer: std.manufacturer,
            model: std.model,
            revision: std.revision,
            peripheral_type: std.peripheral_type,
            removable: std.removable,
            ansi_version: std.ansi_version,
            ..Default::default()
        }
    }
}

/// Trim ASCII padding, mapping an empty result to `None`
pub(crate) fn text(bytes: &[u8]) -> Option<String> {
    let trimmed = String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_owned();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn run(t: &mut impl Transport, cdb: &Cdb) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; cdb.allocation_len()];
    let n = t.execute(cdb, &mut buf)?;
    buf.truncate(n.min(buf.len()));
    trace!("{:#04x} returned {} bytes", cdb.opcode(), buf.len());
    Ok(buf)
}

/// Issue a standard INQUIRY
pub fn identify(t: &mut impl Transport) -> Result<StandardInquiry, Error> {
    StandardInquiry::from_bytes(&run(t, &Cdb::inquiry(0))?)
}

/// Ask which VPD pages the device supports
///
/// Failure is not fatal, the device simply supports nothing we can use.
pub fn list_supported_pages(t: &mut impl Transport, lun: u8) -> BTreeSet<u8> {
    match run(t, &Cdb::vpd(lun, vpd::PAGE_SUPPORTED)).and_then(|page| vpd::supported_pages(&page)) {
        Ok(pages) => pages,
        Err(e) => {
            debug!("no supported page list: {e}");
            BTreeSet::new()
        }
    }
}

/// Read the unit serial number page
pub fn fetch_serial(t: &mut impl Transport, lun: u8) -> Result<Option<String>, Error> {
    vpd::serial_number(&run(t, &Cdb::vpd(lun, vpd::PAGE_SERIAL))?)
}

/// Read the device identification page and reduce it to a world wide id
pub fn fetch_wwid(t: &mut impl Transport, lun: u8) -> Result<Option<u64>, Error> {
    vpd::wwid(&run(t, &Cdb::vpd(lun, vpd::PAGE_DEVICE_ID))?)
}

/// Read the OS unit id of HSV controller LUNs
///
/// Returns `Ok(None)` without touching the device for any other model.
pub fn fetch_os_unit_id(t: &mut impl Transport, model: Option<&str>) -> Result<Option<i32>, Error> {
    if !model.is_some_and(|m| m.starts_with(OS_UNIT_ID_MODEL_PREFIX)) {
        return Ok(None);
    }
    let data = run(t, &Cdb::os_unit_id())?;
    match data.get(4..6) {
        Some(&[hi, lo]) => Ok(Some(i32::from(hi) << 8 | i32::from(lo))),
        _ => Err(Error::ShortResponse {
            expected: 6,
            got: data.len(),
        }),
    }
}

/// Full identity probe of one logical unit
///
/// Only a failing standard INQUIRY is an error. Every later query degrades
/// to [`Probe::Absent`] or [`Probe::Skipped`].
pub fn probe(t: &mut impl Transport, lun: u32) -> Result<Identity, Error> {
    let std = identify(t)?;
    let cdb_lun = std.cdb_lun(lun);
    let mut identity = Identity::from(std);

    let pages = list_supported_pages(t, cdb_lun);
    if pages.contains(&vpd::PAGE_SERIAL) {
        identity.serial = match fetch_serial(t, cdb_lun) {
            Ok(serial) => Probe::from_option(serial),
            Err(e) => {
                debug!("serial number query failed: {e}");
                Probe::Absent
            }
        };
    }
    if pages.contains(&vpd::PAGE_DEVICE_ID) {
        identity.wwid = match fetch_wwid(t, cdb_lun) {
            Ok(wwid) => Probe::from_option(wwid),
            Err(e @ Error::UnexpectedPage { .. }) => {
                warn!("device identification page: {e}");
                Probe::Absent
            }
            Err(e) => {
                debug!("device identification query failed: {e}");
                Probe::Absent
            }
        };
    }
    if identity
        .model
        .as_deref()
        .is_some_and(|m| m.starts_with(OS_UNIT_ID_MODEL_PREFIX))
    {
        identity.os_unit_id = match fetch_os_unit_id(t, identity.model.as_deref()) {
            Ok(id) => Probe::from_option(id),
            Err(e) => {
                debug!("os unit id query failed: {e}");
                Probe::Absent
            }
        };
    }

    Ok(identity)
}
