// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Linux SCSI generic plumbing
//!
//! [`SgDevice`] drives commands through the `SG_IO` ioctl. The control
//! channel lookups ([`idlun`], [`probe_host`]) are accepted by every SCSI
//! upper level driver, not only `sg`, so they are free functions over any
//! file descriptor.

use std::{
    fs::File,
    io,
    os::fd::{AsRawFd, OwnedFd},
};

use log::trace;
use nix::libc;

use crate::{cdb::Cdb, Error, Transport};

const SG_IO: libc::c_ulong = 0x2285;
const SG_DXFER_FROM_DEV: libc::c_int = -3;
const SCSI_IOCTL_GET_IDLUN: libc::c_ulong = 0x5382;
const SCSI_IOCTL_PROBE_HOST: libc::c_ulong = 0x5385;

const SENSE_LEN: usize = 32;
const TIMEOUT_MS: u32 = 10_000;
const HOST_NAME_LEN: usize = 160;

/// `struct sg_io_hdr` from `<scsi/sg.h>`
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: u8,
    mx_sb_len: u8,
    iovec_count: u16,
    dxfer_len: u32,
    dxferp: *mut libc::c_void,
    cmdp: *const u8,
    sbp: *mut u8,
    timeout: u32,
    flags: u32,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: u8,
    masked_status: u8,
    msg_status: u8,
    sb_len_wr: u8,
    host_status: u16,
    driver_status: u16,
    resid: libc::c_int,
    duration: u32,
    info: u32,
}

/// An open SCSI generic device node
#[derive(Debug)]
pub struct SgDevice {
    fd: OwnedFd,
}

impl From<OwnedFd> for SgDevice {
    fn from(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl From<File> for SgDevice {
    fn from(file: File) -> Self {
        Self { fd: file.into() }
    }
}

impl AsRawFd for SgDevice {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.fd.as_raw_fd()
    }
}

impl Transport for SgDevice {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, Error> {
        let cmd = cdb.as_bytes();
        let mut sense = [0u8; SENSE_LEN];
        let mut hdr = SgIoHdr {
            interface_id: b'S' as libc::c_int,
            dxfer_direction: SG_DXFER_FROM_DEV,
            cmd_len: cmd.len() as u8,
            mx_sb_len: SENSE_LEN as u8,
            iovec_count: 0,
            dxfer_len: buf.len() as u32,
            dxferp: buf.as_mut_ptr().cast(),
            cmdp: cmd.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        let res = unsafe { libc::ioctl(self.fd.as_raw_fd(), SG_IO as _, &mut hdr) };
        if res < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if hdr.status != 0 || hdr.host_status != 0 || hdr.driver_status != 0 {
            trace!("sense: {:02x?}", &sense[..(hdr.sb_len_wr as usize).min(SENSE_LEN)]);
            return Err(Error::Status {
                opcode: cdb.opcode(),
                status: hdr.status,
                host: hdr.host_status,
                driver: hdr.driver_status,
            });
        }

        let resid = usize::try_from(hdr.resid).unwrap_or(0);
        Ok(buf.len().saturating_sub(resid))
    }
}

/// Address of a logical unit as reported by the mid layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdLun {
    pub host: u32,
    pub channel: u32,
    pub id: u32,
    pub lun: u32,
    /// Host adapter unique id
    pub host_unique_id: u32,
}

impl IdLun {
    fn decode(raw: [libc::c_int; 2]) -> Self {
        let packed = raw[0] as u32;
        Self {
            host: (packed >> 24) & 0xff,
            channel: (packed >> 16) & 0xff,
            lun: (packed >> 8) & 0xff,
            id: packed & 0xff,
            host_unique_id: raw[1] as u32,
        }
    }
}

/// Query host/channel/id/lun of any SCSI device node
pub fn idlun<F: AsRawFd>(fd: &F) -> io::Result<IdLun> {
    let mut raw: [libc::c_int; 2] = [0; 2];
    let res = unsafe { libc::ioctl(fd.as_raw_fd(), SCSI_IOCTL_GET_IDLUN as _, raw.as_mut_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(IdLun::decode(raw))
}

/// Query the host adapter's descriptive name
///
/// Returns `Ok(None)` when the adapter has no name to report.
pub fn probe_host<F: AsRawFd>(fd: &F) -> io::Result<Option<String>> {
    let mut buf = [0u8; HOST_NAME_LEN];
    // The kernel reads the buffer length from the first int
    buf[..4].copy_from_slice(&((HOST_NAME_LEN - 1) as u32).to_ne_bytes());
    let res = unsafe { libc::ioctl(fd.as_raw_fd(), SCSI_IOCTL_PROBE_HOST as _, buf.as_mut_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    if res == 0 {
        return Ok(None);
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_owned();
    Ok((!name.is_empty()).then_some(name))
}
