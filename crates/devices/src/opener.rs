// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Opening kernel device nodes by number
//!
//! The kernel's own `/dev` names cannot be trusted to match the numbers we
//! probe, so [`DevOpener`] creates a private scratch node for the wanted
//! `major:minor`, opens it and removes it straight away.

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use inquiry::{cdb::Cdb, sg::SgDevice, Transport};
use log::{trace, warn};
use nix::{
    libc,
    sys::stat::{makedev, mknod, Mode, SFlag},
};

use crate::{Address, NodeType};

/// An open device that can be probed
pub trait DeviceHandle: Transport {
    /// SCSI address and host adapter unique id
    fn address(&mut self) -> io::Result<(Address, u32)>;

    /// Descriptive name of the host adapter
    fn host_name(&mut self) -> io::Result<Option<String>>;
}

/// Source of [`DeviceHandle`]s
pub trait NodeOpener {
    type Handle: DeviceHandle;

    /// Open the node `major:minor` of the given type
    fn open(&mut self, node: NodeType, major: u32, minor: u32) -> io::Result<Self::Handle>;
}

/// Opens real kernel nodes through scratch files in a directory
#[derive(Debug, Clone)]
pub struct DevOpener {
    dir: PathBuf,
}

impl DevOpener {
    /// Scratch nodes are created inside `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// Remove a scratch node left behind by an earlier run
fn clear_scratch(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => trace!("removed stale {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stale {}: {e}", path.display()),
    }
}

fn open_nonblocking(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).custom_flags(libc::O_NONBLOCK);
    // SG_IO wants a writable descriptor on sg nodes, read only media do not
    match options.clone().write(true).open(path) {
        Ok(file) => Ok(file),
        Err(_) => options.open(path),
    }
}

impl NodeOpener for DevOpener {
    type Handle = DevHandle;

    fn open(&mut self, node: NodeType, major: u32, minor: u32) -> io::Result<DevHandle> {
        let path = self.dir.join(format!(".probe-{}", std::process::id()));
        let kind = match node {
            NodeType::Block => SFlag::S_IFBLK,
            NodeType::Char => SFlag::S_IFCHR,
        };
        clear_scratch(&path);
        mknod(
            &path,
            kind,
            Mode::S_IRUSR | Mode::S_IWUSR,
            makedev(u64::from(major), u64::from(minor)),
        )?;
        let file = open_nonblocking(&path);
        fs::remove_file(&path)?;
        trace!("open {major}:{minor} -> {}", if file.is_ok() { "ok" } else { "failed" });
        Ok(DevHandle {
            device: SgDevice::from(file?),
        })
    }
}

/// A real device opened by [`DevOpener`]
#[derive(Debug)]
pub struct DevHandle {
    device: SgDevice,
}

impl Transport for DevHandle {
    fn execute(&mut self, cdb: &Cdb, buf: &mut [u8]) -> Result<usize, inquiry::Error> {
        self.device.execute(cdb, buf)
    }
}

impl DeviceHandle for DevHandle {
    fn address(&mut self) -> io::Result<(Address, u32)> {
        let idlun = inquiry::sg::idlun(&self.device)?;
        Ok((
            Address::new(idlun.host, idlun.channel, idlun.id, idlun.lun),
            idlun.host_unique_id,
        ))
    }

    fn host_name(&mut self) -> io::Result<Option<String>> {
        inquiry::sg::probe_host(&self.device)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_clear_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".probe-1");

        clear_scratch(&path);
        fs::write(&path, b"").unwrap();
        clear_scratch(&path);
        assert!(!path.exists());

        // Failures other than a missing file are reported, not fatal
        let busy = dir.path().join("busy");
        fs::create_dir(&busy).unwrap();
        fs::write(busy.join("inner"), b"").unwrap();
        clear_scratch(&busy);
        assert!(busy.exists());
    }

    #[test]
    fn test_open_needs_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut opener = DevOpener::new(dir.path().join("missing"));
        assert!(opener.open(NodeType::Char, 1, 3).is_err());
    }
}
