// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Ownership and mode of device nodes, and their shadow copies
//!
//! A shadow is an empty hidden file next to a node whose owner, group and
//! mode are those of the node it stands in for.

use std::{
    fs::{self, Metadata, OpenOptions},
    io,
    os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use nix::unistd::{chown, Gid, Uid};

/// Prefix of shadow file names
pub const SHADOW_PREFIX: &str = ".shadow.";

const MODE_MASK: u32 = 0o7777;

/// Owner, group and permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Permissions {
    /// Root owned with the given mode
    pub fn root(mode: u32) -> Self {
        Self {
            uid: 0,
            gid: 0,
            mode: mode & MODE_MASK,
        }
    }

    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode() & MODE_MASK,
        }
    }

    /// Whether `meta` already carries these permissions
    pub fn matches(&self, meta: &Metadata) -> bool {
        Self::from_metadata(meta) == *self
    }

    /// Set owner, group and mode of `path`
    pub fn apply(&self, path: &Path) -> io::Result<()> {
        chown(path, Some(Uid::from_raw(self.uid)), Some(Gid::from_raw(self.gid)))?;
        fs::set_permissions(path, fs::Permissions::from_mode(self.mode))
    }
}

/// Shadow file path for the node called `name` in `dir`
pub fn shadow_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{SHADOW_PREFIX}{name}"))
}

/// Read the permissions stored in a shadow file
pub fn read_shadow(shadow: &Path) -> Option<Permissions> {
    fs::metadata(shadow).ok().map(|meta| Permissions::from_metadata(&meta))
}

/// Store `perms` in a shadow file, creating it if needed
///
/// A shadow is a best effort backup: failing to set its owner is logged, not fatal.
pub fn backup_shadow(shadow: &Path, perms: &Permissions) -> io::Result<()> {
    if read_shadow(shadow).is_some_and(|existing| existing == *perms) {
        return Ok(());
    }
    match OpenOptions::new().write(true).create_new(true).mode(0o600).open(shadow) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }
    if let Err(e) = perms.apply(shadow) {
        warn!("Could not store permissions in {}: {e}", shadow.display());
        fs::set_permissions(shadow, fs::Permissions::from_mode(perms.mode))?;
    }
    debug!("backed up {:o} {}:{} to {}", perms.mode, perms.uid, perms.gid, shadow.display());
    Ok(())
}

/// Remove a shadow file, if there is one
pub fn remove_shadow(shadow: &Path) -> io::Result<()> {
    match fs::remove_file(shadow) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Permissions a node should end up with
///
/// In order of preference: the node itself (unless it is a symlink), its
/// shadow, the node a symlink points at, and finally `default` owned by root.
pub fn resolve(node: &Path, shadow: &Path, link_target: Option<&Path>, default: Permissions) -> Permissions {
    if let Ok(meta) = fs::symlink_metadata(node) {
        if !meta.file_type().is_symlink() {
            return Permissions::from_metadata(&meta);
        }
    }
    if let Some(perms) = read_shadow(shadow) {
        return perms;
    }
    if let Some(meta) = link_target.and_then(|target| fs::metadata(target).ok()) {
        return Permissions::from_metadata(&meta);
    }
    default
}
