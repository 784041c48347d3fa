// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Device node reconciliation
//!
//! Keeps a managed directory of device nodes (or symlinks to the kernel's
//! nodes) in line with a [`Registry`], carrying ownership and permissions
//! across renumbering through shadow files.

use std::{
    fs, io,
    os::unix::fs::{symlink, DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use devices::{DeviceEntry, DeviceKind, NodeType, Registry};
use log::{debug, error, info, warn};
use nix::sys::stat::{makedev, major, minor, mknod, Mode, SFlag};
use thiserror::Error;

mod permissions;

pub use permissions::{backup_shadow, read_shadow, remove_shadow, resolve, shadow_path, Permissions, SHADOW_PREFIX};

/// Errors that can occur while reconciling nodes
#[derive(Error, Debug)]
pub enum Error {
    /// IO operation error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The managed directory exists but is something else
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// A kernel node disagrees with the device it supposedly belongs to
    #[error("inconsistency: {path} is {found_major:03x}:{found_minor:05x}, expected {major:03x}:{minor:05x}")]
    Inconsistent {
        path: PathBuf,
        major: u32,
        minor: u32,
        found_major: u32,
        found_minor: u32,
    },
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(e.into())
    }
}

/// How a node is materialized in the managed directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStyle {
    /// A device special file
    Node,
    /// A symlink to the kernel's own node
    Symlink,
}

/// What reconciling a node did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    /// Ownership or mode corrected
    Updated,
    /// Node or link (re)created
    Created,
}

/// Everything needed to reconcile one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Basename inside the managed directory
    pub name: String,
    /// The kernel's node
    pub legacy: PathBuf,
    pub node_type: NodeType,
    pub major: u32,
    pub minor: u32,
    /// Optical media default to read-only
    pub optical: bool,
}

impl From<&DeviceEntry> for NodeSpec {
    fn from(entry: &DeviceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            legacy: entry.legacy.clone(),
            node_type: entry.node_type(),
            major: entry.major,
            minor: entry.minor,
            optical: entry.kind == DeviceKind::Rom,
        }
    }
}

impl NodeSpec {
    fn rdev(&self) -> u64 {
        makedev(u64::from(self.major), u64::from(self.minor))
    }

    fn sflag(&self) -> SFlag {
        match self.node_type {
            NodeType::Block => SFlag::S_IFBLK,
            NodeType::Char => SFlag::S_IFCHR,
        }
    }

    /// Whether `meta` describes this very device node
    fn is(&self, meta: &fs::Metadata) -> bool {
        let ft = meta.file_type();
        let type_ok = match self.node_type {
            NodeType::Block => ft.is_block_device(),
            NodeType::Char => ft.is_char_device(),
        };
        type_ok && meta.rdev() == self.rdev()
    }
}

/// Anything that can put registry entries on disk
pub trait NodeSink {
    fn materialize(&mut self, entry: &DeviceEntry, style: NodeStyle) -> Result<Outcome, Error>;
}

/// Whether orphaned nodes keep their permissions in a shadow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SanitizePolicy {
    #[default]
    Backup,
    Delete,
}

/// Owner of the managed directory
#[derive(Debug, Clone)]
pub struct Reconciler {
    dir: PathBuf,
    default_mode: u32,
}

fn is_node_like(ft: fs::FileType) -> bool {
    ft.is_symlink() || ft.is_block_device() || ft.is_char_device()
}

/// Temporary sibling of `path` used to replace it in one rename
fn staging_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.new", std::process::id()))
}

/// Remove a leftover staging file
fn clear_staging(staging: &Path) -> io::Result<()> {
    match fs::remove_file(staging) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Create a special file and move it over `path`
fn replace_node(path: &Path, spec: &NodeSpec, perms: &Permissions) -> Result<(), Error> {
    let staging = staging_path(path);
    clear_staging(&staging)?;
    mknod(&staging, spec.sflag(), Mode::from_bits_truncate(perms.mode), spec.rdev())?;
    if let Err(e) = perms.apply(&staging).and_then(|_| fs::rename(&staging, path)) {
        let _ = fs::remove_file(&staging);
        return Err(e.into());
    }
    Ok(())
}

/// Point `link` at `target`, replacing whatever is there in one rename
fn replace_link(link: &Path, target: &Path) -> io::Result<()> {
    let staging = staging_path(link);
    clear_staging(&staging)?;
    symlink(target, &staging)?;
    fs::rename(&staging, link).inspect_err(|_| {
        let _ = fs::remove_file(&staging);
    })
}

impl Reconciler {
    pub fn new(dir: impl Into<PathBuf>, default_mode: u32) -> Self {
        Self {
            dir: dir.into(),
            default_mode,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the managed directory (mode 0755) if it does not exist yet
    pub fn ensure_dir(&self) -> Result<(), Error> {
        match fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::NotADirectory(self.dir.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Creating {}", self.dir.display());
                fs::DirBuilder::new().recursive(true).mode(0o755).create(&self.dir)?;
                fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o755))?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn default_permissions(&self, spec: &NodeSpec) -> Permissions {
        let mode = if spec.optical {
            self.default_mode & !0o222
        } else {
            self.default_mode
        };
        Permissions::root(mode)
    }

    /// Permissions the node for `spec` should carry
    ///
    /// Only symlinks inherit from the kernel node they point at; device nodes
    /// fall back to the default mode instead.
    pub fn resolve_permissions(&self, spec: &NodeSpec, style: NodeStyle) -> Permissions {
        let link_target = match style {
            NodeStyle::Node => None,
            NodeStyle::Symlink => Some(spec.legacy.as_path()),
        };
        resolve(
            &self.dir.join(&spec.name),
            &shadow_path(&self.dir, &spec.name),
            link_target,
            self.default_permissions(spec),
        )
    }

    /// Bring the node for `spec` in line, in the given style
    pub fn reconcile(&self, spec: &NodeSpec, style: NodeStyle) -> Result<Outcome, Error> {
        match style {
            NodeStyle::Node => self.update_device(spec),
            NodeStyle::Symlink => self.update_symlink(spec),
        }
    }

    fn update_device(&self, spec: &NodeSpec) -> Result<Outcome, Error> {
        let path = self.dir.join(&spec.name);
        let perms = self.resolve_permissions(spec, NodeStyle::Node);

        let outcome = match fs::symlink_metadata(&path) {
            Ok(meta) if spec.is(&meta) => {
                if perms.matches(&meta) {
                    Outcome::Unchanged
                } else {
                    perms.apply(&path)?;
                    Outcome::Updated
                }
            }
            existing => {
                if let Ok(meta) = existing {
                    debug!(
                        "{} is {:03x}:{:05x}, recreating",
                        spec.name,
                        major(meta.rdev()),
                        minor(meta.rdev())
                    );
                }
                replace_node(&path, spec, &perms).inspect_err(|e| error!("mknod ({}) failed: {e}", path.display()))?;
                Outcome::Created
            }
        };

        remove_shadow(&shadow_path(&self.dir, &spec.name))?;
        Ok(outcome)
    }

    fn update_symlink(&self, spec: &NodeSpec) -> Result<Outcome, Error> {
        let link = self.dir.join(&spec.name);
        let perms = self.resolve_permissions(spec, NodeStyle::Symlink);
        let mut outcome = Outcome::Unchanged;

        let current = fs::symlink_metadata(&link)
            .ok()
            .filter(|meta| meta.file_type().is_symlink())
            .and_then(|_| fs::read_link(&link).ok());
        if current.as_deref() != Some(spec.legacy.as_path()) {
            replace_link(&link, &spec.legacy)?;
            outcome = Outcome::Created;
        }

        match fs::metadata(&spec.legacy) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Creating {}", spec.legacy.display());
                replace_node(&spec.legacy, spec, &perms)?;
            }
            Err(e) => return Err(e.into()),
            Ok(meta) if !spec.is(&meta) => {
                return Err(Error::Inconsistent {
                    path: spec.legacy.clone(),
                    major: spec.major,
                    minor: spec.minor,
                    found_major: major(meta.rdev()) as u32,
                    found_minor: minor(meta.rdev()) as u32,
                });
            }
            Ok(meta) if !perms.matches(&meta) => {
                perms.apply(&spec.legacy)?;
                if outcome == Outcome::Unchanged {
                    outcome = Outcome::Updated;
                }
            }
            Ok(_) => {}
        }

        backup_shadow(&shadow_path(&self.dir, &spec.name), &perms)?;
        Ok(outcome)
    }

    /// Node-like entries of the managed directory, skipping hidden files
    fn managed_nodes(&self) -> Result<Vec<(String, fs::Metadata)>, Error> {
        let mut nodes = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_owned();
                if name.starts_with('.') {
                    return None;
                }
                let meta = fs::symlink_metadata(e.path()).ok()?;
                is_node_like(meta.file_type()).then_some((name, meta))
            })
            .collect::<Vec<_>>();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(nodes)
    }

    /// Remove a node, keeping its permissions in a shadow unless told not to
    fn retire(&self, name: &str, lstat: &fs::Metadata, policy: SanitizePolicy) -> Result<(), Error> {
        let path = self.dir.join(name);
        // Links hand down the permissions of what they point at
        let perms = fs::metadata(&path)
            .map(|meta| Permissions::from_metadata(&meta))
            .unwrap_or_else(|_| Permissions::from_metadata(lstat));
        fs::remove_file(&path)?;
        if policy == SanitizePolicy::Backup {
            backup_shadow(&shadow_path(&self.dir, name), &perms)?;
        }
        Ok(())
    }

    /// Remove every node the registry does not name
    ///
    /// Returns the names removed.
    pub fn sanitize(&self, registry: &Registry, policy: SanitizePolicy) -> Result<Vec<String>, Error> {
        let keep = registry.names();
        let mut removed = Vec::new();
        for (name, meta) in self.managed_nodes()? {
            if keep.contains(name.as_str()) {
                continue;
            }
            info!("Removing stale {name}");
            self.retire(&name, &meta, policy)?;
            removed.push(name);
        }
        Ok(removed)
    }

    /// Remove every node, backing up all permissions
    pub fn flush(&self) -> Result<usize, Error> {
        let nodes = self.managed_nodes()?;
        for (name, meta) in &nodes {
            if let Err(e) = self.retire(name, meta, SanitizePolicy::Backup) {
                warn!("Could not flush {name}: {e}");
            }
        }
        Ok(nodes.len())
    }
}

impl NodeSink for Reconciler {
    fn materialize(&mut self, entry: &DeviceEntry, style: NodeStyle) -> Result<Outcome, Error> {
        self.reconcile(&NodeSpec::from(entry), style)
    }
}

#[cfg(test)]
mod tests {
    use devices::{mock, Address, Naming};
    use nix::unistd::{chown, geteuid, Gid, Uid};
    use test_log::test;

    use super::*;

    /// `/dev/null` and `/dev/zero`
    const NULL: (u32, u32) = (1, 3);
    const ZERO: (u32, u32) = (1, 5);

    fn spec(name: &str, legacy: &Path, (major, minor): (u32, u32)) -> NodeSpec {
        NodeSpec {
            name: name.to_owned(),
            legacy: legacy.to_owned(),
            node_type: NodeType::Char,
            major,
            minor,
            optical: false,
        }
    }

    /// Creating device nodes needs privileges most test environments lack
    fn privileged(dir: &Path) -> bool {
        let scratch = dir.join(".mknod-check");
        let ok = geteuid().is_root()
            && mknod(&scratch, SFlag::S_IFCHR, Mode::S_IRUSR, makedev(1, 3)).is_ok();
        let _ = fs::remove_file(&scratch);
        ok
    }

    #[test]
    fn test_ensure_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scsi");
        let reconciler = Reconciler::new(&dir, 0o600);
        reconciler.ensure_dir().unwrap();
        assert_eq!(fs::metadata(&dir).unwrap().permissions().mode() & 0o777, 0o755);
        reconciler.ensure_dir().unwrap();

        let file = root.path().join("file");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            Reconciler::new(&file, 0o600).ensure_dir(),
            Err(Error::NotADirectory(_))
        ));
    }

    #[test]
    fn test_reconcile_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        if !privileged(dir.path()) {
            return;
        }
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("sgh0-0c0i0l0", &dir.path().join("sg0"), NULL);

        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Node).unwrap(), Outcome::Created);
        let node = dir.path().join(&spec.name);
        let before = fs::symlink_metadata(&node).unwrap();
        assert_eq!(before.mode() & 0o7777, 0o600);

        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Node).unwrap(), Outcome::Unchanged);
        let after = fs::symlink_metadata(&node).unwrap();
        assert_eq!(
            (before.ino(), before.ctime(), before.ctime_nsec()),
            (after.ino(), after.ctime(), after.ctime_nsec())
        );
        assert!(!shadow_path(dir.path(), &spec.name).exists());
    }

    #[test]
    fn test_permissions_survive_renumbering() {
        let dir = tempfile::tempdir().unwrap();
        if !privileged(dir.path()) {
            return;
        }
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let first = spec("sth0-0c0i4l0", &dir.path().join("st0"), NULL);
        reconciler.reconcile(&first, NodeStyle::Node).unwrap();

        let node = dir.path().join(&first.name);
        chown(&node, Some(Uid::from_raw(1234)), Some(Gid::from_raw(5678))).unwrap();
        fs::set_permissions(&node, fs::Permissions::from_mode(0o640)).unwrap();

        let moved = NodeSpec {
            major: ZERO.0,
            minor: ZERO.1,
            ..first
        };
        assert_eq!(reconciler.reconcile(&moved, NodeStyle::Node).unwrap(), Outcome::Created);
        let meta = fs::symlink_metadata(&node).unwrap();
        assert_eq!(meta.rdev(), makedev(1, 5));
        assert_eq!((meta.uid(), meta.gid(), meta.mode() & 0o7777), (1234, 5678, 0o640));
    }

    #[test]
    fn test_shadow_restores_permissions() {
        let dir = tempfile::tempdir().unwrap();
        if !privileged(dir.path()) {
            return;
        }
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("srh0-0c0i0l0", &dir.path().join("sr0"), NULL);
        let stored = Permissions {
            uid: 0,
            gid: 11,
            mode: 0o660,
        };
        backup_shadow(&shadow_path(dir.path(), &spec.name), &stored).unwrap();

        reconciler.reconcile(&spec, NodeStyle::Node).unwrap();
        let meta = fs::symlink_metadata(dir.path().join(&spec.name)).unwrap();
        assert!(stored.matches(&meta));
        assert!(!shadow_path(dir.path(), &spec.name).exists());
    }

    #[test]
    fn test_optical_default_is_read_only() {
        let reconciler = Reconciler::new("/nonexistent/scsi", 0o666);
        let mut spec = spec("srh0-0c0i0l0", Path::new("/nonexistent/sr0"), NULL);
        spec.optical = true;
        assert_eq!(
            reconciler.resolve_permissions(&spec, NodeStyle::Node),
            Permissions::root(0o444)
        );
    }

    /// Regular files stand in for device nodes so these run unprivileged
    fn own(mode: u32) -> Permissions {
        Permissions {
            uid: geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
            mode,
        }
    }

    fn file_with_mode(path: &Path, mode: u32) {
        fs::write(path, b"").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_node_mode_ignores_kernel_node() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("sg0");
        file_with_mode(&legacy, 0o644);
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("sgh0-0c0i0l0", &legacy, NULL);

        assert_eq!(
            reconciler.resolve_permissions(&spec, NodeStyle::Node),
            Permissions::root(0o600)
        );
        assert_eq!(reconciler.resolve_permissions(&spec, NodeStyle::Symlink), own(0o644));

        // A shadow still wins over the default in node mode
        let stored = own(0o640);
        backup_shadow(&shadow_path(dir.path(), &spec.name), &stored).unwrap();
        assert_eq!(reconciler.resolve_permissions(&spec, NodeStyle::Node), stored);
    }

    #[test]
    fn test_permissions_preserved_across_removal() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scsi");
        let reconciler = Reconciler::new(&dir, 0o600);
        reconciler.ensure_dir().unwrap();
        let spec = spec("sth0-0c0i4l0", &root.path().join("st0"), NULL);

        // An existing node keeps what it was given
        let node = dir.join(&spec.name);
        file_with_mode(&node, 0o640);
        assert_eq!(reconciler.resolve_permissions(&spec, NodeStyle::Node), own(0o640));

        // Once the device disappears its permissions live on in the shadow
        fs::remove_file(&node).unwrap();
        let target = root.path().join("target");
        file_with_mode(&target, 0o640);
        symlink(&target, &node).unwrap();
        let removed = reconciler.sanitize(&Registry::new(), SanitizePolicy::Backup).unwrap();
        assert_eq!(removed, [spec.name.as_str()]);
        assert!(fs::symlink_metadata(&node).is_err());

        // and beat a changed default when it comes back
        let changed = Reconciler::new(&dir, 0o666);
        assert_eq!(changed.resolve_permissions(&spec, NodeStyle::Node), own(0o640));
        assert_eq!(changed.resolve_permissions(&spec, NodeStyle::Symlink), own(0o640));

        remove_shadow(&shadow_path(&dir, &spec.name)).unwrap();
        assert_eq!(
            changed.resolve_permissions(&spec, NodeStyle::Node),
            Permissions::root(0o666)
        );
    }

    #[test]
    fn test_symlink_to_existing_node() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("sgh0-0c0i0l0", Path::new("/dev/null"), NULL);

        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Created);
        let link = dir.path().join(&spec.name);
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/null"));
        let shadow = read_shadow(&shadow_path(dir.path(), &spec.name)).unwrap();
        assert_eq!(shadow.mode, 0o666);
    }

    #[test]
    fn test_symlink_reconcile_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("sgh0-0c0i0l0", Path::new("/dev/null"), NULL);
        let link = dir.path().join(&spec.name);

        // A link that is already right is left alone
        symlink("/dev/null", &link).unwrap();
        let before = fs::symlink_metadata(&link).unwrap();
        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Unchanged);
        let after = fs::symlink_metadata(&link).unwrap();
        assert_eq!(
            (before.ino(), before.ctime(), before.ctime_nsec()),
            (after.ino(), after.ctime(), after.ctime_nsec())
        );

        // A link pointing elsewhere is redirected
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let link = dir.path().join(&spec.name);
        symlink("/dev/zero", &link).unwrap();
        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Created);
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/null"));
    }

    #[test]
    fn test_symlink_wrong_node_type() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        // Same numbers as /dev/null but a block device
        let spec = NodeSpec {
            node_type: NodeType::Block,
            ..spec("sdh0-0c0i0l0", Path::new("/dev/null"), NULL)
        };
        assert!(matches!(
            reconciler.reconcile(&spec, NodeStyle::Symlink),
            Err(Error::Inconsistent {
                major: 1,
                minor: 3,
                found_major: 1,
                found_minor: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_symlink_mode() {
        let dir = tempfile::tempdir().unwrap();
        if !privileged(dir.path()) {
            return;
        }
        let kernel = dir.path().join("dev");
        fs::create_dir(&kernel).unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = spec("sgh0-0c0i0l0", &kernel.join("sg0"), NULL);

        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Created);
        let legacy = fs::metadata(&spec.legacy).unwrap();
        assert!(spec.is(&legacy));
        assert!(Permissions::root(0o600).matches(&legacy));
        assert_eq!(
            read_shadow(&shadow_path(dir.path(), &spec.name)),
            Some(Permissions::root(0o600))
        );

        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Unchanged);

        // A stray file in place of the link is replaced
        let link = dir.path().join(&spec.name);
        fs::remove_file(&link).unwrap();
        fs::write(&link, b"").unwrap();
        assert_eq!(reconciler.reconcile(&spec, NodeStyle::Symlink).unwrap(), Outcome::Created);
        assert_eq!(fs::read_link(&link).unwrap(), spec.legacy);
    }

    #[test]
    fn test_symlink_inconsistent_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("sda");
        fs::write(&legacy, b"").unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        let spec = NodeSpec {
            node_type: NodeType::Block,
            ..spec("sdh0-0c0i0l0", &legacy, (8, 0))
        };
        assert!(matches!(
            reconciler.reconcile(&spec, NodeStyle::Symlink),
            Err(Error::Inconsistent { major: 8, minor: 0, .. })
        ));
    }

    #[test]
    fn test_sanitize() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("scsi");
        let reconciler = Reconciler::new(&dir, 0o600);
        reconciler.ensure_dir().unwrap();

        let naming = Naming::default();
        let mut registry = Registry::new();
        let live = mock::generic_entry(Address::new(0, 0, 0, 0), 0, &naming);
        let live_name = live.name.clone();
        registry.push(live);

        let target = root.path().join("target");
        fs::write(&target, b"").unwrap();
        fs::set_permissions(&target, fs::Permissions::from_mode(0o640)).unwrap();
        symlink(&target, dir.join(&live_name)).unwrap();
        symlink(&target, dir.join("sth9-0c0i0l0")).unwrap();
        fs::write(dir.join("README"), b"not a node").unwrap();

        let removed = reconciler.sanitize(&registry, SanitizePolicy::Backup).unwrap();
        assert_eq!(removed, ["sth9-0c0i0l0"]);
        assert!(fs::symlink_metadata(dir.join(&live_name)).is_ok());
        assert!(dir.join("README").exists());
        assert!(!shadow_path(&dir, &live_name).exists());
        assert_eq!(read_shadow(&shadow_path(&dir, "sth9-0c0i0l0")).unwrap().mode, 0o640);

        symlink(&target, dir.join("sth8-0c0i0l0")).unwrap();
        let removed = reconciler.sanitize(&registry, SanitizePolicy::Delete).unwrap();
        assert_eq!(removed, ["sth8-0c0i0l0"]);
        assert!(!shadow_path(&dir, "sth8-0c0i0l0").exists());
        assert!(fs::symlink_metadata(dir.join(&live_name)).is_ok());
    }

    #[test]
    fn test_flush() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(dir.path(), 0o600);
        for name in ["a", "b"] {
            symlink("/dev/null", dir.path().join(name)).unwrap();
        }
        assert_eq!(reconciler.flush().unwrap(), 2);
        assert!(!dir.path().join("a").exists());
        assert_eq!(read_shadow(&shadow_path(dir.path(), "b")).unwrap().mode, 0o666);
    }
}
