// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Helper functions for interacting with Linux sysfs interfaces

use std::{fs, path::Path, str::FromStr};

/// Reads a value from a sysfs node and attempts to parse it to type T
///
/// # Returns
///
/// * `Some(T)` if the value was successfully read and parsed
/// * `None` if the file could not be read or parsed
pub(crate) fn sysfs_read<T>(sysroot: &Path, node: &Path, key: &str) -> Option<T>
where
    T: FromStr,
{
    let path = sysroot.join(node).join(key);
    fs::read_to_string(&path).ok()?.trim().parse().ok()
}

/// Parse a `dev` attribute (`major:minor`)
pub(crate) fn parse_dev(value: &str) -> Option<(u32, u32)> {
    let (major, minor) = value.trim().split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Read the `dev` attribute of the first child of `node/class` whose name passes `filter`
pub(crate) fn first_dev(sysroot: &Path, node: &Path, class: &str, filter: impl Fn(&str) -> bool) -> Option<(u32, u32)> {
    let dir = sysroot.join(node).join(class);
    let mut names = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str().map(str::to_owned))
        .filter(|n| filter(n))
        .collect::<Vec<_>>();
    names.sort();
    names
        .into_iter()
        .find_map(|name| parse_dev(&sysfs_read::<String>(sysroot, &node.join(class).join(name), "dev")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dev() {
        assert_eq!(parse_dev("8:16\n"), Some((8, 16)));
        assert_eq!(parse_dev("garbage"), None);
    }
}
