// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Create persistent, topology based device nodes for SCSI devices

use std::{
    io::{self, Write},
    path::PathBuf,
};

use aliases::{AliasFile, AliasOptions, Aliaser};
use clap::{ArgAction, Parser};
use devices::{discovery, Builder, DevOpener, NameStyle, Naming, Registry, ScanOptions};
use log::{debug, info, warn, LevelFilter};
use miette::{Context, IntoDiagnostic};
use nodes::{NodeSink, NodeStyle, Reconciler, SanitizePolicy};

#[derive(Debug, Parser)]
#[command(version, about = "Persistent device names for SCSI devices")]
struct Cli {
    /// Create symlinks to the kernel's nodes instead of device nodes
    #[arg(short = 'l', long)]
    symlink: bool,

    /// Create symlinks for alias names
    #[arg(short = 'L', long)]
    symlink_aliases: bool,

    /// Remove all nodes from the managed directory first
    #[arg(short, long)]
    force: bool,

    /// Leave nodes of undetected devices alone
    #[arg(short, long)]
    no_sanitize: bool,

    /// Delete nodes of undetected devices without keeping their permissions
    #[arg(short, long)]
    delete: bool,

    /// Permission mode of new nodes (0 prefix for octal, 0x for hex)
    #[arg(short, long, default_value = "0600", value_parser = parse_mode)]
    mode: u32,

    /// Generic devices that may fail to open before scanning stops
    #[arg(short = 'c', long, default_value_t = 8)]
    max_miss: u32,

    /// Alias file
    #[arg(short = 'A', long, default_value = "/etc/scsi.alias")]
    alias_file: PathBuf,

    /// Register removable devices even when they cannot be opened (unsafe)
    #[arg(short = 'r', long)]
    trust_removable: bool,

    /// Use c<host>b<channel>t<id>u<lun> names
    #[arg(short = 'e', long)]
    cbtu: bool,

    /// Kernel cdrom nodes are called scd<N>
    #[arg(short = 'o', long)]
    scd: bool,

    /// Alias the first path of a multipath device
    #[arg(short = 'M', long)]
    multipath: bool,

    /// List serial numbers, WWIDs and OS unit ids of devices
    #[arg(short, long)]
    serials: bool,

    /// Print the registry as JSON
    #[arg(long)]
    json: bool,

    /// Scan generic devices instead of reading sysfs
    #[arg(short = 'y', long)]
    no_sysfs: bool,

    /// Managed directory
    #[arg(long, default_value = "/dev/scsi")]
    dir: PathBuf,

    /// Directory of the kernel's device nodes
    #[arg(long, default_value = "/dev")]
    dev_root: PathBuf,

    /// Root under which sysfs is mounted
    #[arg(long, default_value = "/")]
    sysroot: PathBuf,

    /// More output, repeat for even more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only report fatal problems
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }

    fn naming(&self) -> Naming {
        Naming {
            style: if self.cbtu { NameStyle::Cbtu } else { NameStyle::HostId },
            scd: self.scd,
            dev_root: self.dev_root.clone(),
        }
    }

    fn style(symlink: bool) -> NodeStyle {
        if symlink {
            NodeStyle::Symlink
        } else {
            NodeStyle::Node
        }
    }
}

/// Parse a mode the way `strtoul` with base 0 would
fn parse_mode(text: &str) -> Result<u32, String> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(octal) = text.strip_prefix('0').filter(|rest| !rest.is_empty()) {
        u32::from_str_radix(octal, 8)
    } else {
        text.parse()
    };
    match parsed {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        Ok(_) => Err(format!("{text} is not a permission mode")),
        Err(e) => Err(e.to_string()),
    }
}

/// Print serial number, WWID and OS unit id of every whole device
fn serial_report(registry: &Registry, out: &mut impl Write) -> io::Result<()> {
    for (_, entry) in registry.iter() {
        if !entry.is_primary() || entry.alias_of.is_some() {
            continue;
        }
        let identity = &entry.identity;
        match identity.serial.value() {
            Some(serial) => writeln!(out, "Serial number of {}: \"{serial}\"", entry.name)?,
            None => writeln!(out, "Device  {} has no serial number", entry.name)?,
        }
        if let Some(wwid) = identity.wwid.value() {
            writeln!(out, " WWID: {wwid:x}")?;
        }
        if let Some(id) = identity.os_unit_id.value() {
            writeln!(out, " HSV OS Id: {id}")?;
        }
    }
    Ok(())
}

/// Read the alias file, logging its diagnostics
fn load_aliases(cli: &Cli) -> Vec<aliases::AliasRecord> {
    match AliasFile::load(&cli.alias_file) {
        Ok(file) => {
            if let Some(diagnostics) = file.diagnostics {
                warn!("{:?}", miette::Report::new(diagnostics));
            }
            file.records
        }
        Err(aliases::Error::IO(e)) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No alias file at {}", cli.alias_file.display());
            vec![]
        }
        Err(e) => {
            warn!("{}: {e}", cli.alias_file.display());
            vec![]
        }
    }
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(cli.log_level())
        .parse_env("SCSIDEV_LOG")
        .init();

    let naming = cli.naming();
    let mut reconciler = Reconciler::new(&cli.dir, cli.mode);
    reconciler
        .ensure_dir()
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot use {}", cli.dir.display()))?;

    if cli.force {
        let flushed = reconciler.flush().into_diagnostic()?;
        info!("Flushed {flushed} nodes from {}", cli.dir.display());
    }

    let mut opener = DevOpener::new(&cli.dir);
    let candidates = if cli.no_sysfs {
        discovery::probe_generic(&mut opener, cli.max_miss)
    } else {
        match discovery::enumerate_sysfs(&cli.sysroot) {
            Ok(candidates) => candidates,
            Err(e) => {
                info!("sysfs not usable ({e}), falling back to scanning");
                discovery::probe_generic(&mut opener, cli.max_miss)
            }
        }
    };
    debug!("{} candidates", candidates.len());

    let options = ScanOptions {
        trust_removable: cli.trust_removable,
        sysroot: Some(cli.sysroot.clone()),
        ..Default::default()
    };
    let mut registry = Builder::new(&mut opener, &naming, options).build(candidates);

    let style = Cli::style(cli.symlink);
    for (_, entry) in registry.iter() {
        reconciler
            .materialize(entry, style)
            .into_diagnostic()
            .wrap_err_with(|| format!("cannot create {}", entry.name))?;
    }

    if cli.serials {
        serial_report(&registry, &mut io::stdout().lock()).into_diagnostic()?;
    }

    let records = load_aliases(&cli);
    let alias_options = AliasOptions {
        multipath: cli.multipath,
        style: Cli::style(cli.symlink_aliases),
    };
    Aliaser::new(&naming, &cli.dir, alias_options)
        .apply(&mut registry, &records, &mut reconciler)
        .into_diagnostic()
        .wrap_err("cannot create alias")?;

    if !cli.force && !cli.no_sanitize {
        let policy = if cli.delete {
            SanitizePolicy::Delete
        } else {
            SanitizePolicy::Backup
        };
        reconciler.sanitize(&registry, policy).into_diagnostic()?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&registry).into_diagnostic()?;
        println!("{json}");
    }

    Ok(())
}
