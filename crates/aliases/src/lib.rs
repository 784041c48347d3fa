// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! User defined aliases for SCSI devices
//!
//! Aliases are read from an alias file (see [`AliasFile`]), matched against a
//! fully built [`Registry`] and turned into extra nodes in the managed
//! directory. Tape aliases get a non-rewinding `n` twin and whole disk
//! aliases one `-p<k>` node per partition.

use std::path::PathBuf;

use devices::{DeviceKind, EntryId, Naming, Registry, NO_REWIND};
use log::{info, warn};
use nodes::{NodeSink, NodeStyle};

mod errors;
pub use errors::*;

mod matcher;
pub use matcher::{resolve, AliasRecord, Predicate, Resolution};

mod parser;
pub use parser::AliasFile;

/// Knobs for alias creation
#[derive(Debug, Clone, Copy)]
pub struct AliasOptions {
    /// Alias the first of several matching paths instead of giving up
    pub multipath: bool,
    pub style: NodeStyle,
}

impl Default for AliasOptions {
    fn default() -> Self {
        Self {
            multipath: false,
            style: NodeStyle::Node,
        }
    }
}

/// Turns alias records into registry entries and nodes
pub struct Aliaser<'a> {
    naming: &'a Naming,
    /// The managed directory, which alias symlinks point into
    dir: PathBuf,
    options: AliasOptions,
}

impl<'a> Aliaser<'a> {
    pub fn new(naming: &'a Naming, dir: impl Into<PathBuf>, options: AliasOptions) -> Self {
        Self {
            naming,
            dir: dir.into(),
            options,
        }
    }

    /// Resolve every record against `registry` and materialize the aliases
    ///
    /// Unmatched and ambiguous records are logged and skipped. Returns the
    /// handles of every alias entry added.
    pub fn apply<S: NodeSink>(
        &self,
        registry: &mut Registry,
        records: &[AliasRecord],
        sink: &mut S,
    ) -> Result<Vec<EntryId>, nodes::Error> {
        let mut created = Vec::new();
        for record in records {
            let name_of = |id: EntryId| registry.get(id).map_or("?", |e| e.name.as_str());
            let target = match resolve(registry, record, self.options.multipath) {
                Resolution::Unresolved => {
                    warn!("Unable to match device for line {} (alias {})", record.line, record.name);
                    continue;
                }
                Resolution::Ambiguous(first, second) => {
                    warn!(
                        "Line {} not matched uniquely: {} and {}",
                        record.line,
                        name_of(first),
                        name_of(second)
                    );
                    continue;
                }
                Resolution::Unique(target) => target,
                Resolution::Multipath(target, others) => {
                    for other in others {
                        info!("Line {}: {} <=> {}", record.line, name_of(target), name_of(other));
                    }
                    target
                }
            };
            if registry.names().contains(record.name.as_str()) {
                warn!("Line {}: alias {} is already taken", record.line, record.name);
                continue;
            }
            created.extend(self.alias(registry, record, target, sink)?);
        }
        Ok(created)
    }

    fn alias<S: NodeSink>(
        &self,
        registry: &mut Registry,
        record: &AliasRecord,
        target_id: EntryId,
        sink: &mut S,
    ) -> Result<Vec<EntryId>, nodes::Error> {
        let Some(target) = registry.get(target_id).cloned() else {
            return Ok(vec![]);
        };
        match target.related.and_then(|id| registry.get(id)) {
            Some(related) => info!(
                "Alias device {}: {} ({}) -> ({}, {})",
                record.name,
                target.name,
                target.legacy.display(),
                related.name,
                related.legacy.display()
            ),
            None => info!("Alias device {}: {} ({})", record.name, target.name, target.legacy.display()),
        }

        let style = self.options.style;
        let mut created = Vec::new();

        let alias = target
            .derive()
            .alias(&record.name, target_id, self.dir.join(&target.name))
            .build(self.naming);
        sink.materialize(&alias, style)?;
        let alias_id = registry.push(alias);
        created.push(alias_id);

        if target.kind.is_tape() {
            let nrewind = target.derive().node(target.major, target.minor | NO_REWIND).build(self.naming);
            let entry = nrewind
                .derive()
                .alias(format!("n{}", record.name), target_id, self.dir.join(&nrewind.name))
                .build(self.naming);
            sink.materialize(&entry, style)?;
            created.push(registry.push_view_of(alias_id, entry));
        }

        if target.kind == DeviceKind::Disk && target.partition.is_none() {
            let partitions = registry
                .partitions_of(target_id)
                .map(|(id, e)| (id, e.clone()))
                .collect::<Vec<_>>();
            for (part_id, part) in partitions {
                let Some(k) = part.partition else {
                    continue;
                };
                let entry = part
                    .derive()
                    .alias(format!("{}-p{k}", record.name), part_id, self.dir.join(&part.name))
                    .build(self.naming);
                sink.materialize(&entry, style)?;
                created.push(registry.push_view_of(alias_id, entry));
            }
        }

        Ok(created)
    }
}
