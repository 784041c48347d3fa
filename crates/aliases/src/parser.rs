// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Alias file parser
//!
//! One record per line, made of `key=value` tokens separated by commas or
//! blanks. Strings may be quoted with `"` or `'`; numbers are decimal or
//! `0x` prefixed hex. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! # the backup drive, wherever it is plugged in
//! manufacturer=HP, model="Ultrium 5-SCSI", devtype=tape, alias=backup
//! serial=WD-WCC4N7KPL2CF devtype=disk alias=data
//! ```

use std::{fs, path::Path, sync::Arc};

use devices::DeviceKind;
use itertools::{Either, Itertools};
use log::trace;
use miette::{NamedSource, SourceSpan};
use phf::phf_map;

use crate::{
    AliasRecord, Error, InvalidAlias, InvalidDevtype, InvalidNumber, MissingKey, ParseError, Predicate,
    UnrecognizedKey, UnterminatedString,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Manufacturer,
    Model,
    Serial,
    Revision,
    HostName,
    Id,
    Lun,
    Channel,
    Partition,
    HostId,
    HostNum,
    Alias,
    DevType,
    Wwid,
    OsUnitId,
}

static KEYS: phf::Map<&'static str, Key> = phf_map! {
    "manufacturer" => Key::Manufacturer,
    "model" => Key::Model,
    "serial_number" => Key::Serial,
    "serial" => Key::Serial,
    "rev" => Key::Revision,
    "hostname" => Key::HostName,
    "host" => Key::HostName,
    "id" => Key::Id,
    "lun" => Key::Lun,
    "channel" => Key::Channel,
    "partition" => Key::Partition,
    "hostid" => Key::HostId,
    "hostnum" => Key::HostNum,
    "alias" => Key::Alias,
    "devtype" => Key::DevType,
    "wwid" => Key::Wwid,
    "hsvosid" => Key::OsUnitId,
};

/// Abbreviations accepted for the string keys, tried in order
const PREFIXES: [(&str, Key); 9] = [
    ("manu", Key::Manufacturer),
    ("mode", Key::Model),
    ("seri", Key::Serial),
    ("rev", Key::Revision),
    ("hostna", Key::HostName),
    ("chan", Key::Channel),
    ("part", Key::Partition),
    ("alia", Key::Alias),
    ("devt", Key::DevType),
];

static DEVTYPES: phf::Map<&'static str, DeviceKind> = phf_map! {
    "disk" => DeviceKind::Disk,
    "cdrom" => DeviceKind::Rom,
    "tape" => DeviceKind::Tape,
    "osst" => DeviceKind::OnStreamTape,
    "generic" => DeviceKind::Generic,
    "changer" => DeviceKind::Changer,
};

fn lookup(key: &str) -> Option<Key> {
    KEYS.get(key).copied().or_else(|| {
        PREFIXES
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, key)| *key)
    })
}

/// Cursor over the tokens of one line
struct Tokens<'a> {
    text: &'a str,
    pos: usize,
    /// Offset of the line within the file
    base: usize,
    line: usize,
}

impl<'a> Tokens<'a> {
    fn span(&self, start: usize, end: usize) -> SourceSpan {
        (self.base + start, end - start).into()
    }

    fn skip_blank(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start_matches([' ', '\t']).len();
    }

    fn skip_separator(&mut self) {
        self.skip_blank();
        if self.text[self.pos..].starts_with(',') {
            self.pos += 1;
        }
        self.skip_blank();
    }

    /// The next `key=`, or `None` once no `=` is left on the line
    fn key(&mut self) -> Option<(&'a str, SourceSpan)> {
        self.skip_blank();
        let rest = &self.text[self.pos..];
        let Some(eq) = rest.find('=') else {
            if !rest.is_empty() {
                trace!("line {}: ignoring trailing \"{rest}\"", self.line);
            }
            return None;
        };
        let start = self.pos;
        let key = rest[..eq].trim_end();
        self.pos += eq + 1;
        Some((key, self.span(start, start + key.len())))
    }

    /// A quoted or bare word value
    fn value(&mut self) -> Result<(&'a str, SourceSpan), Error> {
        self.skip_blank();
        let rest = &self.text[self.pos..];
        let (value, start, consumed) = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let Some(end) = rest[1..].find(quote) else {
                    return Err(UnterminatedString {
                        at: self.span(self.pos, self.text.len()),
                        line: self.line,
                    })?;
                };
                (&rest[1..1 + end], self.pos + 1, end + 2)
            }
            _ => {
                let end = rest.find([',', ' ', '\t']).unwrap_or(rest.len());
                (&rest[..end], self.pos, end)
            }
        };
        self.pos += consumed;
        self.skip_separator();
        Ok((value, self.span(start, start + value.len())))
    }

    fn string(&mut self) -> Result<String, Error> {
        Ok(self.value()?.0.to_owned())
    }

    fn number<T: TryFrom<u64>>(&mut self) -> Result<T, Error> {
        let (text, at) = self.value()?;
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse::<u64>(),
        };
        match parsed.ok().and_then(|n| T::try_from(n).ok()) {
            Some(n) => Ok(n),
            None => Err(InvalidNumber {
                at,
                line: self.line,
                value: text.to_owned(),
                advice: Some("numbers are decimal or 0x prefixed hex, and must fit the field".to_owned()),
            })?,
        }
    }
}

/// Parse one line, `None` for blank and comment lines
fn parse_line(text: &str, base: usize, line: usize) -> Result<Option<AliasRecord>, Error> {
    let trimmed = text.trim_start_matches([' ', '\t']);
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let mut tokens = Tokens {
        text,
        pos: 0,
        base,
        line,
    };
    let mut predicate = Predicate::default();
    let mut alias = None;
    let mut devtype = None;

    while let Some((key, key_at)) = tokens.key() {
        let Some(known) = lookup(key) else {
            return Err(UnrecognizedKey {
                at: key_at,
                line,
                key: key.to_owned(),
                advice: Some("see scsi.alias(5) for the list of specifiers".to_owned()),
            })?;
        };
        match known {
            Key::Manufacturer => predicate.manufacturer = Some(tokens.string()?),
            Key::Model => predicate.model = Some(tokens.string()?),
            Key::Serial => predicate.serial = Some(tokens.string()?),
            Key::Revision => predicate.revision = Some(tokens.string()?),
            Key::HostName => predicate.host_name = Some(tokens.string()?),
            Key::Id => predicate.id = Some(tokens.number()?),
            Key::Lun => predicate.lun = Some(tokens.number()?),
            Key::Channel => predicate.channel = Some(tokens.number()?),
            Key::Partition => predicate.partition = Some(tokens.number()?),
            Key::HostId => predicate.host_id = Some(tokens.number()?),
            Key::HostNum => predicate.host_num = Some(tokens.number()?),
            Key::Wwid => predicate.wwid = Some(tokens.number()?),
            Key::OsUnitId => predicate.os_unit_id = Some(tokens.number()?),
            Key::Alias => alias = Some(tokens.value()?),
            Key::DevType => devtype = Some(tokens.value()?),
        }
    }

    let whole_line = tokens.span(0, text.len());
    let Some((name, name_at)) = alias else {
        return Err(MissingKey {
            at: whole_line,
            line,
            key: "alias",
        })?;
    };
    let Some((devtype, devtype_at)) = devtype else {
        return Err(MissingKey {
            at: whole_line,
            line,
            key: "devtype",
        })?;
    };
    let Some(kind) = DEVTYPES.get(devtype).copied() else {
        return Err(InvalidDevtype {
            at: devtype_at,
            line,
            value: devtype.to_owned(),
            advice: Some(format!("expected one of: {}", DEVTYPES.keys().sorted().join(", "))),
        })?;
    };
    if name.is_empty() || name.starts_with('.') || name.contains('/') {
        return Err(InvalidAlias {
            at: name_at,
            line,
            name: name.to_owned(),
            advice: Some("alias names are plain file names and may not start with a dot".to_owned()),
        })?;
    }

    Ok(Some(AliasRecord {
        line,
        name: name.to_owned(),
        kind,
        predicate,
    }))
}

/// A parsed alias file
///
/// Bad lines never stop the rest of the file from being used: their
/// diagnostics are collected next to the good records.
#[derive(Debug)]
pub struct AliasFile {
    pub records: Vec<AliasRecord>,
    pub diagnostics: Option<ParseError>,
}

impl AliasFile {
    /// Create a new alias file from a file path
    pub fn load<P>(file: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file = file.as_ref();
        let txt = fs::read_to_string(file)?;
        Ok(Self::parse(file.to_string_lossy(), txt))
    }

    /// Create a new alias file from a string
    pub fn parse(name: impl AsRef<str>, contents: String) -> Self {
        let source = Arc::new(contents);

        let mut offset = 0;
        let (records, errors): (Vec<_>, Vec<_>) = source
            .split_inclusive('\n')
            .enumerate()
            .map(|(index, raw)| {
                let base = offset;
                offset += raw.len();
                parse_line(raw.trim_end_matches(['\n', '\r']), base, index + 1)
            })
            .filter_map(Result::transpose)
            .partition_map(|parsed| match parsed {
                Ok(record) => Either::Left(record),
                Err(e) => Either::Right(e),
            });

        let diagnostics = (!errors.is_empty()).then(|| ParseError {
            src: NamedSource::new(name, source),
            diagnostics: errors,
        });

        Self { records, diagnostics }
    }
}
