//! Virtual links: ordinary files named `<path><suffix>` whose only content
//! is one line holding the link target.
//!
//! The suffixes are part of the on-disk format and must never change.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

pub const SYMLINK_SUFFIX: &str = ".870A7545-5F58-453A-A685-1C9A3A17272C_symlink";
pub const HARDLINK_SUFFIX: &str = ".2257FC83-FA8A-430F-AB47-9105B352793D_link";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symbolic,
    Hard,
}

impl LinkKind {
    pub fn suffix(self) -> &'static str {
        match self {
            LinkKind::Symbolic => SYMLINK_SUFFIX,
            LinkKind::Hard => HARDLINK_SUFFIX,
        }
    }

    /// `path` with this kind's suffix appended, unless already present.
    pub fn decorate(self, path: &str) -> String {
        if path.ends_with(self.suffix()) {
            path.to_string()
        } else {
            format!("{}{}", path, self.suffix())
        }
    }
}

pub fn classify(name: &str) -> Option<LinkKind> {
    if name.ends_with(SYMLINK_SUFFIX) {
        Some(LinkKind::Symbolic)
    } else if name.ends_with(HARDLINK_SUFFIX) {
        Some(LinkKind::Hard)
    } else {
        None
    }
}

/// Splits a name into its visible part and link kind.
pub fn strip(name: &str) -> (&str, Option<LinkKind>) {
    match classify(name) {
        Some(kind) => (&name[..name.len() - kind.suffix().len()], Some(kind)),
        None => (name, None),
    }
}

pub fn read_target(file: &Path) -> io::Result<String> {
    let mut line = String::new();
    BufReader::new(fs::File::open(file)?).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

pub fn write_target(file: &Path, target: &str) -> io::Result<()> {
    let mut out = fs::File::create(file)?;
    writeln!(out, "{}", target)?;
    out.sync_all()
}
