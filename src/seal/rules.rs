//! Profile compiler: turns a [`Profile`] into Landlock rule descriptors.
//!
//! Each access level yields at most two rules, one for the paths that are
//! directories and one for the paths that are files, so a profile never
//! compiles to more than eight rules. Paths that cannot be stat'd are dropped
//! with a warning; images routinely lack some of the paths a policy names.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use landlock::{AccessFs, BitFlags};
use tracing::warn;

use crate::profile::Profile;

/// Access level of a profile entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    ReadOnly,
    ReadExec,
    ReadWrite,
    ReadWriteExec,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::ReadOnly,
        AccessLevel::ReadExec,
        AccessLevel::ReadWrite,
        AccessLevel::ReadWriteExec,
    ];

    /// Rights granted on a regular file.
    pub fn file_access(self) -> BitFlags<AccessFs> {
        let read: BitFlags<AccessFs> = AccessFs::ReadFile.into();
        let exec = read | AccessFs::Execute;
        let write = read | AccessFs::WriteFile | AccessFs::Truncate;
        match self {
            AccessLevel::ReadOnly => read,
            AccessLevel::ReadExec => exec,
            AccessLevel::ReadWrite => write,
            AccessLevel::ReadWriteExec => exec | write,
        }
    }

    /// Rights granted beneath a directory.
    ///
    /// Directories additionally get `ReadDir`, and from `ReadWrite` upwards
    /// the entry-management rights (create, remove, rename via `Refer`).
    pub fn dir_access(self) -> BitFlags<AccessFs> {
        let entries = AccessFs::RemoveDir
            | AccessFs::RemoveFile
            | AccessFs::MakeChar
            | AccessFs::MakeDir
            | AccessFs::MakeReg
            | AccessFs::MakeSock
            | AccessFs::MakeFifo
            | AccessFs::MakeBlock
            | AccessFs::MakeSym
            | AccessFs::Refer;
        let base = self.file_access() | AccessFs::ReadDir;
        match self {
            AccessLevel::ReadOnly | AccessLevel::ReadExec => base,
            AccessLevel::ReadWrite | AccessLevel::ReadWriteExec => base | entries,
        }
    }

    pub fn access(self, kind: PathKind) -> BitFlags<AccessFs> {
        match kind {
            PathKind::File => self.file_access(),
            PathKind::Directory => self.dir_access(),
        }
    }

    fn paths(self, profile: &Profile) -> &[PathBuf] {
        match self {
            AccessLevel::ReadOnly => &profile.read_only,
            AccessLevel::ReadExec => &profile.read_exec,
            AccessLevel::ReadWrite => &profile.read_write,
            AccessLevel::ReadWriteExec => &profile.read_write_exec,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::ReadOnly => "ro",
            AccessLevel::ReadExec => "rx",
            AccessLevel::ReadWrite => "rw",
            AccessLevel::ReadWriteExec => "rwx",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    File,
    Directory,
}

/// One access mask applied to a group of paths of the same kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub level: AccessLevel,
    pub kind: PathKind,
    pub paths: Vec<PathBuf>,
}

impl Rule {
    pub fn access(&self) -> BitFlags<AccessFs> {
        self.level.access(self.kind)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PathKind::File => "file",
            PathKind::Directory => "dir",
        };
        write!(f, "{}-{} {:?} on {:?}", kind, self.level, self.access(), self.paths)
    }
}

/// Compile a profile into rules, in level order (ro, rw, rx, rwx).
///
/// Overlapping paths across levels are not deduplicated; Landlock rules are
/// additive, so the broader mask wins.
pub fn compile_profile(profile: &Profile) -> Vec<Rule> {
    [
        AccessLevel::ReadOnly,
        AccessLevel::ReadWrite,
        AccessLevel::ReadExec,
        AccessLevel::ReadWriteExec,
    ]
    .into_iter()
    .flat_map(|level| group_paths(level.paths(profile), level))
    .collect()
}

/// Read+execute rule for the binary about to run plus its shared libraries.
///
/// Duplicate library entries (loader output often lists the loader twice)
/// are collapsed.
pub fn rules_for_binary(binary: &Path, libraries: &[PathBuf]) -> Vec<Rule> {
    let mut seen = HashSet::new();
    let paths: Vec<PathBuf> = std::iter::once(binary.to_path_buf())
        .chain(libraries.iter().cloned())
        .filter(|p| seen.insert(p.clone()))
        .collect();

    group_paths(&paths, AccessLevel::ReadExec)
}

/// Split `paths` by directory-ness and emit one rule per non-empty group.
fn group_paths(paths: &[PathBuf], level: AccessLevel) -> Vec<Rule> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for path in paths {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => dirs.push(path.clone()),
            Ok(_) => files.push(path.clone()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to stat entry, skipping");
            }
        }
    }

    let mut rules = Vec::with_capacity(2);
    if !files.is_empty() {
        rules.push(Rule {
            level,
            kind: PathKind::File,
            paths: files,
        });
    }
    if !dirs.is_empty() {
        rules.push(Rule {
            level,
            kind: PathKind::Directory,
            paths: dirs,
        });
    }
    rules
}
