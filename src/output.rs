//! The aggregated result of a run.
//!
//! Every build step writes into its own [`TaskOutputBuilder`]; once a phase
//! has been built, the builders are merged here in post-order. The merge is
//! pure data assembly, nothing touches the filesystem.
//!
//! [`TaskOutputBuilder`]: crate::TaskOutputBuilder

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::builder::{CommandOptions, FileContents, FileOptions, FileWrite};
use crate::context::Hash32;
use crate::engine::Diagnostics;
use crate::error::ExecuteError;

/// A file produced by some task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    /// `<generator name>:<id given to write_file>`.
    pub id: String,
    pub contents: FileContents,
    pub options: FileOptions,
}

/// A command to run after all files have been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostWriteCommand {
    pub command: String,
    pub options: CommandOptions,
}

/// Everything a run produced.
///
/// Files are keyed by normalized absolute destination. Commands are in
/// post-order of the generator tree: a node's commands come after the
/// commands of all of its descendants, and phases follow each other.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub files: BTreeMap<Utf8PathBuf, GeneratedFile>,
    pub post_write_commands: Vec<PostWriteCommand>,
    /// Timings of the run.
    #[serde(skip)]
    pub diagnostics: Diagnostics,
}

impl ExecutionResult {
    /// Commands ordered by priority, keeping tree order within one priority.
    pub fn commands_by_priority(&self) -> Vec<&PostWriteCommand> {
        let mut commands: Vec<_> = self.post_write_commands.iter().collect();
        commands.sort_by_key(|command| command.options.priority.rank());
        commands
    }

    /// Digest of the files and commands. Two runs producing the same result
    /// have the same fingerprint.
    pub fn fingerprint(&self) -> Hash32 {
        let mut hasher = blake3::Hasher::new();

        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        for (destination, file) in &self.files {
            field(destination.as_str().as_bytes());
            field(file.id.as_bytes());
            field(file.contents.as_bytes());
            field(&[
                file.options.never_overwrite as u8,
                file.options.skip_formatting as u8,
            ]);
        }

        for command in &self.post_write_commands {
            field(command.command.as_bytes());
            field(&command.options.priority.rank().to_le_bytes());
            field(
                command
                    .options
                    .working_directory
                    .as_ref()
                    .map_or("", |dir| dir.as_str())
                    .as_bytes(),
            );
            for path in &command.options.only_if_changed {
                field(path.as_str().as_bytes());
            }
        }

        hasher.finalize().into()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Accumulates the merged output of every build step of a run.
#[derive(Default)]
pub(crate) struct Aggregator {
    files: BTreeMap<Utf8PathBuf, GeneratedFile>,
    commands: Vec<PostWriteCommand>,
}

impl Aggregator {
    pub fn merge(
        &mut self,
        files: Vec<FileWrite>,
        commands: Vec<PostWriteCommand>,
    ) -> Result<(), ExecuteError> {
        for FileWrite { destination, file } in files {
            match self.files.entry(destination) {
                Entry::Occupied(entry) => {
                    return Err(ExecuteError::OutputConflict {
                        destination: entry.key().clone(),
                        first: entry.get().id.clone(),
                        second: file.id,
                    });
                }
                Entry::Vacant(entry) => {
                    entry.insert(file);
                }
            }
        }

        self.commands.extend(commands);
        Ok(())
    }

    pub fn finish(self, diagnostics: Diagnostics) -> ExecutionResult {
        ExecutionResult {
            files: self.files,
            post_write_commands: self.commands,
            diagnostics,
        }
    }
}

/// Resolves a destination written by a task: relative paths are taken from
/// the node's base directory, and the result is normalized.
pub(crate) fn resolve_destination(base: &Utf8Path, destination: &Utf8Path) -> Utf8PathBuf {
    if destination.is_absolute() {
        normalize_path(destination)
    } else {
        normalize_path(&base.join(destination))
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// Destinations are virtual here, they don't have to exist.
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => {}
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
