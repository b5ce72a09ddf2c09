use std::borrow::Cow;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::output::{GeneratedFile, PostWriteCommand, resolve_destination};
use crate::task::TaskDefinition;

/// Contents of a generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileContents {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContents {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContents::Text(text) => text.as_bytes(),
            FileContents::Binary(bytes) => bytes,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContents::Text(text) => Some(text),
            FileContents::Binary(_) => None,
        }
    }
}

impl From<String> for FileContents {
    fn from(value: String) -> Self {
        FileContents::Text(value)
    }
}

impl From<&str> for FileContents {
    fn from(value: &str) -> Self {
        FileContents::Text(value.to_string())
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(value: Vec<u8>) -> Self {
        FileContents::Binary(value)
    }
}

impl PartialEq<&str> for FileContents {
    fn eq(&self, other: &&str) -> bool {
        self.as_text() == Some(*other)
    }
}

/// Hints for the writer that eventually puts the file on disk. Stored as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileOptions {
    /// Only create the file, never replace an existing one.
    pub never_overwrite: bool,
    /// Write the contents verbatim instead of running them through a formatter.
    pub skip_formatting: bool,
}

/// Coarse ordering hint for post-write commands, used by whoever runs them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    /// Installing dependencies, e.g. `pnpm install`.
    Dependencies,
    /// Code generation relying on installed dependencies.
    Codegen,
    #[default]
    Default,
}

impl CommandPriority {
    pub fn rank(self) -> u32 {
        match self {
            CommandPriority::Dependencies => 100,
            CommandPriority::Codegen => 200,
            CommandPriority::Default => 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandOptions {
    pub priority: CommandPriority,
    /// Directory to run the command in, relative to the project root.
    pub working_directory: Option<Utf8PathBuf>,
    /// Run only if one of these destinations changed on disk.
    pub only_if_changed: Vec<Utf8PathBuf>,
}

impl CommandOptions {
    pub fn with_priority(priority: CommandPriority) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

/// A file write recorded by a builder, keyed by its resolved destination.
#[derive(Debug, Clone)]
pub(crate) struct FileWrite {
    pub destination: Utf8PathBuf,
    pub file: GeneratedFile,
}

/// Collects the effects of one task's build step.
///
/// Each build step gets a fresh builder. The engine merges its contents into
/// the final result once the whole build pass of the phase is done.
pub struct TaskOutputBuilder {
    generator: String,
    task_id: String,
    base_directory: Utf8PathBuf,
    pub(crate) files: Vec<FileWrite>,
    pub(crate) commands: Vec<PostWriteCommand>,
    pub(crate) dynamic_tasks: Vec<TaskDefinition>,
}

impl TaskOutputBuilder {
    pub(crate) fn new(generator: &str, task_id: &str, base_directory: &Utf8Path) -> Self {
        Self {
            generator: generator.to_string(),
            task_id: task_id.to_string(),
            base_directory: base_directory.to_path_buf(),
            files: Vec::new(),
            commands: Vec::new(),
            dynamic_tasks: Vec::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn base_directory(&self) -> &Utf8Path {
        &self.base_directory
    }

    /// Records a file. `id` is a short name for the file within its generator,
    /// it ends up qualified as `<generator>:<id>`. A relative `destination` is
    /// resolved against the base directory of the generator node.
    pub fn write_file(
        &mut self,
        id: impl AsRef<str>,
        destination: impl AsRef<Utf8Path>,
        contents: impl Into<FileContents>,
        options: FileOptions,
    ) {
        let destination = resolve_destination(&self.base_directory, destination.as_ref());

        tracing::trace!(task = %self.task_id, %destination, "write file");

        self.files.push(FileWrite {
            destination,
            file: GeneratedFile {
                id: format!("{}:{}", self.generator, id.as_ref()),
                contents: contents.into(),
                options,
            },
        });
    }

    pub fn add_post_write_command(&mut self, command: impl Into<String>, options: CommandOptions) {
        self.commands.push(PostWriteCommand {
            command: command.into(),
            options,
        });
    }

    /// Registers a task to run in a later phase, owned by the same generator
    /// node as the current task. The task must have a phase, and `name` must be
    /// unique among the dynamic tasks of the node. Both are checked when the
    /// build pass is merged.
    pub fn add_dynamic_task(&mut self, name: impl Into<String>, mut task: TaskDefinition) {
        task.name = Cow::Owned(name.into());
        self.dynamic_tasks.push(task);
    }
}

impl std::fmt::Debug for TaskOutputBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOutputBuilder")
            .field("task_id", &self.task_id)
            .field("files", &self.files.len())
            .field("commands", &self.commands.len())
            .field("dynamic_tasks", &self.dynamic_tasks.len())
            .finish()
    }
}
