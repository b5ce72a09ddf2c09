use std::any::Any;
use std::sync::Arc;

use camino::Utf8Path;

/// A type-erased, thread-safe container. Every provider value lives in one of
/// these so the registries can hold values of unrelated types side by side.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// A 32-byte BLAKE3 hash.
///
/// Used as the fingerprint of an [`ExecutionResult`](crate::ExecutionResult):
/// two runs producing the same files and commands hash to the same value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The context passed to every task `run` step.
///
/// Describes where in the generator tree the task sits. It is immutable during
/// the call.
pub struct TaskContext<'a> {
    /// Fully qualified task id, `<node id>#<task name>`.
    pub task_id: &'a str,
    /// Id of the generator node owning the task.
    pub node_id: &'a str,
    /// Name of the generator that created the owning node.
    pub generator: &'a str,
    /// Base directory of the owning node.
    pub base_directory: &'a Utf8Path,
    /// Name of the phase being run, `None` for the default phase.
    pub phase: Option<&'a str>,
    /// Tracing span assigned to this task.
    pub span: &'a tracing::Span,
}
