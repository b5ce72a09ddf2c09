use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Timing of a single task.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    /// Phase the task ran in.
    pub phase: String,
    /// When the `run` step started.
    pub start: Instant,
    /// Time spent in `run`.
    pub run: Duration,
    /// Time spent in `build`, if the task had one.
    pub build: Option<Duration>,
}

impl TaskExecution {
    pub fn total(&self) -> Duration {
        self.run + self.build.unwrap_or_default()
    }
}

/// Timing of a whole phase.
#[derive(Debug, Clone)]
pub struct PhaseExecution {
    pub name: String,
    pub tasks: usize,
    pub duration: Duration,
}

/// Run diagnostics, returned with every [`ExecutionResult`].
///
/// [`ExecutionResult`]: crate::ExecutionResult
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Task id to its timings.
    pub execution_times: HashMap<String, TaskExecution>,
    /// Phases in the order they ran.
    pub phases: Vec<PhaseExecution>,
}

impl Diagnostics {
    /// The `n` tasks that took the longest, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<(&str, &TaskExecution)> {
        let mut tasks: Vec<_> = self
            .execution_times
            .iter()
            .map(|(id, exec)| (id.as_str(), exec))
            .collect();

        tasks.sort_by(|a, b| b.1.total().cmp(&a.1.total()).then(a.0.cmp(b.0)));
        tasks.truncate(n);
        tasks
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for phase in &self.phases {
            writeln!(
                f,
                "phase {:<16} {:>4} tasks {:>10.2?}",
                phase.name, phase.tasks, phase.duration
            )?;
        }

        for (id, exec) in self.slowest(5) {
            writeln!(f, "  {:<40} {:>10.2?}", id, exec.total())?;
        }

        Ok(())
    }
}
