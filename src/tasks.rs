//! Constructors for the tasks every coordinator provides.
//!
//! Each function only describes a task; place it in a
//! [`TaskGraph`](crate::TaskGraph) to get a handle usable as an input.
//!
//! ```rust
//! use loom_client::{TaskGraph, tasks};
//!
//! let mut graph = TaskGraph::new();
//! let a = graph.add(tasks::constant("ABCDE"))?;
//! let b = graph.add(tasks::constant("123"))?;
//! let merged = graph.add(tasks::merge([a, b], ""))?;
//! # let _ = merged;
//! # Ok::<(), loom_client::LoomError>(())
//! ```

use std::sync::Arc;

use camino::Utf8Path;
use prost::Message;

use crate::protocol;
use crate::task::{Input, Policy, ResourceRequest, Task, cpu1};

pub const BASE_GET: &str = "loom/base/get";
pub const BASE_SLICE: &str = "loom/base/slice";
pub const BASE_SIZE: &str = "loom/base/size";
pub const BASE_LENGTH: &str = "loom/base/length";

pub const DATA_CONST: &str = "loom/data/const";
pub const DATA_MERGE: &str = "loom/data/merge";
pub const DATA_OPEN: &str = "loom/data/open";
pub const DATA_SPLIT: &str = "loom/data/split";
pub const DATA_SAVE: &str = "loom/data/save";

pub const ARRAY_MAKE: &str = "loom/array/make";

pub const RUN: &str = "loom/run/run";

pub const SCHEDULER_DSLICE: &str = "loom/scheduler/dslice";
pub const SCHEDULER_DGET: &str = "loom/scheduler/dget";

/// A new plain data object with the given content.
pub fn constant(data: impl AsRef<[u8]>) -> Task {
    Task::new(DATA_CONST).config(data).policy(Policy::Simple)
}

/// Concatenates plain data objects, putting `delimiter` between neighbours.
pub fn merge<I>(inputs: I, delimiter: &str) -> Task
where
    I: IntoIterator,
    I::Item: Into<Input>,
{
    Task::new(DATA_MERGE)
        .inputs(inputs)
        .config(delimiter)
        .policy(Policy::Simple)
}

/// A file object backed by `path` on the workers. Opening doesn't read it.
pub fn open(path: impl AsRef<Utf8Path>) -> Task {
    Task::new(DATA_OPEN)
        .config(path.as_ref().as_str())
        .policy(Policy::Simple)
}

/// An index over the input split by lines.
pub fn split(input: impl Into<Input>) -> Task {
    Task::new(DATA_SPLIT).input(input).policy(Policy::Simple)
}

/// Saves a data object to an absolute path on the workers. Produces an empty
/// object.
pub fn save(input: impl Into<Input>, path: impl AsRef<Utf8Path>) -> Task {
    Task::new(DATA_SAVE)
        .input(input)
        .config(path.as_ref().as_str())
        .resources(cpu1())
}

pub fn array_make<I>(inputs: I) -> Task
where
    I: IntoIterator,
    I::Item: Into<Input>,
{
    Task::new(ARRAY_MAKE).inputs(inputs).policy(Policy::Simple)
}

/// Size of the input in bytes.
pub fn size(input: impl Into<Input>) -> Task {
    Task::new(BASE_SIZE).input(input).policy(Policy::Simple)
}

/// Number of items of a structured input.
pub fn length(input: impl Into<Input>) -> Task {
    Task::new(BASE_LENGTH).input(input).policy(Policy::Simple)
}

/// Item at `index` of a structured input. Fails remotely when out of range.
pub fn get(input: impl Into<Input>, index: u64) -> Task {
    Task::new(BASE_GET)
        .input(input)
        .config(index.to_le_bytes())
        .policy(Policy::Simple)
}

/// Items `start..end` of a structured input.
pub fn slice(input: impl Into<Input>, start: u64, end: u64) -> Task {
    let mut config = [0u8; 16];
    config[..8].copy_from_slice(&start.to_le_bytes());
    config[8..].copy_from_slice(&end.to_le_bytes());

    Task::new(BASE_SLICE)
        .input(input)
        .config(config)
        .policy(Policy::Simple)
}

/// Splits the input into slices; the scheduler picks how many.
pub fn dslice(input: impl Into<Input>) -> Task {
    Task::new(SCHEDULER_DSLICE)
        .input(input)
        .policy(Policy::Scheduler)
}

/// Applies the following tasks to every item of the input.
pub fn dget(input: impl Into<Input>) -> Task {
    Task::new(SCHEDULER_DGET)
        .input(input)
        .policy(Policy::Scheduler)
}

const STDIN: &str = "+in";
const STDOUT: &str = "+out";

/// Builder of an external program invocation.
///
/// Inputs are mapped onto the program's stdin (`None` target), onto a
/// variable usable in `args` (target starting with `$`) or onto a file.
/// The output is stdout unless other files are named; more than one output
/// produces an array.
#[derive(Clone, Debug)]
pub struct Run {
    args: Vec<String>,
    inputs: Vec<(Input, Option<String>)>,
    outputs: Vec<Option<String>>,
    request: Arc<ResourceRequest>,
}

impl Run {
    /// Program and arguments given as a single whitespace-separated string.
    pub fn new(command: &str) -> Self {
        Self::args(command.split_whitespace())
    }

    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            inputs: Vec::new(),
            outputs: vec![None],
            request: cpu1(),
        }
    }

    pub fn stdin(mut self, input: impl Into<Input>) -> Self {
        self.inputs.insert(0, (input.into(), None));
        self
    }

    pub fn input(mut self, input: impl Into<Input>, target: impl Into<String>) -> Self {
        self.inputs.push((input.into(), Some(target.into())));
        self
    }

    /// Replaces the outputs; `None` stands for stdout.
    pub fn outputs<I>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn resources(mut self, request: impl Into<Arc<ResourceRequest>>) -> Self {
        self.request = request.into();
        self
    }

    pub fn build(self) -> Task {
        let config = protocol::Run {
            args: self.args,
            map_inputs: self
                .inputs
                .iter()
                .map(|(_, target)| target.clone().unwrap_or_else(|| STDIN.into()))
                .collect(),
            map_outputs: self
                .outputs
                .into_iter()
                .map(|target| target.unwrap_or_else(|| STDOUT.into()))
                .collect(),
        };

        Task::new(RUN)
            .inputs(self.inputs.into_iter().map(|(input, _)| input))
            .config(config.encode_to_vec())
            .resources(self.request)
    }
}

impl From<Run> for Task {
    fn from(value: Run) -> Self {
        value.build()
    }
}

pub fn run(command: &str) -> Task {
    Run::new(command).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskGraph;

    #[test]
    fn test_config_encodings() {
        assert_eq!(constant("héllo").get_config(), "héllo".as_bytes());
        assert_eq!(constant(b"\0\xff").get_config(), b"\0\xff");

        let mut graph = TaskGraph::new();
        let a = graph.add(constant("abc")).unwrap();

        assert_eq!(get(a, 3).get_config(), &[3, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            slice(a, 1, 258).get_config(),
            &[1, 0, 0, 0, 0, 0, 0, 0, 2, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(merge([a, a], ", ").get_config(), b", ");
        assert!(merge([a], "").get_config().is_empty());
    }

    #[test]
    fn test_policies_and_requests() {
        let mut graph = TaskGraph::new();
        let a = graph.add(constant("abc")).unwrap();

        assert_eq!(constant("x").get_policy(), Policy::Simple);
        assert_eq!(dslice(a).get_policy(), Policy::Scheduler);
        assert_eq!(dget(a).get_policy(), Policy::Scheduler);
        assert_eq!(save(a, "/tmp/out").get_policy(), Policy::Standard);
        assert_eq!(save(a, "/tmp/out").get_resources(), Some(&*cpu1()));
        assert_eq!(run("ls /").get_resources(), Some(&*cpu1()));
        assert!(array_make([a]).get_resources().is_none());
    }

    #[test]
    fn test_run_config() {
        let mut graph = TaskGraph::new();
        let data = graph.add(constant("x")).unwrap();
        let extra = graph.add(constant("y")).unwrap();

        let task = Run::new("cat  $X -")
            .input(extra, "$X")
            .stdin(data)
            .outputs([None, Some("log.txt".to_string())])
            .resources(ResourceRequest::cpus(2))
            .build();

        let config = protocol::Run::decode(task.get_config()).unwrap();
        assert_eq!(config.args, vec!["cat", "$X", "-"]);
        assert_eq!(config.map_inputs, vec!["+in", "$X"]);
        assert_eq!(config.map_outputs, vec!["+out", "log.txt"]);

        assert_eq!(task.task_type(), RUN);
        assert!(matches!(task.get_inputs(), [Input::Task(a), Input::Task(b)] if *a == data && *b == extra));
        assert_eq!(task.get_resources(), Some(&ResourceRequest::cpus(2)));
    }
}
