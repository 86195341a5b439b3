use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use camino::Utf8PathBuf;

use crate::future::Future;
use crate::graph::TaskHandle;
use crate::protocol;

/// Id the coordinator knows a task by. Unique per connection.
pub type TaskId = i32;

/// The only resource the coordinator schedules on.
pub const RESOURCE_CPUS: &str = "loom/resource/cpus";

/// Scheduling hint for the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Policy {
    #[default]
    Standard,
    /// Cheap task, the coordinator may run it close to its inputs.
    Simple,
    /// Task that rewrites the graph on the coordinator (e.g. `dslice`).
    Scheduler,
}

impl From<Policy> for protocol::task::Policy {
    fn from(value: Policy) -> Self {
        match value {
            Policy::Standard => protocol::task::Policy::Standard,
            Policy::Simple => protocol::task::Policy::Simple,
            Policy::Scheduler => protocol::task::Policy::Scheduler,
        }
    }
}

/// A multiset of named resource quantities, e.g. `{"loom/resource/cpus": 4}`.
///
/// Equality and hashing work over the sorted mapping, so two independently
/// built requests with the same contents collapse into one entry of a plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRequest {
    resources: BTreeMap<String, i32>,
}

static CPU1: LazyLock<Arc<ResourceRequest>> = LazyLock::new(|| Arc::new(ResourceRequest::cpus(1)));

/// The shared single-cpu request used by default for tasks that need one.
pub fn cpu1() -> Arc<ResourceRequest> {
    CPU1.clone()
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpus(n: i32) -> Self {
        Self::new().with(RESOURCE_CPUS, n)
    }

    pub fn with(mut self, name: impl Into<String>, value: i32) -> Self {
        self.resources.insert(name.into(), value);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.resources.iter().map(|(name, &value)| (name.as_str(), value))
    }
}

/// An edge of the task graph: either a task of the same graph or a result
/// that already lives on the coordinator.
#[derive(Clone, Debug)]
pub enum Input {
    Task(TaskHandle),
    Remote(Future),
}

impl From<TaskHandle> for Input {
    fn from(value: TaskHandle) -> Self {
        Input::Task(value)
    }
}

impl From<&TaskHandle> for Input {
    fn from(value: &TaskHandle) -> Self {
        Input::Task(*value)
    }
}

impl From<Future> for Input {
    fn from(value: Future) -> Self {
        Input::Remote(value)
    }
}

impl From<&Future> for Input {
    fn from(value: &Future) -> Self {
        Input::Remote(value.clone())
    }
}

/// A node of the computation graph, described but not yet placed in a
/// [`TaskGraph`](crate::TaskGraph).
#[derive(Clone, Debug)]
pub struct Task {
    pub(crate) task_type: Cow<'static, str>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) config: Vec<u8>,
    pub(crate) policy: Policy,
    pub(crate) resource_request: Option<Arc<ResourceRequest>>,
    pub(crate) label: Option<String>,
    pub(crate) metadata: Option<ciborium::Value>,
    pub(crate) checkpoint_path: Option<Utf8PathBuf>,
}

impl Task {
    pub fn new(task_type: impl Into<Cow<'static, str>>) -> Self {
        Self {
            task_type: task_type.into(),
            inputs: Vec::new(),
            config: Vec::new(),
            policy: Policy::Standard,
            resource_request: None,
            label: None,
            metadata: None,
            checkpoint_path: None,
        }
    }

    pub fn input(mut self, input: impl Into<Input>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn inputs<I>(mut self, inputs: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Input>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    /// Opaque config interpreted by the coordinator. Text is passed as its
    /// UTF-8 bytes.
    pub fn config(mut self, config: impl AsRef<[u8]>) -> Self {
        self.config = config.as_ref().to_vec();
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn resources(mut self, request: impl Into<Arc<ResourceRequest>>) -> Self {
        self.resource_request = Some(request.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tracing payload, only sent when the client runs in trace mode.
    pub fn metadata(mut self, metadata: impl Into<ciborium::Value>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Absolute path where the coordinator persists (or picks up) the output.
    pub fn checkpoint(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn get_inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn get_config(&self) -> &[u8] {
        &self.config
    }

    pub fn get_policy(&self) -> Policy {
        self.policy
    }

    pub fn get_resources(&self) -> Option<&ResourceRequest> {
        self.resource_request.as_deref()
    }

    pub fn get_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The `group` part of a `group:detail` label.
    pub fn label_group(&self) -> Option<&str> {
        self.label
            .as_deref()
            .map(|label| label.split_once(':').map_or(label, |(group, _)| group))
    }

    pub fn get_checkpoint(&self) -> Option<&camino::Utf8Path> {
        self.checkpoint_path.as_deref()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Task '{}'>", self.label.as_deref().unwrap_or(&self.task_type))
    }
}
