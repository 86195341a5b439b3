//! Numbering of a task graph into a submittable plan.
//!
//! Every task is given an id equal to `id_base` plus the number of tasks
//! numbered before it; inputs are numbered before the tasks reading them,
//! left to right, so ids follow a post-order of the requested roots. Results
//! that already live on the coordinator keep their own id.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, Weak};

use petgraph::graph::NodeIndex;

use crate::client::Session;
use crate::error::LoomError;
use crate::future::Future;
use crate::graph::{TaskGraph, TaskHandle};
use crate::protocol;
use crate::symbols::Symbols;
use crate::task::{Input, ResourceRequest, Task, TaskId};

pub struct Plan<'g> {
    graph: &'g TaskGraph,
    id_base: TaskId,
    ids: HashMap<NodeIndex, TaskId>,
    order: Vec<NodeIndex>,
    owner: Option<Weak<Mutex<Session>>>,
}

impl<'g> Plan<'g> {
    pub fn new(graph: &'g TaskGraph, id_base: TaskId) -> Self {
        Self {
            graph,
            id_base,
            ids: HashMap::new(),
            order: Vec::new(),
            owner: None,
        }
    }

    /// Restricts remote inputs to futures of one connection.
    pub(crate) fn owned_by(mut self, session: Weak<Mutex<Session>>) -> Self {
        self.owner = Some(session);
        self
    }

    /// Id of `input` in this plan, numbering it and everything it depends
    /// on first. Adding the same task again returns the same id.
    pub fn add(&mut self, input: &Input) -> Result<TaskId, LoomError> {
        match input {
            Input::Task(handle) => self.add_task(*handle),
            Input::Remote(future) => self.check_remote(future),
        }
    }

    pub fn add_task(&mut self, handle: TaskHandle) -> Result<TaskId, LoomError> {
        self.graph.check(&handle)?;

        if let Some(&id) = self.ids.get(&handle.index) {
            return Ok(id);
        }

        let graph = self.graph;
        let mut stack: Vec<(NodeIndex, usize)> = vec![(handle.index, 0)];

        while let Some(&(index, next)) = stack.last() {
            let task = &graph.graph[index];

            let Some(input) = task.inputs.get(next) else {
                stack.pop();
                self.number(index, task)?;
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            match input {
                Input::Task(child) if !self.ids.contains_key(&child.index) => {
                    graph.check(child)?;
                    stack.push((child.index, 0));
                }
                Input::Task(_) => {}
                Input::Remote(future) => {
                    self.check_remote(future)?;
                }
            }
        }

        Ok(self.ids[&handle.index])
    }

    fn number(&mut self, index: NodeIndex, task: &Task) -> Result<(), LoomError> {
        if let Some(path) = &task.checkpoint_path
            && !path.is_absolute()
        {
            return Err(LoomError::RelativePath(path.clone()));
        }

        let id = self.id_base + self.order.len() as TaskId;
        self.ids.insert(index, id);
        self.order.push(index);
        Ok(())
    }

    fn check_remote(&self, future: &Future) -> Result<TaskId, LoomError> {
        if !future.is_active() {
            return Err(LoomError::StaleReference(future.id()));
        }

        if let Some(owner) = &self.owner
            && !future.belongs_to(owner)
        {
            return Err(LoomError::InvalidPlanNode(format!(
                "task id={} was submitted over another connection",
                future.id()
            )));
        }

        Ok(future.id())
    }

    pub fn id_base(&self) -> TaskId {
        self.id_base
    }

    pub fn id_of(&self, handle: TaskHandle) -> Option<TaskId> {
        self.graph
            .check(&handle)
            .ok()
            .and_then(|_| self.ids.get(&handle.index).copied())
    }

    /// Number of tasks numbered so far; the next plan starts this far past
    /// `id_base`.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tasks in numbering order.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &'g Task)> + '_ {
        let graph = self.graph;
        self.order
            .iter()
            .map(move |index| (self.ids[index], &graph.graph[*index]))
    }

    /// Every task type and resource name the plan refers to.
    pub fn collect_symbols(&self) -> BTreeSet<&'g str> {
        let mut symbols = BTreeSet::new();

        for (_, task) in self.tasks() {
            symbols.insert(&*task.task_type);
            if let Some(request) = task.resource_request.as_deref() {
                symbols.extend(request.names());
            }
        }

        symbols
    }

    fn input_id(&self, input: &Input) -> Result<TaskId, LoomError> {
        match input {
            Input::Task(handle) => self.ids.get(&handle.index).copied().ok_or_else(|| {
                LoomError::InvalidPlanNode(format!(
                    "input #{} was not numbered",
                    handle.index.index()
                ))
            }),
            Input::Remote(future) => Ok(future.id()),
        }
    }

    /// Builds the wire message. Labels and metadata are only included when
    /// `include_metadata` is set.
    pub fn serialize(
        &self,
        symbols: &Symbols,
        results: &[TaskId],
        include_metadata: bool,
    ) -> Result<protocol::Plan, LoomError> {
        // Distinct requests by value, in order of first use.
        let mut requests: Vec<&ResourceRequest> = Vec::new();
        let mut request_index: HashMap<&ResourceRequest, i32> = HashMap::new();

        for (_, task) in self.tasks() {
            if let Some(request) = task.resource_request.as_deref() {
                request_index.entry(request).or_insert_with(|| {
                    requests.push(request);
                    requests.len() as i32 - 1
                });
            }
        }

        let resource_requests = requests
            .iter()
            .map(|request| {
                let resources = request
                    .iter()
                    .map(|(name, value)| {
                        Ok::<_, LoomError>(protocol::Resource {
                            resource_type: symbols.resolve(name)?,
                            value,
                        })
                    })
                    .collect::<Result<_, LoomError>>()?;
                Ok::<_, LoomError>(protocol::ResourceRequest { resources })
            })
            .collect::<Result<_, LoomError>>()?;

        let tasks = self
            .tasks()
            .map(|(_, task)| {
                let metadata = match &task.metadata {
                    Some(value) if include_metadata => Some(encode_metadata(value)?),
                    _ => None,
                };

                Ok::<_, LoomError>(protocol::Task {
                    task_type: symbols.resolve(&task.task_type)?,
                    config: task.config.clone(),
                    input_ids: task
                        .inputs
                        .iter()
                        .map(|input| self.input_id(input))
                        .collect::<Result<_, _>>()?,
                    policy: Some(protocol::task::Policy::from(task.policy) as i32),
                    resource_request_index: task
                        .resource_request
                        .as_deref()
                        .map(|request| request_index[request]),
                    label: task.label.clone().filter(|_| include_metadata),
                    metadata,
                    checkpoint_path: task.checkpoint_path.as_ref().map(|path| path.to_string()),
                })
            })
            .collect::<Result<_, LoomError>>()?;

        let mut result_ids = Vec::with_capacity(results.len());
        for &id in results {
            if !result_ids.contains(&id) {
                result_ids.push(id);
            }
        }

        Ok(protocol::Plan {
            tasks,
            result_ids,
            resource_requests,
            id_base: Some(self.id_base),
        })
    }
}

fn encode_metadata(value: &ciborium::Value) -> Result<Vec<u8>, LoomError> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer)
        .map_err(|err| LoomError::Metadata(err.to_string()))?;
    Ok(buffer)
}
