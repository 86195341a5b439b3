//! Connection to a coordinator.
//!
//! All traffic from the coordinator goes through a single receive loop,
//! [`Session::process_events`]. Blocking operations run the loop until the
//! message they are interested in shows up; everything demultiplexed on the
//! way (finish notices of other tasks, dictionary updates, events) is applied
//! before the loop continues.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Buf;
use camino::{Utf8Path, Utf8PathBuf};
use prost::Message;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::LoomError;
use crate::future::{Future, FutureInner, Status};
use crate::graph::{TaskGraph, TaskHandle};
use crate::payload::{Payload, PayloadKind};
use crate::plan::Plan;
use crate::protocol::{self, ClientRequest, ClientResponse, client_request, client_response};
use crate::symbols::{SymbolId, Symbols};
use crate::task::TaskId;
use crate::transport::{FrameReader, FrameWriter};

pub(crate) type Reader = FrameReader<Box<dyn Read + Send>>;
pub(crate) type Writer = FrameWriter<Box<dyn Write + Send>>;

pub(crate) fn send_release(writer: &Mutex<Writer>, id: TaskId) -> Result<(), LoomError> {
    writer
        .lock()
        .unwrap()
        .send_message(&ClientRequest::with_id(client_request::Type::Release, id))
}

/// Cluster summary returned by [`Client::get_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub n_workers: Option<i32>,
    pub n_data_objects: Option<i32>,
}

impl From<protocol::Stats> for Stats {
    fn from(value: protocol::Stats) -> Self {
        Self {
            n_workers: value.n_workers,
            n_data_objects: value.n_data_objects,
        }
    }
}

/// Something the receive loop produced that a caller may be waiting for.
pub(crate) enum Wake {
    Finished(Future),
    Data(TaskId, Payload),
    Stats(Stats),
}

pub(crate) struct Session {
    me: Weak<Mutex<Session>>,
    reader: Reader,
    writer: Arc<Mutex<Writer>>,
    symbols: Symbols,
    next_id: TaskId,
    futures: HashMap<TaskId, Weak<FutureInner>>,
    n_finished: u64,
    trace_path: Option<Utf8PathBuf>,
}

impl Session {
    fn send(&self, request: &ClientRequest) -> Result<(), LoomError> {
        self.writer.lock().unwrap().send_message(request)
    }

    /// Runs the receive loop until `until` accepts a produced item.
    fn process_events<F>(&mut self, mut until: F) -> Result<Wake, LoomError>
    where
        F: FnMut(&Wake) -> bool,
    {
        loop {
            let frame = self.reader.receive()?;
            let message = ClientResponse::decode(frame)?;
            let kind = client_response::Type::try_from(message.r#type).map_err(|_| {
                LoomError::Protocol(format!("unknown response type {}", message.r#type))
            })?;

            tracing::trace!(?kind, "message received");

            let wake = match kind {
                client_response::Type::TaskFinished => {
                    let id = message.id.ok_or_else(|| missing("id", kind))?;
                    match self.on_finished(id)? {
                        Some(future) => Wake::Finished(future),
                        None => continue,
                    }
                }
                client_response::Type::Data => {
                    let header = message.data.ok_or_else(|| missing("data", kind))?;
                    let mut frames = 0;
                    let payload = self.receive_payload(header.type_id, &mut frames)?;
                    if i64::try_from(frames).ok() != Some(header.n_messages) {
                        tracing::warn!(
                            id = header.id,
                            announced = header.n_messages,
                            frames,
                            "data frame count differs from header"
                        );
                    }
                    Wake::Data(header.id, payload)
                }
                client_response::Type::Stats => {
                    Wake::Stats(message.stats.unwrap_or_default().into())
                }
                client_response::Type::TaskFailed => {
                    let error = message.error.ok_or_else(|| missing("error", kind))?;
                    self.futures.remove(&error.id);
                    return Err(LoomError::TaskFailed {
                        id: error.id,
                        worker: error.worker,
                        message: error.error_msg,
                    });
                }
                client_response::Type::Error => {
                    let text = message.error.map(|error| error.error_msg).unwrap_or_default();
                    return Err(LoomError::Server(text));
                }
                client_response::Type::Dictionary => {
                    self.symbols = Symbols::from_dictionary(message.symbols);
                    tracing::info!(symbols = self.symbols.len(), "symbol table replaced");
                    continue;
                }
                client_response::Type::Event => continue,
            };

            if until(&wake) {
                return Ok(wake);
            }

            match wake {
                Wake::Finished(_) => {}
                Wake::Data(id, _) => tracing::warn!(id, "dropping data nobody asked for"),
                Wake::Stats(_) => tracing::warn!("dropping stats nobody asked for"),
            }
        }
    }

    fn on_finished(&mut self, id: TaskId) -> Result<Option<Future>, LoomError> {
        self.n_finished += 1;

        let Some(weak) = self.futures.remove(&id) else {
            tracing::warn!(id, "finish notice for a task without a future");
            return Ok(None);
        };

        let Some(inner) = weak.upgrade() else {
            // Every handle was dropped while the task was running.
            send_release(&self.writer, id)?;
            tracing::debug!(id, "released after drop");
            return Ok(None);
        };

        let future = Future::from_inner(inner);
        if future.status() == Status::Canceled {
            send_release(&self.writer, id)?;
            tracing::debug!(id, "released after cancel");
        } else {
            future.set_finished()?;
            tracing::debug!(id, "finished");
        }

        Ok(Some(future))
    }

    /// Reads the frames that follow a `DATA` header. Raw and opaque values
    /// are one frame each; an array is a frame of u32 type ids followed by
    /// the frames of every item, depth first.
    fn receive_payload(&mut self, type_id: SymbolId, frames: &mut u64) -> Result<Payload, LoomError> {
        let kind = self.symbols.payload_kind(type_id).ok_or_else(|| {
            LoomError::Protocol(format!(
                "data of unsupported type '{}'",
                self.symbols.name(type_id).unwrap_or("?")
            ))
        })?;

        let block = self.reader.receive()?;
        *frames += 1;

        match kind {
            PayloadKind::Raw => Ok(Payload::Raw(block)),
            PayloadKind::Opaque => Ok(Payload::Opaque(block)),
            PayloadKind::Array => {
                if block.len() % size_of::<u32>() != 0 {
                    return Err(LoomError::Protocol(format!(
                        "array type block of {} bytes",
                        block.len()
                    )));
                }

                let mut types = block;
                let mut items = Vec::with_capacity(types.len() / size_of::<u32>());
                while types.has_remaining() {
                    let type_id = types.get_u32_le() as SymbolId;
                    items.push(self.receive_payload(type_id, frames)?);
                }

                Ok(Payload::Array(items))
            }
        }
    }

    fn future_for(&mut self, id: TaskId) -> Future {
        if let Some(inner) = self.futures.get(&id).and_then(Weak::upgrade) {
            return Future::from_inner(inner);
        }

        let inner = Arc::new(FutureInner::new(
            id,
            self.me.clone(),
            Arc::downgrade(&self.writer),
        ));
        let future = Future::from_inner(inner);
        self.futures.insert(id, future.downgrade());
        future
    }

    fn submit(&mut self, graph: &TaskGraph, tasks: &[TaskHandle]) -> Result<Vec<Future>, LoomError> {
        let mut plan = Plan::new(graph, self.next_id).owned_by(self.me.clone());
        let ids = tasks
            .iter()
            .map(|&handle| plan.add_task(handle))
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = ClientRequest::new(client_request::Type::Plan);
        request.plan = Some(plan.serialize(&self.symbols, &ids, self.trace_path.is_some())?);
        self.send(&request)?;

        tracing::debug!(id_base = self.next_id, tasks = plan.len(), "plan submitted");
        self.next_id += plan.len() as TaskId;

        Ok(ids.into_iter().map(|id| self.future_for(id)).collect())
    }

    pub(crate) fn wait_one(&mut self, future: &Future) -> Result<(), LoomError> {
        if future.status() != Status::Running {
            return Ok(());
        }

        let id = future.id();
        self.process_events(|wake| matches!(wake, Wake::Finished(f) if f.id() == id))?;
        Ok(())
    }

    pub(crate) fn fetch_one(&mut self, future: &Future) -> Result<Payload, LoomError> {
        let id = future.id();

        if let status @ (Status::Released | Status::Canceled) = future.status() {
            return Err(LoomError::InvalidFutureState { id, status });
        }

        if let Some(payload) = future.cached() {
            return Ok(payload);
        }

        self.wait_one(future)?;
        if let status @ (Status::Released | Status::Canceled) = future.status() {
            return Err(LoomError::InvalidFutureState { id, status });
        }

        self.send(&ClientRequest::with_id(client_request::Type::Fetch, id))?;
        let wake = self.process_events(|wake| matches!(wake, Wake::Data(data, _) if *data == id))?;
        let Wake::Data(_, payload) = wake else {
            return Err(LoomError::Protocol(format!("expected data of task id={id}")));
        };

        future.set_result(payload.clone())?;
        Ok(payload)
    }

    fn get_stats(&mut self) -> Result<Stats, LoomError> {
        self.send(&ClientRequest::new(client_request::Type::Stats))?;
        match self.process_events(|wake| matches!(wake, Wake::Stats(_)))? {
            Wake::Stats(stats) => Ok(stats),
            _ => Err(LoomError::Protocol("expected stats".into())),
        }
    }

    fn set_trace(&mut self, path: Utf8PathBuf) -> Result<(), LoomError> {
        let mut request = ClientRequest::new(client_request::Type::Trace);
        request.trace_path = Some(path.to_string());
        self.send(&request)?;

        tracing::info!(%path, "coordinator tracing enabled");
        self.trace_path = Some(path);
        Ok(())
    }
}

fn missing(field: &str, kind: client_response::Type) -> LoomError {
    LoomError::Protocol(format!("{kind:?} message without '{field}'"))
}

fn absolute(path: &Utf8Path) -> Result<Utf8PathBuf, LoomError> {
    let path = std::path::absolute(path.as_std_path())?;
    Utf8PathBuf::try_from(path).map_err(|err| LoomError::Io(err.into_io_error()))
}

/// Blocks until the coordinator announces its symbol table.
fn read_dictionary(reader: &mut Reader) -> Result<Symbols, LoomError> {
    let message = ClientResponse::decode(reader.receive()?)?;

    if message.r#type != client_response::Type::Dictionary as i32 {
        return Err(LoomError::Protocol(format!(
            "expected the symbol dictionary, got message type {}",
            message.r#type
        )));
    }

    Ok(Symbols::from_dictionary(message.symbols))
}

/// A client connection to a coordinator.
///
/// Methods take `&self`; the connection is guarded by a mutex, so a client
/// can be shared between threads, though blocking calls are serialized.
pub struct Client {
    session: Arc<Mutex<Session>>,
    writer: Arc<Mutex<Writer>>,
}

impl Client {
    pub fn connect(config: &ClientConfig) -> Result<Self, LoomError> {
        let address = format!("{}:{}", config.address, config.port);
        let connect_error = |source| LoomError::Connect {
            address: address.clone(),
            source,
        };

        tracing::info!(%address, "connecting");
        let stream = TcpStream::connect((config.address.as_str(), config.port))
            .map_err(connect_error)?;
        stream.set_nodelay(true).map_err(connect_error)?;
        let reader = stream.try_clone().map_err(connect_error)?;

        Self::from_streams(reader, stream, config)
    }

    /// Runs the handshake over an already established byte stream.
    pub fn from_streams<R, W>(reader: R, writer: W, config: &ClientConfig) -> Result<Self, LoomError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let mut reader: Reader = FrameReader::new(Box::new(reader) as Box<dyn Read + Send>);
        let writer: Arc<Mutex<Writer>> = Arc::new(Mutex::new(FrameWriter::new(
            Box::new(writer) as Box<dyn Write + Send>
        )));

        writer.lock().unwrap().send_message(&protocol::Register {
            protocol_version: protocol::PROTOCOL_VERSION,
            r#type: protocol::register::Type::RegisterClient as i32,
        })?;

        let symbols = read_dictionary(&mut reader)?;
        tracing::info!(symbols = symbols.len(), "connected to coordinator");

        let session = Arc::new_cyclic(|me| {
            Mutex::new(Session {
                me: me.clone(),
                reader,
                writer: writer.clone(),
                symbols,
                next_id: 0,
                futures: HashMap::new(),
                n_finished: 0,
                trace_path: None,
            })
        });

        let client = Client { session, writer };
        if let Some(path) = &config.trace {
            client.set_trace(path)?;
        }

        Ok(client)
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap()
    }

    /// Sends every task reachable from `tasks` and returns one future per
    /// requested task, in order. Nothing is sent if the plan is invalid.
    pub fn submit(&self, graph: &TaskGraph, tasks: &[TaskHandle]) -> Result<Vec<Future>, LoomError> {
        self.session().submit(graph, tasks)
    }

    pub fn submit_one(&self, graph: &TaskGraph, task: TaskHandle) -> Result<Future, LoomError> {
        let mut futures = self.submit(graph, &[task])?;
        futures
            .pop()
            .ok_or_else(|| LoomError::InvalidPlanNode("nothing was submitted".into()))
    }

    /// See [`Future::wait`].
    pub fn wait_one(&self, future: &Future) -> Result<(), LoomError> {
        self.session().wait_one(future)
    }

    pub fn wait(&self, futures: &[Future]) -> Result<(), LoomError> {
        for future in self.as_completed(futures) {
            future?;
        }
        Ok(())
    }

    pub fn fetch_one(&self, future: &Future) -> Result<Payload, LoomError> {
        self.session().fetch_one(future)
    }

    /// Results in the order of `futures`, fetched in completion order.
    pub fn fetch(&self, futures: &[Future]) -> Result<Vec<Payload>, LoomError> {
        let mut results = HashMap::with_capacity(futures.len());
        for future in self.as_completed(futures) {
            let future = future?;
            let payload = self.fetch_one(&future)?;
            results.insert(future.id(), payload);
        }

        futures
            .iter()
            .map(|future| {
                results.get(&future.id()).cloned().ok_or_else(|| {
                    LoomError::Protocol(format!("no result for task id={}", future.id()))
                })
            })
            .collect()
    }

    pub fn gather_one(&self, future: &Future) -> Result<Payload, LoomError> {
        let payload = self.fetch_one(future)?;
        future.release()?;
        Ok(payload)
    }

    pub fn gather(&self, futures: &[Future]) -> Result<Vec<Payload>, LoomError> {
        let results = self.fetch(futures)?;
        self.release(futures)?;
        Ok(results)
    }

    pub fn release_one(&self, future: &Future) -> Result<(), LoomError> {
        future.release()
    }

    pub fn release(&self, futures: &[Future]) -> Result<(), LoomError> {
        futures.iter().try_for_each(Future::release)
    }

    /// Yields futures as the coordinator reports them finished, each once
    /// no matter how often it appears in `futures`.
    pub fn as_completed<'c>(&'c self, futures: &[Future]) -> AsCompleted<'c> {
        AsCompleted {
            client: self,
            pending: unique(futures),
            watermark: None,
        }
    }

    pub fn get_stats(&self) -> Result<Stats, LoomError> {
        self.session().get_stats()
    }

    /// Asks the coordinator to write a trace under `path`. Plans submitted
    /// from now on carry labels and metadata.
    pub fn set_trace(&self, path: impl AsRef<Utf8Path>) -> Result<(), LoomError> {
        let path = absolute(path.as_ref())?;
        self.session().set_trace(path)
    }

    pub fn trace_path(&self) -> Option<Utf8PathBuf> {
        self.session().trace_path.clone()
    }

    pub fn symbols(&self) -> Symbols {
        self.session().symbols.clone()
    }

    /// Shuts the coordinator down.
    pub fn terminate(&self) -> Result<(), LoomError> {
        self.terminator().terminate()
    }

    /// A handle that can send `TERMINATE` while another thread is blocked on
    /// this client.
    pub fn terminator(&self) -> Terminator {
        Terminator {
            writer: self.writer.clone(),
        }
    }

    pub fn close(self) {
        tracing::debug!("closing connection");
    }
}

/// First occurrence of every id, in input order.
fn unique(futures: &[Future]) -> Vec<Future> {
    let mut seen = HashSet::new();
    futures
        .iter()
        .filter(|future| seen.insert(future.id()))
        .cloned()
        .collect()
}

#[derive(Clone)]
pub struct Terminator {
    writer: Arc<Mutex<Writer>>,
}

impl Terminator {
    pub fn terminate(&self) -> Result<(), LoomError> {
        tracing::info!("terminating coordinator");
        self.writer
            .lock()
            .unwrap()
            .send_message(&ClientRequest::new(client_request::Type::Terminate))
    }
}

/// Iterator returned by [`Client::as_completed`].
///
/// The pending set is only rescanned when tasks finished since the last scan,
/// i.e. when another call consumed a finish notice this iterator missed.
/// After yielding an error the iterator is exhausted.
pub struct AsCompleted<'c> {
    client: &'c Client,
    pending: Vec<Future>,
    watermark: Option<u64>,
}

impl AsCompleted<'_> {
    fn scan(&mut self) -> Option<Result<Future, LoomError>> {
        let position = self
            .pending
            .iter()
            .position(|future| future.status() != Status::Running)?;
        let future = self.pending.remove(position);
        self.pending.retain(|pending| pending.id() != future.id());

        match future.status() {
            Status::Finished => Some(Ok(future)),
            status => {
                self.pending.clear();
                Some(Err(LoomError::InvalidFutureState {
                    id: future.id(),
                    status,
                }))
            }
        }
    }
}

impl Iterator for AsCompleted<'_> {
    type Item = Result<Future, LoomError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() {
            return None;
        }

        let client = self.client;
        let mut session = client.session();

        if self.watermark != Some(session.n_finished) {
            if let Some(item) = self.scan() {
                return Some(item);
            }
            self.watermark = Some(session.n_finished);
        }

        let ids: HashSet<TaskId> = self.pending.iter().map(Future::id).collect();
        let wake = session.process_events(|wake| {
            matches!(wake, Wake::Finished(future) if ids.contains(&future.id()))
        });

        match wake {
            Ok(Wake::Finished(future)) => {
                self.pending.retain(|pending| pending.id() != future.id());
                self.watermark = self.watermark.map(|watermark| watermark + 1);

                match future.status() {
                    Status::Finished => Some(Ok(future)),
                    status => {
                        self.pending.clear();
                        Some(Err(LoomError::InvalidFutureState {
                            id: future.id(),
                            status,
                        }))
                    }
                }
            }
            Ok(_) => {
                self.pending.clear();
                Some(Err(LoomError::Protocol("unexpected wake-up".into())))
            }
            Err(err) => {
                self.pending.clear();
                Some(Err(err))
            }
        }
    }
}
