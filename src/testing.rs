//! In-process stand-in for a coordinator, plus small helpers for tests that
//! don't need one.

use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use anyhow::{Context, bail};
use bytes::BufMut;
use prost::Message;

use crate::client::{Client, Writer};
use crate::config::ClientConfig;
use crate::error::LoomError;
use crate::future::{Future, FutureInner};
use crate::protocol::{self, ClientRequest, ClientResponse, client_request, client_response};
use crate::task::TaskId;
use crate::tasks;
use crate::transport::{FrameReader, FrameWriter};

/// Content of a constant that makes the coordinator announce one more symbol.
pub(crate) const RESYNC: &str = "please resync the dictionary";

/// Content of a constant the coordinator reports finished but doesn't keep.
pub(crate) const FORGET: &str = "forget this value";

/// Task type whose config comes back as a `loom/pyobj` value.
pub(crate) const OPAQUE: &str = "loom/test/opaque";

const WORKER: &str = "127.0.0.1:9011";

const SYMBOLS: &[&str] = &[
    "loom/data",
    "loom/array",
    "loom/pyobj",
    "loom/resource/cpus",
    tasks::DATA_CONST,
    tasks::DATA_MERGE,
    tasks::DATA_OPEN,
    tasks::DATA_SPLIT,
    tasks::DATA_SAVE,
    tasks::ARRAY_MAKE,
    tasks::BASE_GET,
    tasks::BASE_SLICE,
    tasks::BASE_SIZE,
    tasks::BASE_LENGTH,
    tasks::RUN,
    tasks::SCHEDULER_DSLICE,
    tasks::SCHEDULER_DGET,
    OPAQUE,
];

/// Collects everything written to it.
#[derive(Clone, Default)]
pub(crate) struct Sink(Arc<Mutex<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Sink {
    pub(crate) fn frames(&self) -> Vec<Vec<u8>> {
        let bytes = self.0.lock().unwrap().clone();
        let mut reader = FrameReader::new(&bytes[..]);
        let mut frames = Vec::new();
        while let Ok(frame) = reader.receive() {
            frames.push(frame.to_vec());
        }
        frames
    }

    /// Ids of every `RELEASE` written so far.
    pub(crate) fn releases(&self) -> Vec<TaskId> {
        self.frames()
            .iter()
            .filter_map(|frame| ClientRequest::decode(&frame[..]).ok())
            .filter(|request| request.r#type == client_request::Type::Release as i32)
            .filter_map(|request| request.id)
            .collect()
    }
}

/// A future with no client behind it. Releases go to `sink` for as long as
/// the returned writer is alive.
pub(crate) fn detached(id: TaskId, sink: &Sink) -> (Future, Arc<Mutex<Writer>>) {
    let writer: Arc<Mutex<Writer>> = Arc::new(Mutex::new(FrameWriter::new(
        Box::new(sink.clone()) as Box<dyn Write + Send>
    )));
    let inner = FutureInner::new(id, Weak::new(), Arc::downgrade(&writer));
    (Future::from_inner(Arc::new(inner)), writer)
}

/// What the coordinator saw during a connection.
#[derive(Debug, Default)]
pub(crate) struct ServerLog {
    pub plans: Vec<protocol::Plan>,
    pub fetched: Vec<TaskId>,
    pub released: Vec<TaskId>,
    pub trace: Option<String>,
    pub terminated: bool,
}

/// Serves client connections one after another on a loopback port.
pub(crate) struct FakeCoordinator {
    address: SocketAddr,
    handle: JoinHandle<anyhow::Result<Vec<ServerLog>>>,
}

impl FakeCoordinator {
    pub(crate) fn start() -> Self {
        Self::serving(1)
    }

    pub(crate) fn serving(connections: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let mut workers = Vec::with_capacity(connections);
            for _ in 0..connections {
                let (stream, _) = listener.accept()?;
                workers.push(std::thread::spawn(move || Connection::new(stream)?.serve()));
            }
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .collect()
        });

        Self { address, handle }
    }

    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig::new(self.address.ip().to_string()).port(self.address.port())
    }

    /// Waits for every client to hang up.
    pub(crate) fn finish_all(self) -> Vec<ServerLog> {
        self.handle.join().unwrap().unwrap()
    }

    /// Log of the last connection.
    pub(crate) fn finish(self) -> ServerLog {
        self.finish_all().pop().unwrap()
    }
}

pub(crate) fn connect(coordinator: &FakeCoordinator) -> Client {
    Client::connect(&coordinator.config()).unwrap()
}

#[derive(Clone, Debug)]
enum Value {
    Raw(Vec<u8>),
    Opaque(Vec<u8>),
    Array(Vec<Value>),
}

struct Connection {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    symbols: Vec<String>,
    store: HashMap<TaskId, Value>,
    log: ServerLog,
}

impl Connection {
    fn new(stream: TcpStream) -> anyhow::Result<Self> {
        Ok(Self {
            reader: FrameReader::new(stream.try_clone()?),
            writer: FrameWriter::new(stream),
            symbols: SYMBOLS.iter().map(ToString::to_string).collect(),
            store: HashMap::new(),
            log: ServerLog::default(),
        })
    }

    fn symbol(&self, name: &str) -> i32 {
        self.symbols.iter().position(|s| s == name).unwrap_or(usize::MAX) as i32
    }

    fn send_dictionary(&mut self) -> anyhow::Result<()> {
        let mut response = ClientResponse::new(client_response::Type::Dictionary);
        response.symbols = self.symbols.clone();
        Ok(self.writer.send_message(&response)?)
    }

    fn serve(mut self) -> anyhow::Result<ServerLog> {
        let register = protocol::Register::decode(self.reader.receive()?)?;
        if register.r#type != protocol::register::Type::RegisterClient as i32 {
            bail!("expected a client registration");
        }
        self.send_dictionary()?;

        loop {
            let frame = match self.reader.receive() {
                Ok(frame) => frame,
                Err(LoomError::ConnectionLost { .. }) => break,
                Err(err) => return Err(err.into()),
            };
            let request = ClientRequest::decode(frame)?;

            match self.handle(request) {
                Ok(true) => {}
                Ok(false) => break,
                // The client hung up before reading the answer.
                Err(err)
                    if matches!(
                        err.downcast_ref::<LoomError>(),
                        Some(LoomError::ConnectionLost { .. })
                    ) =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(self.log)
    }

    /// Answers one request; `false` ends the connection.
    fn handle(&mut self, request: ClientRequest) -> anyhow::Result<bool> {
        match client_request::Type::try_from(request.r#type)? {
            client_request::Type::Plan => {
                let plan = request.plan.context("PLAN without a plan")?;
                self.log.plans.push(plan.clone());
                self.run(plan)?;
            }
            client_request::Type::Fetch => {
                let id = request.id.context("FETCH without an id")?;
                self.log.fetched.push(id);
                self.fetch(id)?;
            }
            client_request::Type::Release => {
                let id = request.id.context("RELEASE without an id")?;
                self.log.released.push(id);
                self.store.remove(&id);
            }
            client_request::Type::Stats => {
                let mut response = ClientResponse::new(client_response::Type::Stats);
                response.stats = Some(protocol::Stats {
                    n_workers: Some(1),
                    n_data_objects: Some(self.store.len() as i32),
                });
                self.writer.send_message(&response)?;
            }
            client_request::Type::Trace => {
                self.log.trace = request.trace_path;
            }
            client_request::Type::Terminate => {
                self.log.terminated = true;
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn run(&mut self, plan: protocol::Plan) -> anyhow::Result<()> {
        let id_base = plan.id_base.context("plan without id base")?;
        let mut local: HashMap<TaskId, Value> = HashMap::new();

        for (offset, task) in plan.tasks.iter().enumerate() {
            let id = id_base + offset as TaskId;

            let inputs: Option<Vec<Value>> = task
                .input_ids
                .iter()
                .map(|input| local.get(input).or_else(|| self.store.get(input)).cloned())
                .collect();
            // Depends on a task that failed.
            let Some(inputs) = inputs else {
                continue;
            };

            let value = match self.evaluate(task, inputs) {
                Ok(value) => value,
                Err(message) => {
                    let mut response = ClientResponse::new(client_response::Type::TaskFailed);
                    response.error = Some(protocol::Error {
                        id,
                        worker: WORKER.into(),
                        error_msg: message,
                    });
                    self.writer.send_message(&response)?;
                    continue;
                }
            };

            if let Some(path) = &task.checkpoint_path {
                let temporary = format!("{path}.loom.tmp");
                if let Value::Raw(bytes) = &value {
                    std::fs::write(&temporary, bytes)?;
                    std::fs::rename(&temporary, path)?;
                }
            }

            if let Value::Raw(bytes) = &value
                && bytes == RESYNC.as_bytes()
            {
                self.symbols.push("loom/test/extra".into());
                self.send_dictionary()?;
            }

            if plan.result_ids.contains(&id) {
                if !matches!(&value, Value::Raw(bytes) if bytes == FORGET.as_bytes()) {
                    self.store.insert(id, value.clone());
                }
                let mut response = ClientResponse::new(client_response::Type::TaskFinished);
                response.id = Some(id);
                self.writer.send_message(&response)?;
            }

            local.insert(id, value);
        }

        Ok(())
    }

    fn evaluate(&self, task: &protocol::Task, inputs: Vec<Value>) -> Result<Value, String> {
        let name = self
            .symbols
            .get(task.task_type as usize)
            .ok_or_else(|| format!("unknown task type {}", task.task_type))?;

        match name.as_str() {
            tasks::DATA_CONST => Ok(Value::Raw(task.config.clone())),
            tasks::DATA_MERGE => {
                let mut out = Vec::new();
                for (i, input) in inputs.into_iter().enumerate() {
                    let Value::Raw(bytes) = input else {
                        return Err("merge of a non-data object".into());
                    };
                    if i > 0 {
                        out.extend_from_slice(&task.config);
                    }
                    out.extend_from_slice(&bytes);
                }
                Ok(Value::Raw(out))
            }
            tasks::ARRAY_MAKE => Ok(Value::Array(inputs)),
            OPAQUE => Ok(Value::Opaque(task.config.clone())),
            tasks::BASE_GET => {
                let index = u64::from_le_bytes(
                    task.config
                        .as_slice()
                        .try_into()
                        .map_err(|_| "malformed index".to_string())?,
                );
                match inputs.into_iter().next() {
                    Some(Value::Array(items)) => items
                        .into_iter()
                        .nth(index as usize)
                        .ok_or_else(|| format!("index {index} out of range")),
                    _ => Err("get of a non-array object".into()),
                }
            }
            tasks::BASE_SIZE => match inputs.first() {
                Some(Value::Raw(bytes)) => Ok(Value::Raw((bytes.len() as u64).to_le_bytes().to_vec())),
                _ => Err("size of a non-data object".into()),
            },
            tasks::RUN => Err("program exited with status 1".into()),
            other => Err(format!("task type '{other}' is not supported")),
        }
    }

    fn fetch(&mut self, id: TaskId) -> anyhow::Result<()> {
        let Some(value) = self.store.get(&id).cloned() else {
            let mut response = ClientResponse::new(client_response::Type::Error);
            response.error = Some(protocol::Error {
                id,
                worker: String::new(),
                error_msg: format!("no data for id={id}"),
            });
            return Ok(self.writer.send_message(&response)?);
        };

        let mut blocks = Vec::new();
        self.encode(&value, &mut blocks);

        let mut response = ClientResponse::new(client_response::Type::Data);
        response.data = Some(protocol::DataHeader {
            id,
            n_messages: blocks.len() as i64,
            type_id: self.type_id(&value),
        });
        self.writer.send_message(&response)?;

        for block in &blocks {
            self.writer.send(block)?;
        }
        Ok(())
    }

    fn type_id(&self, value: &Value) -> i32 {
        match value {
            Value::Raw(_) => self.symbol("loom/data"),
            Value::Opaque(_) => self.symbol("loom/pyobj"),
            Value::Array(_) => self.symbol("loom/array"),
        }
    }

    /// One frame per value; an array adds a frame of item type ids in front
    /// of its items.
    fn encode(&self, value: &Value, out: &mut Vec<Vec<u8>>) {
        match value {
            Value::Raw(bytes) | Value::Opaque(bytes) => out.push(bytes.clone()),
            Value::Array(items) => {
                let mut types = Vec::with_capacity(4 * items.len());
                for item in items {
                    types.put_u32_le(self.type_id(item) as u32);
                }
                out.push(types);
                for item in items {
                    self.encode(item, out);
                }
            }
        }
    }
}
