//! Wire schema shared with the coordinator.
//!
//! The coordinator parses these with a proto2 decoder, so every `required`
//! field is always encoded and repeated scalars are sent unpacked.

pub const PROTOCOL_VERSION: i32 = 2;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(int32, required, tag = "1")]
    pub protocol_version: i32,
    #[prost(enumeration = "register::Type", required, tag = "2")]
    pub r#type: i32,
}

pub mod register {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        RegisterWorker = 1,
        RegisterClient = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(int32, required, tag = "1")]
    pub resource_type: i32,
    #[prost(int32, required, tag = "2")]
    pub value: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceRequest {
    #[prost(message, repeated, tag = "1")]
    pub resources: Vec<Resource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Task {
    #[prost(int32, required, tag = "1")]
    pub task_type: i32,
    #[prost(bytes = "vec", required, tag = "2")]
    pub config: Vec<u8>,
    #[prost(int32, repeated, packed = "false", tag = "3")]
    pub input_ids: Vec<i32>,
    #[prost(enumeration = "task::Policy", optional, tag = "4")]
    pub policy: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub resource_request_index: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub label: Option<String>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub metadata: Option<Vec<u8>>,
    #[prost(string, optional, tag = "8")]
    pub checkpoint_path: Option<String>,
}

pub mod task {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Policy {
        Standard = 1,
        Simple = 2,
        Scheduler = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Plan {
    #[prost(message, repeated, tag = "2")]
    pub tasks: Vec<Task>,
    /// Tasks the client holds futures for; only these get finish notices.
    #[prost(int32, repeated, packed = "false", tag = "3")]
    pub result_ids: Vec<i32>,
    #[prost(message, repeated, tag = "4")]
    pub resource_requests: Vec<ResourceRequest>,
    #[prost(int32, optional, tag = "5")]
    pub id_base: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientRequest {
    #[prost(enumeration = "client_request::Type", required, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub plan: Option<Plan>,
    #[prost(string, optional, tag = "6")]
    pub trace_path: Option<String>,
    #[prost(int32, optional, tag = "7")]
    pub id: Option<i32>,
}

pub mod client_request {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Plan = 1,
        Stats = 2,
        Trace = 3,
        Fetch = 4,
        Release = 5,
        Terminate = 10,
    }
}

impl ClientRequest {
    pub fn new(kind: client_request::Type) -> Self {
        Self {
            r#type: kind as i32,
            plan: None,
            trace_path: None,
            id: None,
        }
    }

    pub fn with_id(kind: client_request::Type, id: i32) -> Self {
        Self {
            id: Some(id),
            ..Self::new(kind)
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DataHeader {
    #[prost(int32, required, tag = "1")]
    pub id: i32,
    /// Frames that follow this header.
    #[prost(int64, required, tag = "2")]
    pub n_messages: i64,
    #[prost(int32, required, tag = "3")]
    pub type_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(int32, required, tag = "1")]
    pub id: i32,
    #[prost(string, required, tag = "2")]
    pub worker: String,
    #[prost(string, required, tag = "3")]
    pub error_msg: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stats {
    #[prost(int32, optional, tag = "1")]
    pub n_workers: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub n_data_objects: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(uint64, required, tag = "1")]
    pub time: u64,
    #[prost(enumeration = "event::Type", required, tag = "2")]
    pub r#type: i32,
    #[prost(int32, required, tag = "3")]
    pub id: i32,
    #[prost(int32, optional, tag = "4")]
    pub worker_id: Option<i32>,
    #[prost(uint64, optional, tag = "5")]
    pub size: Option<u64>,
    #[prost(int32, optional, tag = "6")]
    pub target_worker_id: Option<i32>,
}

pub mod event {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        TaskStart = 1,
        TaskEnd = 2,
        SendStart = 3,
        SendEnd = 4,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientResponse {
    #[prost(enumeration = "client_response::Type", required, tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub data: Option<DataHeader>,
    #[prost(message, optional, tag = "4")]
    pub error: Option<Error>,
    #[prost(string, repeated, tag = "5")]
    pub symbols: Vec<String>,
    #[prost(message, optional, tag = "6")]
    pub stats: Option<Stats>,
    #[prost(int32, optional, tag = "7")]
    pub id: Option<i32>,
}

pub mod client_response {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        Data = 1,
        Event = 2,
        Error = 3,
        Dictionary = 4,
        Stats = 5,
        TaskFinished = 6,
        TaskFailed = 7,
    }
}

impl ClientResponse {
    pub fn new(kind: client_response::Type) -> Self {
        Self {
            r#type: kind as i32,
            data: None,
            error: None,
            symbols: Vec::new(),
            stats: None,
            id: None,
        }
    }
}

/// Config of `loom/run/run` tasks.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Run {
    #[prost(string, repeated, tag = "1")]
    pub args: Vec<String>,
    #[prost(string, repeated, tag = "2")]
    pub map_inputs: Vec<String>,
    #[prost(string, repeated, tag = "3")]
    pub map_outputs: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Report {
    #[prost(string, repeated, tag = "1")]
    pub symbols: Vec<String>,
    #[prost(message, required, tag = "2")]
    pub plan: Plan,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<Event>,
}
