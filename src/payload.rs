use bytes::Bytes;

/// A data object downloaded from the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Plain bytes (`loom/data`).
    Raw(Bytes),
    /// Ordered sequence of nested objects (`loom/array`).
    Array(Vec<Payload>),
    /// Serialized foreign object (`loom/pyobj`), left for the caller to decode.
    Opaque(Bytes),
}

/// The payload shapes the receive loop knows how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Raw,
    Array,
    Opaque,
}

impl PayloadKind {
    pub(crate) const ALL: [PayloadKind; 3] =
        [PayloadKind::Raw, PayloadKind::Array, PayloadKind::Opaque];

    /// Name of the builtin symbol that marks this payload shape.
    pub fn symbol(self) -> &'static str {
        match self {
            PayloadKind::Raw => "loom/data",
            PayloadKind::Array => "loom/array",
            PayloadKind::Opaque => "loom/pyobj",
        }
    }
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Raw(_) => PayloadKind::Raw,
            Payload::Array(_) => PayloadKind::Array,
            Payload::Opaque(_) => PayloadKind::Opaque,
        }
    }

    /// Bytes of a raw or opaque object.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Raw(bytes) | Payload::Opaque(bytes) => Some(bytes),
            Payload::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Payload]> {
        match self {
            Payload::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Payload::Raw(bytes) | Payload::Opaque(bytes) => Some(bytes),
            Payload::Array(_) => None,
        }
    }
}

impl From<&'static [u8]> for Payload {
    fn from(value: &'static [u8]) -> Self {
        Payload::Raw(Bytes::from_static(value))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Raw(Bytes::from(value))
    }
}

impl PartialEq<[u8]> for Payload {
    fn eq(&self, other: &[u8]) -> bool {
        matches!(self, Payload::Raw(bytes) if bytes.as_ref() == other)
    }
}

impl<const N: usize> PartialEq<&[u8; N]> for Payload {
    fn eq(&self, other: &&[u8; N]) -> bool {
        *self == other[..]
    }
}
