use std::fmt;
use std::str::from_utf8;

use bytes::Bytes;

use crate::errors::{ErrorKind, RedisResult};

/// Largest value accepted by [`crate::RedisToken::put_value`], in bytes.
pub const MAX_VALUE_SIZE: usize = i32::MAX as usize;

/// A single decoded reply from the backing store.
///
/// An array reply owns its elements; they are only handed out by
/// reference and cannot outlive the array they belong to.
#[derive(PartialEq, Eq, Clone)]
pub enum Reply {
    /// A nil response from the server.
    Nil,
    /// An integer response.
    Int(i64),
    /// Arbitrary binary data.
    Data(Vec<u8>),
    /// A bulk response of more replies, used by the server to express
    /// nested structures and transaction results.
    Bulk(Vec<Reply>),
    /// A status line such as `OK` or `QUEUED`.
    Status(String),
    /// An error reply.  The message is kept verbatim.
    Error(String),
}

impl Reply {
    /// The wire-level name of the reply type, for diagnostics.
    pub fn type_str(&self) -> &'static str {
        match *self {
            Reply::Nil => "NIL",
            Reply::Int(_) => "INTEGER",
            Reply::Data(_) => "STRING",
            Reply::Bulk(_) => "ARRAY",
            Reply::Status(_) => "STATUS",
            Reply::Error(_) => "ERROR",
        }
    }

    /// Returns true if this is a status reply carrying exactly `expected`.
    pub fn is_status(&self, expected: &str) -> bool {
        matches!(*self, Reply::Status(ref s) if s == expected)
    }

    /// Returns the payload if this is a data reply.
    pub fn as_data(&self) -> Option<&[u8]> {
        match *self {
            Reply::Data(ref data) => Some(&data[..]),
            _ => None,
        }
    }

    /// Returns the elements if this is an array reply.
    pub fn as_bulk(&self) -> Option<&[Reply]> {
        match *self {
            Reply::Bulk(ref elements) => Some(&elements[..]),
            _ => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reply::Nil => write!(fmt, "nil"),
            Reply::Int(val) => write!(fmt, "int({val:?})"),
            Reply::Data(ref val) => match from_utf8(val) {
                Ok(x) => write!(fmt, "data({x:?})"),
                Err(_) => write!(fmt, "binary-data({val:?})"),
            },
            Reply::Bulk(ref values) => {
                write!(fmt, "bulk(")?;
                let mut is_first = true;
                for val in values.iter() {
                    if !is_first {
                        write!(fmt, ", ")?;
                    }
                    write!(fmt, "{val:?}")?;
                    is_first = false;
                }
                write!(fmt, ")")
            }
            Reply::Status(ref s) => write!(fmt, "status({s:?})"),
            Reply::Error(ref s) => write!(fmt, "error({s:?})"),
        }
    }
}

/// Result codes exposed to cache callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// The operation succeeded.
    Ok,
    /// The key was not present in the store.
    NotFound,
    /// The operation failed; details are in the log.
    Error,
    /// The operation was accepted and will complete through its callback.
    /// This value is only ever returned synchronously, never delivered
    /// to a callback.
    Pending,
}

/// What kind of storage an implementation provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Each session sees its own private cache content.
    Private,
    /// All sessions share the cache content.
    Shared,
}

/// Capability flags reported by a storage implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Capabilities = Capabilities(0);
    /// Usable from a single-threaded router.
    pub const ST: Capabilities = Capabilities(1 << 0);
    /// Usable from a multi-threaded router.
    pub const MT: Capabilities = Capabilities(1 << 1);
    /// Evicts least recently used entries itself.
    pub const LRU: Capabilities = Capabilities(1 << 2);
    /// Enforces a maximum item count.
    pub const MAX_COUNT: Capabilities = Capabilities(1 << 3);
    /// Enforces a maximum total size.
    pub const MAX_SIZE: Capabilities = Capabilities(1 << 4);
    /// Supports invalidation by logical entity.
    pub const INVALIDATION: Capabilities = Capabilities(1 << 5);

    /// Returns true if every capability in `other` is present.
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

/// An opaque fingerprint identifying one cacheable unit.
///
/// The key is produced upstream, typically from a normalized query and a
/// context digest.  The cache only relies on byte-exact equality and on
/// [`CacheKey::to_vec`] for the wire representation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    /// Creates a key from raw bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> CacheKey {
        CacheKey(data.into())
    }

    /// The stable byte serialization used as the backing-store key.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }

    /// The key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for CacheKey {
    fn from(data: &[u8]) -> CacheKey {
        CacheKey(data.to_vec())
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(data: Vec<u8>) -> CacheKey {
        CacheKey(data)
    }
}

impl From<&str> for CacheKey {
    fn from(data: &str) -> CacheKey {
        CacheKey(data.as_bytes().to_vec())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match from_utf8(&self.0) {
            Ok(s) => write!(fmt, "CacheKey({s:?})"),
            Err(_) => write!(fmt, "CacheKey({:?})", self.0),
        }
    }
}

/// An opaque value buffer with shared ownership.
///
/// Cloning is a reference count bump, which is what allows the cache to
/// take a clone before asynchronous work begins and release it on the
/// creating worker without copying the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheValue(Bytes);

impl CacheValue {
    /// Creates a value from a byte buffer.
    pub fn new(data: impl Into<Bytes>) -> CacheValue {
        CacheValue(data.into())
    }

    /// The value bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the value in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the value, returning the underlying shared buffer.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<&[u8]> for CacheValue {
    fn from(data: &[u8]) -> CacheValue {
        CacheValue(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(data: Vec<u8>) -> CacheValue {
        CacheValue(Bytes::from(data))
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "CacheValue({} bytes)", self.0.len())
    }
}

/// A short byte string naming a logical entity, typically a table, to
/// which a cached unit is sensitive.  Words must not be empty.
#[derive(Clone, PartialEq, Eq)]
pub struct InvalidationWord(Vec<u8>);

impl InvalidationWord {
    /// Creates an invalidation word.  Empty words are rejected.
    pub fn new(word: impl Into<Vec<u8>>) -> RedisResult<InvalidationWord> {
        let word = word.into();
        if word.is_empty() {
            fail!((
                ErrorKind::InvalidClientConfig,
                "invalidation words must not be empty"
            ));
        }
        Ok(InvalidationWord(word))
    }

    /// The word bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for InvalidationWord {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match from_utf8(&self.0) {
            Ok(s) => write!(fmt, "InvalidationWord({s:?})"),
            Err(_) => write!(fmt, "InvalidationWord({:?})", self.0),
        }
    }
}

/// Storage configuration supplied by the cache filter.
///
/// A redis backed storage only honors the hard TTL; the remaining fields
/// are accepted for interface compatibility and warned about when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageConfig {
    /// Time budget after which a value may be refreshed, in milliseconds.
    pub soft_ttl_ms: u64,
    /// Time budget after which a value must not be used, in milliseconds.
    /// Zero means no expiry.
    pub hard_ttl_ms: u64,
    /// Maximum total size of the cache, in bytes.  Unsupported.
    pub max_size: u64,
    /// Maximum number of cached items.  Unsupported.
    pub max_count: u64,
}
