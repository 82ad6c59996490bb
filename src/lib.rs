//! redcache is a shared, invalidatable query-result cache backed by a
//! redis server.
//!
//! The cache is built for hosts that run sessions on worker event-loop
//! threads: a [`RedisStorage`] factory is configured once, every session
//! obtains its own [`RedisToken`], and the four cache operations
//! (`get_value`, `put_value`, `del_value`, `invalidate`) return
//! [`CacheResult::Pending`] immediately while the remote I/O runs on a
//! background thread pool.  The completion callback is always delivered
//! on the worker the token was created on.
//!
//! Values are stored under opaque fingerprint keys.  A put may also name
//! any number of invalidation words, typically the tables the result
//! depends on; the key is then indexed under every word, and
//! invalidating a word erases every value indexed under it.
//!
//! # Basic operation
//!
//! ```rust,no_run
//! use redcache::{CacheKey, CacheValue, InvalidationWord, RedisStorage, StorageConfig, Worker};
//!
//! let config = StorageConfig {
//!     hard_ttl_ms: 20_000,
//!     soft_ttl_ms: 20_000,
//!     ..StorageConfig::default()
//! };
//! let storage = RedisStorage::create("query-cache", &config, "127.0.0.1:6379").unwrap();
//!
//! // Sessions live on workers; tokens are bound to the worker that
//! // creates them.
//! let worker = Worker::spawn("session-worker").unwrap();
//! worker.handle().post(move || {
//!     let token = storage.create_token().unwrap();
//!
//!     let key = CacheKey::from("normalized-query-digest");
//!     let word = InvalidationWord::new("t1").unwrap();
//!     let value = CacheValue::from(&b"resultset bytes"[..]);
//!
//!     token.put_value(&key, &[word], &value, |result| {
//!         // Runs on this worker once the transaction has committed.
//!         println!("stored: {result:?}");
//!     });
//! });
//! ```
//!
//! # Consistency
//!
//! The backing store is authoritative: expiry is enforced with the
//! server-side TTL and nothing is evicted locally.  Invalidation gathers
//! the affected keys and deletes them in a second, transactional step;
//! a concurrent put can slip between the two (see
//! [`RedisToken::invalidate`]).

#![deny(non_camel_case_types)]
#![warn(missing_docs)]

mod macros;

mod cmd;
mod connection;
mod errors;
mod parser;
mod storage;
mod token;
mod types;
mod worker;

pub use crate::cmd::{cmd, Cmd, ToArg};
pub use crate::connection::Connection;
pub use crate::errors::{ErrorKind, RedisError, RedisResult};
pub use crate::parser::{parse_reply, Parser};
pub use crate::storage::RedisStorage;
pub use crate::token::RedisToken;
pub use crate::types::{
    CacheKey, CacheResult, CacheValue, Capabilities, InvalidationWord, Reply, StorageConfig,
    StorageKind, MAX_VALUE_SIZE,
};
pub use crate::worker::{thread_pool, ThreadPool, Worker, WorkerHandle};
