use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, warn};

use crate::cmd::cmd;
use crate::connection::Connection;
use crate::errors::{ErrorKind, RedisResult};
use crate::types::{
    CacheKey, CacheResult, CacheValue, InvalidationWord, Reply, MAX_VALUE_SIZE,
};
use crate::worker::{thread_pool, Worker, WorkerHandle};

/// A per-session cache handle.
///
/// A token owns one connection to the backing store and is pinned to the
/// worker it was created on: every callback passed to one of its
/// operations runs on that worker.  Each operation returns
/// [`CacheResult::Pending`] immediately and performs the remote I/O on
/// the shared thread pool.
///
/// Tokens are shared between the owning session and any in-flight pool
/// job.  If the session drops its references while a job is still
/// running, the completion callback is suppressed and any fetched value
/// is released on the worker instead.  A callback may still fire if the
/// last external reference goes away after delivery has been committed;
/// teardown and delivery race by design.
pub struct RedisToken {
    redis: Mutex<Connection>,
    worker: WorkerHandle,
    ttl_ms: u64,
}

impl RedisToken {
    /// Connects to the backing store and binds the token to the calling
    /// worker.  Must be invoked on a worker event loop.
    pub(crate) fn create(host: &str, port: u16, ttl_ms: u64) -> RedisResult<Arc<RedisToken>> {
        let worker = match Worker::current() {
            Some(worker) => worker,
            None => fail!((
                ErrorKind::InvalidClientConfig,
                "cache tokens must be created on a worker thread"
            )),
        };

        let redis = Connection::connect(host, port)?;

        Ok(Arc::new(RedisToken {
            redis: Mutex::new(redis),
            worker,
            ttl_ms,
        }))
    }

    fn redis(&self) -> MutexGuard<'_, Connection> {
        // Uncontended: at most one pool job per token is in flight, and
        // the job is the connection's only user.
        self.redis.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetches the value stored under `key`.
    ///
    /// The callback receives `Ok` together with a fresh value buffer on
    /// a hit, `NotFound` on a miss and `Error` on any failure.  The
    /// `flags` and per-call TTL arguments are accepted for interface
    /// compatibility; the storage TTL decided at construction applies.
    pub fn get_value<F>(
        self: &Arc<Self>,
        key: &CacheKey,
        _flags: u32,
        _soft_ttl_ms: u32,
        _hard_ttl_ms: u32,
        cb: F,
    ) -> CacheResult
    where
        F: FnOnce(CacheResult, Option<CacheValue>) + Send + 'static,
    {
        let rkey = key.to_vec();
        let this = Arc::clone(self);

        thread_pool().execute(move || {
            let result = this.redis().command(cmd("GET").arg(&rkey));

            let (rv, value) = match result {
                Ok(Reply::Data(data)) => (CacheResult::Ok, Some(CacheValue::from(data))),
                Ok(Reply::Nil) => (CacheResult::NotFound, None),
                Ok(Reply::Error(message)) => {
                    error!("fetching a cached value failed: {message}");
                    (CacheResult::Error, None)
                }
                Ok(other) => {
                    warn!(
                        "unexpected {} reply received when fetching a cached value",
                        other.type_str()
                    );
                    (CacheResult::Error, None)
                }
                Err(e) => {
                    error!("failed fatally when fetching a cached value: {e}");
                    (CacheResult::Error, None)
                }
            };

            let worker = this.worker.clone();
            worker.post(move || {
                if Arc::strong_count(&this) > 1 {
                    // The session is still alive.
                    cb(rv, value);
                }
                // Dropping here releases the value buffer on the worker.
            });
        });

        CacheResult::Pending
    }

    /// Stores `value` under `key` and indexes the key under every
    /// invalidation word, all within one server-side transaction.
    ///
    /// The value buffer is cloned before the background work starts and
    /// the clone is released on the creating worker after delivery.  The
    /// callback receives `Ok` or `Error`; a put never reports
    /// `NotFound`.
    pub fn put_value<F>(
        self: &Arc<Self>,
        key: &CacheKey,
        invalidation_words: &[InvalidationWord],
        value: &CacheValue,
        cb: F,
    ) -> CacheResult
    where
        F: FnOnce(CacheResult) + Send + 'static,
    {
        if value.len() > MAX_VALUE_SIZE {
            error!(
                "cannot cache a value of {} bytes, the limit is {} bytes",
                value.len(),
                MAX_VALUE_SIZE
            );
            return CacheResult::Error;
        }

        let rkey = key.to_vec();
        let words: Vec<Vec<u8>> = invalidation_words
            .iter()
            .map(|w| w.as_bytes().to_vec())
            .collect();
        let value = value.clone();
        let this = Arc::clone(self);

        thread_pool().execute(move || {
            let rv = this.store_value(&rkey, &words, &value);

            let worker = this.worker.clone();
            worker.post(move || {
                // The clone taken above is released here, on the worker
                // that issued the put.
                drop(value);

                if Arc::strong_count(&this) > 1 {
                    cb(rv);
                }
            });
        });

        CacheResult::Pending
    }

    fn store_value(&self, rkey: &[u8], words: &[Vec<u8>], value: &CacheValue) -> CacheResult {
        let mut redis = self.redis();

        redis.append(&cmd("MULTI"));

        // The key identifying the value is recorded in one hash per
        // invalidation word, so that invalidating a word finds every
        // key stored under it.  The field payload is a placeholder.
        for word in words {
            redis.append(cmd("HSET").arg(word).arg(rkey).arg("1"));
        }

        // Then the actual value.
        let mut set = cmd("SET");
        set.arg(rkey).arg(value.as_bytes());
        if self.ttl_ms != 0 {
            set.arg("PX").arg(self.ttl_ms);
        }
        redis.append(&set);

        // Commits the transaction; everything is written out when the
        // first reply is requested.
        redis.append(&cmd("EXEC"));

        if !redis.expect_status("OK", "MULTI") {
            return CacheResult::Error;
        }

        // Every command queued between MULTI and EXEC answers QUEUED.
        // Mismatches are logged but the EXEC reply is still read.
        redis.expect_n_status(words.len() + 1, "QUEUED", "queued command");

        match redis.get_reply() {
            Ok(Reply::Bulk(elements)) => {
                if elements.len() != words.len() + 1 {
                    error!(
                        "EXEC reply has {} elements, expected {}",
                        elements.len(),
                        words.len() + 1
                    );
                    return CacheResult::Error;
                }

                // Elements before the last answer the HSET commands and
                // carry uninteresting counts.  The last answers the SET.
                match &elements[words.len()] {
                    Reply::Status(status) if status == "OK" => CacheResult::Ok,
                    Reply::Status(status) => {
                        error!(
                            "failed when storing a cache value, expected 'OK' \
                             but received '{status}'"
                        );
                        CacheResult::Error
                    }
                    other => {
                        error!(
                            "failed when storing a cache value, expected a status \
                             but received a {}",
                            other.type_str()
                        );
                        CacheResult::Error
                    }
                }
            }
            Ok(other) => {
                error!(
                    "EXEC replied with a {}, expected an array",
                    other.type_str()
                );
                CacheResult::Error
            }
            Err(e) => {
                warn!("failed fatally when reading the reply to EXEC: {e}");
                CacheResult::Error
            }
        }
    }

    /// Deletes the value stored under `key`.
    ///
    /// The callback receives `Ok` if a value was deleted, `NotFound` if
    /// nothing was stored under the key and `Error` on failure.
    pub fn del_value<F>(self: &Arc<Self>, key: &CacheKey, cb: F) -> CacheResult
    where
        F: FnOnce(CacheResult) + Send + 'static,
    {
        let rkey = key.to_vec();
        let this = Arc::clone(self);

        thread_pool().execute(move || {
            let result = this.redis().command(cmd("DEL").arg(&rkey));

            let rv = match result {
                Ok(Reply::Int(0)) => CacheResult::NotFound,
                Ok(Reply::Int(n)) => {
                    if n != 1 {
                        warn!("unexpected number of values ({n}) deleted with one key");
                    }
                    CacheResult::Ok
                }
                Ok(Reply::Error(message)) => {
                    error!("deleting a cached value failed: {message}");
                    CacheResult::Error
                }
                Ok(other) => {
                    warn!(
                        "unexpected {} reply received when deleting a cached value",
                        other.type_str()
                    );
                    CacheResult::Error
                }
                Err(e) => {
                    error!("failed fatally when deleting a cached value: {e}");
                    CacheResult::Error
                }
            };

            let worker = this.worker.clone();
            worker.post(move || {
                if Arc::strong_count(&this) > 1 {
                    cb(rv);
                }
            });
        });

        CacheResult::Pending
    }

    /// Erases every value indexed under any of the given words, together
    /// with the index entries themselves.
    ///
    /// The keys are first gathered with one pipelined `HGETALL` per word
    /// and then deleted in a single transaction.  A put that lands
    /// between the gather and the delete can leave an orphan index entry
    /// or a surviving value; closing that window needs WATCH on the hash
    /// keys and a retry of the delete.
    pub fn invalidate<F>(self: &Arc<Self>, words: &[InvalidationWord], cb: F) -> CacheResult
    where
        F: FnOnce(CacheResult) + Send + 'static,
    {
        let words: Vec<Vec<u8>> = words.iter().map(|w| w.as_bytes().to_vec()).collect();
        let this = Arc::clone(self);

        thread_pool().execute(move || {
            let rv = this.erase_words(&words);

            let worker = this.worker.clone();
            worker.post(move || {
                if Arc::strong_count(&this) > 1 {
                    cb(rv);
                }
            });
        });

        CacheResult::Pending
    }

    fn erase_words(&self, words: &[Vec<u8>]) -> CacheResult {
        let mut redis = self.redis();

        // For each invalidation word, fetch all keys stored under it.
        for word in words {
            redis.append(cmd("HGETALL").arg(word));
        }

        let mut word_keys: Vec<Vec<Vec<u8>>> = Vec::with_capacity(words.len());
        let mut all_keys: Vec<Vec<u8>> = Vec::new();

        for word in words {
            let mut keys = Vec::new();

            match redis.get_reply() {
                Ok(Reply::Bulk(fields)) => {
                    // Field and value interleaved; only the fields, the
                    // cache keys, matter.
                    for pair in fields.chunks(2) {
                        match &pair[0] {
                            Reply::Data(key) => {
                                keys.push(key.clone());
                                all_keys.push(key.clone());
                            }
                            other => {
                                error!(
                                    "unexpected {} field in the key index of '{}'",
                                    other.type_str(),
                                    String::from_utf8_lossy(word)
                                );
                            }
                        }
                    }
                }
                Ok(other) => {
                    warn!(
                        "unexpected {} reply received for the key index of '{}'",
                        other.type_str(),
                        String::from_utf8_lossy(word)
                    );
                }
                Err(e) => {
                    error!(
                        "could not read the key index of '{}': {e}",
                        String::from_utf8_lossy(word)
                    );
                }
            }

            word_keys.push(keys);
        }

        if all_keys.is_empty() {
            return CacheResult::Ok;
        }

        redis.append(&cmd("MULTI"));
        let mut queued = 0;

        // Drop the keys of each word from its index hash.
        for (word, keys) in words.iter().zip(&word_keys) {
            if keys.is_empty() {
                continue;
            }

            let mut hdel = cmd("HDEL");
            hdel.arg(word);
            for key in keys {
                hdel.arg(key);
            }
            redis.append(&hdel);
            queued += 1;
        }

        // And all values with one DEL.
        let mut del = cmd("DEL");
        for key in &all_keys {
            del.arg(key);
        }
        redis.append(&del);
        queued += 1;

        redis.append(&cmd("EXEC"));

        if !redis.expect_status("OK", "MULTI") {
            error!("could not read the MULTI reply, the cache is now in an unknown state");
            return CacheResult::Error;
        }

        redis.expect_n_status(queued, "QUEUED", "queued command");

        match redis.get_reply() {
            Ok(Reply::Bulk(elements)) => {
                // The elements are deletion counts and carry no decision.
                if elements.len() != queued {
                    warn!(
                        "EXEC reply has {} elements, expected {}",
                        elements.len(),
                        queued
                    );
                }
                CacheResult::Ok
            }
            Ok(other) => {
                warn!(
                    "EXEC replied with a {}, expected an array",
                    other.type_str()
                );
                CacheResult::Ok
            }
            Err(e) => {
                error!("could not read the EXEC reply, the cache is now in an unknown state: {e}");
                CacheResult::Error
            }
        }
    }
}
