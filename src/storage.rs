use std::sync::Arc;

use log::{error, warn};

use crate::token::RedisToken;
use crate::types::{CacheResult, Capabilities, StorageConfig, StorageKind};

/// Factory for redis backed cache storage.
///
/// A storage instance holds the resolved configuration and mints
/// session [`RedisToken`]s on demand; it does not connect anywhere
/// itself.  The backing server is addressed with a `HOST:PORT` argument
/// string.
pub struct RedisStorage {
    name: String,
    config: StorageConfig,
    host: String,
    port: u16,
    ttl_ms: u64,
}

impl RedisStorage {
    /// Reports the storage kind and capabilities of this implementation.
    pub fn initialize() -> (StorageKind, Capabilities) {
        (
            StorageKind::Shared,
            Capabilities::ST | Capabilities::MT | Capabilities::INVALIDATION,
        )
    }

    /// Creates a storage instance.
    ///
    /// `arguments` must be of `HOST:PORT` format with a non-zero decimal
    /// port.  Malformed arguments are rejected with `None` and an error
    /// log.  Configuration fields this storage cannot honor are warned
    /// about exactly once, here.
    pub fn create(name: &str, config: &StorageConfig, arguments: &str) -> Option<RedisStorage> {
        if config.max_size != 0 {
            warn!(
                "the redis storage does not support specifying a maximum size \
                 of the cache, the value is ignored"
            );
        }

        if config.max_count != 0 {
            warn!(
                "the redis storage does not support specifying a maximum number \
                 of cached items, the value is ignored"
            );
        }

        let fields: Vec<&str> = arguments.split(':').collect();

        if fields.len() != 2 {
            error!(
                "the redis storage expects an argument of HOST:PORT format, \
                 got '{arguments}'"
            );
            return None;
        }

        let port = match fields[1].parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                error!(
                    "the provided argument '{arguments}' does not translate into \
                     a valid host and port combination"
                );
                return None;
            }
        };

        if config.soft_ttl_ms != config.hard_ttl_ms {
            warn!(
                "the redis storage does not distinguish between a soft ({} ms) \
                 and a hard ttl ({} ms), the hard ttl is used",
                config.soft_ttl_ms, config.hard_ttl_ms
            );
        }

        Some(RedisStorage {
            name: name.to_string(),
            config: *config,
            host: fields[0].to_string(),
            port,
            ttl_ms: config.hard_ttl_ms,
        })
    }

    /// The name the storage was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configuration the storage was created with.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Opens a connection to the backing store and wraps it in a new
    /// session token bound to the calling worker.  Returns `None` and
    /// logs a diagnostic if the server is not reachable or the caller
    /// is not running on a worker.
    pub fn create_token(&self) -> Option<Arc<RedisToken>> {
        match RedisToken::create(&self.host, self.port, self.ttl_ms) {
            Ok(token) => Some(token),
            Err(e) => {
                error!(
                    "could not create a cache session handle for {}:{}: {e}",
                    self.host, self.port
                );
                None
            }
        }
    }

    /// Clearing the whole cache is delegated to the backing store and
    /// not supported through this interface.
    pub fn clear(&self) -> CacheResult {
        CacheResult::Error
    }

    /// The total size is not tracked on the client side.
    pub fn get_size(&self) -> CacheResult {
        CacheResult::Error
    }

    /// The item count is not tracked on the client side.
    pub fn get_items(&self) -> CacheResult {
        CacheResult::Error
    }

    /// Eviction order is owned by the backing store; there is no head.
    pub fn get_head(&self) -> CacheResult {
        CacheResult::Error
    }

    /// Eviction order is owned by the backing store; there is no tail.
    pub fn get_tail(&self) -> CacheResult {
        CacheResult::Error
    }

    /// Runtime information is not available for a remote store.
    pub fn get_info(&self) -> CacheResult {
        CacheResult::Error
    }

    /// The effective expiry applied to stored values, in milliseconds.
    /// Zero means values do not expire.
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }
}
