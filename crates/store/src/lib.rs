use std::time::Duration;

use enricher_contracts::pointer::{self, PointerError};
use serde::Serialize;
use serde::de::DeserializeOwned;

mod memory;
mod redis_backend;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

const CONTEXT_PREFIX: &str = "ctx:";
const RESULT_PREFIX: &str = "res:";

pub const MEMORY_SCHEME: &str = "memory";
pub const REDIS_SCHEME: &str = "redis";

#[derive(Debug)]
pub enum StoreError {
    Connection(String),
    InvalidArgument(&'static str),
    NotFound,
    Timeout,
    Backend(String),
    Pointer(PointerError),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Connection(message) => write!(f, "store connection failed: {}", message),
            StoreError::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
            StoreError::NotFound => write!(f, "key not found"),
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Backend(message) => write!(f, "store backend error: {}", message),
            StoreError::Pointer(err) => write!(f, "invalid pointer: {}", err),
            StoreError::Encode(err) => write!(f, "failed to encode value: {}", err),
            StoreError::Decode(err) => write!(f, "failed to decode stored value: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PointerError> for StoreError {
    fn from(value: PointerError) -> Self {
        StoreError::Pointer(value)
    }
}

#[derive(Clone)]
enum Backend {
    Redis(RedisBackend),
    Memory(MemoryBackend),
}

/// TTL-bounded key/value storage addressed by `<scheme>://<key>` pointers.
#[derive(Clone)]
pub struct Store {
    backend: Backend,
    default_ttl: Option<Duration>,
    op_timeout: Duration,
}

impl Store {
    /// Accepts `redis://` URLs, a bare `host:port` (redis), or `memory://`
    /// for an in-process backend. TLS (`rediss://`) is not built in and is
    /// refused up front.
    pub async fn connect(
        address: &str,
        default_ttl: Option<Duration>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(StoreError::Connection("store url is required".to_string()));
        }

        if address.starts_with("rediss://") {
            return Err(StoreError::Connection(
                "rediss:// is not supported; reach TLS redis through a local tunnel".to_string(),
            ));
        }

        let backend = if address == MEMORY_SCHEME || address.starts_with("memory://") {
            Backend::Memory(MemoryBackend::new())
        } else {
            let url = if address.contains("://") {
                address.to_string()
            } else {
                format!("redis://{}", address)
            };
            Backend::Redis(RedisBackend::connect(&url, Duration::from_secs(2)).await?)
        };

        Ok(Self {
            backend,
            default_ttl: default_ttl.filter(|ttl| !ttl.is_zero()),
            op_timeout,
        })
    }

    pub fn in_memory(default_ttl: Option<Duration>) -> Self {
        Self {
            backend: Backend::Memory(MemoryBackend::new()),
            default_ttl: default_ttl.filter(|ttl| !ttl.is_zero()),
            op_timeout: Duration::from_secs(2),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match &self.backend {
            Backend::Redis(_) => REDIS_SCHEME,
            Backend::Memory(_) => MEMORY_SCHEME,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let fut = async {
            match &self.backend {
                Backend::Redis(redis) => redis.get(key).await,
                Backend::Memory(memory) => memory.get(key).await,
            }
        };
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// `None` or a zero TTL stores the value without expiry.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        let fut = async {
            match &self.backend {
                Backend::Redis(redis) => redis.set(key, value, ttl).await,
                Backend::Memory(memory) => {
                    memory.set(key, value, ttl).await;
                    Ok(())
                }
            }
        };
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    pub async fn get_by_pointer(&self, ptr: &str) -> Result<Vec<u8>, StoreError> {
        let key = pointer::decode(ptr, self.scheme())?;
        self.get(key).await
    }

    pub async fn get_context_json<T: DeserializeOwned>(&self, ptr: &str) -> Result<T, StoreError> {
        let data = self.get_by_pointer(ptr).await?;
        serde_json::from_slice(&data).map_err(StoreError::Decode)
    }

    pub async fn put_context_json<T: Serialize + ?Sized>(
        &self,
        job_id: &str,
        value: &T,
    ) -> Result<String, StoreError> {
        let job_id = require_job_id(job_id)?;
        self.put_json(&context_key(job_id), value).await
    }

    pub async fn put_result_json<T: Serialize + ?Sized>(
        &self,
        job_id: &str,
        value: &T,
    ) -> Result<String, StoreError> {
        let job_id = require_job_id(job_id)?;
        self.put_json(&result_key(job_id), value).await
    }

    pub fn pointer_for_key(&self, key: &str) -> Result<String, StoreError> {
        Ok(pointer::encode(self.scheme(), key)?)
    }

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<String, StoreError> {
        let data = serde_json::to_vec(value).map_err(StoreError::Encode)?;
        self.set(key, &data, self.default_ttl).await?;
        self.pointer_for_key(key)
    }
}

pub fn context_key(job_id: &str) -> String {
    format!("{}{}", CONTEXT_PREFIX, job_id)
}

pub fn result_key(job_id: &str) -> String {
    format!("{}{}", RESULT_PREFIX, job_id)
}

fn require_job_id(job_id: &str) -> Result<&str, StoreError> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(StoreError::InvalidArgument("job id required"));
    }
    Ok(job_id)
}
