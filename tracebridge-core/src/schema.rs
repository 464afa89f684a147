//! # Schema Loader
//!
//! Loads the bridge schema from a binary `FileDescriptorSet` at runtime, so no message
//! type has to be generated at compile time.
//!
//! ## Lifecycle
//!
//! A [`SchemaLoader`] makes exactly one load attempt. Concurrent first callers block on
//! that single attempt, and its outcome, a [`DescriptorBundle`] or a [`SchemaError`], is
//! cached and handed to every later caller. A failed loader stays failed.
//!
//! The loader is not a global: build it once at startup and share it (or the bundle it
//! produced) with the components that need it.
use prost_reflect::{DescriptorError, DescriptorPool, MessageDescriptor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Environment variable overriding the schema path.
pub const SCHEMA_PATH_ENV: &str = "BRIDGE_DESCRIPTOR_SET";

/// Schema path used when [`SCHEMA_PATH_ENV`] is unset, relative to the working directory.
pub const DEFAULT_SCHEMA_PATH: &str = "proto/bridge/v1/bridge.binpb";

/// Full name of the Request shape.
pub const REQUEST_MESSAGE: &str = "bridge.v1.ActionRequest";

/// Full name of the Reply shape.
pub const REPLY_MESSAGE: &str = "bridge.v1.ActionReply";

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file '{path}': '{source}'")]
    Read {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },
    #[error("Failed to decode descriptor set '{path}': '{source}'")]
    Decode {
        path: PathBuf,
        source: Arc<DescriptorError>,
    },
    #[error("Message '{message}' not found in '{path}'")]
    MissingMessage { path: PathBuf, message: String },
}

/// The decoded schema plus the two message shapes the bridge exchanges.
#[derive(Debug, Clone)]
pub struct DescriptorBundle {
    pool: DescriptorPool,
    request: MessageDescriptor,
    reply: MessageDescriptor,
}

impl DescriptorBundle {
    /// Builds a bundle from an encoded `FileDescriptorSet`.
    pub fn decode(path: &Path, bytes: &[u8]) -> Result<Self, SchemaError> {
        let pool = DescriptorPool::decode(bytes).map_err(|source| SchemaError::Decode {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;

        let message = |name: &str| {
            pool.get_message_by_name(name)
                .ok_or_else(|| SchemaError::MissingMessage {
                    path: path.to_path_buf(),
                    message: name.to_string(),
                })
        };

        let request = message(REQUEST_MESSAGE)?;
        let reply = message(REPLY_MESSAGE)?;

        Ok(Self {
            pool,
            request,
            reply,
        })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn request_descriptor(&self) -> &MessageDescriptor {
        &self.request
    }

    pub fn reply_descriptor(&self) -> &MessageDescriptor {
        &self.reply
    }
}

#[derive(Debug)]
pub struct SchemaLoader {
    path: PathBuf,
    outcome: OnceLock<Result<DescriptorBundle, SchemaError>>,
    #[cfg(test)]
    attempts: std::sync::atomic::AtomicUsize,
}

impl SchemaLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            outcome: OnceLock::new(),
            #[cfg(test)]
            attempts: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Uses the path in [`SCHEMA_PATH_ENV`], or [`DEFAULT_SCHEMA_PATH`] when it is unset or empty.
    pub fn from_env() -> Self {
        let path = std::env::var(SCHEMA_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the bundle, loading it on the first call.
    ///
    /// Every call observes the outcome of the one and only load attempt.
    pub fn load(&self) -> Result<DescriptorBundle, SchemaError> {
        self.outcome.get_or_init(|| self.read_bundle()).clone()
    }

    fn read_bundle(&self) -> Result<DescriptorBundle, SchemaError> {
        #[cfg(test)]
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let outcome = std::fs::read(&self.path)
            .map_err(|source| SchemaError::Read {
                path: self.path.clone(),
                source: Arc::new(source),
            })
            .and_then(|bytes| DescriptorBundle::decode(&self.path, &bytes));

        match &outcome {
            Ok(_) => tracing::info!(
                source = "SchemaLoader",
                category = "schema.load",
                path = %self.path.display(),
                request = REQUEST_MESSAGE,
                reply = REPLY_MESSAGE,
                "bridge schema loaded"
            ),
            Err(err) => tracing::error!(
                source = "SchemaLoader",
                category = "schema.load.error",
                path = %self.path.display(),
                errorType = "config",
                errorMessage = %err,
                "bridge schema load failed"
            ),
        }

        outcome
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn bridge_schema_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../proto/bridge/v1/bridge.binpb")
    }

    pub fn bridge_bundle() -> DescriptorBundle {
        SchemaLoader::new(bridge_schema_path())
            .load()
            .expect("Failed to load bridge schema")
    }

    /// Writes `bytes` into a fresh file under the system temp directory.
    pub fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "tracebridge-{}-{}-{name}",
            std::process::id(),
            crate::trace::generate()
        ));
        std::fs::write(&path, bytes).expect("Failed to write temp file");
        path
    }
}
