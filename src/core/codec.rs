//! Layer 2: the entity/JSON boundary.
//!
//! A chain never looks inside an entity; it crosses into JSON through a
//! [`Codec`] of plain function values. The serde-backed default covers any
//! `Serialize + DeserializeOwned` entity; the populate hook is opt-in and
//! unlocks in-place reconstruction.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("entity serialization failed: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("entity deserialization failed: {source}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("populate hook failed: {reason}")]
    Populate { reason: String },
}

type SerializeFn<E> = dyn Fn(&E) -> Result<Value, CodecError> + Send + Sync;
type DeserializeFn<E> = dyn Fn(&Value) -> Result<E, CodecError> + Send + Sync;
type PopulateFn<E> = dyn Fn(&Value, &mut E) -> Result<(), CodecError> + Send + Sync;

/// Function-value codec crossing the entity/JSON boundary.
pub struct Codec<E> {
    serialize: Arc<SerializeFn<E>>,
    deserialize: Arc<DeserializeFn<E>>,
    populate: Option<Arc<PopulateFn<E>>>,
}

impl<E> Clone for Codec<E> {
    fn clone(&self) -> Self {
        Self {
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
            populate: self.populate.clone(),
        }
    }
}

impl<E> fmt::Debug for Codec<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("populate", &self.populate.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: Serialize + DeserializeOwned> Codec<E> {
    /// serde-backed default.
    pub fn serde() -> Self {
        Self {
            serialize: Arc::new(|entity| {
                serde_json::to_value(entity).map_err(|source| CodecError::Serialize { source })
            }),
            deserialize: Arc::new(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|source| CodecError::Deserialize { source })
            }),
            populate: None,
        }
    }
}

impl<E> Codec<E> {
    /// Custom boundary for entities serde cannot reach.
    pub fn from_fns(
        serialize: impl Fn(&E) -> Result<Value, CodecError> + Send + Sync + 'static,
        deserialize: impl Fn(&Value) -> Result<E, CodecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
            populate: None,
        }
    }

    pub fn with_populate(
        mut self,
        populate: impl Fn(&Value, &mut E) -> Result<(), CodecError> + Send + Sync + 'static,
    ) -> Self {
        self.populate = Some(Arc::new(populate));
        self
    }

    pub fn supports_populate(&self) -> bool {
        self.populate.is_some()
    }

    pub(crate) fn serialize(&self, entity: &E) -> Result<Value, CodecError> {
        (self.serialize)(entity)
    }

    pub(crate) fn deserialize(&self, value: &Value) -> Result<E, CodecError> {
        (self.deserialize)(value)
    }

    pub(crate) fn populate(&self, value: &Value, target: &mut E) -> Result<(), CodecError> {
        match &self.populate {
            Some(hook) => hook(value, target),
            None => Err(CodecError::Populate {
                reason: "populate not configured".to_string(),
            }),
        }
    }
}
