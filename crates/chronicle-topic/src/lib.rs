#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-topic** – Stable string ↔ type identity mapping.
//!
//! Every domain event kind needs a topic that is stable across processes
//! and (ideally) across releases, per the `"<module path>#<qualified
//! name>"` format described in the design notes. Rust has no runtime module
//! loader, so resolution (`topic -> type`) cannot work the way the original
//! Python implementation's `importlib`-based lookup does; instead this
//! crate implements the design notes' fallback directly: a static registry,
//! populated once at process init, that maps a topic string to a decode
//! closure for the concrete Rust type it names.
//!
//! [`topic_of`] (the encode direction) needs no registration: it derives a
//! topic from `std::any::type_name`, which already encodes a module path
//! and a (possibly dotted, for nested types) qualified name – the same
//! shape the spec calls for.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chronicle_types::Topic;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Failure resolving a topic string to a registered type.
#[derive(Debug, thiserror::Error)]
pub enum TopicResolutionError {
    /// No type has been registered under this topic.
    #[error("no type registered for topic {0:?}")]
    Unknown(String),
    /// A decoder was found but the stored state failed to deserialize into
    /// the registered type.
    #[error("failed to decode state for topic {0:?}: {1}")]
    DecodeFailed(String, String),
    /// A decoder was found and ran successfully, but the caller requested a
    /// different concrete type than the one registered for this topic.
    #[error("topic {0:?} decoded to an unexpected type")]
    TypeMismatch(String),
}

//─────────────────────────────
//  Deriving a topic from a Rust type
//─────────────────────────────

/// Derive the stable topic string for `T`.
///
/// Splits `std::any::type_name::<T>()` on `::`, treating the leading
/// `snake_case` segments as the module path and the trailing
/// `UpperCamelCase` segments (dot-joined, so nested types read as
/// `Outer.Inner`) as the qualified name, then joins the two halves with
/// `#` – exactly the format the data model calls for.
pub fn topic_of<T: 'static>() -> Topic {
    Topic::new(format_type_name(std::any::type_name::<T>()))
}

fn format_type_name(raw: &str) -> String {
    let segments: Vec<&str> = raw.split("::").collect();
    // The qualified name starts at the first segment beginning with an
    // uppercase letter (Rust's convention for type names); everything
    // before that is the module path. A type with no module path at all
    // (a local/anonymous type) falls back to treating the whole string as
    // the qualified name.
    let split_at = segments
        .iter()
        .position(|seg| seg.starts_with(|c: char| c.is_uppercase()))
        .unwrap_or(0);

    if split_at == 0 {
        return format!("#{}", segments.join("."));
    }

    let module_path = segments[..split_at].join("::");
    let qualified_name = segments[split_at..].join(".");
    format!("{module_path}#{qualified_name}")
}

//─────────────────────────────
//  Registry (resolve direction)
//─────────────────────────────

type DecodeFn = Arc<dyn Fn(Value) -> Result<Box<dyn Any + Send + Sync>, TopicResolutionError> + Send + Sync>;

struct Entry {
    type_id: TypeId,
    decode: DecodeFn,
}

/// Static registry mapping topic strings to decode closures.
///
/// Populate it once, at process init, with [`TopicRegistry::register`] for
/// every domain type that must be resolvable by topic. Use
/// [`registry()`] to reach the process-wide instance used by
/// `chronicle-codec` and `chronicle-player`.
#[derive(Default)]
pub struct TopicRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TopicRegistry {
    /// Create a fresh, empty registry. Most callers want the process-wide
    /// singleton returned by [`registry()`]; a standalone instance is
    /// useful for isolating registrations in tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its derived topic (see [`topic_of`]).
    pub fn register<T>(&self)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let topic = topic_of::<T>();
        self.register_as::<T>(topic.as_str());
    }

    /// Register `T` under an explicit topic string, overriding the derived
    /// one. Use this when a type must keep a stable topic across a rename.
    pub fn register_as<T>(&self, topic: impl Into<String>)
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let decode: DecodeFn = Arc::new(|value: Value| {
            let decoded: T = serde_json::from_value(value)
                .map_err(|e| TopicResolutionError::DecodeFailed(String::new(), e.to_string()))?;
            Ok(Box::new(decoded) as Box<dyn Any + Send + Sync>)
        });
        self.entries.write().expect("topic registry lock poisoned").insert(
            topic.into(),
            Entry {
                type_id: TypeId::of::<T>(),
                decode,
            },
        );
    }

    /// Decode `state` into the concrete type registered for `topic`.
    ///
    /// Fails with [`TopicResolutionError::Unknown`] if nothing is
    /// registered, with `TypeMismatch` if the caller's `T` doesn't match
    /// what was registered, or `DecodeFailed` if deserialization itself
    /// fails.
    pub fn resolve_as<T: 'static>(&self, topic: &str, state: Value) -> Result<T, TopicResolutionError> {
        let entry = {
            let entries = self.entries.read().expect("topic registry lock poisoned");
            entries.get(topic).map(|e| (e.type_id, e.decode.clone()))
        };
        let Some((type_id, decode)) = entry else {
            return Err(TopicResolutionError::Unknown(topic.to_string()));
        };
        if type_id != TypeId::of::<T>() {
            return Err(TopicResolutionError::TypeMismatch(topic.to_string()));
        }
        let boxed = decode(state).map_err(|e| match e {
            TopicResolutionError::DecodeFailed(_, msg) => {
                TopicResolutionError::DecodeFailed(topic.to_string(), msg)
            }
            other => other,
        })?;
        boxed
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| TopicResolutionError::TypeMismatch(topic.to_string()))
    }

    /// Whether any type is registered under `topic`.
    pub fn contains(&self, topic: &str) -> bool {
        self.entries.read().expect("topic registry lock poisoned").contains_key(topic)
    }
}

static GLOBAL: Lazy<TopicRegistry> = Lazy::new(TopicRegistry::new);

/// The process-wide topic registry.
pub fn registry() -> &'static TopicRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Opened {
        name: String,
    }

    mod nested {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct Inner {
            pub n: i32,
        }
    }

    #[test]
    fn topic_of_splits_module_from_type_name() {
        let topic = topic_of::<Opened>();
        assert!(topic.as_str().ends_with("#Opened"), "{}", topic.as_str());
        assert!(topic.as_str().contains('#'));
    }

    #[test]
    fn topic_of_is_stable_for_nested_modules() {
        let topic = topic_of::<nested::Inner>();
        assert!(topic.as_str().ends_with("#Inner"), "{}", topic.as_str());
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let registry = TopicRegistry::new();
        registry.register::<Opened>();
        let topic = topic_of::<Opened>();
        let value = serde_json::json!({ "name": "acct-1" });
        let decoded: Opened = registry.resolve_as(topic.as_str(), value).unwrap();
        assert_eq!(decoded, Opened { name: "acct-1".to_string() });
    }

    #[test]
    fn resolve_unknown_topic_fails() {
        let registry = TopicRegistry::new();
        let err = registry
            .resolve_as::<Opened>("nowhere#Nothing", Value::Null)
            .unwrap_err();
        assert!(matches!(err, TopicResolutionError::Unknown(_)));
    }

    #[test]
    fn resolve_with_wrong_type_fails() {
        let registry = TopicRegistry::new();
        registry.register::<Opened>();
        let topic = topic_of::<Opened>();
        let err = registry
            .resolve_as::<nested::Inner>(topic.as_str(), serde_json::json!({"name": "x"}))
            .unwrap_err();
        assert!(matches!(err, TopicResolutionError::TypeMismatch(_)));
    }
}
