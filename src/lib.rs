//! Type-aware member memoization and self-describing JSON envelopes.
//!
//! Register types with a [`TypeRegistry`], route members through a
//! [`ClassCache`] with `enable_cache`, and round-trip object graphs through
//! the [`Codec`] without losing their runtime types.

pub mod cache;
pub mod codec;
pub mod config;
pub mod infra;

pub use cache::{
    CacheConfig, CacheError, CacheStore, CachedMethod, ClassCache, Instance, KeyTemplate,
    MemoryStore, Model, Receiver, Surface, TypeRegistry, TypeSpec,
};
pub use codec::{Codec, TYPE_TAG, Value};
