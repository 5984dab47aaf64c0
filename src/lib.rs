//! Skiff provider
//!
//! A provider plugin that manages resource instances on a running Skiff
//! server. The Skiff server reports its resource types and their attributes
//! dynamically at runtime; this crate translates those loosely-typed
//! descriptors into the statically-shaped schemas the host engine expects
//! and round-trips configuration and live state through a full
//! create/read/update/delete/import lifecycle.
//!
//! # Overview
//!
//! The crate is organised around four pieces:
//!
//! - **Type coercion** ([`coerce`]): bidirectional conversion between the
//!   server's dynamically-typed values and structured values, driven by a
//!   closed type-tag grammar. Conversion is total; shape mismatches degrade
//!   to string renderings with a logged warning.
//! - **Schema translation** ([`schema`]): converts a flat list of remote
//!   attribute descriptors into a nested schema (top-level fields plus
//!   blocks grouped by dotted-name prefix) with a lookup table mapping each
//!   descriptor to its structured location. Naming collisions fail the
//!   whole resource type, never partially.
//! - **Instance control** ([`resource`]): one controller per resource type,
//!   orchestrating the instance lifecycle against the remote store and
//!   reconciling observed state with submitted values so unechoed
//!   attributes never read as drift.
//! - **The plugin surface** ([`server`], [`provider`]): a gRPC service with
//!   a stdout handshake, driven by the host engine, dispatching to the
//!   dynamic provider.
//!
//! # Quick Start
//!
//! ```ignore
//! use skiff_provider::{serve, DynamicProvider, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     skiff_provider::init_logging();
//!
//!     let store = ProviderConfig::from_env().open_store()?;
//!     let provider = DynamicProvider::discover("0.1.0", &store).await?;
//!     serve(provider).await
//! }
//! ```
//!
//! # Handshake Protocol
//!
//! When the plugin starts via [`serve`], it writes a handshake line to
//! stdout:
//!
//! ```text
//! SKIFF_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `SKIFF_PROVIDER|<protocol_version>|<address>`. The host engine
//! spawns the plugin as a subprocess, parses the line, and connects over
//! gRPC. Everything else the process prints goes to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coerce;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod server;
pub mod store;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use coerce::{decode, encode, StructuredValue, TypeTag};
pub use error::{CleanupError, CreateError, ProviderError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{DynamicProvider, ProviderConfig};
pub use resource::{generate_label, InstanceController};
pub use schema::{translate, AttributeDescriptor, ProviderSchema, TranslatedSchema};
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use store::{HttpStore, InstanceState, InstanceStore, ResourceMeta};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
