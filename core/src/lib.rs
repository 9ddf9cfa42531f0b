//! Session-to-credential resolution for the 1492.Vision MCP server.
//!
//! A transport hands over a [`SessionId`]; the [`SessionResolver`] answers with
//! the [`Credential`] bound to it, using a [`CredentialStore`] shared by every
//! server instance.

pub mod config;
pub mod error;
pub mod resolver;
pub mod session;
pub mod store;

pub use config::{StoreBackend, StoreConfig};
pub use resolver::{Resolution, SessionResolver};
pub use session::{Credential, SessionError, SessionId};
pub use store::{CredentialStore, MemoryStore, RedisStore, StoreError, open_store};
