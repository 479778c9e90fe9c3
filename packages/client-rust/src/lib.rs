//! ldapwire client: concurrent LDAP request execution over one connection.
//!
//! A [`Connection`] owns a byte stream, a [`Correlator`] that matches
//! responses to callers by message id, and a reader task that routes every
//! inbound frame. Operations are built and classified with `ldapwire-core`.

pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod reader;
pub mod transport;

pub use codec::LdapCodec;
pub use config::ClientConfig;
pub use connection::Connection;
pub use correlator::{Correlator, Dispatch, PendingRequest};
pub use error::LdapError;
pub use transport::{StreamTransport, Transport};
