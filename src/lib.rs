//! An embeddable LDAP v3 (RFC 4511) server framework.
//!
//! The host application registers handlers on a [`Mux`], hands the mux to a
//! [`Server`] and runs it. The framework accepts TCP (or TLS) connections,
//! decodes BER-encoded LDAP messages off the wire, routes each request to the
//! first matching handler and writes the handler's responses back. Handlers
//! never return errors; they respond to the client through a
//! [`ResponseWriter`], typically with responses built from the inbound
//! [`Request`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use ldapserve::{codes, Mux, ResponseOptions, Server, ServerOptions};
//!
//! # async fn run() -> ldapserve::Result<()> {
//! let mux = Mux::new();
//! mux.bind(|w, req| async move {
//!     let code = match req.get_simple_bind_message() {
//!         Ok(m) if m.password == "password" => codes::RESULT_SUCCESS,
//!         _ => codes::RESULT_INVALID_CREDENTIALS,
//!     };
//!     let resp = req.new_bind_response(ResponseOptions::new().with_response_code(code));
//!     let _ = w.write(&resp).await;
//! })?;
//!
//! let server = Arc::new(Server::new(ServerOptions::default()));
//! server.router(Arc::new(mux));
//! server.run("127.0.0.1:389").await?;
//! # Ok(())
//! # }
//! ```

pub mod ber;
pub mod codes;
pub mod conn;
pub mod control;
pub mod filter;
pub mod message;
pub mod mux;
pub mod request;
pub mod response;
pub mod server;
pub mod tls;

pub use codes::Scope;
pub use control::Control;
pub use message::{Entry, EntryAttribute, Message};
pub use mux::{Mux, RouteOperation, SearchRouteOptions};
pub use request::Request;
pub use response::{ResponseOptions, ResponseWriter};
pub use server::{Server, ServerOptions};

/// Errors surfaced by the framework. Wire-level LDAP result codes are not
/// errors; they are numeric fields carried inside responses.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller API misuse or a malformed field inside an otherwise intact
    /// message envelope.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Server used out of lifecycle order (e.g. `stop()` before `run()`).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unreachable invariants; not expected in healthy runs.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wire input that is not a well-formed BER envelope. The connection is
    /// closed without a reply.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Underlying transport failure; terminates the connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
