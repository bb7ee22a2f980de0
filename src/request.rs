//! The per-request object handed to handlers.
//!
//! A [`Request`] carries the decoded message, the route operation derived
//! from it, and enough connection context for handlers to build responses
//! (the MessageID is captured into every constructor) and to upgrade the
//! transport with StartTLS.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::codes;
use crate::conn::TlsUpgrade;
use crate::message::{
    AddMessage, DeleteMessage, Entry, Message, ModifyMessage, SearchMessage, SimpleBindMessage,
    UnbindMessage,
};
use crate::mux::RouteOperation;
use crate::response::{
    attributes_from_options, AddResponse, BaseResponse, BindResponse, DeleteResponse,
    ExtendedResponse, GeneralResponse, ModifyResponse, ResponseOptions, SearchResponseDone,
    SearchResponseEntry,
};
use crate::{Error, Result};

/// An inbound LDAP request.
pub struct Request {
    /// Request number on its connection; every connection counts from 1.
    pub id: i64,
    conn_id: u64,
    message: Message,
    route_op: RouteOperation,
    extended_name: Option<String>,
    upgrade_tx: mpsc::Sender<TlsUpgrade>,
}

impl Request {
    pub(crate) fn new(
        id: i64,
        conn_id: u64,
        message: Message,
        upgrade_tx: mpsc::Sender<TlsUpgrade>,
    ) -> Self {
        let (route_op, extended_name) = match &message {
            Message::SimpleBind(_) => (RouteOperation::Bind, None),
            Message::Search(_) => (RouteOperation::Search, None),
            Message::Modify(_) => (RouteOperation::Modify, None),
            Message::Add(_) => (RouteOperation::Add, None),
            Message::Delete(_) => (RouteOperation::Delete, None),
            Message::Unbind(_) => (RouteOperation::Unbind, None),
            Message::Extended(m) => (RouteOperation::Extended, Some(m.name.clone())),
        };
        Request {
            id,
            conn_id,
            message,
            route_op,
            extended_name,
            upgrade_tx,
        }
    }

    /// The connection this request arrived on. Connection ids are assigned
    /// monotonically from 1, so handlers can correlate requests (e.g. only
    /// allow a search once the same connection has bound successfully).
    pub fn connection_id(&self) -> u64 {
        self.conn_id
    }

    /// The routing operation derived from the message.
    pub fn route_operation(&self) -> RouteOperation {
        self.route_op
    }

    /// The extended operation OID, for extended requests.
    pub fn extended_name(&self) -> Option<&str> {
        self.extended_name.as_deref()
    }

    /// The decoded message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn get_simple_bind_message(&self) -> Result<&SimpleBindMessage> {
        match &self.message {
            Message::SimpleBind(m) => Ok(m),
            other => Err(not_a(other, "simple bind")),
        }
    }

    pub fn get_search_message(&self) -> Result<&SearchMessage> {
        match &self.message {
            Message::Search(m) => Ok(m),
            other => Err(not_a(other, "search")),
        }
    }

    pub fn get_modify_message(&self) -> Result<&ModifyMessage> {
        match &self.message {
            Message::Modify(m) => Ok(m),
            other => Err(not_a(other, "modify")),
        }
    }

    pub fn get_add_message(&self) -> Result<&AddMessage> {
        match &self.message {
            Message::Add(m) => Ok(m),
            other => Err(not_a(other, "add")),
        }
    }

    pub fn get_delete_message(&self) -> Result<&DeleteMessage> {
        match &self.message {
            Message::Delete(m) => Ok(m),
            other => Err(not_a(other, "delete")),
        }
    }

    pub fn get_unbind_message(&self) -> Result<&UnbindMessage> {
        match &self.message {
            Message::Unbind(m) => Ok(m),
            other => Err(not_a(other, "unbind")),
        }
    }

    /// Upgrade this request's connection to TLS. The framework writes the
    /// success extended response (responseName = the StartTLS OID), runs the
    /// server-side handshake on the raw transport and rebuilds the
    /// connection's buffered halves on the encrypted stream. The handler
    /// must not write its own response to the StartTLS request.
    pub async fn start_tls(&self, tls_config: Arc<rustls::ServerConfig>) -> Result<()> {
        const OP: &str = "request.start_tls";
        let (done_tx, done_rx) = oneshot::channel();
        self.upgrade_tx
            .send(TlsUpgrade {
                config: tls_config,
                message_id: self.message.id(),
                done: done_tx,
            })
            .await
            .map_err(|_| Error::InvalidState(format!("{OP}: connection is closed")))?;
        done_rx
            .await
            .map_err(|_| Error::InvalidState(format!("{OP}: connection closed during upgrade")))?
    }

    /// A bind response; the result code defaults to success.
    /// Supported options: `with_response_code`, `with_diagnostic_message`,
    /// `with_matched_dn`, `with_controls`.
    pub fn new_bind_response(&self, opts: ResponseOptions) -> BindResponse {
        BindResponse {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
        }
    }

    /// A search-done response. With no results found, pass
    /// `with_response_code(codes::RESULT_NO_SUCH_OBJECT)`.
    pub fn new_search_done_response(&self, opts: ResponseOptions) -> SearchResponseDone {
        SearchResponseDone {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
        }
    }

    /// A search result entry for `dn`. `with_attributes` seeds the entry;
    /// [`SearchResponseEntry::add_attribute`] appends afterwards.
    pub fn new_search_response_entry(
        &self,
        dn: impl Into<String>,
        opts: ResponseOptions,
    ) -> SearchResponseEntry {
        let attributes = attributes_from_options(&opts);
        SearchResponseEntry {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
            entry: Entry {
                dn: dn.into(),
                attributes,
            },
        }
    }

    /// An extended response; set the responseName with
    /// [`ExtendedResponse::set_response_name`].
    pub fn new_extended_response(&self, opts: ResponseOptions) -> ExtendedResponse {
        ExtendedResponse {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
            name: None,
        }
    }

    pub fn new_modify_response(&self, opts: ResponseOptions) -> ModifyResponse {
        ModifyResponse {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
        }
    }

    pub fn new_add_response(&self, opts: ResponseOptions) -> AddResponse {
        AddResponse {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
        }
    }

    pub fn new_delete_response(&self, opts: ResponseOptions) -> DeleteResponse {
        DeleteResponse {
            base: BaseResponse::new(self.message.id(), codes::RESULT_SUCCESS, &opts),
        }
    }

    /// A general response, not tied to the request's operation: the result
    /// code defaults to `UnwillingToPerform` and the application tag to
    /// `ExtendedResponse` unless overridden with `with_application_code`.
    pub fn new_response(&self, opts: ResponseOptions) -> GeneralResponse {
        let application_code = opts
            .application_code
            .unwrap_or(codes::APPLICATION_EXTENDED_RESPONSE);
        GeneralResponse {
            base: BaseResponse::new(
                self.message.id(),
                codes::RESULT_UNWILLING_TO_PERFORM,
                &opts,
            ),
            application_code,
        }
    }
}

fn not_a(message: &Message, wanted: &str) -> Error {
    Error::InvalidParameter(format!(
        "request.message: {} request is not a {wanted} request",
        message_kind(message)
    ))
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::SimpleBind(_) => "bind",
        Message::Search(_) => "search",
        Message::Modify(_) => "modify",
        Message::Add(_) => "add",
        Message::Delete(_) => "delete",
        Message::Unbind(_) => "unbind",
        Message::Extended(_) => "extended",
    }
}
