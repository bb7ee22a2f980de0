//! Typed responses and the response writer.
//!
//! Every response encodes as `SEQUENCE { messageID, [APPLICATION n] result
//! body, controls [0] OPTIONAL }`. The result body carries the enumerated
//! result code followed by the matchedDN and diagnosticMessage octet strings
//! (empty when unset). Handlers construct responses through the builder
//! methods on [`crate::Request`] and deliver them with
//! [`ResponseWriter::write`].

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::ber::{Class, Packet};
use crate::codes;
use crate::conn::{write_frame, SharedWriter};
use crate::control::{encode_controls, Control};
use crate::message::{Entry, EntryAttribute};
use crate::Result;

/// Options accepted by the response constructors on [`crate::Request`].
/// Unset fields fall back to per-constructor defaults.
#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    pub(crate) response_code: Option<u16>,
    pub(crate) application_code: Option<u64>,
    pub(crate) diagnostic_message: Option<String>,
    pub(crate) matched_dn: Option<String>,
    pub(crate) attributes: Option<HashMap<String, Vec<String>>>,
    pub(crate) controls: Option<Vec<Control>>,
}

impl ResponseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// LDAP result code carried in the response.
    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    /// Application tag of the response body. Honored by
    /// [`crate::Request::new_response`] only.
    pub fn with_application_code(mut self, code: u64) -> Self {
        self.application_code = Some(code);
        self
    }

    pub fn with_diagnostic_message(mut self, msg: impl Into<String>) -> Self {
        self.diagnostic_message = Some(msg.into());
        self
    }

    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = Some(dn.into());
        self
    }

    /// Seed attributes for a search result entry.
    pub fn with_attributes(mut self, attributes: HashMap<String, Vec<String>>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Controls appended to the response envelope.
    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = Some(controls);
        self
    }
}

/// Anything writable through a [`ResponseWriter`].
pub trait Response: Send + Sync {
    /// The full response envelope.
    fn packet(&self) -> Packet;
}

/// Common fields of every response kind.
#[derive(Debug, Clone)]
pub(crate) struct BaseResponse {
    message_id: i64,
    code: u16,
    diagnostic_message: String,
    matched_dn: String,
    controls: Vec<Control>,
}

impl BaseResponse {
    pub(crate) fn new(message_id: i64, default_code: u16, opts: &ResponseOptions) -> Self {
        BaseResponse {
            message_id,
            code: opts.response_code.unwrap_or(default_code),
            diagnostic_message: opts.diagnostic_message.clone().unwrap_or_default(),
            matched_dn: opts.matched_dn.clone().unwrap_or_default(),
            controls: opts.controls.clone().unwrap_or_default(),
        }
    }

    /// `SEQUENCE { messageID, body, controls? }`
    fn envelope(&self, body: Packet) -> Packet {
        let mut packet = Packet::sequence()
            .with_child(Packet::integer(self.message_id))
            .with_child(body);
        if !self.controls.is_empty() {
            packet.push(encode_controls(&self.controls));
        }
        packet
    }

    /// `[APPLICATION tag] { resultCode, matchedDN, diagnosticMessage }`
    fn result_body(&self, application_code: u64) -> Packet {
        Packet::constructed(Class::Application, application_code)
            .with_child(Packet::enumerated(i64::from(self.code)))
            .with_child(Packet::octet_string(self.matched_dn.as_str()))
            .with_child(Packet::octet_string(self.diagnostic_message.as_str()))
    }

    fn result_packet(&self, application_code: u64) -> Packet {
        self.envelope(self.result_body(application_code))
    }
}

macro_rules! impl_response_setters {
    ($t:ty) => {
        impl $t {
            /// Set the result code.
            pub fn set_result_code(&mut self, code: u16) {
                self.base.code = code;
            }

            /// Set the optional diagnostic message.
            pub fn set_diagnostic_message(&mut self, msg: impl Into<String>) {
                self.base.diagnostic_message = msg.into();
            }

            /// Set the optional matched DN.
            pub fn set_matched_dn(&mut self, dn: impl Into<String>) {
                self.base.matched_dn = dn.into();
            }

            /// Replace the response controls.
            pub fn set_controls(&mut self, controls: Vec<Control>) {
                self.base.controls = controls;
            }
        }
    };
}

/// Response to a bind request.
#[derive(Debug, Clone)]
pub struct BindResponse {
    pub(crate) base: BaseResponse,
}

impl Response for BindResponse {
    fn packet(&self) -> Packet {
        self.base.result_packet(codes::APPLICATION_BIND_RESPONSE)
    }
}

/// Response to an extended request, optionally carrying the response name.
#[derive(Debug, Clone)]
pub struct ExtendedResponse {
    pub(crate) base: BaseResponse,
    pub(crate) name: Option<String>,
}

impl ExtendedResponse {
    /// Set the responseName OID (`[10]` in the response body).
    pub fn set_response_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }
}

impl Response for ExtendedResponse {
    fn packet(&self) -> Packet {
        let mut body = self
            .base
            .result_body(codes::APPLICATION_EXTENDED_RESPONSE);
        if let Some(name) = &self.name {
            body.push(Packet::context(10, name.as_bytes().to_vec()));
        }
        self.base.envelope(body)
    }
}

/// A response with a caller-chosen application tag; the no-route fallback
/// and protocol-error replies use this shape.
#[derive(Debug, Clone)]
pub struct GeneralResponse {
    pub(crate) base: BaseResponse,
    pub(crate) application_code: u64,
}

impl Response for GeneralResponse {
    fn packet(&self) -> Packet {
        self.base.result_packet(self.application_code)
    }
}

/// Terminates a search result stream.
#[derive(Debug, Clone)]
pub struct SearchResponseDone {
    pub(crate) base: BaseResponse,
}

impl Response for SearchResponseDone {
    fn packet(&self) -> Packet {
        self.base
            .result_packet(codes::APPLICATION_SEARCH_RESULT_DONE)
    }
}

/// One entry of a search result stream.
#[derive(Debug, Clone)]
pub struct SearchResponseEntry {
    pub(crate) base: BaseResponse,
    pub(crate) entry: Entry,
}

impl SearchResponseEntry {
    /// Append an attribute after construction.
    pub fn add_attribute(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.entry.attributes.push(EntryAttribute::new(name, values));
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Response for SearchResponseEntry {
    fn packet(&self) -> Packet {
        let mut attributes = Packet::sequence();
        for attr in &self.entry.attributes {
            attributes.push(attr.encode());
        }
        let body = Packet::constructed(Class::Application, codes::APPLICATION_SEARCH_RESULT_ENTRY)
            .with_child(Packet::octet_string(self.entry.dn.as_str()))
            .with_child(attributes);
        self.base.envelope(body)
    }
}

/// Response to a modify request.
#[derive(Debug, Clone)]
pub struct ModifyResponse {
    pub(crate) base: BaseResponse,
}

impl Response for ModifyResponse {
    fn packet(&self) -> Packet {
        self.base.result_packet(codes::APPLICATION_MODIFY_RESPONSE)
    }
}

/// Response to an add request.
#[derive(Debug, Clone)]
pub struct AddResponse {
    pub(crate) base: BaseResponse,
}

impl Response for AddResponse {
    fn packet(&self) -> Packet {
        self.base.result_packet(codes::APPLICATION_ADD_RESPONSE)
    }
}

/// Response to a delete request.
#[derive(Debug, Clone)]
pub struct DeleteResponse {
    pub(crate) base: BaseResponse,
}

impl Response for DeleteResponse {
    fn packet(&self) -> Packet {
        self.base.result_packet(codes::APPLICATION_DEL_RESPONSE)
    }
}

impl_response_setters!(BindResponse);
impl_response_setters!(ExtendedResponse);
impl_response_setters!(GeneralResponse);
impl_response_setters!(SearchResponseDone);
impl_response_setters!(SearchResponseEntry);
impl_response_setters!(ModifyResponse);
impl_response_setters!(AddResponse);
impl_response_setters!(DeleteResponse);

/// Framework-built result packet for errors written outside any handler.
pub(crate) fn error_response_packet(
    message_id: i64,
    application_code: u64,
    code: u16,
    matched_dn: &str,
    diagnostic_message: &str,
) -> Packet {
    let base = BaseResponse {
        message_id,
        code,
        diagnostic_message: diagnostic_message.to_string(),
        matched_dn: matched_dn.to_string(),
        controls: Vec::new(),
    };
    base.result_packet(application_code)
}

/// Extended response written by the connection pump during StartTLS.
pub(crate) fn extended_response_packet(
    message_id: i64,
    code: u16,
    name: Option<&str>,
) -> Packet {
    let resp = ExtendedResponse {
        base: BaseResponse {
            message_id,
            code,
            diagnostic_message: String::new(),
            matched_dn: String::new(),
            controls: Vec::new(),
        },
        name: name.map(str::to_string),
    };
    resp.packet()
}

/// Builds search entry attributes from the options map, sorted by name for
/// a stable wire order.
pub(crate) fn attributes_from_options(opts: &ResponseOptions) -> Vec<EntryAttribute> {
    let mut attrs: Vec<EntryAttribute> = opts
        .attributes
        .as_ref()
        .map(|map| {
            map.iter()
                .map(|(name, values)| EntryAttribute::new(name.clone(), values.clone()))
                .collect()
        })
        .unwrap_or_default();
    attrs.sort_by(|a, b| a.name.cmp(&b.name));
    attrs
}

/// Writes whole response packets to one connection. Cheap to clone into
/// handler tasks; all clones share the connection's writer mutex.
#[derive(Clone)]
pub struct ResponseWriter {
    writer: SharedWriter,
    write_timeout: Option<Duration>,
    conn_id: u64,
    request_id: i64,
}

impl ResponseWriter {
    pub(crate) fn new(
        writer: SharedWriter,
        write_timeout: Option<Duration>,
        conn_id: u64,
        request_id: i64,
    ) -> Self {
        ResponseWriter {
            writer,
            write_timeout,
            conn_id,
            request_id,
        }
    }

    /// Encode and write one response, holding the connection's writer mutex
    /// for the whole packet so concurrent handlers cannot interleave bytes.
    /// Errors (e.g. writing to a closed connection) are returned for the
    /// handler to log; there is no way to report them to the client.
    pub async fn write<R: Response + ?Sized>(&self, response: &R) -> Result<()> {
        const OP: &str = "response.write";
        let packet = response.packet();
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                conn = self.conn_id,
                request = self.request_id,
                packet = %packet.dump(),
                "response write"
            );
        }
        write_frame(&self.writer, self.write_timeout, &packet.encode()).await?;
        debug!(
            conn = self.conn_id,
            request = self.request_id,
            "{OP}: finished writing"
        );
        Ok(())
    }
}
