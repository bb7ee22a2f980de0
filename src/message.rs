//! Typed request messages and the envelope decoder.
//!
//! An LDAPMessage envelope is `SEQUENCE { messageID, protocolOp, controls
//! [0] OPTIONAL }`. [`Message::from_packet`] validates the envelope, then
//! decodes the operation child into one of the closed set of typed request
//! messages. Operations without a typed decoder (Compare, ModifyDN, Abandon,
//! anything unknown) become an [`ExtendedMessage`] named `"Unknown"` so the
//! router can still dispatch them to an extended or default route.

use crate::ber::{
    Assert, Class, Packet, PacketKind, TAG_BOOLEAN, TAG_ENUMERATED, TAG_INTEGER, TAG_OCTET_STRING,
    TAG_SEQUENCE,
};
use crate::codes::{self, AuthChoice, Scope};
use crate::control::{decode_controls, Control};
use crate::filter;
use crate::{Error, Result};

/// A directory entry carried inside a search result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<EntryAttribute>,
}

/// One named attribute with its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttribute {
    pub name: String,
    pub values: Vec<String>,
}

impl EntryAttribute {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        EntryAttribute {
            name: name.into(),
            values,
        }
    }

    /// `PartialAttribute ::= SEQUENCE { type, vals SET OF value }`
    pub(crate) fn encode(&self) -> Packet {
        let mut vals = Packet::set();
        for v in &self.values {
            vals.push(Packet::octet_string(v.as_str()));
        }
        Packet::sequence()
            .with_child(Packet::octet_string(self.name.as_str()))
            .with_child(vals)
    }
}

/// Modify operation kinds (RFC 4511 §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Add = 0,
    Delete = 1,
    Replace = 2,
}

impl TryFrom<i64> for ModifyOperation {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ModifyOperation::Add),
            1 => Ok(ModifyOperation::Delete),
            2 => Ok(ModifyOperation::Replace),
            _ => Err(Error::InvalidParameter(format!(
                "message.modify_operation: invalid change operation {value}"
            ))),
        }
    }
}

/// One change inside a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub operation: ModifyOperation,
    pub modification: EntryAttribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleBindMessage {
    pub id: i64,
    pub auth_choice: AuthChoice,
    pub user_name: String,
    pub password: String,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMessage {
    pub id: i64,
    pub base_dn: String,
    pub scope: Scope,
    pub deref_aliases: i64,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    /// Canonical textual filter, e.g. `(&(uid=alice)(cn=*))`.
    pub filter: String,
    pub attributes: Vec<String>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyMessage {
    pub id: i64,
    pub dn: String,
    pub changes: Vec<Change>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddMessage {
    pub id: i64,
    pub dn: String,
    pub attributes: Vec<EntryAttribute>,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMessage {
    pub id: i64,
    pub dn: String,
    pub controls: Vec<Control>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnbindMessage {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedMessage {
    pub id: i64,
    /// Request OID, or `"Unknown"` for operations without a typed decoder.
    pub name: String,
    pub value: Vec<u8>,
    pub controls: Vec<Control>,
}

/// A decoded request message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SimpleBind(SimpleBindMessage),
    Search(SearchMessage),
    Modify(ModifyMessage),
    Add(AddMessage),
    Delete(DeleteMessage),
    Unbind(UnbindMessage),
    Extended(ExtendedMessage),
}

impl Message {
    /// The MessageID every response to this request must echo.
    pub fn id(&self) -> i64 {
        match self {
            Message::SimpleBind(m) => m.id,
            Message::Search(m) => m.id,
            Message::Modify(m) => m.id,
            Message::Add(m) => m.id,
            Message::Delete(m) => m.id,
            Message::Unbind(m) => m.id,
            Message::Extended(m) => m.id,
        }
    }

    /// Validate the envelope shape and read the MessageID. Failures here are
    /// [`Error::Malformed`]: the connection closes without a reply.
    pub fn validate_envelope(packet: &Packet) -> Result<i64> {
        const OP: &str = "message.validate_envelope";
        packet
            .assert(
                Class::Universal,
                PacketKind::Constructed,
                Assert {
                    tag: Some(TAG_SEQUENCE),
                    min_children: Some(2),
                    ..Default::default()
                },
            )
            .map_err(|e| Error::Malformed(format!("{OP}: invalid ldap envelope: {e}")))?;
        packet
            .assert(
                Class::Universal,
                PacketKind::Primitive,
                Assert {
                    tag: Some(TAG_INTEGER),
                    child: Some(0),
                    ..Default::default()
                },
            )
            .map_err(|e| Error::Malformed(format!("{OP}: invalid message id: {e}")))?;
        let id = packet.children[0]
            .as_i64()
            .map_err(|e| Error::Malformed(format!("{OP}: invalid message id: {e}")))?;
        if id <= 0 {
            return Err(Error::Malformed(format!(
                "{OP}: message id {id} must be positive"
            )));
        }
        packet
            .assert(
                Class::Application,
                PacketKind::Constructed,
                Assert {
                    child: Some(1),
                    ..Default::default()
                },
            )
            .or_else(|_| {
                // Delete and unbind requests are primitive application
                // packets; the envelope is still sound.
                packet.assert(
                    Class::Application,
                    PacketKind::Primitive,
                    Assert {
                        child: Some(1),
                        ..Default::default()
                    },
                )
            })
            .map_err(|e| Error::Malformed(format!("{OP}: missing request child: {e}")))?;
        Ok(id)
    }

    /// Decode a validated envelope into a typed message. Failures here are
    /// [`Error::InvalidParameter`]: the envelope was intact, so the server
    /// answers ProtocolError and keeps the connection.
    pub fn from_packet(packet: &Packet) -> Result<Message> {
        const OP: &str = "message.from_packet";
        let id = Self::validate_envelope(packet)?;
        let request = &packet.children[1];
        let controls = match packet.children.get(2) {
            Some(child) => decode_controls(child)?,
            None => Vec::new(),
        };

        let message = match request.tag {
            codes::APPLICATION_BIND_REQUEST => {
                let (user_name, password) = simple_bind_parameters(request)?;
                Message::SimpleBind(SimpleBindMessage {
                    id,
                    auth_choice: AuthChoice::Simple,
                    user_name,
                    password,
                    controls,
                })
            }
            codes::APPLICATION_SEARCH_REQUEST => {
                Message::Search(decode_search(id, request, controls)?)
            }
            codes::APPLICATION_MODIFY_REQUEST => {
                Message::Modify(decode_modify(id, request, controls)?)
            }
            codes::APPLICATION_ADD_REQUEST => Message::Add(decode_add(id, request, controls)?),
            codes::APPLICATION_DEL_REQUEST => {
                // DelRequest is [APPLICATION 10] IMPLICIT LDAPDN: the DN is
                // the request packet's own content.
                let dn = request.as_text().map_err(|e| {
                    Error::InvalidParameter(format!("{OP}: invalid delete dn: {e}"))
                })?;
                Message::Delete(DeleteMessage { id, dn, controls })
            }
            codes::APPLICATION_UNBIND_REQUEST => Message::Unbind(UnbindMessage { id }),
            codes::APPLICATION_EXTENDED_REQUEST => {
                Message::Extended(decode_extended(id, request, controls)?)
            }
            _ => {
                // No typed decoder (Compare, ModifyDN, Abandon, vendor
                // extensions); surface as an unknown extended operation so a
                // route can still claim it.
                Message::Extended(ExtendedMessage {
                    id,
                    name: codes::EXTENDED_OPERATION_UNKNOWN.to_string(),
                    value: Vec::new(),
                    controls,
                })
            }
        };
        Ok(message)
    }
}

/// Decode a simple bind: version 3, user name, password. With more than
/// three children the password field is absent per RFC 4511 §4.2 and decodes
/// as the empty string.
fn simple_bind_parameters(request: &Packet) -> Result<(String, String)> {
    const OP: &str = "message.simple_bind_parameters";
    request
        .assert(
            Class::Universal,
            PacketKind::Primitive,
            Assert {
                tag: Some(TAG_INTEGER),
                child: Some(0),
                ..Default::default()
            },
        )
        .map_err(|e| Error::InvalidParameter(format!("{OP}: missing bind version: {e}")))?;
    let version = request.children[0].as_i64()?;
    if version != 3 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: incorrect ldap version, expected 3 but got {version}"
        )));
    }
    request
        .assert(
            Class::Universal,
            PacketKind::Primitive,
            Assert {
                tag: Some(TAG_OCTET_STRING),
                child: Some(1),
                ..Default::default()
            },
        )
        .map_err(|e| Error::InvalidParameter(format!("{OP}: missing/invalid user name: {e}")))?;
    let user_name = request.children[1].as_text()?;

    if request.children.len() > 3 {
        return Ok((user_name, String::new()));
    }
    request
        .assert(
            Class::Context,
            PacketKind::Primitive,
            Assert {
                tag: Some(0),
                child: Some(2),
                ..Default::default()
            },
        )
        .map_err(|e| Error::InvalidParameter(format!("{OP}: missing/invalid password: {e}")))?;
    let password = request.children[2].as_text()?;
    Ok((user_name, password))
}

fn decode_search(id: i64, request: &Packet, controls: Vec<Control>) -> Result<SearchMessage> {
    const OP: &str = "message.decode_search";
    if request.children.len() < 7 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: search request needs 7 children, got {}",
            request.children.len()
        )));
    }
    let base_dn = request.children[0].as_text()?;
    expect_tag(&request.children[1], TAG_ENUMERATED, "scope")?;
    let scope = Scope::try_from(request.children[1].as_i64()?)?;
    expect_tag(&request.children[2], TAG_ENUMERATED, "derefAliases")?;
    let deref_aliases = request.children[2].as_i64()?;
    expect_tag(&request.children[3], TAG_INTEGER, "sizeLimit")?;
    let size_limit = request.children[3].as_i64()?;
    expect_tag(&request.children[4], TAG_INTEGER, "timeLimit")?;
    let time_limit = request.children[4].as_i64()?;
    expect_tag(&request.children[5], TAG_BOOLEAN, "typesOnly")?;
    let types_only = request.children[5].as_bool()?;
    let filter = filter::decompile(&request.children[6])?;
    let attributes = match request.children.get(7) {
        Some(attrs) => {
            let mut names = Vec::with_capacity(attrs.children.len());
            for attr in &attrs.children {
                names.push(attr.as_text()?);
            }
            names
        }
        None => Vec::new(),
    };
    Ok(SearchMessage {
        id,
        base_dn,
        scope,
        deref_aliases,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
        controls,
    })
}

fn decode_modify(id: i64, request: &Packet, controls: Vec<Control>) -> Result<ModifyMessage> {
    const OP: &str = "message.decode_modify";
    if request.children.len() < 2 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: modify request needs a dn and a change list"
        )));
    }
    let dn = request.children[0].as_text()?;
    let mut changes = Vec::with_capacity(request.children[1].children.len());
    for change in &request.children[1].children {
        if change.children.len() != 2 {
            return Err(Error::InvalidParameter(format!(
                "{OP}: change needs an operation and a modification"
            )));
        }
        let operation = ModifyOperation::try_from(change.children[0].as_i64()?)?;
        let modification = decode_partial_attribute(&change.children[1])?;
        changes.push(Change {
            operation,
            modification,
        });
    }
    Ok(ModifyMessage {
        id,
        dn,
        changes,
        controls,
    })
}

fn decode_add(id: i64, request: &Packet, controls: Vec<Control>) -> Result<AddMessage> {
    const OP: &str = "message.decode_add";
    if request.children.len() < 2 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: add request needs a dn and an attribute list"
        )));
    }
    let dn = request.children[0].as_text()?;
    let mut attributes = Vec::with_capacity(request.children[1].children.len());
    for attr in &request.children[1].children {
        attributes.push(decode_partial_attribute(attr)?);
    }
    Ok(AddMessage {
        id,
        dn,
        attributes,
        controls,
    })
}

fn decode_extended(id: i64, request: &Packet, controls: Vec<Control>) -> Result<ExtendedMessage> {
    const OP: &str = "message.decode_extended";
    request
        .assert(
            Class::Context,
            PacketKind::Primitive,
            Assert {
                tag: Some(0),
                child: Some(0),
                ..Default::default()
            },
        )
        .map_err(|e| Error::InvalidParameter(format!("{OP}: missing request name: {e}")))?;
    let name = request.children[0].as_text()?;
    let value = match request.children.get(1) {
        Some(child) => child.data.clone(),
        None => Vec::new(),
    };
    Ok(ExtendedMessage {
        id,
        name,
        value,
        controls,
    })
}

/// `PartialAttribute ::= SEQUENCE { type OCTET STRING, vals SET OF value }`
fn decode_partial_attribute(packet: &Packet) -> Result<EntryAttribute> {
    const OP: &str = "message.decode_partial_attribute";
    if packet.children.len() != 2 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: attribute needs a type and a value set, got {} children",
            packet.children.len()
        )));
    }
    let name = packet.children[0].as_text()?;
    let mut values = Vec::with_capacity(packet.children[1].children.len());
    for value in &packet.children[1].children {
        values.push(value.as_text()?);
    }
    Ok(EntryAttribute { name, values })
}

fn expect_tag(packet: &Packet, tag: u64, what: &str) -> Result<()> {
    if packet.tag != tag || packet.class != Class::Universal {
        return Err(Error::InvalidParameter(format!(
            "message.decode: expected {what} (tag {tag}), got tag {} of class {:?}",
            packet.tag, packet.class
        )));
    }
    Ok(())
}
