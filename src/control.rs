//! LDAP controls (RFC 4511 §4.1.11).
//!
//! Every control is `SEQUENCE { controlType, criticality DEFAULT FALSE,
//! controlValue OPTIONAL }` where the value octet string carries a
//! control-specific BER payload. The decoder dispatches on the OID; OIDs
//! without a specialised variant decode as [`Control::Generic`].

use crate::ber::{Assert, Class, Packet, PacketKind, TAG_BOOLEAN, TAG_OCTET_STRING, TAG_SEQUENCE};
use crate::{Error, Result};

pub const CONTROL_PAGING: &str = "1.2.840.113556.1.4.319";
pub const CONTROL_MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";
pub const CONTROL_BEHERA_PASSWORD_POLICY: &str = "1.3.6.1.4.1.42.2.27.8.5.1";
pub const CONTROL_VCHU_PASSWORD_MUST_CHANGE: &str = "2.16.840.1.113730.3.4.4";
pub const CONTROL_VCHU_PASSWORD_WARNING: &str = "2.16.840.1.113730.3.4.5";
pub const CONTROL_MICROSOFT_NOTIFICATION: &str = "1.2.840.113556.1.4.528";
pub const CONTROL_MICROSOFT_SHOW_DELETED: &str = "1.2.840.113556.1.4.417";
pub const CONTROL_MICROSOFT_SERVER_LINK_TTL: &str = "1.2.840.113556.1.4.2309";

/// Behera password policy error values (draft-behera-ldap-password-policy).
pub fn behera_error_description(code: i64) -> &'static str {
    match code {
        0 => "Password expired",
        1 => "Account locked",
        2 => "Password must be changed",
        3 => "Policy prevents password modification",
        4 => "Policy requires old password in order to change password",
        5 => "Password fails quality checks",
        6 => "Password is too short for policy",
        7 => "Password has been changed too recently",
        8 => "New password is in list of old passwords",
        _ => "Unknown error code",
    }
}

/// A decoded (or to-be-encoded) request/response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Simple paged results (RFC 2696).
    Paging { size: u32, cookie: Vec<u8> },
    /// ManageDsaIT (RFC 3296).
    ManageDsaIt { criticality: bool },
    /// Behera password policy response. `expire`, `grace` and `error` are -1
    /// when unset; at most one may be set.
    BeheraPasswordPolicy {
        expire: i64,
        grace: i64,
        error: i64,
        error_string: String,
    },
    /// Netscape/VChu password-must-change marker.
    VchuPasswordMustChange { must_change: bool },
    /// Netscape/VChu password expiration warning, seconds until expiry.
    VchuPasswordWarning { expire_secs: i64 },
    /// Active Directory change notification.
    MicrosoftNotification,
    /// Active Directory show-deleted-objects.
    MicrosoftShowDeleted,
    /// Active Directory DNS server link TTL.
    MicrosoftServerLinkTtl,
    /// Any control without a specialised variant.
    Generic {
        oid: String,
        criticality: bool,
        value: Option<Vec<u8>>,
    },
}

/// Optional fields for building a Behera password policy control. At most
/// one of the three may be set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeheraOptions {
    expire: Option<i64>,
    grace: Option<i64>,
    error: Option<i64>,
}

impl BeheraOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds before the password expires.
    pub fn with_seconds_before_expiration(mut self, secs: i64) -> Self {
        self.expire = Some(secs);
        self
    }

    /// Remaining grace authentications.
    pub fn with_grace_authns_remaining(mut self, grace: i64) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Policy error code in 0..=8.
    pub fn with_error_code(mut self, error: i64) -> Self {
        self.error = Some(error);
        self
    }
}

/// Build a Behera password policy control, enforcing that at most one of
/// expire, grace and error is set (and that at least one is).
pub fn new_behera_password_policy(opts: BeheraOptions) -> Result<Control> {
    const OP: &str = "control.new_behera_password_policy";
    let set = [opts.expire.is_some(), opts.grace.is_some(), opts.error.is_some()]
        .iter()
        .filter(|&&b| b)
        .count();
    if set == 0 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: one of expire, grace or error must be set"
        )));
    }
    if set > 1 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: only one of expire, grace or error may be set"
        )));
    }
    if let Some(error) = opts.error {
        if !(0..=8).contains(&error) {
            return Err(Error::InvalidParameter(format!(
                "{OP}: error code {error} outside 0..=8"
            )));
        }
    }
    let error = opts.error.unwrap_or(-1);
    Ok(Control::BeheraPasswordPolicy {
        expire: opts.expire.unwrap_or(-1),
        grace: opts.grace.unwrap_or(-1),
        error,
        error_string: if error >= 0 {
            behera_error_description(error).to_string()
        } else {
            String::new()
        },
    })
}

impl Control {
    /// The control's OID.
    pub fn oid(&self) -> &str {
        match self {
            Control::Paging { .. } => CONTROL_PAGING,
            Control::ManageDsaIt { .. } => CONTROL_MANAGE_DSA_IT,
            Control::BeheraPasswordPolicy { .. } => CONTROL_BEHERA_PASSWORD_POLICY,
            Control::VchuPasswordMustChange { .. } => CONTROL_VCHU_PASSWORD_MUST_CHANGE,
            Control::VchuPasswordWarning { .. } => CONTROL_VCHU_PASSWORD_WARNING,
            Control::MicrosoftNotification => CONTROL_MICROSOFT_NOTIFICATION,
            Control::MicrosoftShowDeleted => CONTROL_MICROSOFT_SHOW_DELETED,
            Control::MicrosoftServerLinkTtl => CONTROL_MICROSOFT_SERVER_LINK_TTL,
            Control::Generic { oid, .. } => oid,
        }
    }

    /// Encode to the control's packet form.
    pub fn encode(&self) -> Packet {
        let mut packet = Packet::sequence().with_child(Packet::octet_string(self.oid()));
        match self {
            Control::Paging { size, cookie } => {
                let value = Packet::sequence()
                    .with_child(Packet::integer(i64::from(*size)))
                    .with_child(Packet::octet_string(cookie.clone()));
                packet.push(Packet::octet_string(value.encode()));
            }
            Control::ManageDsaIt { criticality } => {
                if *criticality {
                    packet.push(Packet::boolean(true));
                }
            }
            Control::BeheraPasswordPolicy {
                expire,
                grace,
                error,
                ..
            } => {
                let mut value = Packet::sequence();
                if *expire >= 0 {
                    value.push(
                        Packet::constructed(Class::Context, 0)
                            .with_child(Packet::context(0, Packet::integer(*expire).data)),
                    );
                }
                if *grace >= 0 {
                    value.push(
                        Packet::constructed(Class::Context, 0)
                            .with_child(Packet::context(1, Packet::integer(*grace).data)),
                    );
                }
                if *error >= 0 {
                    value.push(Packet::context(1, Packet::enumerated(*error).data));
                }
                packet.push(Packet::octet_string(value.encode()));
            }
            Control::VchuPasswordMustChange { must_change } => {
                let flag = if *must_change { "1" } else { "0" };
                packet.push(Packet::octet_string(flag));
            }
            Control::VchuPasswordWarning { expire_secs } => {
                packet.push(Packet::octet_string(expire_secs.to_string()));
            }
            Control::MicrosoftNotification
            | Control::MicrosoftShowDeleted
            | Control::MicrosoftServerLinkTtl => {}
            Control::Generic {
                criticality, value, ..
            } => {
                if *criticality {
                    packet.push(Packet::boolean(true));
                }
                if let Some(value) = value {
                    packet.push(Packet::octet_string(value.clone()));
                }
            }
        }
        packet
    }

    /// Human-readable description, for logs.
    pub fn describe(&self) -> String {
        match self {
            Control::Paging { size, cookie } => format!(
                "Control Type: Paging ({}) Size: {} Cookie: {} bytes",
                CONTROL_PAGING,
                size,
                cookie.len()
            ),
            Control::ManageDsaIt { criticality } => format!(
                "Control Type: ManageDsaIT ({CONTROL_MANAGE_DSA_IT}) Criticality: {criticality}"
            ),
            Control::BeheraPasswordPolicy {
                expire,
                grace,
                error,
                error_string,
            } => format!(
                "Control Type: Password Policy ({CONTROL_BEHERA_PASSWORD_POLICY}) Expire: {expire} Grace: {grace} Error: {error}, ErrorString: {error_string}"
            ),
            Control::VchuPasswordMustChange { must_change } => format!(
                "Control Type: VChu Password Must Change ({CONTROL_VCHU_PASSWORD_MUST_CHANGE}) MustChange: {must_change}"
            ),
            Control::VchuPasswordWarning { expire_secs } => format!(
                "Control Type: VChu Password Warning ({CONTROL_VCHU_PASSWORD_WARNING}) Expire: {expire_secs}"
            ),
            Control::MicrosoftNotification => format!(
                "Control Type: Change Notification ({CONTROL_MICROSOFT_NOTIFICATION})"
            ),
            Control::MicrosoftShowDeleted => {
                format!("Control Type: Show Deleted ({CONTROL_MICROSOFT_SHOW_DELETED})")
            }
            Control::MicrosoftServerLinkTtl => {
                format!("Control Type: Server Link TTL ({CONTROL_MICROSOFT_SERVER_LINK_TTL})")
            }
            Control::Generic {
                oid,
                criticality,
                value,
            } => format!(
                "Control Type: Generic ({}) Criticality: {} Value: {} bytes",
                oid,
                criticality,
                value.as_ref().map(Vec::len).unwrap_or(0)
            ),
        }
    }
}

/// Wrap encoded controls in the envelope's `[0]` controls child.
pub fn encode_controls(controls: &[Control]) -> Packet {
    let mut packet = Packet::constructed(Class::Context, 0);
    for control in controls {
        packet.push(control.encode());
    }
    packet
}

/// Decode the envelope's `[0]` controls child into control values.
pub fn decode_controls(packet: &Packet) -> Result<Vec<Control>> {
    packet.assert(
        Class::Context,
        PacketKind::Constructed,
        Assert {
            tag: Some(0),
            ..Default::default()
        },
    )?;
    packet.children.iter().map(decode_control).collect()
}

/// Decode one control packet, dispatching on its OID child.
pub fn decode_control(packet: &Packet) -> Result<Control> {
    const OP: &str = "control.decode_control";
    packet.assert(
        Class::Universal,
        PacketKind::Constructed,
        Assert {
            tag: Some(TAG_SEQUENCE),
            min_children: Some(1),
            child: None,
            exact_children: None,
        },
    )?;
    let oid_child = packet.child(0)?;
    if oid_child.tag != TAG_OCTET_STRING || oid_child.class != Class::Universal {
        return Err(Error::InvalidParameter(format!(
            "{OP}: control type must be an octet string"
        )));
    }
    let oid = oid_child.as_text()?;

    let mut criticality = false;
    let mut value: Option<&[u8]> = None;
    for child in &packet.children[1..] {
        match child.tag {
            TAG_BOOLEAN => criticality = child.as_bool()?,
            TAG_OCTET_STRING => value = Some(&child.data),
            other => {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: unexpected control child tag {other}"
                )))
            }
        }
    }

    match oid.as_str() {
        CONTROL_PAGING => decode_paging(value),
        CONTROL_MANAGE_DSA_IT => Ok(Control::ManageDsaIt { criticality }),
        CONTROL_BEHERA_PASSWORD_POLICY => decode_behera(value),
        CONTROL_VCHU_PASSWORD_MUST_CHANGE => {
            let must_change = match value {
                Some(b) => b != &b"0"[..],
                None => true,
            };
            Ok(Control::VchuPasswordMustChange { must_change })
        }
        CONTROL_VCHU_PASSWORD_WARNING => {
            let raw = value.ok_or_else(|| {
                Error::InvalidParameter(format!("{OP}: password warning control has no value"))
            })?;
            let text = std::str::from_utf8(raw).map_err(|_| {
                Error::InvalidParameter(format!("{OP}: password warning value is not UTF-8"))
            })?;
            let expire_secs: i64 = text.parse().map_err(|_| {
                Error::InvalidParameter(format!(
                    "{OP}: password warning value {text:?} is not an integer"
                ))
            })?;
            Ok(Control::VchuPasswordWarning { expire_secs })
        }
        CONTROL_MICROSOFT_NOTIFICATION => Ok(Control::MicrosoftNotification),
        CONTROL_MICROSOFT_SHOW_DELETED => Ok(Control::MicrosoftShowDeleted),
        CONTROL_MICROSOFT_SERVER_LINK_TTL => Ok(Control::MicrosoftServerLinkTtl),
        _ => Ok(Control::Generic {
            oid,
            criticality,
            value: value.map(<[u8]>::to_vec),
        }),
    }
}

fn decode_paging(value: Option<&[u8]>) -> Result<Control> {
    const OP: &str = "control.decode_paging";
    let raw = value
        .ok_or_else(|| Error::InvalidParameter(format!("{OP}: paging control has no value")))?;
    let inner = Packet::decode(raw)?;
    if inner.children.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "{OP}: paging value has no children"
        )));
    }
    let size = inner.child(0)?.as_i64()?;
    let size = u32::try_from(size)
        .map_err(|_| Error::InvalidParameter(format!("{OP}: paging size {size} out of range")))?;
    let cookie = match inner.children.get(1) {
        Some(c) => c.data.clone(),
        None => Vec::new(),
    };
    Ok(Control::Paging { size, cookie })
}

fn decode_behera(value: Option<&[u8]>) -> Result<Control> {
    const OP: &str = "control.decode_behera";
    let raw = value.ok_or_else(|| {
        Error::InvalidParameter(format!("{OP}: password policy control has no value"))
    })?;
    let inner = Packet::decode(raw)?;
    if inner.children.is_empty() {
        return Err(Error::InvalidParameter(format!(
            "{OP}: password policy value has no children"
        )));
    }
    let mut expire: i64 = -1;
    let mut grace: i64 = -1;
    let mut error: i64 = -1;
    let mut error_string = String::new();
    for child in &inner.children {
        match (child.tag, child.kind) {
            // warning [0] CHOICE { timeBeforeExpiration [0], graceAuthNsRemaining [1] }
            (0, PacketKind::Constructed) => {
                let warning = child.child(0)?;
                match warning.tag {
                    0 => expire = warning.as_i64()?,
                    1 => grace = warning.as_i64()?,
                    other => {
                        return Err(Error::InvalidParameter(format!(
                            "{OP}: unknown warning tag {other}"
                        )))
                    }
                }
            }
            // error [1] ENUMERATED (0..8)
            (1, PacketKind::Primitive) => {
                let code = child.as_i64()?;
                if !(0..=8).contains(&code) {
                    return Err(Error::InvalidParameter(format!(
                        "{OP}: invalid PasswordPolicyResponse enum value {code}"
                    )));
                }
                error = code;
                error_string = behera_error_description(code).to_string();
            }
            (tag, kind) => {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: unexpected password policy child tag {tag} ({kind:?})"
                )))
            }
        }
    }
    Ok(Control::BeheraPasswordPolicy {
        expire,
        grace,
        error,
        error_string,
    })
}
