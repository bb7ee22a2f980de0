//! Search filter decompiler.
//!
//! A search request carries its filter as a BER subtree (RFC 4511 §4.5.1.7).
//! Handlers and route predicates work with the canonical textual form
//! (RFC 4515), e.g. `(&(uid=alice)(cn=*))`, so the decoder turns the subtree
//! into a [`Filter`] and prints it.

use std::fmt;

use crate::ber::{Class, Packet, PacketKind};
use crate::{Error, Result};

// Filter CHOICE context tags.
const FILTER_AND: u64 = 0;
const FILTER_OR: u64 = 1;
const FILTER_NOT: u64 = 2;
const FILTER_EQUALITY: u64 = 3;
const FILTER_SUBSTRINGS: u64 = 4;
const FILTER_GREATER_OR_EQUAL: u64 = 5;
const FILTER_LESS_OR_EQUAL: u64 = 6;
const FILTER_PRESENT: u64 = 7;
const FILTER_APPROX: u64 = 8;
const FILTER_EXTENSIBLE: u64 = 9;

// SubstringFilter item context tags.
const SUBSTRING_INITIAL: u64 = 0;
const SUBSTRING_ANY: u64 = 1;
const SUBSTRING_FINAL: u64 = 2;

// MatchingRuleAssertion context tags.
const MATCHING_RULE_ID: u64 = 1;
const MATCHING_RULE_TYPE: u64 = 2;
const MATCHING_RULE_VALUE: u64 = 3;
const MATCHING_RULE_DN_ATTRS: u64 = 4;

/// A parsed search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    EqualityMatch { attribute: String, value: Vec<u8> },
    Substrings { attribute: String, items: Vec<SubstringItem> },
    GreaterOrEqual { attribute: String, value: Vec<u8> },
    LessOrEqual { attribute: String, value: Vec<u8> },
    Present(String),
    ApproxMatch { attribute: String, value: Vec<u8> },
    ExtensibleMatch {
        matching_rule: Option<String>,
        attribute: Option<String>,
        value: Vec<u8>,
        dn_attributes: bool,
    },
}

/// One component of a substrings filter, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstringItem {
    Initial(Vec<u8>),
    Any(Vec<u8>),
    Final(Vec<u8>),
}

/// Decode a filter subtree and print its canonical textual form.
pub fn decompile(packet: &Packet) -> Result<String> {
    Ok(Filter::from_packet(packet)?.to_string())
}

impl Filter {
    /// Build a filter from the search request's filter child packet.
    pub fn from_packet(packet: &Packet) -> Result<Filter> {
        const OP: &str = "filter.from_packet";
        if packet.class != Class::Context {
            return Err(Error::InvalidParameter(format!(
                "{OP}: filter must be context class, got {:?}",
                packet.class
            )));
        }
        match packet.tag {
            FILTER_AND | FILTER_OR => {
                let mut subs = Vec::with_capacity(packet.children.len());
                for child in &packet.children {
                    subs.push(Filter::from_packet(child)?);
                }
                if packet.tag == FILTER_AND {
                    Ok(Filter::And(subs))
                } else {
                    Ok(Filter::Or(subs))
                }
            }
            FILTER_NOT => {
                let inner = packet.child(0).map_err(|_| {
                    Error::InvalidParameter(format!("{OP}: not-filter is missing its operand"))
                })?;
                Ok(Filter::Not(Box::new(Filter::from_packet(inner)?)))
            }
            FILTER_EQUALITY => {
                let (attribute, value) = attribute_value_assertion(packet)?;
                Ok(Filter::EqualityMatch { attribute, value })
            }
            FILTER_GREATER_OR_EQUAL => {
                let (attribute, value) = attribute_value_assertion(packet)?;
                Ok(Filter::GreaterOrEqual { attribute, value })
            }
            FILTER_LESS_OR_EQUAL => {
                let (attribute, value) = attribute_value_assertion(packet)?;
                Ok(Filter::LessOrEqual { attribute, value })
            }
            FILTER_APPROX => {
                let (attribute, value) = attribute_value_assertion(packet)?;
                Ok(Filter::ApproxMatch { attribute, value })
            }
            FILTER_PRESENT => {
                if packet.kind != PacketKind::Primitive {
                    return Err(Error::InvalidParameter(format!(
                        "{OP}: present filter must be primitive"
                    )));
                }
                Ok(Filter::Present(
                    String::from_utf8_lossy(&packet.data).into_owned(),
                ))
            }
            FILTER_SUBSTRINGS => {
                let attribute = packet.child(0)?.as_text()?;
                let seq = packet.child(1)?;
                let mut items = Vec::with_capacity(seq.children.len());
                for sub in &seq.children {
                    let item = match sub.tag {
                        SUBSTRING_INITIAL => SubstringItem::Initial(sub.data.clone()),
                        SUBSTRING_ANY => SubstringItem::Any(sub.data.clone()),
                        SUBSTRING_FINAL => SubstringItem::Final(sub.data.clone()),
                        other => {
                            return Err(Error::InvalidParameter(format!(
                                "{OP}: unknown substring item tag {other}"
                            )))
                        }
                    };
                    items.push(item);
                }
                Ok(Filter::Substrings { attribute, items })
            }
            FILTER_EXTENSIBLE => {
                let mut matching_rule = None;
                let mut attribute = None;
                let mut value = Vec::new();
                let mut dn_attributes = false;
                for child in &packet.children {
                    match child.tag {
                        MATCHING_RULE_ID => {
                            matching_rule = Some(String::from_utf8_lossy(&child.data).into_owned())
                        }
                        MATCHING_RULE_TYPE => {
                            attribute = Some(String::from_utf8_lossy(&child.data).into_owned())
                        }
                        MATCHING_RULE_VALUE => value = child.data.clone(),
                        MATCHING_RULE_DN_ATTRS => dn_attributes = child.as_bool()?,
                        other => {
                            return Err(Error::InvalidParameter(format!(
                                "{OP}: unknown matching rule assertion tag {other}"
                            )))
                        }
                    }
                }
                Ok(Filter::ExtensibleMatch {
                    matching_rule,
                    attribute,
                    value,
                    dn_attributes,
                })
            }
            other => Err(Error::InvalidParameter(format!(
                "{OP}: unknown filter tag {other}"
            ))),
        }
    }
}

/// AttributeValueAssertion: the two octet strings inside equality, ordering
/// and approx filters.
fn attribute_value_assertion(packet: &Packet) -> Result<(String, Vec<u8>)> {
    const OP: &str = "filter.ava";
    if packet.children.len() != 2 {
        return Err(Error::InvalidParameter(format!(
            "{OP}: assertion needs 2 children, got {}",
            packet.children.len()
        )));
    }
    let attribute = packet.children[0].as_text()?;
    let value = packet.children[1].data.clone();
    Ok((attribute, value))
}

/// RFC 4515 value escaping: parentheses, asterisk, backslash, NUL and other
/// control bytes become `\XX` hex escapes.
fn escape_value(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    let text = String::from_utf8_lossy(raw);
    for c in text.chars() {
        match c {
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '*' => out.push_str("\\2a"),
            '\\' => out.push_str("\\5c"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(subs) => {
                write!(f, "(&")?;
                for s in subs {
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
            Filter::Or(subs) => {
                write!(f, "(|")?;
                for s in subs {
                    write!(f, "{s}")?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::EqualityMatch { attribute, value } => {
                write!(f, "({attribute}={})", escape_value(value))
            }
            Filter::GreaterOrEqual { attribute, value } => {
                write!(f, "({attribute}>={})", escape_value(value))
            }
            Filter::LessOrEqual { attribute, value } => {
                write!(f, "({attribute}<={})", escape_value(value))
            }
            Filter::ApproxMatch { attribute, value } => {
                write!(f, "({attribute}~={})", escape_value(value))
            }
            Filter::Present(attribute) => write!(f, "({attribute}=*)"),
            Filter::Substrings { attribute, items } => {
                write!(f, "({attribute}=")?;
                let mut has_final = false;
                for item in items {
                    match item {
                        SubstringItem::Initial(v) => write!(f, "{}", escape_value(v))?,
                        SubstringItem::Any(v) => write!(f, "*{}", escape_value(v))?,
                        SubstringItem::Final(v) => {
                            has_final = true;
                            write!(f, "*{}", escape_value(v))?;
                        }
                    }
                }
                // A final component supplies the right edge; otherwise the
                // pattern stays open-ended.
                if !has_final {
                    write!(f, "*")?;
                }
                write!(f, ")")
            }
            Filter::ExtensibleMatch {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => {
                write!(f, "(")?;
                if let Some(attr) = attribute {
                    write!(f, "{attr}")?;
                }
                if *dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(rule) = matching_rule {
                    write!(f, ":{rule}")?;
                }
                write!(f, ":={})", escape_value(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ber::Class;

    fn ava(tag: u64, attr: &str, value: &str) -> Packet {
        Packet::constructed(Class::Context, tag)
            .with_child(Packet::octet_string(attr))
            .with_child(Packet::octet_string(value))
    }

    #[test]
    fn test_equality() {
        let p = ava(3, "uid", "alice");
        assert_eq!(decompile(&p).unwrap(), "(uid=alice)");
    }

    #[test]
    fn test_present() {
        let p = Packet::context(7, b"objectClass".to_vec());
        assert_eq!(decompile(&p).unwrap(), "(objectClass=*)");
    }

    #[test]
    fn test_and_with_nested() {
        let p = Packet::constructed(Class::Context, 0)
            .with_child(ava(3, "uid", "alice"))
            .with_child(Packet::context(7, b"cn".to_vec()));
        assert_eq!(decompile(&p).unwrap(), "(&(uid=alice)(cn=*))");
    }

    #[test]
    fn test_or_and_not() {
        let p = Packet::constructed(Class::Context, 1)
            .with_child(ava(3, "cn", "a"))
            .with_child(
                Packet::constructed(Class::Context, 2).with_child(ava(3, "cn", "b")),
            );
        assert_eq!(decompile(&p).unwrap(), "(|(cn=a)(!(cn=b)))");
    }

    #[test]
    fn test_ordering_and_approx() {
        assert_eq!(decompile(&ava(5, "age", "21")).unwrap(), "(age>=21)");
        assert_eq!(decompile(&ava(6, "age", "65")).unwrap(), "(age<=65)");
        assert_eq!(decompile(&ava(8, "cn", "smith")).unwrap(), "(cn~=smith)");
    }

    #[test]
    fn test_substrings_initial_any_final() {
        let seq = Packet::sequence()
            .with_child(Packet::context(0, b"abc".to_vec()))
            .with_child(Packet::context(1, b"mid".to_vec()))
            .with_child(Packet::context(2, b"xyz".to_vec()));
        let p = Packet::constructed(Class::Context, 4)
            .with_child(Packet::octet_string("cn"))
            .with_child(seq);
        assert_eq!(decompile(&p).unwrap(), "(cn=abc*mid*xyz)");
    }

    #[test]
    fn test_substrings_any_only() {
        let seq = Packet::sequence().with_child(Packet::context(1, b"mid".to_vec()));
        let p = Packet::constructed(Class::Context, 4)
            .with_child(Packet::octet_string("cn"))
            .with_child(seq);
        assert_eq!(decompile(&p).unwrap(), "(cn=*mid*)");
    }

    #[test]
    fn test_substrings_initial_only() {
        let seq = Packet::sequence().with_child(Packet::context(0, b"ab".to_vec()));
        let p = Packet::constructed(Class::Context, 4)
            .with_child(Packet::octet_string("cn"))
            .with_child(seq);
        assert_eq!(decompile(&p).unwrap(), "(cn=ab*)");
    }

    #[test]
    fn test_extensible_match() {
        let p = Packet::constructed(Class::Context, 9)
            .with_child(Packet::context(1, b"caseExactMatch".to_vec()))
            .with_child(Packet::context(2, b"cn".to_vec()))
            .with_child(Packet::context(3, b"Alice".to_vec()));
        assert_eq!(decompile(&p).unwrap(), "(cn:caseExactMatch:=Alice)");
    }

    #[test]
    fn test_value_escaping() {
        let p = ava(3, "cn", "a*b(c)d\\e");
        assert_eq!(decompile(&p).unwrap(), "(cn=a\\2ab\\28c\\29d\\5ce)");
    }

    #[test]
    fn test_unknown_tag_fails() {
        let p = Packet::context(12, b"zzz".to_vec());
        assert!(decompile(&p).is_err());
    }

    #[test]
    fn test_universal_class_fails() {
        let p = Packet::octet_string("nope");
        assert!(decompile(&p).is_err());
    }
}
