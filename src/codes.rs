//! LDAP protocol constants: result codes, application codes, search scope and
//! extended operation names (RFC 4511 plus commonly used extensions).

use crate::{Error, Result};

// Result codes (RFC 4511 appendix A, plus RFC 4533 SyncRefreshRequired).
pub const RESULT_SUCCESS: u16 = 0;
pub const RESULT_OPERATIONS_ERROR: u16 = 1;
pub const RESULT_PROTOCOL_ERROR: u16 = 2;
pub const RESULT_TIME_LIMIT_EXCEEDED: u16 = 3;
pub const RESULT_SIZE_LIMIT_EXCEEDED: u16 = 4;
pub const RESULT_COMPARE_FALSE: u16 = 5;
pub const RESULT_COMPARE_TRUE: u16 = 6;
pub const RESULT_AUTH_METHOD_NOT_SUPPORTED: u16 = 7;
pub const RESULT_STRONG_AUTH_REQUIRED: u16 = 8;
pub const RESULT_REFERRAL: u16 = 10;
pub const RESULT_ADMIN_LIMIT_EXCEEDED: u16 = 11;
pub const RESULT_UNAVAILABLE_CRITICAL_EXTENSION: u16 = 12;
pub const RESULT_CONFIDENTIALITY_REQUIRED: u16 = 13;
pub const RESULT_SASL_BIND_IN_PROGRESS: u16 = 14;
pub const RESULT_NO_SUCH_ATTRIBUTE: u16 = 16;
pub const RESULT_UNDEFINED_ATTRIBUTE_TYPE: u16 = 17;
pub const RESULT_INAPPROPRIATE_MATCHING: u16 = 18;
pub const RESULT_CONSTRAINT_VIOLATION: u16 = 19;
pub const RESULT_ATTRIBUTE_OR_VALUE_EXISTS: u16 = 20;
pub const RESULT_INVALID_ATTRIBUTE_SYNTAX: u16 = 21;
pub const RESULT_NO_SUCH_OBJECT: u16 = 32;
pub const RESULT_ALIAS_PROBLEM: u16 = 33;
pub const RESULT_INVALID_DN_SYNTAX: u16 = 34;
pub const RESULT_IS_LEAF: u16 = 35;
pub const RESULT_ALIAS_DEREFERENCING_PROBLEM: u16 = 36;
pub const RESULT_INAPPROPRIATE_AUTHENTICATION: u16 = 48;
pub const RESULT_INVALID_CREDENTIALS: u16 = 49;
pub const RESULT_INSUFFICIENT_ACCESS_RIGHTS: u16 = 50;
pub const RESULT_BUSY: u16 = 51;
pub const RESULT_UNAVAILABLE: u16 = 52;
pub const RESULT_UNWILLING_TO_PERFORM: u16 = 53;
pub const RESULT_LOOP_DETECT: u16 = 54;
pub const RESULT_SORT_CONTROL_MISSING: u16 = 60;
pub const RESULT_OFFSET_RANGE_ERROR: u16 = 61;
pub const RESULT_NAMING_VIOLATION: u16 = 64;
pub const RESULT_OBJECT_CLASS_VIOLATION: u16 = 65;
pub const RESULT_NOT_ALLOWED_ON_NON_LEAF: u16 = 66;
pub const RESULT_NOT_ALLOWED_ON_RDN: u16 = 67;
pub const RESULT_ENTRY_ALREADY_EXISTS: u16 = 68;
pub const RESULT_OBJECT_CLASS_MODS_PROHIBITED: u16 = 69;
pub const RESULT_RESULTS_TOO_LARGE: u16 = 70;
pub const RESULT_AFFECTS_MULTIPLE_DSAS: u16 = 71;
pub const RESULT_VIRTUAL_LIST_VIEW_ERROR: u16 = 76;
pub const RESULT_OTHER: u16 = 80;
pub const RESULT_SERVER_DOWN: u16 = 81;
pub const RESULT_LOCAL_ERROR: u16 = 82;
pub const RESULT_ENCODING_ERROR: u16 = 83;
pub const RESULT_DECODING_ERROR: u16 = 84;
pub const RESULT_TIMEOUT: u16 = 85;
pub const RESULT_AUTH_UNKNOWN: u16 = 86;
pub const RESULT_FILTER_ERROR: u16 = 87;
pub const RESULT_USER_CANCELED: u16 = 88;
pub const RESULT_PARAM_ERROR: u16 = 89;
pub const RESULT_NO_MEMORY: u16 = 90;
pub const RESULT_CONNECT_ERROR: u16 = 91;
pub const RESULT_NOT_SUPPORTED: u16 = 92;
pub const RESULT_CONTROL_NOT_FOUND: u16 = 93;
pub const RESULT_NO_RESULTS_RETURNED: u16 = 94;
pub const RESULT_MORE_RESULTS_TO_RETURN: u16 = 95;
pub const RESULT_CLIENT_LOOP: u16 = 96;
pub const RESULT_REFERRAL_LIMIT_EXCEEDED: u16 = 97;
pub const RESULT_INVALID_RESPONSE: u16 = 100;
pub const RESULT_AMBIGUOUS_RESPONSE: u16 = 101;
pub const RESULT_TLS_NOT_SUPPORTED: u16 = 112;
pub const RESULT_INTERMEDIATE_RESPONSE: u16 = 113;
pub const RESULT_UNKNOWN_TYPE: u16 = 114;
pub const RESULT_CANCELED: u16 = 118;
pub const RESULT_NO_SUCH_OPERATION: u16 = 119;
pub const RESULT_TOO_LATE: u16 = 120;
pub const RESULT_CANNOT_CANCEL: u16 = 121;
pub const RESULT_ASSERTION_FAILED: u16 = 122;
pub const RESULT_AUTHORIZATION_DENIED: u16 = 123;
pub const RESULT_SYNC_REFRESH_REQUIRED: u16 = 4096;

/// Human-readable description of a result code, for diagnostics and logs.
pub fn result_code_description(code: u16) -> &'static str {
    match code {
        RESULT_SUCCESS => "Success",
        RESULT_OPERATIONS_ERROR => "Operations Error",
        RESULT_PROTOCOL_ERROR => "Protocol Error",
        RESULT_TIME_LIMIT_EXCEEDED => "Time Limit Exceeded",
        RESULT_SIZE_LIMIT_EXCEEDED => "Size Limit Exceeded",
        RESULT_COMPARE_FALSE => "Compare False",
        RESULT_COMPARE_TRUE => "Compare True",
        RESULT_AUTH_METHOD_NOT_SUPPORTED => "Auth Method Not Supported",
        RESULT_STRONG_AUTH_REQUIRED => "Strong Auth Required",
        RESULT_REFERRAL => "Referral",
        RESULT_ADMIN_LIMIT_EXCEEDED => "Admin Limit Exceeded",
        RESULT_UNAVAILABLE_CRITICAL_EXTENSION => "Unavailable Critical Extension",
        RESULT_CONFIDENTIALITY_REQUIRED => "Confidentiality Required",
        RESULT_SASL_BIND_IN_PROGRESS => "Sasl Bind In Progress",
        RESULT_NO_SUCH_ATTRIBUTE => "No Such Attribute",
        RESULT_UNDEFINED_ATTRIBUTE_TYPE => "Undefined Attribute Type",
        RESULT_INAPPROPRIATE_MATCHING => "Inappropriate Matching",
        RESULT_CONSTRAINT_VIOLATION => "Constraint Violation",
        RESULT_ATTRIBUTE_OR_VALUE_EXISTS => "Attribute Or Value Exists",
        RESULT_INVALID_ATTRIBUTE_SYNTAX => "Invalid Attribute Syntax",
        RESULT_NO_SUCH_OBJECT => "No Such Object",
        RESULT_ALIAS_PROBLEM => "Alias Problem",
        RESULT_INVALID_DN_SYNTAX => "Invalid DN Syntax",
        RESULT_IS_LEAF => "Is Leaf",
        RESULT_ALIAS_DEREFERENCING_PROBLEM => "Alias Dereferencing Problem",
        RESULT_INAPPROPRIATE_AUTHENTICATION => "Inappropriate Authentication",
        RESULT_INVALID_CREDENTIALS => "Invalid Credentials",
        RESULT_INSUFFICIENT_ACCESS_RIGHTS => "Insufficient Access Rights",
        RESULT_BUSY => "Busy",
        RESULT_UNAVAILABLE => "Unavailable",
        RESULT_UNWILLING_TO_PERFORM => "Unwilling To Perform",
        RESULT_LOOP_DETECT => "Loop Detect",
        RESULT_SORT_CONTROL_MISSING => "Sort Control Missing",
        RESULT_OFFSET_RANGE_ERROR => "Result Offset Range Error",
        RESULT_NAMING_VIOLATION => "Naming Violation",
        RESULT_OBJECT_CLASS_VIOLATION => "Object Class Violation",
        RESULT_NOT_ALLOWED_ON_NON_LEAF => "Not Allowed On Non Leaf",
        RESULT_NOT_ALLOWED_ON_RDN => "Not Allowed On RDN",
        RESULT_ENTRY_ALREADY_EXISTS => "Entry Already Exists",
        RESULT_OBJECT_CLASS_MODS_PROHIBITED => "Object Class Mods Prohibited",
        RESULT_RESULTS_TOO_LARGE => "Results Too Large",
        RESULT_AFFECTS_MULTIPLE_DSAS => "Affects Multiple DSAs",
        RESULT_VIRTUAL_LIST_VIEW_ERROR => "Virtual List View Error",
        RESULT_OTHER => "Other",
        RESULT_SERVER_DOWN => "Cannot establish a connection",
        RESULT_LOCAL_ERROR => "An error occurred",
        RESULT_ENCODING_ERROR => "LDAP encountered an error while encoding",
        RESULT_DECODING_ERROR => "LDAP encountered an error while decoding",
        RESULT_TIMEOUT => "LDAP timeout while waiting for a response from the server",
        RESULT_AUTH_UNKNOWN => "The auth method requested in a bind request is unknown",
        RESULT_FILTER_ERROR => "An error occurred while encoding the given search filter",
        RESULT_USER_CANCELED => "The user canceled the operation",
        RESULT_PARAM_ERROR => "An invalid parameter was specified",
        RESULT_NO_MEMORY => "Out of memory error",
        RESULT_CONNECT_ERROR => "A connection to the server could not be established",
        RESULT_NOT_SUPPORTED => "An attempt has been made to use a feature not supported by LDAP",
        RESULT_CONTROL_NOT_FOUND => "The controls required to perform the requested operation were not found",
        RESULT_NO_RESULTS_RETURNED => "No results were returned from the server",
        RESULT_MORE_RESULTS_TO_RETURN => "There are more results in the chain of results",
        RESULT_CLIENT_LOOP => "A loop has been detected, for example when following referrals",
        RESULT_REFERRAL_LIMIT_EXCEEDED => "The referral hop limit has been exceeded",
        RESULT_INVALID_RESPONSE => "Invalid Response",
        RESULT_AMBIGUOUS_RESPONSE => "Ambiguous Response",
        RESULT_TLS_NOT_SUPPORTED => "Tls Not Supported",
        RESULT_INTERMEDIATE_RESPONSE => "Intermediate Response",
        RESULT_UNKNOWN_TYPE => "Unknown Type",
        RESULT_CANCELED => "Operation was canceled",
        RESULT_NO_SUCH_OPERATION => "Server has no knowledge of the operation requested for cancellation",
        RESULT_TOO_LATE => "Too late to cancel the outstanding operation",
        RESULT_CANNOT_CANCEL => "The identified operation does not support cancellation",
        RESULT_ASSERTION_FAILED => "An assertion control evaluated to false",
        RESULT_AUTHORIZATION_DENIED => "Authorization Denied",
        RESULT_SYNC_REFRESH_REQUIRED => "Refresh Required",
        _ => "Unknown result code",
    }
}

// Application codes (the tag of an LDAPMessage's protocol-op child).
pub const APPLICATION_BIND_REQUEST: u64 = 0;
pub const APPLICATION_BIND_RESPONSE: u64 = 1;
pub const APPLICATION_UNBIND_REQUEST: u64 = 2;
pub const APPLICATION_SEARCH_REQUEST: u64 = 3;
pub const APPLICATION_SEARCH_RESULT_ENTRY: u64 = 4;
pub const APPLICATION_SEARCH_RESULT_DONE: u64 = 5;
pub const APPLICATION_MODIFY_REQUEST: u64 = 6;
pub const APPLICATION_MODIFY_RESPONSE: u64 = 7;
pub const APPLICATION_ADD_REQUEST: u64 = 8;
pub const APPLICATION_ADD_RESPONSE: u64 = 9;
pub const APPLICATION_DEL_REQUEST: u64 = 10;
pub const APPLICATION_DEL_RESPONSE: u64 = 11;
pub const APPLICATION_MODIFY_DN_REQUEST: u64 = 12;
pub const APPLICATION_MODIFY_DN_RESPONSE: u64 = 13;
pub const APPLICATION_COMPARE_REQUEST: u64 = 14;
pub const APPLICATION_COMPARE_RESPONSE: u64 = 15;
pub const APPLICATION_ABANDON_REQUEST: u64 = 16;
pub const APPLICATION_SEARCH_RESULT_REFERENCE: u64 = 19;
pub const APPLICATION_EXTENDED_REQUEST: u64 = 23;
pub const APPLICATION_EXTENDED_RESPONSE: u64 = 24;

/// Human-readable description of an application code.
pub fn application_code_description(code: u64) -> &'static str {
    match code {
        APPLICATION_BIND_REQUEST => "Bind Request",
        APPLICATION_BIND_RESPONSE => "Bind Response",
        APPLICATION_UNBIND_REQUEST => "Unbind Request",
        APPLICATION_SEARCH_REQUEST => "Search Request",
        APPLICATION_SEARCH_RESULT_ENTRY => "Search Result Entry",
        APPLICATION_SEARCH_RESULT_DONE => "Search Result Done",
        APPLICATION_MODIFY_REQUEST => "Modify Request",
        APPLICATION_MODIFY_RESPONSE => "Modify Response",
        APPLICATION_ADD_REQUEST => "Add Request",
        APPLICATION_ADD_RESPONSE => "Add Response",
        APPLICATION_DEL_REQUEST => "Del Request",
        APPLICATION_DEL_RESPONSE => "Del Response",
        APPLICATION_MODIFY_DN_REQUEST => "Modify DN Request",
        APPLICATION_MODIFY_DN_RESPONSE => "Modify DN Response",
        APPLICATION_COMPARE_REQUEST => "Compare Request",
        APPLICATION_COMPARE_RESPONSE => "Compare Response",
        APPLICATION_ABANDON_REQUEST => "Abandon Request",
        APPLICATION_SEARCH_RESULT_REFERENCE => "Search Result Reference",
        APPLICATION_EXTENDED_REQUEST => "Extended Request",
        APPLICATION_EXTENDED_RESPONSE => "Extended Response",
        _ => "Unknown Application",
    }
}

/// The response application code answering a given request application
/// code. Requests without a response (unbind, abandon) and unknown codes
/// fall back to the extended response so an error can still be delivered.
pub fn response_application_code(request_code: u64) -> u64 {
    match request_code {
        APPLICATION_BIND_REQUEST => APPLICATION_BIND_RESPONSE,
        APPLICATION_SEARCH_REQUEST => APPLICATION_SEARCH_RESULT_DONE,
        APPLICATION_MODIFY_REQUEST => APPLICATION_MODIFY_RESPONSE,
        APPLICATION_ADD_REQUEST => APPLICATION_ADD_RESPONSE,
        APPLICATION_DEL_REQUEST => APPLICATION_DEL_RESPONSE,
        APPLICATION_MODIFY_DN_REQUEST => APPLICATION_MODIFY_DN_RESPONSE,
        APPLICATION_COMPARE_REQUEST => APPLICATION_COMPARE_RESPONSE,
        _ => APPLICATION_EXTENDED_RESPONSE,
    }
}

/// The scope of a search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the entry named by the base DN.
    BaseObject = 0,
    /// Only the immediate children of the base entry, not the entry itself.
    SingleLevel = 1,
    /// The base entry and all of its subordinates to any depth.
    WholeSubtree = 2,
}

impl TryFrom<i64> for Scope {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Scope::BaseObject),
            1 => Ok(Scope::SingleLevel),
            2 => Ok(Scope::WholeSubtree),
            _ => Err(Error::InvalidParameter(format!(
                "codes.scope: invalid search scope {value}"
            ))),
        }
    }
}

/// The authentication choice of a bind request. Only simple (user name plus
/// password) binds are decoded; SASL choices fail message decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChoice {
    Simple,
}

// Extended operation names.
pub const EXTENDED_OPERATION_DISCONNECTION: &str = "1.3.6.1.4.1.1466.2003";
pub const EXTENDED_OPERATION_CANCEL: &str = "1.3.6.1.1.8";
pub const EXTENDED_OPERATION_START_TLS: &str = "1.3.6.1.4.1.1466.20037";
pub const EXTENDED_OPERATION_WHO_AM_I: &str = "1.3.6.1.4.1.4203.1.11.3";
pub const EXTENDED_OPERATION_GET_CONNECTION_ID: &str = "1.3.6.1.4.1.26027.1.6.2";
pub const EXTENDED_OPERATION_PASSWORD_MODIFY: &str = "1.3.6.1.4.1.4203.1.11.1";
pub const EXTENDED_OPERATION_UNKNOWN: &str = "Unknown";
