//! `LDAPResult` and result codes (RFC 4511 §4.1.9, Appendix A).

use std::fmt;

use thiserror::Error;

use crate::ber::{BerError, Class, Packet};

/// Context tag of the referral element inside an `LDAPResult`.
const REFERRAL_TAG: u32 = 3;

/// Server-reported result code.
///
/// Kept open rather than an enum so codes from newer extensions survive
/// decoding unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const SUCCESS: Self = Self(0);
    pub const OPERATIONS_ERROR: Self = Self(1);
    pub const PROTOCOL_ERROR: Self = Self(2);
    pub const TIME_LIMIT_EXCEEDED: Self = Self(3);
    pub const SIZE_LIMIT_EXCEEDED: Self = Self(4);
    pub const COMPARE_FALSE: Self = Self(5);
    pub const COMPARE_TRUE: Self = Self(6);
    pub const AUTH_METHOD_NOT_SUPPORTED: Self = Self(7);
    pub const STRONGER_AUTH_REQUIRED: Self = Self(8);
    pub const REFERRAL: Self = Self(10);
    pub const ADMIN_LIMIT_EXCEEDED: Self = Self(11);
    pub const UNAVAILABLE_CRITICAL_EXTENSION: Self = Self(12);
    pub const CONFIDENTIALITY_REQUIRED: Self = Self(13);
    pub const SASL_BIND_IN_PROGRESS: Self = Self(14);
    pub const NO_SUCH_ATTRIBUTE: Self = Self(16);
    pub const UNDEFINED_ATTRIBUTE_TYPE: Self = Self(17);
    pub const INAPPROPRIATE_MATCHING: Self = Self(18);
    pub const CONSTRAINT_VIOLATION: Self = Self(19);
    pub const ATTRIBUTE_OR_VALUE_EXISTS: Self = Self(20);
    pub const INVALID_ATTRIBUTE_SYNTAX: Self = Self(21);
    pub const NO_SUCH_OBJECT: Self = Self(32);
    pub const ALIAS_PROBLEM: Self = Self(33);
    pub const INVALID_DN_SYNTAX: Self = Self(34);
    pub const IS_LEAF: Self = Self(35);
    pub const ALIAS_DEREFERENCING_PROBLEM: Self = Self(36);
    pub const INAPPROPRIATE_AUTHENTICATION: Self = Self(48);
    pub const INVALID_CREDENTIALS: Self = Self(49);
    pub const INSUFFICIENT_ACCESS_RIGHTS: Self = Self(50);
    pub const BUSY: Self = Self(51);
    pub const UNAVAILABLE: Self = Self(52);
    pub const UNWILLING_TO_PERFORM: Self = Self(53);
    pub const LOOP_DETECT: Self = Self(54);
    pub const NAMING_VIOLATION: Self = Self(64);
    pub const OBJECT_CLASS_VIOLATION: Self = Self(65);
    pub const NOT_ALLOWED_ON_NON_LEAF: Self = Self(66);
    pub const NOT_ALLOWED_ON_RDN: Self = Self(67);
    pub const ENTRY_ALREADY_EXISTS: Self = Self(68);
    pub const OBJECT_CLASS_MODS_PROHIBITED: Self = Self(69);
    pub const RESULTS_TOO_LARGE: Self = Self(70);
    pub const AFFECTS_MULTIPLE_DSAS: Self = Self(71);
    pub const OTHER: Self = Self(80);
    pub const CANCELED: Self = Self(118);
    pub const NO_SUCH_OPERATION: Self = Self(119);
    pub const TOO_LATE: Self = Self(120);
    pub const CANNOT_CANCEL: Self = Self(121);
    pub const ASSERTION_FAILED: Self = Self(122);
    pub const AUTHORIZATION_DENIED: Self = Self(123);
    pub const SYNC_REFRESH_REQUIRED: Self = Self(4096);

    /// Human-readable name, or `"Unknown"` for unassigned codes.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "Success",
            1 => "Operations Error",
            2 => "Protocol Error",
            3 => "Time Limit Exceeded",
            4 => "Size Limit Exceeded",
            5 => "Compare False",
            6 => "Compare True",
            7 => "Auth Method Not Supported",
            8 => "Stronger Auth Required",
            10 => "Referral",
            11 => "Admin Limit Exceeded",
            12 => "Unavailable Critical Extension",
            13 => "Confidentiality Required",
            14 => "SASL Bind In Progress",
            16 => "No Such Attribute",
            17 => "Undefined Attribute Type",
            18 => "Inappropriate Matching",
            19 => "Constraint Violation",
            20 => "Attribute Or Value Exists",
            21 => "Invalid Attribute Syntax",
            32 => "No Such Object",
            33 => "Alias Problem",
            34 => "Invalid DN Syntax",
            35 => "Is Leaf",
            36 => "Alias Dereferencing Problem",
            48 => "Inappropriate Authentication",
            49 => "Invalid Credentials",
            50 => "Insufficient Access Rights",
            51 => "Busy",
            52 => "Unavailable",
            53 => "Unwilling To Perform",
            54 => "Loop Detect",
            64 => "Naming Violation",
            65 => "Object Class Violation",
            66 => "Not Allowed On Non Leaf",
            67 => "Not Allowed On RDN",
            68 => "Entry Already Exists",
            69 => "Object Class Mods Prohibited",
            70 => "Results Too Large",
            71 => "Affects Multiple DSAs",
            80 => "Other",
            118 => "Canceled",
            119 => "No Such Operation",
            120 => "Too Late",
            121 => "Cannot Cancel",
            122 => "Assertion Failed",
            123 => "Authorization Denied",
            4096 => "Sync Refresh Required",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.0, self.name())
    }
}

/// The result fields shared by every response that completes an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
    pub referrals: Vec<String>,
}

impl LdapResult {
    /// A bare result with empty matched DN and message.
    #[must_use]
    pub fn new(code: ResultCode) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
            referrals: Vec::new(),
        }
    }

    /// Reads `COMPONENTS OF LDAPResult` from the leading children of a
    /// response element. Trailing response-specific children are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] if the code, matched DN, or diagnostic message
    /// are missing or have the wrong encoding.
    pub fn from_components(op: &Packet) -> Result<Self, BerError> {
        let code = op.child(0)?.as_integer()?;
        let code = u32::try_from(code).map_err(|_| {
            BerError::UnexpectedShape(format!("result code {code} out of range"))
        })?;

        let mut referrals = Vec::new();
        if let Some(referral) = op
            .children()?
            .iter()
            .skip(3)
            .find(|child| child.is(Class::Context, REFERRAL_TAG))
        {
            for uri in referral.children()? {
                referrals.push(uri.as_str()?.to_string());
            }
        }

        Ok(Self {
            code: ResultCode(code),
            matched_dn: op.child(1)?.as_str()?.to_string(),
            diagnostic_message: op.child(2)?.as_str()?.to_string(),
            referrals,
        })
    }

    /// Encodes the result components, for building response elements.
    #[must_use]
    pub fn to_components(&self) -> Vec<Packet> {
        let mut components = vec![
            Packet::enumerated(i64::from(self.code.0), "resultCode"),
            Packet::octet_string(self.matched_dn.as_bytes(), "matchedDN"),
            Packet::octet_string(self.diagnostic_message.as_bytes(), "diagnosticMessage"),
        ];
        if !self.referrals.is_empty() {
            components.push(Packet::constructed(
                Class::Context,
                REFERRAL_TAG,
                self.referrals
                    .iter()
                    .map(|uri| Packet::octet_string(uri.as_bytes(), "URI"))
                    .collect(),
                "Referral",
            ));
        }
        components
    }
}

/// A server-reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("LDAP result code {code}: {message}")]
pub struct DirectoryError {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
    pub referrals: Vec<String>,
}

impl From<LdapResult> for DirectoryError {
    fn from(result: LdapResult) -> Self {
        Self {
            code: result.code,
            matched_dn: result.matched_dn,
            message: result.diagnostic_message,
            referrals: result.referrals,
        }
    }
}
