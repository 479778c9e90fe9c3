//! Directory operations and their protocol-op encodings.
//!
//! [`Operation`] is a closed set: every variant knows its request encoding
//! and, through [`Operation::response_kind`], the response it expects.

use crate::ber::{Class, Packet};
use crate::classify::ResponseKind;
use crate::control::Control;

/// LDAP application tag numbers (RFC 4511 §4.2 onwards).
pub mod tags {
    pub const BIND_REQUEST: u32 = 0;
    pub const BIND_RESPONSE: u32 = 1;
    pub const UNBIND_REQUEST: u32 = 2;
    pub const SEARCH_REQUEST: u32 = 3;
    pub const SEARCH_RESULT_ENTRY: u32 = 4;
    pub const SEARCH_RESULT_DONE: u32 = 5;
    pub const MODIFY_REQUEST: u32 = 6;
    pub const MODIFY_RESPONSE: u32 = 7;
    pub const ADD_REQUEST: u32 = 8;
    pub const ADD_RESPONSE: u32 = 9;
    pub const DELETE_REQUEST: u32 = 10;
    pub const DELETE_RESPONSE: u32 = 11;
    pub const MODIFY_DN_REQUEST: u32 = 12;
    pub const MODIFY_DN_RESPONSE: u32 = 13;
    pub const COMPARE_REQUEST: u32 = 14;
    pub const COMPARE_RESPONSE: u32 = 15;
    pub const ABANDON_REQUEST: u32 = 16;
    pub const SEARCH_RESULT_REFERENCE: u32 = 19;
    pub const EXTENDED_REQUEST: u32 = 23;
    pub const EXTENDED_RESPONSE: u32 = 24;
    pub const INTERMEDIATE_RESPONSE: u32 = 25;

    /// Whether responses with this tag carry `COMPONENTS OF LDAPResult`.
    #[must_use]
    pub fn carries_result(tag: u32) -> bool {
        matches!(
            tag,
            BIND_RESPONSE
                | SEARCH_RESULT_DONE
                | MODIFY_RESPONSE
                | ADD_RESPONSE
                | DELETE_RESPONSE
                | MODIFY_DN_RESPONSE
                | COMPARE_RESPONSE
                | EXTENDED_RESPONSE
        )
    }
}

/// Well-known extended operation OIDs.
pub mod extended_oids {
    /// "Who am I?" (RFC 4532).
    pub const WHO_AM_I: &str = "1.3.6.1.4.1.4203.1.11.3";
    /// Notice of Disconnection unsolicited notification (RFC 4511 §4.4.1).
    pub const NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// An attribute description with its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: String,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    #[must_use]
    pub fn new<V: Into<Vec<u8>>>(
        attr_type: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            attr_type: attr_type.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn to_packet(&self) -> Packet {
        Packet::sequence(
            vec![
                Packet::octet_string(self.attr_type.as_bytes(), "Attribute Type"),
                Packet::set(
                    self.values
                        .iter()
                        .map(|value| Packet::octet_string(value.clone(), "Attribute Value"))
                        .collect(),
                    "Attribute Values",
                ),
            ],
            "Attribute",
        )
    }
}

/// Kind of change applied by a modify request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Add,
    Delete,
    Replace,
    /// RFC 4525.
    Increment,
}

impl ModifyOp {
    fn code(self) -> i64 {
        match self {
            ModifyOp::Add => 0,
            ModifyOp::Delete => 1,
            ModifyOp::Replace => 2,
            ModifyOp::Increment => 3,
        }
    }
}

/// One change within a modify request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub operation: ModifyOp,
    pub modification: Attribute,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Removes the entry named by `dn`.
///
/// The DN is sent verbatim; an empty or malformed name is the server's to
/// reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub dn: String,
    pub controls: Vec<Control>,
}

impl DeleteRequest {
    #[must_use]
    pub fn new(dn: impl Into<String>, controls: Vec<Control>) -> Self {
        Self {
            dn: dn.into(),
            controls,
        }
    }
}

/// Creates a new entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<Attribute>,
    pub controls: Vec<Control>,
}

impl AddRequest {
    #[must_use]
    pub fn new(dn: impl Into<String>, controls: Vec<Control>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
            controls,
        }
    }

    /// Appends an attribute with the given values.
    pub fn attribute<V: Into<Vec<u8>>>(
        &mut self,
        attr_type: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) {
        self.attributes.push(Attribute::new(attr_type, values));
    }
}

/// Applies an ordered list of changes to one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<Change>,
    pub controls: Vec<Control>,
}

impl ModifyRequest {
    #[must_use]
    pub fn new(dn: impl Into<String>, controls: Vec<Control>) -> Self {
        Self {
            dn: dn.into(),
            changes: Vec::new(),
            controls,
        }
    }

    pub fn add<V: Into<Vec<u8>>>(
        &mut self,
        attr_type: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) {
        self.push(ModifyOp::Add, Attribute::new(attr_type, values));
    }

    pub fn delete<V: Into<Vec<u8>>>(
        &mut self,
        attr_type: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) {
        self.push(ModifyOp::Delete, Attribute::new(attr_type, values));
    }

    pub fn replace<V: Into<Vec<u8>>>(
        &mut self,
        attr_type: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) {
        self.push(ModifyOp::Replace, Attribute::new(attr_type, values));
    }

    pub fn increment(&mut self, attr_type: impl Into<String>, delta: impl Into<Vec<u8>>) {
        self.push(ModifyOp::Increment, Attribute::new(attr_type, [delta]));
    }

    fn push(&mut self, operation: ModifyOp, modification: Attribute) {
        self.changes.push(Change {
            operation,
            modification,
        });
    }
}

/// Renames an entry and optionally moves it under a new superior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
    pub controls: Vec<Control>,
}

/// Asserts that an entry's attribute holds a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub value: Vec<u8>,
    pub controls: Vec<Control>,
}

/// Extended operation identified by OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub name: String,
    pub value: Option<Vec<u8>>,
    pub controls: Vec<Control>,
}

impl ExtendedRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value,
            controls: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Every request kind this engine can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Delete(DeleteRequest),
    Add(AddRequest),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Compare(CompareRequest),
    Extended(ExtendedRequest),
}

impl Operation {
    /// Short name used in logs and spans.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Delete(_) => "delete",
            Operation::Add(_) => "add",
            Operation::Modify(_) => "modify",
            Operation::ModifyDn(_) => "modify_dn",
            Operation::Compare(_) => "compare",
            Operation::Extended(_) => "extended",
        }
    }

    #[must_use]
    pub fn controls(&self) -> &[Control] {
        match self {
            Operation::Delete(req) => &req.controls,
            Operation::Add(req) => &req.controls,
            Operation::Modify(req) => &req.controls,
            Operation::ModifyDn(req) => &req.controls,
            Operation::Compare(req) => &req.controls,
            Operation::Extended(req) => &req.controls,
        }
    }

    /// The response this request is answered with.
    #[must_use]
    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Operation::Delete(_) => ResponseKind::Delete,
            Operation::Add(_) => ResponseKind::Add,
            Operation::Modify(_) => ResponseKind::Modify,
            Operation::ModifyDn(_) => ResponseKind::ModifyDn,
            Operation::Compare(_) => ResponseKind::Compare,
            Operation::Extended(_) => ResponseKind::Extended,
        }
    }

    /// Application tag of the encoded request.
    #[must_use]
    pub fn request_tag(&self) -> u32 {
        match self {
            Operation::Delete(_) => tags::DELETE_REQUEST,
            Operation::Add(_) => tags::ADD_REQUEST,
            Operation::Modify(_) => tags::MODIFY_REQUEST,
            Operation::ModifyDn(_) => tags::MODIFY_DN_REQUEST,
            Operation::Compare(_) => tags::COMPARE_REQUEST,
            Operation::Extended(_) => tags::EXTENDED_REQUEST,
        }
    }

    /// Encodes the protocol-op element (without controls).
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        let tag = self.request_tag();
        match self {
            // DelRequest ::= [APPLICATION 10] LDAPDN
            Operation::Delete(req) => {
                Packet::primitive(Class::Application, tag, req.dn.as_bytes(), "Del Request")
            }
            Operation::Add(req) => Packet::constructed(
                Class::Application,
                tag,
                vec![
                    Packet::octet_string(req.dn.as_bytes(), "DN"),
                    Packet::sequence(
                        req.attributes.iter().map(Attribute::to_packet).collect(),
                        "Attributes",
                    ),
                ],
                "Add Request",
            ),
            Operation::Modify(req) => Packet::constructed(
                Class::Application,
                tag,
                vec![
                    Packet::octet_string(req.dn.as_bytes(), "DN"),
                    Packet::sequence(
                        req.changes
                            .iter()
                            .map(|change| {
                                Packet::sequence(
                                    vec![
                                        Packet::enumerated(change.operation.code(), "Operation"),
                                        change.modification.to_packet(),
                                    ],
                                    "Change",
                                )
                            })
                            .collect(),
                        "Changes",
                    ),
                ],
                "Modify Request",
            ),
            Operation::ModifyDn(req) => {
                let mut children = vec![
                    Packet::octet_string(req.dn.as_bytes(), "DN"),
                    Packet::octet_string(req.new_rdn.as_bytes(), "New RDN"),
                    Packet::boolean(req.delete_old_rdn, "Delete old RDN"),
                ];
                if let Some(superior) = &req.new_superior {
                    children.push(Packet::primitive(
                        Class::Context,
                        0,
                        superior.as_bytes(),
                        "New Superior",
                    ));
                }
                Packet::constructed(Class::Application, tag, children, "Modify DN Request")
            }
            Operation::Compare(req) => Packet::constructed(
                Class::Application,
                tag,
                vec![
                    Packet::octet_string(req.dn.as_bytes(), "DN"),
                    Packet::sequence(
                        vec![
                            Packet::octet_string(req.attribute.as_bytes(), "AttributeDesc"),
                            Packet::octet_string(req.value.clone(), "AssertionValue"),
                        ],
                        "AttributeValueAssertion",
                    ),
                ],
                "Compare Request",
            ),
            Operation::Extended(req) => {
                let mut children = vec![Packet::primitive(
                    Class::Context,
                    0,
                    req.name.as_bytes(),
                    "Request Name",
                )];
                if let Some(value) = &req.value {
                    children.push(Packet::primitive(
                        Class::Context,
                        1,
                        value.clone(),
                        "Request Value",
                    ));
                }
                Packet::constructed(Class::Application, tag, children, "Extended Request")
            }
        }
    }
}

impl From<DeleteRequest> for Operation {
    fn from(req: DeleteRequest) -> Self {
        Operation::Delete(req)
    }
}

impl From<AddRequest> for Operation {
    fn from(req: AddRequest) -> Self {
        Operation::Add(req)
    }
}

impl From<ModifyRequest> for Operation {
    fn from(req: ModifyRequest) -> Self {
        Operation::Modify(req)
    }
}

impl From<ModifyDnRequest> for Operation {
    fn from(req: ModifyDnRequest) -> Self {
        Operation::ModifyDn(req)
    }
}

impl From<CompareRequest> for Operation {
    fn from(req: CompareRequest) -> Self {
        Operation::Compare(req)
    }
}

impl From<ExtendedRequest> for Operation {
    fn from(req: ExtendedRequest) -> Self {
        Operation::Extended(req)
    }
}
