//! Request and response controls (RFC 4511 §4.1.11).
//!
//! ```text
//! Controls ::= SEQUENCE OF control Control
//! Control ::= SEQUENCE {
//!      controlType             LDAPOID,
//!      criticality             BOOLEAN DEFAULT FALSE,
//!      controlValue            OCTET STRING OPTIONAL }
//! ```
//!
//! The controls unit of an envelope is context tag `[0]`. An empty list is
//! never encoded as an empty unit: [`encode_controls`] returns `None` and the
//! envelope omits the element entirely.

use crate::ber::{universal, BerError, Class, Packet};

/// Context tag of the controls element inside an `LDAPMessage`.
pub const CONTROLS_TAG: u32 = 0;

/// Well-known control OIDs.
pub mod oids {
    /// `ManageDsaIT` (RFC 3296): treat referral objects as ordinary entries.
    pub const MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";
    /// Simple paged results (RFC 2696).
    pub const PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
}

/// An optional, server-interpreted modifier attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    /// Dotted-decimal OID identifying the control.
    pub control_type: String,
    /// Whether the server must reject the operation if it does not support
    /// the control.
    pub criticality: bool,
    /// Control-specific opaque value.
    pub value: Option<Vec<u8>>,
}

impl Control {
    #[must_use]
    pub fn new(
        control_type: impl Into<String>,
        criticality: bool,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            control_type: control_type.into(),
            criticality,
            value,
        }
    }

    /// `ManageDsaIT` control; carries no value.
    #[must_use]
    pub fn manage_dsa_it(criticality: bool) -> Self {
        Self::new(oids::MANAGE_DSA_IT, criticality, None)
    }

    /// Simple paged results control requesting `size` entries per page,
    /// continuing from `cookie` (empty on the first page).
    #[must_use]
    pub fn paging(size: u32, cookie: &[u8]) -> Self {
        let value = Packet::sequence(
            vec![
                Packet::integer(i64::from(size), "Paging Size"),
                Packet::octet_string(cookie, "Cookie"),
            ],
            "Search Control Value",
        );
        Self::new(oids::PAGED_RESULTS, false, Some(value.encode()))
    }

    /// Encodes this control as its `SEQUENCE` element.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        let mut children = vec![Packet::octet_string(
            self.control_type.as_bytes(),
            "Control Type",
        )];
        if self.criticality {
            children.push(Packet::boolean(true, "Criticality"));
        }
        if let Some(value) = &self.value {
            children.push(Packet::octet_string(value.clone(), "Control Value"));
        }
        Packet::sequence(children, "Control")
    }

    /// Decodes one `Control` element.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] if the element is not a sequence with an OID
    /// first, or if the optional fields have the wrong types.
    pub fn from_packet(packet: &Packet) -> Result<Self, BerError> {
        let children = packet.children()?;
        let control_type = packet.child(0)?.as_str()?.to_string();

        let mut criticality = false;
        let mut value = None;
        for child in &children[1..] {
            if child.is(Class::Universal, universal::BOOLEAN) {
                criticality = child.as_bool()?;
            } else if child.is(Class::Universal, universal::OCTET_STRING) {
                value = Some(child.as_bytes()?.to_vec());
            } else {
                return Err(BerError::UnexpectedShape(format!(
                    "unexpected element tag {} in control {control_type}",
                    child.tag
                )));
            }
        }

        Ok(Self {
            control_type,
            criticality,
            value,
        })
    }
}

/// Encodes a control list as the envelope's `[0]` element, preserving order.
///
/// Returns `None` for an empty list: emptiness is signalled by absence.
#[must_use]
pub fn encode_controls(controls: &[Control]) -> Option<Packet> {
    if controls.is_empty() {
        return None;
    }
    Some(Packet::constructed(
        Class::Context,
        CONTROLS_TAG,
        controls.iter().map(Control::to_packet).collect(),
        "Controls",
    ))
}

/// Decodes a `[0]` controls element into its controls, in wire order.
///
/// # Errors
///
/// Returns a [`BerError`] if any control is malformed.
pub fn decode_controls(packet: &Packet) -> Result<Vec<Control>, BerError> {
    packet.children()?.iter().map(Control::from_packet).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_absent() {
        assert!(encode_controls(&[]).is_none());
    }

    #[test]
    fn order_and_duplicates_preserved() {
        let controls = vec![
            Control::new("1.2.3", true, Some(b"first".to_vec())),
            Control::manage_dsa_it(false),
            Control::new("1.2.3", true, Some(b"first".to_vec())),
        ];
        let packet = encode_controls(&controls).unwrap();
        assert!(packet.is(Class::Context, CONTROLS_TAG));
        assert_eq!(packet.children().unwrap().len(), 3);

        let decoded = Packet::decode_exact(&packet.encode()).unwrap();
        assert_eq!(decode_controls(&decoded).unwrap(), controls);
    }

    #[test]
    fn false_criticality_omitted() {
        let packet = Control::manage_dsa_it(false).to_packet();
        assert_eq!(packet.children().unwrap().len(), 1);

        let critical = Control::manage_dsa_it(true).to_packet();
        let children = critical.children().unwrap();
        assert_eq!(children.len(), 2);
        assert!(children[1].as_bool().unwrap());
    }

    #[test]
    fn paging_value_layout() {
        let control = Control::paging(500, b"abc");
        assert_eq!(control.control_type, oids::PAGED_RESULTS);
        let value = Packet::decode_exact(control.value.as_ref().unwrap()).unwrap();
        assert_eq!(value.child(0).unwrap().as_integer().unwrap(), 500);
        assert_eq!(value.child(1).unwrap().as_bytes().unwrap(), b"abc");
    }

    #[test]
    fn unknown_member_rejected() {
        let packet = Packet::sequence(
            vec![
                Packet::octet_string("1.2.3", ""),
                Packet::integer(1, ""),
            ],
            "",
        );
        assert!(matches!(
            Control::from_packet(&packet),
            Err(BerError::UnexpectedShape(_))
        ));
    }
}
