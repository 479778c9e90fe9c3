//! Inbound `LDAPMessage` decoding.

use crate::ber::{universal, BerError, Class, Packet};
use crate::control::{decode_controls, encode_controls, Control, CONTROLS_TAG};
use crate::envelope::MessageId;
use crate::operation::tags;
use crate::result::LdapResult;

const RESPONSE_NAME_TAG: u32 = 10;
const RESPONSE_VALUE_TAG: u32 = 11;

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub message_id: MessageId,
    /// Application tag of the protocol op.
    pub tag: u32,
    /// Present for every response kind that completes an operation.
    pub result: Option<LdapResult>,
    /// Response controls, in wire order.
    pub controls: Vec<Control>,
    /// `responseName` of an extended response.
    pub response_name: Option<String>,
    /// `responseValue` of an extended response.
    pub response_value: Option<Vec<u8>>,
    /// Why the protocol op body failed to decode, if it did. Only a response
    /// whose tag matches its request needs a usable body.
    op_error: Option<BerError>,
}

/// Payload of a completed extended operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedResponse {
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

impl ResponseFrame {
    /// A response carrying `result` and nothing else.
    #[must_use]
    pub fn new(message_id: MessageId, tag: u32, result: LdapResult) -> Self {
        Self {
            message_id,
            tag,
            result: Some(result),
            controls: Vec::new(),
            response_name: None,
            response_value: None,
            op_error: None,
        }
    }

    /// Reads just the message identifier, so a frame that fails full decoding
    /// can still be routed to its waiter.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] if the packet is not a sequence whose first
    /// child is an in-range integer.
    pub fn message_id_of(packet: &Packet) -> Result<MessageId, BerError> {
        if !packet.is(Class::Universal, universal::SEQUENCE) {
            return Err(BerError::UnexpectedShape(
                "LDAPMessage is not a SEQUENCE".to_string(),
            ));
        }
        let id = packet.child(0)?.as_integer()?;
        u32::try_from(id)
            .ok()
            .filter(|id| *id <= MessageId::MAX)
            .map(MessageId)
            .ok_or_else(|| BerError::UnexpectedShape(format!("message id {id} out of range")))
    }

    /// Decodes a full `LDAPMessage` element.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] if the message, its result components, or its
    /// controls are malformed.
    pub fn from_packet(packet: &Packet) -> Result<Self, BerError> {
        let message_id = Self::message_id_of(packet)?;
        let op = packet.child(1)?;
        if op.class != Class::Application {
            return Err(BerError::UnexpectedShape(format!(
                "protocol op has class {:?}, expected Application",
                op.class
            )));
        }

        let (result, response_name, response_value, op_error) = match decode_op_body(op) {
            Ok((result, name, value)) => (result, name, value, None),
            Err(err) => (None, None, None, Some(err)),
        };

        let controls = match packet.children()?.get(2) {
            Some(element) if element.is(Class::Context, CONTROLS_TAG) => {
                decode_controls(element)?
            }
            Some(element) => {
                return Err(BerError::UnexpectedShape(format!(
                    "unexpected element tag {} after protocol op",
                    element.tag
                )))
            }
            None => Vec::new(),
        };

        Ok(Self {
            message_id,
            tag: op.tag,
            result,
            controls,
            response_name,
            response_value,
            op_error,
        })
    }

    /// Decodes a complete frame.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] on any structural violation.
    pub fn decode(bytes: &[u8]) -> Result<Self, BerError> {
        Self::from_packet(&Packet::decode_exact(bytes)?)
    }

    /// Encodes this frame as a server would send it.
    #[must_use]
    pub fn to_packet(&self) -> Packet {
        let mut op_children = self
            .result
            .as_ref()
            .map(LdapResult::to_components)
            .unwrap_or_default();
        if let Some(name) = &self.response_name {
            op_children.push(Packet::primitive(
                Class::Context,
                RESPONSE_NAME_TAG,
                name.as_bytes(),
                "Response Name",
            ));
        }
        if let Some(value) = &self.response_value {
            op_children.push(Packet::primitive(
                Class::Context,
                RESPONSE_VALUE_TAG,
                value.clone(),
                "Response Value",
            ));
        }

        let mut children = vec![
            Packet::integer(i64::from(self.message_id.0), "MessageID"),
            Packet::constructed(Class::Application, self.tag, op_children, "Response"),
        ];
        if let Some(controls) = encode_controls(&self.controls) {
            children.push(controls);
        }
        Packet::sequence(children, "LDAP Response")
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_packet().encode()
    }

    /// The decode failure of the protocol op body, if any.
    ///
    /// Envelope-level problems (message id, op class, controls) fail
    /// [`ResponseFrame::from_packet`] outright; a broken op body is recorded
    /// here and only surfaces when the frame is classified against a request
    /// expecting this tag.
    #[must_use]
    pub fn op_error(&self) -> Option<&BerError> {
        self.op_error.as_ref()
    }

    /// Extended response payload carried by this frame.
    #[must_use]
    pub fn extended(&self) -> ExtendedResponse {
        ExtendedResponse {
            name: self.response_name.clone(),
            value: self.response_value.clone(),
        }
    }
}

type OpBody = (Option<LdapResult>, Option<String>, Option<Vec<u8>>);

fn decode_op_body(op: &Packet) -> Result<OpBody, BerError> {
    let result = if tags::carries_result(op.tag) {
        Some(LdapResult::from_components(op)?)
    } else {
        None
    };

    let mut response_name = None;
    let mut response_value = None;
    if op.tag == tags::EXTENDED_RESPONSE {
        for child in op.children()?.iter().skip(3) {
            if child.is(Class::Context, RESPONSE_NAME_TAG) {
                response_name = Some(child.as_str()?.to_string());
            } else if child.is(Class::Context, RESPONSE_VALUE_TAG) {
                response_value = Some(child.as_bytes()?.to_vec());
            }
        }
    }
    Ok((result, response_name, response_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ResultCode;

    #[test]
    fn delete_response_decodes() {
        let frame = ResponseFrame::new(
            MessageId(9),
            tags::DELETE_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        );
        let decoded = ResponseFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn extended_response_fields_decode() {
        let mut frame = ResponseFrame::new(
            MessageId(3),
            tags::EXTENDED_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        );
        frame.response_name = Some("1.2.3".into());
        frame.response_value = Some(b"dn:cn=admin".to_vec());
        frame.controls = vec![Control::new("1.9", false, Some(vec![1, 2]))];

        let decoded = ResponseFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.extended().name.as_deref(), Some("1.2.3"));
        assert_eq!(decoded.extended().value.as_deref(), Some(&b"dn:cn=admin"[..]));
        assert_eq!(decoded.controls, frame.controls);
    }

    #[test]
    fn non_result_response_has_no_result() {
        let packet = Packet::sequence(
            vec![
                Packet::integer(4, ""),
                Packet::constructed(
                    Class::Application,
                    tags::SEARCH_RESULT_ENTRY,
                    vec![Packet::octet_string("cn=a", ""), Packet::sequence(vec![], "")],
                    "",
                ),
            ],
            "",
        );
        let frame = ResponseFrame::from_packet(&packet).unwrap();
        assert_eq!(frame.tag, tags::SEARCH_RESULT_ENTRY);
        assert!(frame.result.is_none());
    }

    #[test]
    fn message_id_recoverable_from_broken_op() {
        let packet = Packet::sequence(
            vec![
                Packet::integer(12, ""),
                Packet::constructed(Class::Application, tags::DELETE_RESPONSE, vec![], ""),
            ],
            "",
        );
        assert_eq!(ResponseFrame::message_id_of(&packet).unwrap(), MessageId(12));

        let frame = ResponseFrame::from_packet(&packet).unwrap();
        assert_eq!(frame.tag, tags::DELETE_RESPONSE);
        assert!(frame.result.is_none());
        assert!(matches!(frame.op_error(), Some(BerError::UnexpectedShape(_))));
    }

    #[test]
    fn broken_controls_fail_the_whole_frame() {
        let packet = Packet::sequence(
            vec![
                Packet::integer(5, ""),
                Packet::constructed(
                    Class::Application,
                    tags::DELETE_RESPONSE,
                    LdapResult::new(ResultCode::SUCCESS).to_components(),
                    "",
                ),
                Packet::octet_string("not controls", ""),
            ],
            "",
        );
        assert!(matches!(
            ResponseFrame::from_packet(&packet),
            Err(BerError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn out_of_range_message_id_rejected() {
        let packet = Packet::sequence(vec![Packet::integer(-4, "")], "");
        assert!(ResponseFrame::message_id_of(&packet).is_err());

        let packet = Packet::sequence(vec![Packet::integer(i64::from(u32::MAX), "")], "");
        assert!(ResponseFrame::message_id_of(&packet).is_err());
    }

    #[test]
    fn wrong_class_protocol_op_rejected() {
        let packet = Packet::sequence(
            vec![Packet::integer(1, ""), Packet::octet_string("x", "")],
            "",
        );
        assert!(ResponseFrame::from_packet(&packet).is_err());
    }

    #[test]
    fn truncated_bytes_rejected() {
        let frame = ResponseFrame::new(
            MessageId(1),
            tags::DELETE_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        );
        let bytes = frame.encode();
        assert!(matches!(
            ResponseFrame::decode(&bytes[..bytes.len() - 1]),
            Err(BerError::Truncated { .. })
        ));
    }
}
