//! Stream framing for `LDAPMessage` elements.
//!
//! The decoder only splits the byte stream at element boundaries; decoding the
//! element itself happens afterwards so that a structurally broken message
//! fails alone while the stream stays in sync.

use bytes::{Bytes, BytesMut};
use ldapwire_core::ber::{self, BerError};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LdapError;

/// Splits inbound bytes into whole BER frames and writes outbound frames
/// verbatim.
#[derive(Debug, Clone)]
pub struct LdapCodec {
    max_frame_len: usize,
}

impl LdapCodec {
    #[must_use]
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for LdapCodec {
    type Item = Bytes;
    type Error = LdapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, LdapError> {
        let Some(len) = ber::frame_len(src)? else {
            return Ok(None);
        };
        if len > self.max_frame_len {
            return Err(BerError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }
            .into());
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for LdapCodec {
    type Error = LdapError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), LdapError> {
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ldapwire_core::{LdapResult, MessageId, ResponseFrame, ResultCode};
    use ldapwire_core::operation::tags;

    use super::*;

    fn frame_bytes(id: u32) -> Vec<u8> {
        ResponseFrame::new(
            MessageId(id),
            tags::DELETE_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        )
        .encode()
    }

    #[test]
    fn waits_for_complete_frame() {
        let bytes = frame_bytes(1);
        let mut codec = LdapCodec::new(1024);
        let mut buf = BytesMut::from(&bytes[..bytes.len() - 2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[bytes.len() - 2..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &bytes[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn splits_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame_bytes(1));
        buf.extend_from_slice(&frame_bytes(2));

        let mut codec = LdapCodec::new(1024);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ResponseFrame::decode(&first).unwrap().message_id, MessageId(1));
        assert_eq!(ResponseFrame::decode(&second).unwrap().message_id, MessageId(2));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_rejected_from_header() {
        let mut codec = LdapCodec::new(100);
        // SEQUENCE announcing 4096 content bytes; none of them present yet.
        let mut buf = BytesMut::from(&[0x30, 0x82, 0x10, 0x00][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            LdapError::MalformedEncoding(BerError::FrameTooLarge { len: 4100, max: 100 })
        ));
    }

    #[test]
    fn indefinite_length_breaks_framing() {
        let mut codec = LdapCodec::new(100);
        let mut buf = BytesMut::from(&[0x30, 0x80][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LdapError::MalformedEncoding(BerError::IndefiniteLength))
        ));
    }

    #[test]
    fn encoder_copies_frame() {
        let mut codec = LdapCodec::new(100);
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(&[1, 2, 3]), &mut dst).unwrap();
        assert_eq!(&dst[..], &[1, 2, 3]);
    }
}
