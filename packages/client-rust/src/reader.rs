//! Inbound reader loop: the single consumer of a connection's byte stream.

use std::sync::Arc;

use futures_util::StreamExt;
use ldapwire_core::operation::extended_oids;
use ldapwire_core::{Packet, ResponseFrame};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::codec::LdapCodec;
use crate::correlator::{Correlator, Dispatch};

/// Reads frames from `reader` and routes each to `correlator` until the
/// stream ends, framing breaks, or `shutdown` is cancelled. Closes the
/// correlator on exit so every remaining waiter wakes up.
pub async fn run_reader<R>(
    reader: R,
    correlator: Arc<Correlator>,
    max_frame_len: usize,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, LdapCodec::new(max_frame_len));
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!("reader stopped by shutdown");
                break;
            }
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                route_frame(&correlator, &frame);
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "inbound framing failed; closing connection");
                break;
            }
            None => {
                tracing::debug!("connection closed by peer");
                break;
            }
        }
    }
    correlator.close();
}

/// Decodes one complete frame and dispatches it.
///
/// Returns `None` when the frame never reached the correlator: undecodable
/// bytes, an unrecoverable message id, or an unsolicited notification.
/// A frame whose id is readable but whose body is malformed is still
/// dispatched, carrying the decode error to its waiter.
pub fn route_frame(correlator: &Correlator, bytes: &[u8]) -> Option<Dispatch> {
    let packet = match Packet::decode_exact(bytes) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::warn!(error = %err, "discarding undecodable frame");
            return None;
        }
    };
    let message_id = match ResponseFrame::message_id_of(&packet) {
        Ok(message_id) => message_id,
        Err(err) => {
            tracing::warn!(error = %err, "discarding frame without a usable message id");
            return None;
        }
    };

    let delivery = ResponseFrame::from_packet(&packet);
    if message_id.is_unsolicited() {
        log_unsolicited(&delivery);
        return None;
    }
    if let Err(err) = &delivery {
        tracing::warn!(message_id = message_id.0, error = %err, "malformed response");
    }
    Some(correlator.dispatch(message_id, delivery))
}

fn log_unsolicited(delivery: &Result<ResponseFrame, ldapwire_core::BerError>) {
    match delivery {
        Ok(frame)
            if frame.response_name.as_deref()
                == Some(extended_oids::NOTICE_OF_DISCONNECTION) =>
        {
            let (code, message) = frame
                .result
                .as_ref()
                .map(|result| (result.code.0, result.diagnostic_message.as_str()))
                .unwrap_or_default();
            tracing::warn!(code, diagnostic = message, "server sent notice of disconnection");
        }
        Ok(frame) => {
            tracing::info!(
                tag = frame.tag,
                name = frame.response_name.as_deref().unwrap_or(""),
                "unsolicited notification"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "malformed unsolicited notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use ldapwire_core::operation::tags;
    use ldapwire_core::{BerError, LdapResult, MessageId, ResultCode};
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::error::LdapError;

    fn delete_success(id: u32) -> Vec<u8> {
        ResponseFrame::new(
            MessageId(id),
            tags::DELETE_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        )
        .encode()
    }

    #[test]
    fn routes_to_registered_waiter() {
        let correlator = Correlator::new();
        let pending = correlator.register().unwrap();
        let id = pending.message_id().0;
        assert_eq!(route_frame(&correlator, &delete_success(id)), Some(Dispatch::Delivered));
        assert_eq!(route_frame(&correlator, &delete_success(id)), Some(Dispatch::Duplicate));
    }

    #[test]
    fn garbage_is_dropped() {
        let correlator = Correlator::new();
        assert_eq!(route_frame(&correlator, &[0x30, 0x05, 0x01]), None);
        assert_eq!(route_frame(&correlator, &[0x04, 0x01, 0x41]), None);
    }

    #[tokio::test]
    async fn malformed_body_reaches_only_its_waiter() {
        let correlator = Correlator::new();
        let mut broken = correlator.register().unwrap();
        let mut healthy = correlator.register().unwrap();

        // Delete response missing its diagnostic message.
        let bad = Packet::sequence(
            vec![
                Packet::integer(i64::from(broken.message_id().0), ""),
                Packet::constructed(
                    ldapwire_core::Class::Application,
                    tags::DELETE_RESPONSE,
                    vec![Packet::enumerated(0, "")],
                    "",
                ),
            ],
            "",
        )
        .encode();
        assert_eq!(route_frame(&correlator, &bad), Some(Dispatch::Delivered));
        assert_eq!(
            route_frame(&correlator, &delete_success(healthy.message_id().0)),
            Some(Dispatch::Delivered)
        );

        let frame = broken.response().await.unwrap();
        assert!(matches!(frame.op_error(), Some(BerError::UnexpectedShape(_))));
        assert!(healthy.response().await.unwrap().op_error().is_none());
    }

    #[test]
    fn unsolicited_notice_not_dispatched() {
        let correlator = Correlator::new();
        let mut notice = ResponseFrame::new(
            MessageId::UNSOLICITED,
            tags::EXTENDED_RESPONSE,
            LdapResult::new(ResultCode::UNAVAILABLE),
        );
        notice.response_name = Some(extended_oids::NOTICE_OF_DISCONNECTION.into());
        assert_eq!(route_frame(&correlator, &notice.encode()), None);
    }

    #[tokio::test]
    async fn broken_controls_fail_their_waiter() {
        let correlator = Correlator::new();
        let mut pending = correlator.register().unwrap();

        let bad = Packet::sequence(
            vec![
                Packet::integer(i64::from(pending.message_id().0), ""),
                Packet::constructed(
                    ldapwire_core::Class::Application,
                    tags::DELETE_RESPONSE,
                    LdapResult::new(ResultCode::SUCCESS).to_components(),
                    "",
                ),
                Packet::octet_string("not controls", ""),
            ],
            "",
        )
        .encode();
        assert_eq!(route_frame(&correlator, &bad), Some(Dispatch::Delivered));
        assert!(matches!(
            pending.response().await,
            Err(LdapError::MalformedEncoding(BerError::UnexpectedShape(_)))
        ));
    }

    #[tokio::test]
    async fn reader_closes_correlator_at_eof() {
        let (client, mut server) = tokio::io::duplex(1024);
        let correlator = Arc::new(Correlator::new());
        let mut pending = correlator.register().unwrap();
        let id = pending.message_id().0;

        let reader = tokio::spawn(run_reader(
            client,
            Arc::clone(&correlator),
            1024,
            CancellationToken::new(),
        ));

        server.write_all(&delete_success(id)).await.unwrap();
        assert!(pending.response().await.is_ok());
        drop(pending);

        let mut waiting = correlator.register().unwrap();
        drop(server);
        reader.await.unwrap();

        assert!(correlator.is_closed());
        assert!(matches!(waiting.response().await, Err(LdapError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn oversized_frame_stops_reader() {
        let (client, mut server) = tokio::io::duplex(1024);
        let correlator = Arc::new(Correlator::new());
        let reader = tokio::spawn(run_reader(
            client,
            Arc::clone(&correlator),
            8,
            CancellationToken::new(),
        ));

        server.write_all(&delete_success(1)).await.unwrap();
        reader.await.unwrap();
        assert!(correlator.is_closed());
    }

    #[tokio::test]
    async fn shutdown_token_stops_reader() {
        let (client, _server) = tokio::io::duplex(1024);
        let correlator = Arc::new(Correlator::new());
        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(run_reader(
            client,
            Arc::clone(&correlator),
            1024,
            shutdown.clone(),
        ));

        shutdown.cancel();
        reader.await.unwrap();
        assert!(correlator.is_closed());
    }
}
