//! End-to-end tests: a `Connection` talking to a scripted server over an
//! in-memory duplex stream.

use futures_util::StreamExt;
use ldapwire_client::{ClientConfig, Connection, LdapCodec, LdapError};
use ldapwire_core::operation::{extended_oids, tags};
use ldapwire_core::{
    CompareRequest, DeleteRequest, LdapResult, MessageId, Packet, ResponseFrame, ResultCode,
};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::FramedRead;

/// Server side of the duplex: reads whole request frames, writes responses.
struct FakeServer {
    requests: FramedRead<ReadHalf<DuplexStream>, LdapCodec>,
    writer: WriteHalf<DuplexStream>,
}

/// The parts of a request the server reacts to.
struct Request {
    message_id: MessageId,
    tag: u32,
    op: Packet,
}

impl FakeServer {
    async fn next_request(&mut self) -> Request {
        let frame = self
            .requests
            .next()
            .await
            .expect("client closed the stream")
            .expect("request framing failed");
        let packet = Packet::decode_exact(&frame).unwrap();
        let message_id = ResponseFrame::message_id_of(&packet).unwrap();
        let op = packet.child(1).unwrap().clone();
        Request {
            message_id,
            tag: op.tag,
            op,
        }
    }

    async fn send(&mut self, frame: &ResponseFrame) {
        self.writer.write_all(&frame.encode()).await.unwrap();
    }
}

fn connect(config: ClientConfig) -> (Connection, FakeServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read_half, writer) = tokio::io::split(server);
    let server = FakeServer {
        requests: FramedRead::new(read_half, LdapCodec::new(64 * 1024)),
        writer,
    };
    (Connection::from_stream(client, config), server)
}

fn dn_of(request: &Request) -> String {
    String::from_utf8(request.op.as_bytes().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn concurrent_deletes_answered_out_of_order() {
    let (connection, mut server) = connect(ClientConfig::default());

    let server_task = tokio::spawn(async move {
        let mut pending = Vec::new();
        for _ in 0..3 {
            let request = server.next_request().await;
            assert_eq!(request.tag, tags::DELETE_REQUEST);
            pending.push(request);
        }
        // Answer newest first.
        for request in pending.iter().rev() {
            let code = if dn_of(request) == "cn=gone,dc=example" {
                ResultCode::NO_SUCH_OBJECT
            } else {
                ResultCode::SUCCESS
            };
            server
                .send(&ResponseFrame::new(
                    request.message_id,
                    tags::DELETE_RESPONSE,
                    LdapResult::new(code),
                ))
                .await;
        }
        server
    });

    let (first, gone, third) = tokio::join!(
        connection.delete(DeleteRequest::new("cn=one,dc=example", vec![])),
        connection.delete(DeleteRequest::new("cn=gone,dc=example", vec![])),
        connection.delete(DeleteRequest::new("cn=three,dc=example", vec![])),
    );

    assert!(first.is_ok());
    assert!(third.is_ok());
    assert!(gone.unwrap_err().is_result_code(ResultCode::NO_SUCH_OBJECT));
    assert!(connection.correlator().is_empty());

    let _server = server_task.await.unwrap();
    connection.close().await;
}

#[tokio::test]
async fn message_ids_start_at_configured_value() {
    let config = ClientConfig {
        initial_message_id: 40,
        ..ClientConfig::default()
    };
    let (connection, mut server) = connect(config);

    let server_task = tokio::spawn(async move {
        let request = server.next_request().await;
        server
            .send(&ResponseFrame::new(
                request.message_id,
                tags::DELETE_RESPONSE,
                LdapResult::new(ResultCode::SUCCESS),
            ))
            .await;
        request.message_id
    });

    connection
        .delete(DeleteRequest::new("cn=a", vec![]))
        .await
        .unwrap();
    assert_eq!(server_task.await.unwrap(), MessageId(40));
}

#[tokio::test]
async fn compare_over_stream() {
    let (connection, mut server) = connect(ClientConfig::default());

    let server_task = tokio::spawn(async move {
        let request = server.next_request().await;
        assert_eq!(request.tag, tags::COMPARE_REQUEST);
        server
            .send(&ResponseFrame::new(
                request.message_id,
                tags::COMPARE_RESPONSE,
                LdapResult::new(ResultCode::COMPARE_FALSE),
            ))
            .await;
        server
    });

    let matched = connection
        .compare(CompareRequest {
            dn: "uid=jdoe,ou=people,dc=example".into(),
            attribute: "mail".into(),
            value: b"jdoe@example.com".to_vec(),
            controls: vec![],
        })
        .await
        .unwrap();
    assert!(!matched);
    let _server = server_task.await.unwrap();
}

#[tokio::test]
async fn server_disconnect_fails_pending_request() {
    let (connection, mut server) = connect(ClientConfig::default());

    let server_task = tokio::spawn(async move {
        let request = server.next_request().await;
        assert_eq!(request.tag, tags::DELETE_REQUEST);

        let mut notice = ResponseFrame::new(
            MessageId::UNSOLICITED,
            tags::EXTENDED_RESPONSE,
            LdapResult::new(ResultCode::UNAVAILABLE),
        );
        notice.response_name = Some(extended_oids::NOTICE_OF_DISCONNECTION.to_string());
        server.send(&notice).await;
        drop(server);
    });

    let err = connection
        .delete(DeleteRequest::new("cn=a", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, LdapError::ConnectionClosed), "got {err:?}");
    server_task.await.unwrap();

    let err = connection
        .delete(DeleteRequest::new("cn=b", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, LdapError::ConnectionClosed), "got {err:?}");
}

#[tokio::test]
async fn local_close_fails_pending_request() {
    let (connection, mut server) = connect(ClientConfig::default());

    let (result, ()) = tokio::join!(
        connection.delete(DeleteRequest::new("cn=a", vec![])),
        async {
            let request = server.next_request().await;
            assert!(connection.correlator().contains(request.message_id));
            connection.close().await;
        }
    );

    assert!(matches!(result, Err(LdapError::ConnectionClosed)));
    assert!(connection.correlator().is_closed());
}

#[tokio::test]
async fn response_for_abandoned_request_is_ignored() {
    let (connection, mut server) = connect(ClientConfig {
        request_timeout: Some(std::time::Duration::from_millis(20)),
        ..ClientConfig::default()
    });

    let err = connection
        .delete(DeleteRequest::new("cn=slow", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, LdapError::Timeout { timeout_ms: 20 }));

    // The late answer is an orphan; the connection keeps working.
    let late = server.next_request().await;
    server
        .send(&ResponseFrame::new(
            late.message_id,
            tags::DELETE_RESPONSE,
            LdapResult::new(ResultCode::SUCCESS),
        ))
        .await;

    let server_task = tokio::spawn(async move {
        let request = server.next_request().await;
        server
            .send(&ResponseFrame::new(
                request.message_id,
                tags::DELETE_RESPONSE,
                LdapResult::new(ResultCode::SUCCESS),
            ))
            .await;
        (request.message_id, server)
    });

    connection
        .delete(DeleteRequest::new("cn=fast", vec![]))
        .await
        .unwrap();
    let (second_id, _server) = server_task.await.unwrap();
    assert_ne!(second_id, late.message_id);
}
