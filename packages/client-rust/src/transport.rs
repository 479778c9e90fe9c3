//! Outbound transport seam.

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use crate::codec::LdapCodec;
use crate::config::ClientConfig;

/// Writes complete frames onto a connection shared by concurrent requests.
///
/// Implementations must serialize concurrent `send` calls so frames never
/// interleave on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one complete, already-encoded `LDAPMessage`.
    async fn send(&self, frame: Bytes) -> anyhow::Result<()>;

    /// Flushes and shuts down the write side. Default is a no-op.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// [`Transport`] over any async byte stream writer.
///
/// A single async mutex around the framed writer is the one critical section
/// for transmission; it is independent of the correlator's locking.
pub struct StreamTransport<W> {
    writer: Mutex<FramedWrite<W, LdapCodec>>,
}

impl<W: AsyncWrite + Unpin> StreamTransport<W> {
    #[must_use]
    pub fn new(writer: W, config: &ClientConfig) -> Self {
        Self {
            writer: Mutex::new(FramedWrite::new(writer, LdapCodec::new(config.max_frame_len))),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Transport for StreamTransport<W> {
    async fn send(&self, frame: Bytes) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await.context("writing LDAP frame")
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.close().await.context("closing LDAP stream")
    }
}
