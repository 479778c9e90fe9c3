//! Request execution over one shared connection.
//!
//! [`Connection::execute`] runs the full cycle for a single operation:
//!
//! 1. **Register** with the [`Correlator`] (the returned guard owns the entry)
//! 2. **Encode** the [`Envelope`] under the allocated message id
//! 3. **Send** through the [`Transport`]
//! 4. **Await** the routed response
//! 5. **Classify** the response against the operation's expected kind
//!
//! One deadline and one cancellation token bound steps 3 and 4 together, so a
//! peer that stops reading cannot stall a caller past its timeout. A request
//! whose token is already cancelled is never sent.
//!
//! The guard is dropped on every exit path, so the identifier is released
//! whether the call succeeds, fails, times out, or its future is dropped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ldapwire_core::operation::extended_oids;
use ldapwire_core::{
    classify, AddRequest, BerError, CompareRequest, Control, DeleteRequest, Envelope, ExtendedRequest,
    ExtendedResponse, ModifyDnRequest, ModifyRequest, Operation, Outcome, ResponseFrame,
    ResultCode,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::LdapError;
use crate::reader::run_reader;
use crate::transport::{StreamTransport, Transport};

/// An LDAP connection shared by concurrent callers.
///
/// Requests from any number of tasks may be in flight at once; each call
/// waits only for its own response.
pub struct Connection {
    correlator: Arc<Correlator>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    shutdown: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Builds a connection from parts, for callers that drive inbound frames
    /// themselves (for example through [`crate::reader::route_frame`]).
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        correlator: Arc<Correlator>,
        config: ClientConfig,
    ) -> Self {
        Self {
            correlator,
            transport,
            config,
            shutdown: CancellationToken::new(),
            reader: parking_lot::Mutex::new(None),
        }
    }

    /// Takes ownership of an established byte stream (TCP, TLS, or anything
    /// else), spawns its reader loop, and returns the connection.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let correlator = Arc::new(Correlator::starting_at(config.initial_message_id));
        let transport: Arc<dyn Transport> =
            Arc::new(StreamTransport::new(write_half, &config));

        let connection = Self::new(transport, Arc::clone(&correlator), config);
        let handle = tokio::spawn(run_reader(
            read_half,
            correlator,
            connection.config.max_frame_len,
            connection.shutdown.clone(),
        ));
        *connection.reader.lock() = Some(handle);
        connection
    }

    /// The correlator tracking this connection's in-flight requests.
    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ---- Generic execution ----

    /// Executes `operation` with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns `LdapError::Transport` if the request could not be written,
    /// `LdapError::Directory` for a non-success result, `LdapError::Timeout`
    /// when the configured timeout elapses, and the other [`LdapError`]
    /// variants as documented there.
    pub async fn execute(&self, operation: &Operation) -> Result<Outcome, LdapError> {
        self.run(operation, self.config.request_timeout, None).await
    }

    /// Executes `operation`, allowing at most `timeout` for writing the
    /// request and receiving its response.
    ///
    /// # Errors
    ///
    /// As [`Connection::execute`].
    pub async fn execute_with_timeout(
        &self,
        operation: &Operation,
        timeout: Duration,
    ) -> Result<Outcome, LdapError> {
        self.run(operation, Some(timeout), None).await
    }

    /// Executes `operation`, abandoning it when `cancel` fires.
    ///
    /// Nothing is sent if `cancel` has already fired. A response arriving
    /// after cancellation is discarded as an orphan.
    ///
    /// # Errors
    ///
    /// As [`Connection::execute`], plus `LdapError::Cancelled`.
    pub async fn execute_cancellable(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<Outcome, LdapError> {
        self.run(operation, self.config.request_timeout, Some(cancel))
            .await
    }

    async fn run(
        &self,
        operation: &Operation,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome, LdapError> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(LdapError::Cancelled);
        }
        let budget = Budget::new(timeout, cancel);
        let mut pending = self.correlator.register()?;
        let message_id = pending.message_id();
        let span = tracing::debug_span!(
            "ldap_request",
            message_id = message_id.0,
            op = operation.name()
        );

        async move {
            let frame = Bytes::from(Envelope::new(message_id, operation).encode());
            budget
                .bound(async { self.transport.send(frame).await.map_err(LdapError::Transport) })
                .await?;
            tracing::debug!("request sent");

            let response = budget.bound(pending.response()).await?;
            let outcome = classify(response, operation.response_kind())?;
            if !outcome.is_completed() {
                metrics::counter!("ldap_client_unexpected_tags_total").increment(1);
            }
            tracing::debug!(completed = outcome.is_completed(), "response received");
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    // ---- Per-operation entry points ----

    /// Deletes the entry named by `request.dn`.
    ///
    /// # Errors
    ///
    /// As [`Connection::execute`]; a response with the wrong tag is tolerated
    /// unless `strict_response_tags` is set.
    pub async fn delete(&self, request: DeleteRequest) -> Result<(), LdapError> {
        self.complete(&Operation::Delete(request)).await
    }

    /// # Errors
    ///
    /// As [`Connection::delete`].
    pub async fn add(&self, request: AddRequest) -> Result<(), LdapError> {
        self.complete(&Operation::Add(request)).await
    }

    /// # Errors
    ///
    /// As [`Connection::delete`].
    pub async fn modify(&self, request: ModifyRequest) -> Result<(), LdapError> {
        self.complete(&Operation::Modify(request)).await
    }

    /// # Errors
    ///
    /// As [`Connection::delete`].
    pub async fn modify_dn(&self, request: ModifyDnRequest) -> Result<(), LdapError> {
        self.complete(&Operation::ModifyDn(request)).await
    }

    /// Returns whether the entry's attribute holds the asserted value.
    ///
    /// # Errors
    ///
    /// As [`Connection::execute`], plus `LdapError::UnexpectedResponse` for a
    /// response with the wrong tag.
    pub async fn compare(&self, request: CompareRequest) -> Result<bool, LdapError> {
        let frame = self.expect_completed(&Operation::Compare(request)).await?;
        Ok(frame.result.map(|result| result.code) == Some(ResultCode::COMPARE_TRUE))
    }

    /// # Errors
    ///
    /// As [`Connection::compare`].
    pub async fn extended(&self, request: ExtendedRequest) -> Result<ExtendedResponse, LdapError> {
        let frame = self.expect_completed(&Operation::Extended(request)).await?;
        Ok(frame.extended())
    }

    /// "Who am I?" extended operation. Returns the authorization identity,
    /// or `None` for an anonymous association.
    ///
    /// # Errors
    ///
    /// As [`Connection::extended`], plus `LdapError::MalformedEncoding` when
    /// the identity is not valid UTF-8.
    pub async fn who_am_i(&self, controls: Vec<Control>) -> Result<Option<String>, LdapError> {
        let response = self
            .extended(ExtendedRequest {
                name: extended_oids::WHO_AM_I.to_string(),
                value: None,
                controls,
            })
            .await?;
        let Some(authz_id) = response.value else {
            return Ok(None);
        };
        let authz_id = String::from_utf8(authz_id).map_err(|_| BerError::InvalidUtf8)?;
        Ok(Some(authz_id).filter(|authz_id| !authz_id.is_empty()))
    }

    /// Delete/add/modify/modify-DN policy: an unexpected tag is logged by the
    /// classifier and then ignored. This mirrors long-standing client
    /// behavior but can mask a confused server; `strict_response_tags`
    /// turns it into an error.
    async fn complete(&self, operation: &Operation) -> Result<(), LdapError> {
        match self.execute(operation).await? {
            Outcome::Completed(_) => Ok(()),
            Outcome::UnexpectedTag(frame) if self.config.strict_response_tags => {
                Err(unexpected(&frame, operation))
            }
            Outcome::UnexpectedTag(_) => Ok(()),
        }
    }

    async fn expect_completed(&self, operation: &Operation) -> Result<ResponseFrame, LdapError> {
        match self.execute(operation).await? {
            Outcome::Completed(frame) => Ok(frame),
            Outcome::UnexpectedTag(frame) => Err(unexpected(&frame, operation)),
        }
    }

    // ---- Lifecycle ----

    /// Stops the reader, fails every in-flight request with
    /// `LdapError::ConnectionClosed`, and shuts down the write side.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.correlator.close();
        if let Err(err) = self.transport.close().await {
            tracing::debug!(error = ?err, "error closing transport");
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                tracing::warn!(error = %err, "reader task failed");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("correlator", &self.correlator)
            .field("config", &self.config)
            .field("closed", &self.correlator.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn unexpected(frame: &ResponseFrame, operation: &Operation) -> LdapError {
    LdapError::UnexpectedResponse {
        tag: frame.tag,
        expected: operation.response_kind().tag(),
    }
}

/// Deadline and cancellation shared by every step of one request.
struct Budget<'a> {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Budget<'a> {
    fn new(timeout: Option<Duration>, cancel: Option<&'a CancellationToken>) -> Self {
        Self {
            timeout,
            deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
            cancel,
        }
    }

    /// Runs `work` until it finishes, the token fires, or the deadline passes.
    async fn bound<T>(
        &self,
        work: impl Future<Output = Result<T, LdapError>>,
    ) -> Result<T, LdapError> {
        let cancelled = async {
            match self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => Err(LdapError::Cancelled),
            () = expired => Err(LdapError::Timeout {
                timeout_ms: self.timeout.map_or(0, |timeout| {
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
                }),
            }),
            result = work => result,
        }
    }
}
