//! Response classification: success, directory error, or unexpected shape.

use thiserror::Error;

use crate::ber::BerError;
use crate::operation::tags;
use crate::response::ResponseFrame;
use crate::result::{DirectoryError, ResultCode};

/// The response kind a request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Delete,
    Add,
    Modify,
    ModifyDn,
    Compare,
    Extended,
}

impl ResponseKind {
    /// Application tag of the expected response.
    #[must_use]
    pub fn tag(self) -> u32 {
        match self {
            ResponseKind::Delete => tags::DELETE_RESPONSE,
            ResponseKind::Add => tags::ADD_RESPONSE,
            ResponseKind::Modify => tags::MODIFY_RESPONSE,
            ResponseKind::ModifyDn => tags::MODIFY_DN_RESPONSE,
            ResponseKind::Compare => tags::COMPARE_RESPONSE,
            ResponseKind::Extended => tags::EXTENDED_RESPONSE,
        }
    }

    /// Whether `code` completes this kind of operation successfully.
    ///
    /// Compare answers with `compareTrue`/`compareFalse` rather than
    /// `success` (RFC 4511 §4.10).
    #[must_use]
    pub fn accepts(self, code: ResultCode) -> bool {
        match self {
            ResponseKind::Compare => {
                code == ResultCode::COMPARE_TRUE || code == ResultCode::COMPARE_FALSE
            }
            ResponseKind::Delete
            | ResponseKind::Add
            | ResponseKind::Modify
            | ResponseKind::ModifyDn
            | ResponseKind::Extended => code == ResultCode::SUCCESS,
        }
    }
}

/// Non-error classification of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Expected tag with an accepted result code.
    Completed(ResponseFrame),
    /// A response with a different tag arrived for this message id. Logged;
    /// the caller decides whether to tolerate it.
    UnexpectedTag(ResponseFrame),
}

impl Outcome {
    #[must_use]
    pub fn frame(&self) -> &ResponseFrame {
        match self {
            Outcome::Completed(frame) | Outcome::UnexpectedTag(frame) => frame,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Why a response with the expected tag did not complete its operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    /// The server answered with a result code the operation does not accept.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    /// The protocol op body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(#[from] BerError),
}

/// Classifies `frame` against the response `expected` by its request.
///
/// A frame whose tag differs from the expected one is not an error here:
/// it is logged at warn level and returned as [`Outcome::UnexpectedTag`].
/// Delete, add, modify and modify-DN callers treat that as a no-op success,
/// which can hide a misbehaving server; see `ClientConfig::strict_response_tags`
/// in the client crate for the opt-in strict policy.
///
/// # Errors
///
/// When the tag matches, returns `ClassifyError::Malformed` if the op body
/// failed to decode, and `ClassifyError::Directory` if the result code is not
/// one `expected` accepts or the frame carries no result. A mismatched tag is
/// never an error, even when its body is broken.
pub fn classify(frame: ResponseFrame, expected: ResponseKind) -> Result<Outcome, ClassifyError> {
    if frame.tag != expected.tag() {
        tracing::warn!(
            message_id = frame.message_id.0,
            tag = frame.tag,
            expected = expected.tag(),
            "unexpected response tag"
        );
        return Ok(Outcome::UnexpectedTag(frame));
    }

    if let Some(err) = frame.op_error() {
        return Err(ClassifyError::Malformed(err.clone()));
    }
    match &frame.result {
        Some(result) if expected.accepts(result.code) => Ok(Outcome::Completed(frame)),
        Some(result) => Err(DirectoryError::from(result.clone()).into()),
        None => Err(ClassifyError::Directory(DirectoryError {
            code: ResultCode::PROTOCOL_ERROR,
            matched_dn: String::new(),
            message: format!("response tag {} carried no result", frame.tag),
            referrals: Vec::new(),
        })),
    }
}
