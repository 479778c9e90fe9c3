//! ldapwire core: BER codec, LDAP operations, envelopes, and response classification.
//!
//! Everything here is pure data transformation; sending, correlating, and
//! awaiting responses live in `ldapwire-client`.

pub mod ber;
pub mod classify;
pub mod control;
pub mod envelope;
pub mod operation;
pub mod response;
pub mod result;

pub use ber::{BerError, Class, Contents, Kind, Packet};
pub use classify::{classify, ClassifyError, Outcome, ResponseKind};
pub use control::{decode_controls, encode_controls, Control};
pub use envelope::{Envelope, MessageId};
pub use operation::{
    AddRequest, Attribute, Change, CompareRequest, DeleteRequest, ExtendedRequest, ModifyDnRequest,
    ModifyOp, ModifyRequest, Operation,
};
pub use response::{ExtendedResponse, ResponseFrame};
pub use result::{DirectoryError, LdapResult, ResultCode};

