//! Outbound HTTP for the appview: PDS record CRUD over XRPC, HMAC-signed
//! calls to knot/spindle mutating surfaces, anonymous read-only queries,
//! and identity resolution.

pub mod identity;
pub mod pds;
pub mod signed;
pub mod signing;
pub mod unsigned;

mod error;

pub use error::ClientError;
pub use identity::{IdResolver, ResolvedIdentity};
pub use pds::{PdsClient, PdsSession};
pub use signed::{MergeRequest, SignedClient};
pub use unsigned::{Capabilities, Comparison, UnsignedClient};
