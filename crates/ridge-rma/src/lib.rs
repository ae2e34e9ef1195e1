//! ridge-rma: issuance engine for one-sided operations.
//!
//! Turns a queued put, get, accumulate, get-accumulate, compare-and-swap or
//! fetch-and-op into packets and transfer lists for one peer, and produces
//! the requests the progress engine later completes.

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod ext;
pub mod immed;
mod issue;
pub mod loopback;
pub mod op;
pub mod request;
pub mod segment;
pub mod stream;
pub mod transfer;

pub use connection::{Capabilities, Connection, Transport};
pub use dispatch::Engine;
pub use error::{IssueError, TransportError};
pub use ext::ExtHeader;
pub use op::{Operation, Origin, Packet, StreamCursor, Target};
pub use request::{Request, RequestKind, RequestPool, RequestTable, ResultBuffer};
pub use stream::{StreamPlan, StreamUnit};
pub use transfer::TransferList;
