//! JSON-RPC 2.0 binding over newline-delimited stdio.
//!
//! - `codec`: line framing with a per-line size limit.
//! - `frame`: the frame and error-object model.
//! - `naming`: configurable method names.
//! - `reader` / `writer`: the two I/O tasks.
//! - `connection`: call correlation shared by both directions.
//! - `transport`: typed client calls.

pub mod codec;
pub mod connection;
pub mod frame;
pub mod naming;
pub mod reader;
pub mod transport;
mod writer;

pub use connection::{PendingCall, Reply, RpcConnection};
pub use frame::{Frame, RpcError};
pub use naming::{InboundMethod, MethodTable, OutboundMethod};
pub use reader::InboundCall;
pub use transport::Transport;
