//! Newline-delimited JSON-RPC over TCP.
//!
//! Every message is one line of JSON. The server answers each call on the
//! connection it arrived on; the client reads replies on a background task.
//! Lines that are not UTF-8, or longer than the configured limit, are treated
//! as unparseable messages and never end the connection.

pub mod client;
mod lines;
pub mod server;

pub use lines::DEFAULT_MAX_MESSAGE_BYTES;
