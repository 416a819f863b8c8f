//! A minimal tagged message-passing API, encapsulated by the `Transport`
//! trait. Implementors only write non-blocking `post` and blocking `take`
//! operations for a given transport layer; the trait then provides
//! request-style point-to-point calls and the broadcast, reduce, and
//! all-reduce collectives. Two transports are included: in-process channels
//! for execution units on threads, and TCP for separate processes.
//!

mod backoff;
pub mod channel;
pub mod comm;
pub mod mailbox;
pub mod tcp;
pub mod util;

pub use channel::ChannelTransport;
pub use comm::{Request, Transport};
pub use tcp::TcpTransport;
