//! Library surface for the post-api gateway: the routing table, watch loop,
//! parser, dispatch engine, and the `Gateway` that wires them to an HTTP
//! server. Split from the binary so integration tests can construct a
//! `Gateway` directly against in-memory test doubles, the way the teacher's
//! `main.rs` exposes `run()` for its own integration tests.

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod parser;
pub mod registry;
pub mod routing;
pub mod rpc;
pub mod server;
pub mod types;
pub mod watch;
