//! The milter protocol server (C8): accept loop, per-connection state
//! machine, streaming event decoding, `MaxConcurrent` admission
//! control, and graceful shutdown (spec §4.8), built on `indymilter`.

mod server;
mod session;

pub use server::MilterServer;
pub use session::{MilterSession, SessionGuard, SessionRegistry};
