//! Typed layouts for the packets the proxy inspects or fabricates.
//!
//! Everything else on the wire is pass-through and never gets a struct
//! here. Layouts that changed across revisions take the version from the
//! reader/writer they are handed.

pub mod handshake;
pub mod login;
pub mod play;
pub mod status;
