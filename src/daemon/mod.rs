//! Control socket for a foreground `tunwarden connect`
//!
//! The connect command serves the socket; status, disconnect and retry are
//! its clients.

pub mod ipc;
