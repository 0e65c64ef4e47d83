//! Peer wire protocol over plain TCP: one dialed connection per request on
//! the client side, one task per accepted connection on the server side.

pub mod client;
pub mod server;
