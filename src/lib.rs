//! One node of a Chord ring.
//!
//! The [`chord`] module holds the ring arithmetic, the finger table and the
//! maintenance protocol; [`network`] carries the line-oriented peer wire
//! protocol over TCP; [`instruction`] parses the operator commands read by
//! the binary.

pub mod chord;
pub mod error;
pub mod instruction;
pub mod network;

#[cfg(test)]
mod testing;
