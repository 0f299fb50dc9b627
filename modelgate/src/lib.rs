//! ModelGate command-line front end.
//!
//! Argument types live in [`cli`] and command bodies in [`run`] so that
//! integration tests can drive them without spawning the binary.

pub mod cli;
pub mod error;
pub mod run;
