#![warn(missing_docs)]
#![allow(clippy::upper_case_acronyms)]

//! `lantern-codegen` generates the lazy-tensor glue of the lantern runtime:
//! for every operator in a curated set it emits an IR node type capturing the
//! operator's operands, scalar payload and output shapes, a native dispatch
//! function that records the operator into the lazy graph instead of
//! executing it, and — when no shape-only kernel exists — the declaration of
//! a hand-written shape rule. Everything is emitted as Rust token streams and
//! rendered to formatted source files.

#[macro_use]
extern crate derive_new;

/// The consumed operator-schema model.
pub mod schema;

/// The module for generating the lazy backend code.
pub mod lazy;

mod error;
mod formatter;
mod logger;

pub use error::*;
pub use formatter::*;
