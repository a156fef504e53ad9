//! Runtime support library for Neve.
//!
//! This crate implements the in-memory representation of Neve objects
//! and the machinery for compacting live object graphs into
//! relocatable regions that can be stored and mapped back in.

#![warn(missing_docs)]

pub mod compact;
pub mod object;
