//! Compacting object graphs into relocatable regions.
//!
//! # Design of the compaction system
//!
//! This section explains the important concepts within the system.
//! The documentation on the individual items is intentionally left
//! sparse; refer to this section for the design information.
//!
//! ## Regions
//!
//! A [region][`Region`] is a single contiguous buffer holding a
//! serialized object graph as a sequence of records.
//! Records reference each other by byte offset from the start of the
//! buffer, never by address, so a region can be written to storage
//! and loaded back anywhere.
//! A fixed-shape terminator record ends each graph and carries its
//! root.
//!
//! Reading a region is not deserialization:
//! one forward pass rewrites every offset into an address,
//! after which the records are ordinary objects used in place.
//! The pass is single and forward because the compactor only emits a
//! record after the records it references,
//! except for cycles through mutable cells,
//! whose fixup is position-independent anyway.
//! Big integers get one extra decoding step during the pass,
//! because their digit storage lives outside the record;
//! the region keeps a list of them to drop on teardown.
//!
//! ## The compactor
//!
//! The [compactor][`Compactor`] walks a live graph with an explicit
//! work stack and copies every reachable object into an
//! [arena][`Arena`].
//! A parent stays on the stack until all of its children have been
//! copied, which produces the children-before-parents record order
//! that the reader depends on.
//!
//! While the graph is being copied, the arena may move in memory as
//! it grows, so all bookkeeping is in offsets:
//! the identity table maps each visited object to the offset of its
//! copy, and the sharing table maps the hash of each committed
//! record's bytes to its offset.
//! Every copy goes through a stage-then-commit step:
//! the record is staged at the end of the arena,
//! and if the sharing table already holds a byte-identical record,
//! the staged copy is discarded by rewinding the arena
//! and the object resolves to the earlier record.
//! Structurally equal subgraphs therefore occupy one record,
//! however many times they appear.
//!
//! Mutable cells opt out of sharing and invert the protocol:
//! their record is placed before their contents are resolved,
//! so that a cycle closing back into a cell finds an offset
//! instead of endlessly rescheduling the cell.
//!
//! ## What cannot be compacted
//!
//! Closures and external objects have no serialized form;
//! compacting a graph that contains one aborts the process.
//! Tasks have no serialized form either, but they have a value,
//! so they are written as thunks,
//! which every deployment can read back.

pub use self::{arena::*, compactor::*, counters::*, region::*};

mod arena;
mod compactor;
mod counters;
mod region;
