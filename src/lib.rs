//! This crate provides a streaming reader, patcher and writer for FBX binary.
//!
//! FBX data consists of generic nodes and node properties, and it requires
//! interpretation to use as 3D contents. This crate stays below that layer:
//! it parses the record container, optionally skipping subtrees a path filter
//! rejects, applies identity-keyed diffs, and re-emits a byte-level-correct
//! file in which unchanged skipped subtrees are copied through from the
//! source and changed subtrees get their length prefixes and nested end
//! offsets recomputed.
//!
//! The expensive per-subtree work producing the diffs is pluggable (see
//! [`pipeline::Transform`]) and runs on a worker pool while the parser is
//! still streaming; per-worker diff streams are merged back into the global
//! parse order the writer consumes.
//!
//! This crate reads and rewrites FBX binary and would *NOT* implement FBX
//! ASCII support or document composition from scratch.

extern crate byteorder;
extern crate crossbeam_channel;
#[cfg(test)]
extern crate env_logger;
extern crate flate2;
#[macro_use]
extern crate log;

pub use array_property::ArrayProperty;
pub use diff::{Diff, DiffKind, DiffSet};
pub use error::{Error, Result};
pub use filter::{filter_either, filter_name, match_subtree, NodeFilter, SubtreeMatcher};
pub use header::FbxHeader;
pub use node::{Node, SourceRange};
pub use pipeline::{PipelineOutput, Transform, WorkerResult};
pub use property::Property;
pub use reader::{read_fbx, Fbx, FbxReader};
pub use stack::NodeStack;
pub use writer::{PatchWriter, WriteSummary};

pub mod array_property;
pub mod diff;
pub mod error;
pub mod filter;
pub mod header;
pub mod node;
pub mod pipeline;
pub mod property;
pub mod reader;
pub mod stack;
pub mod writer;
