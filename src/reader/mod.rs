//! Contains the filtered streaming parser and the parsed document.

use std::io::{Read, Seek};
use std::sync::Arc;

use error::Result;
use header::FbxHeader;
use header::DEFAULT_VERSION;
use node::Node;

pub use self::parser::FbxReader;

mod parser;


/// A parsed FBX document.
///
/// `top` is the first top-level record of the file, `nodes` the remaining
/// top-level records in file order. Subtrees rejected by the parser's filters
/// are present as shells carrying their source byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct Fbx {
    /// The 27-byte file header, kept verbatim.
    pub header: FbxHeader,
    /// First top-level record.
    pub top: Option<Arc<Node>>,
    /// Remaining top-level records in file order.
    pub nodes: Vec<Arc<Node>>,
}

impl Fbx {
    /// Creates an empty document with the given header.
    pub fn new(header: FbxHeader) -> Self {
        Fbx {
            header: header,
            top: None,
            nodes: Vec::new(),
        }
    }

    /// Collects the nodes reached by descending through top-level records and
    /// children matching the given names in turn.
    pub fn get_nodes(&self, names: &[&str]) -> Vec<&Node> {
        if names.is_empty() {
            return Vec::new();
        }
        let mut nodes = Vec::new();
        if let Some(ref top) = self.top {
            if top.name == names[0] {
                nodes.extend(top.get_nodes(&names[1..]));
            }
        }
        for node in &self.nodes {
            if node.name == names[0] {
                nodes.extend(node.get_nodes(&names[1..]));
            }
        }
        nodes
    }
}

impl Default for Fbx {
    fn default() -> Self {
        Fbx::new(FbxHeader::new(DEFAULT_VERSION))
    }
}

/// Parses a whole document from the given stream.
///
/// Convenience wrapper around [`FbxReader`] without filters; the stream is
/// handed back for later copy-through use. For access to a partially parsed
/// document after a failure, drive a [`FbxReader`] directly.
pub fn read_fbx<R: Read + Seek>(source: R) -> Result<(Fbx, R)> {
    let mut reader = FbxReader::new(source);
    reader.read()?;
    let (fbx, source, _) = reader.into_parts();
    Ok((fbx, source))
}
