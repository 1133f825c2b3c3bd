//! Contains the patch writer.
//!
//! The writer is a *rewriter*: it consumes a parsed document plus a sorted
//! diff set and emits a complete file. Patching happens in two passes. A
//! post-order pass applies diffs through a cursor and recomputes the sizes of
//! every tree that changed; untouched subtrees are reused as-is. A pre-order
//! pass then emits the records with correct end offsets, copying subtrees
//! that were skipped during parsing straight from the source file.

use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use diff::{self, DiffCursor, DiffSet};
use error::{Error, Result};
use header::{node_header_len, HEADER_LEN};
use node::{write_null_record, Node};
use reader::Fbx;


/// Two magic words opening the file trailer.
const TRAILER_MAGIC: [u64; 2] = [0x66d8_c9a0_3c6d_6a3a, 0x7e1a_3fcc_e35c_f5f1];

/// Zero padding between the magic words and the closing bytes.
const TRAILER_PAD_LEN: usize = 120;

/// The 16 bytes closing every compliant binary FBX file.
const TRAILER_TAIL: [u8; 16] = [0xf8, 0x5a, 0x8c, 0x6a, 0xde, 0xf5, 0xd9, 0x7e, 0xec, 0xe9,
                                0x0c, 0xe3, 0x75, 0x8f, 0x29, 0x0b];

/// Total byte length of the file trailer.
pub const TRAILER_LEN: u64 = 16 + TRAILER_PAD_LEN as u64 + 16;

/// What a completed rewrite did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Total bytes emitted, header and trailer included.
    pub bytes_written: u64,
    /// Diffs whose target identity matched no emitted node.
    pub unapplied_diffs: usize,
}

/// Rewrites a parsed document with a sorted diff set applied.
pub struct PatchWriter<'a> {
    fbx: &'a Fbx,
    diffs: &'a DiffSet,
}

impl<'a> PatchWriter<'a> {
    /// Creates a writer over the given document and diff set.
    pub fn new(fbx: &'a Fbx, diffs: &'a DiffSet) -> Self {
        PatchWriter {
            fbx: fbx,
            diffs: diffs,
        }
    }

    /// Rewrites the document into `sink`.
    ///
    /// `source` must be the stream the document was parsed from; subtrees the
    /// parser skipped are copied from it byte-exactly. Output written before
    /// a failure is the caller's to discard.
    pub fn write_to<R, W>(&self, source: &mut R, sink: &mut W) -> Result<WriteSummary>
        where R: Read + Seek,
              W: Write
    {
        let version = self.fbx.header.version();
        let header_len = node_header_len(version);

        // Patch-and-size pass.
        let mut cursor = self.diffs.cursor();
        let mut roots = Vec::with_capacity(1 + self.fbx.nodes.len());
        if let Some(ref top) = self.fbx.top {
            if let Some(node) = patch_tree(top, &mut cursor, version) {
                roots.push(node);
            }
        }
        for node in &self.fbx.nodes {
            if let Some(node) = patch_tree(node, &mut cursor, version) {
                roots.push(node);
            }
        }
        let unapplied = cursor.finish();

        // Emit pass.
        self.fbx.header.write_to(sink)?;
        let mut offset = HEADER_LEN;
        for node in &roots {
            offset = emit_node(node, source, sink, offset, version)?;
        }
        write_null_record(sink, header_len)?;
        offset += header_len;
        write_trailer(sink)?;
        offset += TRAILER_LEN;

        debug!("rewrote document: {} bytes, {} diffs unapplied", offset, unapplied);
        Ok(WriteSummary {
            bytes_written: offset,
            unapplied_diffs: unapplied,
        })
    }
}

enum SelfPatch {
    Unchanged,
    Replaced(Node),
}

/// Applies the cursor's diffs to one subtree, bottom-up.
///
/// Returns `None` when a deletion consumed the subtree. Unchanged subtrees
/// come back as a clone of the original `Arc`; changed ones are rebuilt as
/// shallow copies with their sizes recomputed.
fn patch_tree(node: &Arc<Node>, cursor: &mut DiffCursor, version: u32) -> Option<Arc<Node>> {
    let own = cursor.take_for(node.id());

    if node.source_range().is_some() {
        // The matcher required descent, which the filter refused: diffs can
        // never legitimately target a copy-through subtree.
        if !own.is_empty() {
            warn!("{} diffs target the skipped subtree '{}', dropping them",
                  own.len(),
                  node.name);
            cursor.mark_unapplied(own.len());
        }
        return Some(node.clone());
    }

    let self_patch = if own.is_empty() {
        SelfPatch::Unchanged
    } else {
        match diff::apply_all(node, own) {
            Some(patched) => SelfPatch::Replaced(patched),
            // Deleted, subtree included. Diffs targeting the abandoned
            // children surface as unapplied when the cursor passes them.
            None => return None,
        }
    };

    let mut children = Vec::with_capacity(node.children.len());
    let mut children_changed = false;
    for child in &node.children {
        match patch_tree(child, cursor, version) {
            Some(patched) => {
                if !Arc::ptr_eq(&patched, child) {
                    children_changed = true;
                }
                children.push(patched);
            },
            None => children_changed = true,
        }
    }

    if let SelfPatch::Unchanged = self_patch {
        if !children_changed {
            return Some(node.clone());
        }
    }
    let mut patched = match self_patch {
        SelfPatch::Replaced(patched) => patched,
        SelfPatch::Unchanged => node.shallow_copy(),
    };
    patched.children = children;
    patched.recompute_sizes(version);
    Some(Arc::new(patched))
}

/// Emits one record at the given absolute offset and returns the offset of
/// the first byte after it.
fn emit_node<R, W>(node: &Node,
                   source: &mut R,
                   sink: &mut W,
                   offset: u64,
                   version: u32)
                   -> Result<u64>
    where R: Read + Seek,
          W: Write
{
    if let Some(range) = node.source_range() {
        // Copy-through: reproduce the original bytes of the whole record.
        source.seek(SeekFrom::Start(range.start))?;
        let copied = io::copy(&mut source.by_ref().take(range.len), sink)?;
        if copied != range.len {
            return Err(Error::corrupt(range.start,
                                      format!("source ends inside the {}-byte range of \
                                               subtree '{}'",
                                              range.len,
                                              node.name)));
        }
        return Ok(offset + range.len);
    }

    let header_len = node_header_len(version);
    if node.is_empty() {
        write_null_record(sink, header_len)?;
        return Ok(offset + header_len);
    }

    let end_offset = offset + node.length();
    node.write_record_header(sink, end_offset, version)?;
    for prop in &node.array_properties {
        prop.write_to(sink)?;
    }
    for prop in &node.properties {
        prop.write_to(sink)?;
    }
    let mut current = offset + header_len + node.name.len() as u64 + node.property_list_len();
    for child in &node.children {
        current = emit_node(child, source, sink, current, version)?;
    }
    if !node.children.is_empty() {
        write_null_record(sink, header_len)?;
        current += header_len;
    }
    if current != end_offset {
        return Err(Error::Invariant(format!("node '{}' emitted {} bytes where its length \
                                             says {}",
                                            node.name,
                                            current - offset,
                                            node.length())));
    }
    Ok(current)
}

fn write_trailer<W: Write>(sink: &mut W) -> Result<()> {
    sink.write_u64::<LittleEndian>(TRAILER_MAGIC[0])?;
    sink.write_u64::<LittleEndian>(TRAILER_MAGIC[1])?;
    sink.write_all(&[0_u8; TRAILER_PAD_LEN])?;
    sink.write_all(&TRAILER_TAIL)?;
    Ok(())
}
