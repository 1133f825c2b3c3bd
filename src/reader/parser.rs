//! Contains the streaming parser implementation.

use std::io;
use std::io::{Read, Seek, SeekFrom};
use std::mem;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use crossbeam_channel::Sender;

use array_property::{element_len, ArrayProperty, ENCODING_PLAIN, ENCODING_ZLIB};
use error::{Error, Result};
use filter::{NodeFilter, SubtreeMatcher};
use header::{FbxHeader, DEFAULT_VERSION, HEADER_LEN};
use node::{Node, SourceRange};
use property::Property;
use stack::NodeStack;
use super::Fbx;


/// Matched subtrees are flushed to the job channel once a batch covers this
/// many source bytes.
const BATCH_FLUSH_LEN: u64 = 1 << 20;

/// Streaming parser for binary FBX.
///
/// Filters decide which subtrees are materialized: a rejected subtree is
/// seeked over and kept as a shell with its source byte range, so the patch
/// writer can reproduce it byte-exactly. A matcher, when present, selects
/// fully parsed subtrees for the transformation workers; matched nodes are
/// batched onto the job channel while parsing continues.
///
/// The first error is sticky: it is recorded, the job channel is closed, and
/// the partially parsed document stays accessible.
pub struct FbxReader<R> {
    source: R,
    fbx: Fbx,
    /// Absolute count of bytes consumed from the source.
    position: u64,
    next_id: u64,
    stack: NodeStack,
    filters: Vec<NodeFilter>,
    matcher: Option<SubtreeMatcher>,
    jobs: Option<Sender<Vec<Arc<Node>>>>,
    batch: Vec<Arc<Node>>,
    batch_len: u64,
    version: u32,
    error: Option<Error>,
}

impl<R: Read + Seek> FbxReader<R> {
    /// Creates a parser that materializes every subtree.
    pub fn new(source: R) -> Self {
        FbxReader::with_filters(source, Vec::new())
    }

    /// Creates a parser with descent filters.
    pub fn with_filters(source: R, filters: Vec<NodeFilter>) -> Self {
        FbxReader {
            source: source,
            fbx: Fbx::default(),
            position: 0,
            next_id: 0,
            stack: NodeStack::new(),
            filters: filters,
            matcher: None,
            jobs: None,
            batch: Vec::new(),
            batch_len: 0,
            version: DEFAULT_VERSION,
            error: None,
        }
    }

    /// Creates a parser that additionally hands matched subtrees to the given
    /// job channel in batches.
    pub fn with_matcher(source: R,
                        filters: Vec<NodeFilter>,
                        matcher: SubtreeMatcher,
                        jobs: Sender<Vec<Arc<Node>>>)
                        -> Self {
        let mut reader = FbxReader::with_filters(source, filters);
        reader.matcher = Some(matcher);
        reader.jobs = Some(jobs);
        reader
    }

    /// Parses the whole document.
    ///
    /// On failure the error is also recorded on the parser and everything
    /// parsed so far stays accessible through [`FbxReader::fbx`].
    pub fn read(&mut self) -> Result<()> {
        if let Some(ref err) = self.error {
            return Err(err.clone());
        }
        let result = self.read_document();
        if let Err(ref err) = result {
            self.error = Some(err.clone());
            // Batch emission stops on error; workers drain what was already
            // sent.
            self.batch.clear();
            self.batch_len = 0;
        }
        self.close_jobs();
        result
    }

    /// Returns the document parsed so far.
    pub fn fbx(&self) -> &Fbx {
        &self.fbx
    }

    /// Returns the recorded error, if parsing failed.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns the absolute count of bytes consumed from the source.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the FBX version of the input, once the header has been read.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Decomposes the parser into the (possibly partial) document, the source
    /// stream, and the recorded error.
    pub fn into_parts(self) -> (Fbx, R, Option<Error>) {
        (self.fbx, self.source, self.error)
    }

    fn read_document(&mut self) -> Result<()> {
        let header = FbxHeader::read_from(&mut self.source)?;
        self.position = HEADER_LEN;
        self.version = header.version();
        debug!("FBX binary header read (version={})", self.version);
        self.fbx.header = header;

        let top = self.read_node()?;
        if top.is_empty() {
            return Ok(());
        }
        self.fbx.top = Some(top);

        loop {
            let node = self.read_node()?;
            if node.is_empty() {
                break;
            }
            self.fbx.nodes.push(node);
        }
        debug!("parsed {} top-level records, {} bytes",
               1 + self.fbx.nodes.len(),
               self.position);
        Ok(())
    }

    fn read_node(&mut self) -> Result<Arc<Node>> {
        let id = self.next_id;
        self.next_id += 1;
        let start = self.position;

        let end_offset = self.read_size_word()?;
        let num_properties = self.read_size_word()?;
        let property_list_len = self.read_size_word()?;
        let name_len = self.read_u8()?;
        let name = self.read_name(name_len)?;

        if end_offset == 0 {
            // Null record: terminates the enclosing record list.
            return Ok(Arc::new(Node::null(id)));
        }
        if end_offset < self.position {
            return Err(Error::corrupt(start,
                                      format!("end offset {} points before the record body",
                                              end_offset)));
        }

        self.stack.push(&name);
        let result =
            self.read_node_body(id, name, start, end_offset, num_properties, property_list_len);
        self.stack.pop();
        result
    }

    fn read_node_body(&mut self,
                      id: u64,
                      name: String,
                      start: u64,
                      end_offset: u64,
                      num_properties: u64,
                      property_list_len: u64)
                      -> Result<Arc<Node>> {
        let mut node = Node::null(id);
        node.name = name;
        node.num_properties = num_properties;
        node.property_list_len = property_list_len;

        if !self.admits() {
            // Skip the body and remember where it sits in the source, so the
            // writer can reproduce it without this parser materializing it.
            let remaining = end_offset - self.position;
            self.source.seek(SeekFrom::Current(remaining as i64))?;
            self.position = end_offset;
            node.length = end_offset - start;
            node.skipped = Some(SourceRange {
                start: start,
                len: end_offset - start,
            });
            debug!("skipped subtree '{}' ({} bytes)", self.stack, node.length);
            return Ok(Arc::new(node));
        }

        for _ in 0..num_properties {
            self.read_property(&mut node)?;
        }

        while self.position < end_offset {
            let child = self.read_node()?;
            if child.is_empty() {
                break;
            }
            node.children.push(child);
        }
        if self.position != end_offset {
            return Err(Error::corrupt(self.position,
                                      format!("node '{}' does not end at expected offset {}",
                                              node.name,
                                              end_offset)));
        }
        node.length = end_offset - start;

        let node = Arc::new(node);
        let matched = match self.matcher {
            Some(ref matcher) => matcher(&self.stack, &node),
            None => false,
        };
        if matched {
            self.enqueue(node.clone());
        }
        Ok(node)
    }

    fn admits(&self) -> bool {
        self.filters.iter().all(|filter| filter(&self.stack))
    }

    fn read_property(&mut self, node: &mut Node) -> Result<()> {
        let offset = self.position;
        let type_code = self.read_u8()?;
        match type_code {
            b'Y' => self.read_scalar(node, type_code, 2),
            b'C' => self.read_scalar(node, type_code, 1),
            b'I' | b'F' => self.read_scalar(node, type_code, 4),
            b'D' | b'L' => self.read_scalar(node, type_code, 8),
            b'S' | b'R' => {
                let len = self.read_u32()?;
                let data = self.read_bytes(u64::from(len))?;
                node.properties.push(Property {
                    type_code: type_code,
                    data: data,
                });
                Ok(())
            },
            b'f' | b'i' | b'd' | b'l' | b'b' => self.read_array(node, type_code, offset),
            code => Err(Error::corrupt(offset,
                                       format!("unknown property type code {:#x}", code))),
        }
    }

    fn read_scalar(&mut self, node: &mut Node, type_code: u8, len: u64) -> Result<()> {
        let data = self.read_bytes(len)?;
        node.properties.push(Property {
            type_code: type_code,
            data: data,
        });
        Ok(())
    }

    fn read_array(&mut self, node: &mut Node, type_code: u8, offset: u64) -> Result<()> {
        let element_len = match element_len(type_code) {
            Some(len) => len,
            None => unreachable!("property dispatch guarantees an array type code"),
        };
        let array_length = self.read_u32()?;
        let encoding = self.read_u32()?;
        let compressed_length = self.read_u32()?;
        let payload_len = match encoding {
            ENCODING_PLAIN => element_len * u64::from(array_length),
            ENCODING_ZLIB => u64::from(compressed_length),
            encoding => {
                return Err(Error::corrupt(offset,
                                          format!("unknown array property encoding {}",
                                                  encoding)));
            },
        };
        let data = self.read_bytes(payload_len)?;
        node.array_properties.push(ArrayProperty {
            type_code: type_code,
            array_length: array_length,
            encoding: encoding,
            compressed_length: compressed_length,
            data: data,
        });
        Ok(())
    }

    fn enqueue(&mut self, node: Arc<Node>) {
        if self.jobs.is_none() {
            return;
        }
        self.batch_len += node.length();
        self.batch.push(node);
        if self.batch_len >= BATCH_FLUSH_LEN {
            self.flush_batch();
        }
    }

    fn flush_batch(&mut self) {
        self.batch_len = 0;
        if self.batch.is_empty() {
            return;
        }
        let batch = mem::replace(&mut self.batch, Vec::new());
        let send_failed = match self.jobs {
            Some(ref jobs) => {
                debug!("flushing a batch of {} matched subtrees", batch.len());
                jobs.send(batch).is_err()
            },
            None => return,
        };
        if send_failed {
            warn!("job channel closed by receiver, discarding matched subtrees");
            self.jobs = None;
        }
    }

    fn close_jobs(&mut self) {
        self.flush_batch();
        if self.jobs.take().is_some() {
            debug!("job channel closed");
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        match self.source.read_u8() {
            Ok(v) => {
                self.position += 1;
                Ok(v)
            },
            Err(err) => Err(self.read_error(err)),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        match self.source.read_u32::<LittleEndian>() {
            Ok(v) => {
                self.position += 4;
                Ok(v)
            },
            Err(err) => Err(self.read_error(err)),
        }
    }

    fn read_u64(&mut self) -> Result<u64> {
        match self.source.read_u64::<LittleEndian>() {
            Ok(v) => {
                self.position += 8;
                Ok(v)
            },
            Err(err) => Err(self.read_error(err)),
        }
    }

    /// Reads one node header size word: 64-bit since FBX 7.5, 32-bit before.
    fn read_size_word(&mut self) -> Result<u64> {
        if self.version >= 7500 {
            self.read_u64()
        } else {
            self.read_u32().map(u64::from)
        }
    }

    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; len as usize];
        match self.source.read_exact(&mut buf) {
            Ok(()) => {
                self.position += len;
                Ok(buf)
            },
            Err(err) => Err(self.read_error(err)),
        }
    }

    fn read_name(&mut self, len: u8) -> Result<String> {
        let bytes = self.read_bytes(u64::from(len))?;
        String::from_utf8(bytes).map_err(|err| {
            Error::corrupt(self.position,
                           format!("node name is not valid UTF-8: {}", err))
        })
    }

    fn read_error(&self, err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::corrupt(self.position, "unexpected end of stream")
        } else {
            Error::Io(err)
        }
    }
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use crossbeam_channel;

    use error::Error;
    use filter::{filter_name, match_subtree};
    use header::{FbxHeader, HEADER_LEN};
    use node::{write_null_record, Node};
    use super::FbxReader;

    /// Serializes the given top-level records into in-memory file bytes.
    ///
    /// The trailer is omitted; the parser stops at the top-level null record.
    fn file_with_nodes(nodes: &[Node], version: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        FbxHeader::new(version).write_to(&mut buf).unwrap();
        let mut offset = HEADER_LEN;
        for node in nodes {
            let mut node = node.clone();
            deep_recompute(&mut node, version);
            offset = node.write_to(&mut buf, offset, version).unwrap();
        }
        write_null_record(&mut buf, FbxHeader::new(version).node_header_len()).unwrap();
        buf
    }

    fn deep_recompute(node: &mut Node, version: u32) {
        for child in &mut node.children {
            deep_recompute(Arc::make_mut(child), version);
        }
        node.recompute_sizes(version);
    }

    fn geometry_fixture() -> Node {
        Node::new_parent("Geometry",
                         vec![Node::new_f64_slice("Vertices", &[6.66, 42.0, 6.9, 20.20]),
                              Node::new_i32_slice("Indices", &[666, 420, 69, 2020])])
    }

    #[test]
    fn roundtrip_a_tiny_tree() {
        let buf = file_with_nodes(&[geometry_fixture()], 7500);
        let mut reader = FbxReader::new(Cursor::new(buf));
        reader.read().unwrap();

        let fbx = reader.fbx();
        let top = fbx.top.as_ref().unwrap();
        assert_eq!(top.name, "Geometry");
        assert_eq!(top.children.len(), 2);
        assert_eq!(top.children[0].name, "Vertices");
        assert_eq!(top.children[0].f64_slice().unwrap(),
                   vec![6.66, 42.0, 6.9, 20.20]);
        assert_eq!(top.children[1].name, "Indices");
        assert_eq!(top.children[1].i32_slice().unwrap(),
                   vec![666, 420, 69, 2020]);
    }

    #[test]
    fn roundtrip_a_single_f64_array_node() {
        let node = Node::new_f64_slice("Values", &[666.0, 420.0, 69.0, 2020.0]);
        let buf = file_with_nodes(&[node], 7500);
        let (fbx, _) = super::super::read_fbx(Cursor::new(buf)).unwrap();
        let top = fbx.top.unwrap();
        assert_eq!(top.array_properties[0].as_f64_slice().unwrap(),
                   vec![666.0, 420.0, 69.0, 2020.0]);
    }

    #[test]
    fn roundtrip_a_pre7500_file() {
        let buf = file_with_nodes(&[geometry_fixture()], 7400);
        let mut reader = FbxReader::new(Cursor::new(buf));
        reader.read().unwrap();
        assert_eq!(reader.version(), 7400);
        let top = reader.fbx().top.as_ref().unwrap();
        assert_eq!(top.children[0].f64_slice().unwrap(),
                   vec![6.66, 42.0, 6.9, 20.20]);
    }

    #[test]
    fn identities_are_monotone_in_preorder() {
        let buf = file_with_nodes(&[geometry_fixture(), Node::new_i32("Version", 7)], 7500);
        let mut reader = FbxReader::new(Cursor::new(buf));
        reader.read().unwrap();

        let fbx = reader.fbx();
        let mut ids = Vec::new();
        fn collect(node: &Node, ids: &mut Vec<u64>) {
            ids.push(node.id());
            for child in &node.children {
                collect(child, ids);
            }
        }
        collect(fbx.top.as_ref().unwrap(), &mut ids);
        for node in &fbx.nodes {
            collect(node, &mut ids);
        }
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids, sorted, "pre-order ids must be strictly increasing");
    }

    #[test]
    fn filtered_subtrees_become_range_shells() {
        let buf = file_with_nodes(&[Node::new_parent("Objects", vec![geometry_fixture()]),
                                    Node::new_parent("Connections",
                                                     vec![Node::new_i32("C", 1)])],
                                  7500);
        let filters = vec![filter_name("Objects")];
        let mut reader = FbxReader::with_filters(Cursor::new(buf), filters);
        reader.read().unwrap();

        let fbx = reader.fbx();
        assert_eq!(fbx.top.as_ref().unwrap().name, "Objects");
        assert!(fbx.top.as_ref().unwrap().source_range().is_none());

        // "Connections" was rejected: a shell with the source range, no body.
        let skipped = &fbx.nodes[0];
        assert_eq!(skipped.name, "Connections");
        assert!(skipped.children.is_empty());
        let range = skipped.source_range().unwrap();
        assert_eq!(range.len, skipped.length());
        assert!(range.start >= HEADER_LEN);
    }

    #[test]
    fn matched_subtrees_are_batched_to_the_job_channel() {
        let buf = file_with_nodes(&[Node::new_parent("Objects", vec![geometry_fixture()])],
                                  7500);
        let (tx, rx) = crossbeam_channel::bounded(16);
        let matcher = match_subtree("Objects/Geometry", &["Vertices", "Indices"]);
        let mut reader = FbxReader::with_matcher(Cursor::new(buf), Vec::new(), matcher, tx);
        reader.read().unwrap();
        drop(reader);

        let batches = rx.iter().collect::<Vec<_>>();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].name, "Geometry");
    }

    #[test]
    fn unknown_type_code_is_corrupt() {
        let mut buf = file_with_nodes(&[Node::new_i32("Version", 7)], 7500);
        // The type code byte sits right after the node header and name.
        let code_at = (HEADER_LEN + 25 + "Version".len() as u64) as usize;
        assert_eq!(buf[code_at], b'I');
        buf[code_at] = b'X';

        let mut reader = FbxReader::new(Cursor::new(buf));
        match reader.read() {
            Err(Error::Corrupt { .. }) => {},
            other => panic!("expected Corrupt, got {:?}", other),
        }
        assert!(reader.error().is_some());
    }

    #[test]
    fn truncated_file_is_corrupt_and_keeps_partial_document() {
        let mut buf = file_with_nodes(&[Node::new_i32("First", 1), Node::new_i32("Second", 2)],
                                      7500);
        buf.truncate(buf.len() - 30);

        let mut reader = FbxReader::new(Cursor::new(buf));
        match reader.read() {
            Err(Error::Corrupt { .. }) => {},
            other => panic!("expected Corrupt, got {:?}", other),
        }
        // The first record was parsed before the failure.
        assert_eq!(reader.fbx().top.as_ref().unwrap().name, "First");
    }

    #[test]
    fn end_offset_before_body_is_corrupt() {
        let mut buf = file_with_nodes(&[Node::new_i32("Version", 7)], 7500);
        // Corrupt the first record's end offset down to 1.
        buf[HEADER_LEN as usize] = 1;
        for b in &mut buf[HEADER_LEN as usize + 1..HEADER_LEN as usize + 8] {
            *b = 0;
        }
        let mut reader = FbxReader::new(Cursor::new(buf));
        match reader.read() {
            Err(Error::Corrupt { .. }) => {},
            other => panic!("expected Corrupt, got {:?}", other),
        }
    }
}
