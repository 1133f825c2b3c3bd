//! Contains the recursive node model and its size arithmetic.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use array_property::ArrayProperty;
use error::{Error, Result};
use header::{node_header_len, DEFAULT_VERSION};
use property::Property;


/// Byte range in the source file covered by a subtree whose body was skipped
/// during parsing.
///
/// `start` is the absolute offset of the record header; `len` runs through
/// the end of the record, trailing null terminator included. The writer
/// reproduces such subtrees by copying exactly these bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRange {
    /// Absolute offset of the first byte of the record.
    pub start: u64,
    /// Total record length in bytes.
    pub len: u64,
}

/// A single FBX record: name, properties and child records.
///
/// Children are shared through `Arc` so that subtrees can flow to worker
/// threads and into patched shallow copies without deep cloning. The derived
/// size fields are maintained by [`Node::recompute_sizes`] and hold the exact
/// on-disk byte counts.
#[derive(Clone, PartialEq)]
pub struct Node {
    pub(crate) id: u64,
    /// Node name, at most 255 bytes.
    pub name: String,
    /// Scalar properties in on-disk order.
    pub properties: Vec<Property>,
    /// Array properties in on-disk order.
    pub array_properties: Vec<ArrayProperty>,
    /// Child records, excluding the null terminator.
    pub children: Vec<Arc<Node>>,
    pub(crate) num_properties: u64,
    pub(crate) property_list_len: u64,
    pub(crate) length: u64,
    pub(crate) skipped: Option<SourceRange>,
}

impl Node {
    /// Creates a node and computes the derived sizes for the 64-bit record
    /// layout.
    pub fn new(name: &str,
               properties: Vec<Property>,
               array_properties: Vec<ArrayProperty>,
               children: Vec<Arc<Node>>)
               -> Self {
        let mut node = Node {
            id: 0,
            name: name.to_owned(),
            properties: properties,
            array_properties: array_properties,
            children: children,
            num_properties: 0,
            property_list_len: 0,
            length: 0,
            skipped: None,
        };
        node.recompute_sizes(DEFAULT_VERSION);
        node
    }

    /// Creates a node with child records only.
    pub fn new_parent(name: &str, children: Vec<Node>) -> Self {
        Node::new(name,
                  Vec::new(),
                  Vec::new(),
                  children.into_iter().map(Arc::new).collect())
    }

    /// Creates a node with a single scalar property.
    pub fn new_single_property(name: &str, property: Property) -> Self {
        Node::new(name, vec![property], Vec::new(), Vec::new())
    }

    /// Creates a node with a single `i32` property.
    pub fn new_i32(name: &str, value: i32) -> Self {
        Node::new_single_property(name, Property::new_i32(value))
    }

    /// Creates a node with a single `i64` property.
    pub fn new_i64(name: &str, value: i64) -> Self {
        Node::new_single_property(name, Property::new_i64(value))
    }

    /// Creates a node with a single string property.
    pub fn new_string(name: &str, value: &str) -> Self {
        Node::new_single_property(name, Property::new_string(value))
    }

    /// Creates a node with a single `f64` array property.
    pub fn new_f64_slice(name: &str, values: &[f64]) -> Self {
        Node::new(name,
                  Vec::new(),
                  vec![ArrayProperty::new_f64_slice(values)],
                  Vec::new())
    }

    /// Creates a node with a single `i32` array property.
    pub fn new_i32_slice(name: &str, values: &[i32]) -> Self {
        Node::new(name,
                  Vec::new(),
                  vec![ArrayProperty::new_i32_slice(values)],
                  Vec::new())
    }

    /// Creates a null record shell.
    pub(crate) fn null(id: u64) -> Self {
        Node {
            id: id,
            name: String::new(),
            properties: Vec::new(),
            array_properties: Vec::new(),
            children: Vec::new(),
            num_properties: 0,
            property_list_len: 0,
            length: 0,
            skipped: None,
        }
    }

    /// Returns the parse-order identity of this node.
    ///
    /// Identities are assigned in pre-order during parsing and are unique
    /// within one parse. Constructed nodes have identity 0.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true for the null sentinel that terminates record lists.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the total on-disk byte length of this record, children and
    /// trailing null terminator included.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Returns the on-disk property count.
    pub fn num_properties(&self) -> u64 {
        self.num_properties
    }

    /// Returns the on-disk byte length of the property list.
    pub fn property_list_len(&self) -> u64 {
        self.property_list_len
    }

    /// Returns the source byte range when this subtree's body was skipped
    /// during parsing.
    pub fn source_range(&self) -> Option<SourceRange> {
        self.skipped
    }

    /// Clones the node shell and its property and child vectors.
    ///
    /// Children stay shared; patching substitutes elements in the cloned
    /// vectors and never mutates the original tree.
    pub fn shallow_copy(&self) -> Self {
        self.clone()
    }

    /// Re-derives `num_properties`, `property_list_len` and `length` from the
    /// current contents.
    ///
    /// A child with length 0 counts as one null-record header. Subtrees that
    /// were skipped during parsing keep their recorded length: their payload
    /// was never materialized, so the recorded byte count is the only truth.
    pub fn recompute_sizes(&mut self, version: u32) {
        if self.skipped.is_some() {
            return;
        }
        let header_len = node_header_len(version);
        self.num_properties = (self.properties.len() + self.array_properties.len()) as u64;
        self.property_list_len = self.properties.iter().map(Property::size).sum::<u64>() +
                                 self.array_properties
                                     .iter()
                                     .map(ArrayProperty::size)
                                     .sum::<u64>();
        let mut children_len = 0;
        for child in &self.children {
            children_len += if child.length == 0 {
                header_len
            } else {
                child.length
            };
        }
        if !self.children.is_empty() {
            children_len += header_len;
        }
        self.length = header_len + self.name.len() as u64 + self.property_list_len + children_len;
    }

    /// Serializes this record at the given absolute offset and returns the
    /// offset of the first byte after it.
    ///
    /// The caller is responsible for `length` being current (see
    /// [`Node::recompute_sizes`]); emission is checked against it and fails
    /// with [`Error::Invariant`] on disagreement. Subtrees skipped during
    /// parsing carry no payload and cannot be serialized here; the patch
    /// writer copies them from the source file instead.
    pub fn write_to<W: Write>(&self, sink: &mut W, offset: u64, version: u32) -> Result<u64> {
        if self.skipped.is_some() {
            return Err(Error::Invariant(format!("node '{}' has no materialized payload",
                                                self.name)));
        }
        let header_len = node_header_len(version);
        if self.is_empty() {
            write_null_record(sink, header_len)?;
            return Ok(offset + header_len);
        }
        let end_offset = offset + self.length;
        self.write_record_header(sink, end_offset, version)?;
        for prop in &self.array_properties {
            prop.write_to(sink)?;
        }
        for prop in &self.properties {
            prop.write_to(sink)?;
        }
        // `header_len` covers the three size words and the name length byte.
        let mut current = offset + header_len + self.name.len() as u64 + self.property_list_len;
        for child in &self.children {
            current = child.write_to(sink, current, version)?;
        }
        if !self.children.is_empty() {
            write_null_record(sink, header_len)?;
            current += header_len;
        }
        if current != end_offset {
            return Err(Error::Invariant(format!("node '{}' emitted {} bytes where length says {}",
                                                self.name,
                                                current - offset,
                                                self.length)));
        }
        Ok(current)
    }

    /// Writes the fixed-size record header and the name.
    pub(crate) fn write_record_header<W: Write>(&self,
                                                sink: &mut W,
                                                end_offset: u64,
                                                version: u32)
                                                -> Result<()> {
        if self.name.len() > 255 {
            return Err(Error::Invariant(format!("node name of {} bytes does not fit the \
                                                 1-byte length field",
                                                self.name.len())));
        }
        if version >= 7500 {
            sink.write_u64::<LittleEndian>(end_offset)?;
            sink.write_u64::<LittleEndian>(self.num_properties)?;
            sink.write_u64::<LittleEndian>(self.property_list_len)?;
        } else {
            if end_offset > u64::from(u32::max_value()) {
                return Err(Error::Invariant(format!("end offset {} does not fit the 32-bit \
                                                     record layout of version {}",
                                                    end_offset,
                                                    version)));
            }
            sink.write_u32::<LittleEndian>(end_offset as u32)?;
            sink.write_u32::<LittleEndian>(self.num_properties as u32)?;
            sink.write_u32::<LittleEndian>(self.property_list_len as u32)?;
        }
        sink.write_u8(self.name.len() as u8)?;
        sink.write_all(self.name.as_bytes())?;
        Ok(())
    }

    /// Collects the nodes reached by descending through children matching
    /// the given names in turn.
    ///
    /// An empty path yields the node itself.
    pub fn get_nodes(&self, names: &[&str]) -> Vec<&Node> {
        if names.is_empty() {
            return vec![self];
        }
        let mut nodes = Vec::new();
        for child in &self.children {
            if child.name == names[0] {
                nodes.extend(child.get_nodes(&names[1..]));
            }
        }
        nodes
    }

    /// Treats the node as holding a single `i32` array property and decodes
    /// it.
    pub fn i32_slice(&self) -> Option<Vec<i32>> {
        if self.array_properties.len() != 1 {
            return None;
        }
        self.array_properties[0].as_i32_slice().ok()
    }

    /// Treats the node as holding a single `f64` array property and decodes
    /// it.
    pub fn f64_slice(&self) -> Option<Vec<f64>> {
        if self.array_properties.len() != 1 {
            return None;
        }
        self.array_properties[0].as_f64_slice().ok()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("num_properties", &self.num_properties)
            .field("children", &self.children.len())
            .field("length", &self.length)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for prop in &self.properties {
            if let Ok(s) = prop.as_string() {
                write!(f, " {}", s)?;
            } else if let Ok(v) = prop.as_i32() {
                write!(f, " {}", v)?;
            } else if let Ok(v) = prop.as_i64() {
                write!(f, " {}", v)?;
            } else if let Ok(v) = prop.as_f64() {
                write!(f, " {}", v)?;
            } else {
                write!(f, " <{}>", prop.type_code as char)?;
            }
        }
        for prop in &self.array_properties {
            write!(f, " {}[{}]", prop.type_code as char, prop.array_length)?;
        }
        if !self.children.is_empty() {
            write!(f, " {{")?;
            for child in &self.children {
                write!(f, " {}", child)?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}

/// Writes a null record: `header_len` zero bytes.
pub(crate) fn write_null_record<W: Write>(sink: &mut W, header_len: u64) -> Result<()> {
    const ZEROS: [u8; 25] = [0; 25];
    sink.write_all(&ZEROS[..header_len as usize])?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use array_property::ArrayProperty;
    use header::node_header_len;
    use property::Property;
    use super::Node;

    #[test]
    fn length_invariant_64bit() {
        let vertices = Node::new_f64_slice("Vertices", &[6.66, 42.0, 6.9, 20.20]);
        // 25 (header) + 8 (name) + 13 + 32 (array property).
        assert_eq!(vertices.length(), 25 + 8 + 13 + 32);
        assert_eq!(vertices.num_properties(), 1);
        assert_eq!(vertices.property_list_len(), 45);

        let geometry = Node::new_parent("Geometry", vec![vertices.clone()]);
        // 25 + 8 (name) + child + 25 (terminator).
        assert_eq!(geometry.length(),
                   25 + 8 + vertices.length() + 25);
    }

    #[test]
    fn length_invariant_32bit() {
        let mut node = Node::new_i32("Version", 100);
        node.recompute_sizes(7400);
        assert_eq!(node.length(), 13 + 7 + 5);

        let mut parent = Node::new_parent("Header", vec![Node::new_i32("Version", 100)]);
        {
            let child = Arc::make_mut(&mut parent.children[0]);
            child.recompute_sizes(7400);
        }
        parent.recompute_sizes(7400);
        assert_eq!(parent.length(), 13 + 6 + (13 + 7 + 5) + 13);
    }

    #[test]
    fn zero_length_child_counts_as_null_record() {
        let mut parent = Node::new_parent("P", vec![]);
        parent.children.push(Arc::new(Node::null(0)));
        parent.recompute_sizes(7500);
        let hdr = node_header_len(7500);
        // Header + name + null child + terminator.
        assert_eq!(parent.length(), hdr + 1 + hdr + hdr);
    }

    #[test]
    fn shallow_copy_shares_children() {
        let original = Node::new_parent("Geometry",
                                        vec![Node::new_f64_slice("Vertices", &[1.0, 2.0])]);
        let mut copy = original.shallow_copy();
        copy.array_properties
            .push(ArrayProperty::new_i32_slice(&[1]));
        assert_eq!(original.array_properties.len(), 0);
        assert!(Arc::ptr_eq(&original.children[0], &copy.children[0]));
    }

    #[test]
    fn write_matches_length() {
        let node = Node::new("Geometry",
                             vec![Property::new_i64(1000), Property::new_string("Mesh")],
                             vec![ArrayProperty::new_f64_slice(&[1.0, 2.0, 3.0])],
                             vec![Arc::new(Node::new_i32("GeometryVersion", 124))]);
        let mut buf = Vec::new();
        let end = node.write_to(&mut buf, 0, 7500).unwrap();
        assert_eq!(end, node.length());
        assert_eq!(buf.len() as u64, node.length());
    }

    #[test]
    fn get_nodes_descends_by_name() {
        let doc = Node::new_parent("Objects",
                                   vec![Node::new_parent("Geometry",
                                                         vec![Node::new_f64_slice("Vertices",
                                                                                  &[0.0]),
                                                              Node::new_i32("Version", 1)]),
                                        Node::new_parent("Geometry",
                                                         vec![Node::new_f64_slice("Vertices",
                                                                                  &[1.0])])]);
        let found = doc.get_nodes(&["Geometry", "Vertices"]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].f64_slice().unwrap(), vec![0.0]);
        assert_eq!(found[1].f64_slice().unwrap(), vec![1.0]);
        assert!(doc.get_nodes(&["Model"]).is_empty());
    }

    #[test]
    fn slice_helpers_require_single_array() {
        let node = Node::new_i32_slice("Indices", &[666, 420, 69, 2020]);
        assert_eq!(node.i32_slice().unwrap(), vec![666, 420, 69, 2020]);
        assert!(node.f64_slice().is_none());
        assert!(Node::new_parent("Empty", vec![]).i32_slice().is_none());
    }
}
