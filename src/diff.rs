//! Contains identity-keyed diffs and the sorted diff set.
//!
//! Diffs are keyed by the parse-order node identity. Because identities are
//! assigned in pre-order and the writer emits in the same pre-order, applying
//! a sorted diff set during a rewrite is a merge-walk: a single cursor
//! advances monotonically, never scanning backwards.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use array_property::ArrayProperty;
use node::Node;
use property::Property;


/// What to change on the targeted node.
#[derive(Debug, Clone)]
pub enum DiffKind {
    /// Replace the scalar property with the matching type code.
    ScalarReplace(Property),
    /// Replace the array property with the matching type code.
    ArrayReplace(ArrayProperty),
    /// Remove the node, subtree included.
    Delete,
}

/// A single change to apply to the node with the given identity.
#[derive(Debug, Clone)]
pub struct Diff {
    /// Parse-order identity of the targeted node.
    pub node_id: u64,
    /// The change itself.
    pub kind: DiffKind,
}

impl Diff {
    /// Creates a scalar property replacement.
    pub fn scalar_replace(node_id: u64, property: Property) -> Self {
        Diff {
            node_id: node_id,
            kind: DiffKind::ScalarReplace(property),
        }
    }

    /// Creates an array property replacement.
    pub fn array_replace(node_id: u64, property: ArrayProperty) -> Self {
        Diff {
            node_id: node_id,
            kind: DiffKind::ArrayReplace(property),
        }
    }

    /// Creates a node deletion.
    pub fn delete(node_id: u64) -> Self {
        Diff {
            node_id: node_id,
            kind: DiffKind::Delete,
        }
    }
}

/// A sequence of diffs kept sorted by node identity.
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    diffs: Vec<Diff>,
}

impl DiffSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a set from diffs in arbitrary order.
    ///
    /// The sort is stable, so diffs sharing a node identity keep their
    /// relative order and apply in it.
    pub fn from_unsorted(mut diffs: Vec<Diff>) -> Self {
        diffs.sort_by_key(|diff| diff.node_id);
        DiffSet { diffs: diffs }
    }

    /// Returns the number of diffs.
    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    /// Returns true when the set holds no diffs.
    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Iterates over the diffs in identity order.
    pub fn iter(&self) -> ::std::slice::Iter<Diff> {
        self.diffs.iter()
    }

    /// Inserts a single diff, keeping the set sorted.
    ///
    /// The diff is appended and bubbled towards its slot, so in-order
    /// arrivals (the expected case) insert in constant time.
    pub fn insert(&mut self, diff: Diff) {
        self.diffs.push(diff);
        let mut i = self.diffs.len() - 1;
        while i > 0 && self.diffs[i - 1].node_id > self.diffs[i].node_id {
            self.diffs.swap(i - 1, i);
            i -= 1;
        }
    }

    /// Merges already-sorted sets into one sorted set.
    ///
    /// Classic k-way merge over a min-heap keyed `(node_id, source index)`,
    /// so diffs with equal identities come out in source order and the heap
    /// never holds more than one entry per source.
    pub fn merge(sets: Vec<DiffSet>) -> DiffSet {
        let mut total = 0;
        let mut sources = Vec::with_capacity(sets.len());
        for set in sets {
            total += set.diffs.len();
            sources.push(set.diffs.into_iter());
        }

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some(diff) = source.next() {
                heap.push(HeapEntry {
                    source: index,
                    diff: diff,
                });
            }
        }

        let mut merged = Vec::with_capacity(total);
        while let Some(entry) = heap.pop() {
            if let Some(next) = sources[entry.source].next() {
                heap.push(HeapEntry {
                    source: entry.source,
                    diff: next,
                });
            }
            merged.push(entry.diff);
        }
        DiffSet { diffs: merged }
    }

    /// Returns a cursor for in-order application during a rewrite.
    pub fn cursor(&self) -> DiffCursor {
        DiffCursor {
            diffs: &self.diffs,
            pos: 0,
            unapplied: 0,
        }
    }
}

/// Min-heap entry; `BinaryHeap` is a max-heap, so the ordering is reversed
/// here instead of wrapping every entry in `Reverse`.
struct HeapEntry {
    source: usize,
    diff: Diff,
}

impl HeapEntry {
    fn key(&self) -> (u64, usize) {
        (self.diff.node_id, self.source)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Advances through a sorted diff set in step with a pre-order tree walk.
pub struct DiffCursor<'a> {
    diffs: &'a [Diff],
    pos: usize,
    unapplied: usize,
}

impl<'a> DiffCursor<'a> {
    /// Returns all diffs targeting the given identity, in set order.
    ///
    /// Identities are visited monotonically during a rewrite; diffs whose
    /// identity was passed without being requested matched no emitted node
    /// and are dropped with a warning.
    pub fn take_for(&mut self, node_id: u64) -> &'a [Diff] {
        while self.pos < self.diffs.len() && self.diffs[self.pos].node_id < node_id {
            warn!("diff for node {} matched no node, dropping it",
                  self.diffs[self.pos].node_id);
            self.pos += 1;
            self.unapplied += 1;
        }
        let start = self.pos;
        while self.pos < self.diffs.len() && self.diffs[self.pos].node_id == node_id {
            self.pos += 1;
        }
        &self.diffs[start..self.pos]
    }

    /// Records diffs that were handed out but could not be applied.
    pub fn mark_unapplied(&mut self, count: usize) {
        self.unapplied += count;
    }

    /// Drops whatever is left and returns the total number of diffs that
    /// never applied.
    pub fn finish(mut self) -> usize {
        while self.pos < self.diffs.len() {
            warn!("diff for node {} matched no node, dropping it",
                  self.diffs[self.pos].node_id);
            self.pos += 1;
            self.unapplied += 1;
        }
        self.unapplied
    }
}

/// Applies the given diffs to one node, in order.
///
/// Returns the patched shallow copy, or `None` when a deletion consumed the
/// node. Replacements substitute the property with the matching type code;
/// a replacement finding no slot leaves the copy unchanged, mirroring the
/// tolerant behavior of in-order patch streams.
pub(crate) fn apply_all(node: &Node, diffs: &[Diff]) -> Option<Node> {
    let mut patched = node.shallow_copy();
    for diff in diffs {
        debug_assert_eq!(diff.node_id, node.id());
        match diff.kind {
            DiffKind::Delete => return None,
            DiffKind::ScalarReplace(ref property) => {
                if let Some(slot) = patched
                       .properties
                       .iter_mut()
                       .find(|p| p.type_code == property.type_code) {
                    *slot = property.clone();
                } else {
                    debug!("scalar replace for node {} found no '{}' property",
                           node.id(),
                           property.type_code as char);
                }
            },
            DiffKind::ArrayReplace(ref property) => {
                if let Some(slot) = patched
                       .array_properties
                       .iter_mut()
                       .find(|p| p.type_code == property.type_code) {
                    *slot = property.clone();
                } else {
                    debug!("array replace for node {} found no '{}' property",
                           node.id(),
                           property.type_code as char);
                }
            },
        }
    }
    Some(patched)
}


#[cfg(test)]
mod tests {
    use array_property::ArrayProperty;
    use node::Node;
    use property::Property;
    use super::*;

    fn ids(set: &DiffSet) -> Vec<u64> {
        set.iter().map(|diff| diff.node_id).collect()
    }

    fn deletes(ids: &[u64]) -> DiffSet {
        let mut set = DiffSet::new();
        for &id in ids {
            set.insert(Diff::delete(id));
        }
        set
    }

    #[test]
    fn sorted_insertion() {
        let mut set = deletes(&[1, 2, 4, 5]);
        set.insert(Diff::delete(3));
        assert_eq!(ids(&set), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn insertion_from_unsorted_arrivals() {
        let set = DiffSet::from_unsorted(vec![Diff::delete(5), Diff::delete(1), Diff::delete(3)]);
        assert_eq!(ids(&set), vec![1, 3, 5]);
    }

    #[test]
    fn kway_merge() {
        let merged = DiffSet::merge(vec![deletes(&[1, 2, 4, 5]),
                                         deletes(&[0, 2, 6, 7]),
                                         deletes(&[]),
                                         deletes(&[1, 7, 8, 9])]);
        assert_eq!(ids(&merged), vec![0, 1, 1, 2, 2, 4, 5, 6, 7, 7, 8, 9]);
    }

    #[test]
    fn merge_is_stable_across_sources() {
        let mut first = DiffSet::new();
        first.insert(Diff::scalar_replace(7, Property::new_i32(1)));
        let mut second = DiffSet::new();
        second.insert(Diff::scalar_replace(7, Property::new_i32(2)));

        let merged = DiffSet::merge(vec![first, second]);
        let values = merged
            .iter()
            .map(|diff| match diff.kind {
                DiffKind::ScalarReplace(ref p) => p.as_i32().unwrap(),
                _ => panic!("unexpected kind"),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn apply_replaces_by_type_code() {
        let node = Node::new("Vertices",
                             vec![Property::new_i32(7)],
                             vec![ArrayProperty::new_f64_slice(&[1.0, 2.0])],
                             Vec::new());
        let diffs = [Diff::array_replace(0, ArrayProperty::new_f64_slice(&[9.0])),
                     Diff::scalar_replace(0, Property::new_i32(8))];
        let patched = apply_all(&node, &diffs).unwrap();
        assert_eq!(patched.array_properties[0].as_f64_slice().unwrap(),
                   vec![9.0]);
        assert_eq!(patched.properties[0].as_i32().unwrap(), 8);
        // The original is untouched.
        assert_eq!(node.properties[0].as_i32().unwrap(), 7);
    }

    #[test]
    fn apply_delete_consumes_the_node() {
        let node = Node::new_i32("Version", 1);
        assert!(apply_all(&node, &[Diff::delete(0)]).is_none());
    }

    #[test]
    fn cursor_walks_monotone_ids() {
        let set = deletes(&[1, 3, 3, 7]);
        let mut cursor = set.cursor();
        assert_eq!(cursor.take_for(1).len(), 1);
        assert_eq!(cursor.take_for(2).len(), 0);
        assert_eq!(cursor.take_for(3).len(), 2);
        // Id 7 is never requested: it counts as unapplied.
        assert_eq!(cursor.take_for(9).len(), 0);
        assert_eq!(cursor.finish(), 1);
    }
}
