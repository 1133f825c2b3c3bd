//! Contains descent filters and subtree matchers.
//!
//! A [`NodeFilter`] decides whether the parser descends into a node at all;
//! a [`SubtreeMatcher`] decides whether a fully parsed subtree is handed to
//! the transformation workers. The two are independent: a filter sees only
//! the parse path, a matcher additionally sees the materialized node.

use node::Node;
use stack::NodeStack;


/// Predicate over the current parse path.
pub type NodeFilter = Box<dyn Fn(&NodeStack) -> bool + Send>;

/// Predicate over the current parse path and the node just parsed.
pub type SubtreeMatcher = Box<dyn Fn(&NodeStack, &Node) -> bool + Send>;

/// Creates a filter admitting the subtree at `path` and everything on the way
/// to it.
///
/// The filter is true when the stack's string form is a prefix of `path`
/// (descent toward the wanted subtree) or `path` is a prefix of the stack
/// (inside the wanted subtree). Prefixes are plain string prefixes, so
/// `"Objects/Geo"` admits `"Objects/Geometry"` as well.
pub fn filter_name(path: &str) -> NodeFilter {
    let path = path.to_owned();
    Box::new(move |stack| {
        let s = stack.path();
        if s.len() < path.len() {
            path.starts_with(&s)
        } else {
            s.starts_with(&path)
        }
    })
}

/// Creates a filter that is true when any of the given filters is.
pub fn filter_either(filters: Vec<NodeFilter>) -> NodeFilter {
    Box::new(move |stack| filters.iter().any(|filter| filter(stack)))
}

/// Creates a matcher selecting the node at exactly `path` when it has a child
/// of every required name.
pub fn match_subtree(path: &str, required_children: &[&str]) -> SubtreeMatcher {
    let path = path.to_owned();
    let required = required_children
        .iter()
        .map(|&name| name.to_owned())
        .collect::<Vec<_>>();
    Box::new(move |stack, node| {
        stack.path() == path &&
        required
            .iter()
            .all(|name| node.children.iter().any(|child| child.name == *name))
    })
}
