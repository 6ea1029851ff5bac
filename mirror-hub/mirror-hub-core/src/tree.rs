//! Deep set/delete inside a mirror document.

use crate::value::Node;
use std::collections::BTreeMap;

/// Return a copy of `document` with `value` written at `path`.
///
/// `None` deletes the entry at `path`; a delete never creates anything, and
/// maps left empty by it are pruned. An empty `path` replaces the whole
/// document, with a delete resetting it to an empty map.
pub fn apply_deep<S: AsRef<str>>(document: &Node, path: &[S], value: Option<Node>) -> Node {
    if path.is_empty() {
        return value.unwrap_or_else(Node::empty);
    }
    if value.is_none() && !exists(document, path) {
        return document.clone();
    }
    let mut root = document.clone().into_container();
    match value {
        Some(v) => set_in(&mut root, path, v),
        None => {
            delete_in(&mut root, path);
        }
    }
    Node::Map(root)
}

/// Whether `path` names an entry, reading list elements by index.
fn exists<S: AsRef<str>>(node: &Node, path: &[S]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return true;
    };
    let child = match node {
        Node::Map(m) => m.get(head.as_ref()),
        // only the canonical form names an element: "01" is not index 1
        Node::List(items) => head
            .as_ref()
            .parse::<usize>()
            .ok()
            .filter(|i| i.to_string() == head.as_ref())
            .and_then(|i| items.get(i)),
        Node::Scalar(_) => None,
    };
    child.is_some_and(|c| exists(c, rest))
}

fn set_in<S: AsRef<str>>(container: &mut BTreeMap<String, Node>, path: &[S], value: Node) {
    let (head, rest) = match path.split_first() {
        Some(split) => split,
        None => return,
    };
    let head = head.as_ref();
    if rest.is_empty() {
        container.insert(head.to_string(), value);
        return;
    }
    // a deeper write needs a container here, whatever was stored before
    let mut child = container
        .remove(head)
        .map(Node::into_container)
        .unwrap_or_default();
    set_in(&mut child, rest, value);
    container.insert(head.to_string(), Node::Map(child));
}

/// Returns true when something was removed.
fn delete_in<S: AsRef<str>>(container: &mut BTreeMap<String, Node>, path: &[S]) -> bool {
    let (head, rest) = match path.split_first() {
        Some(split) => split,
        None => return false,
    };
    let head = head.as_ref();
    if rest.is_empty() {
        return container.remove(head).is_some();
    }
    let mut child = match container.remove(head) {
        Some(node) => node.into_container(),
        None => return false,
    };
    let removed = delete_in(&mut child, rest);
    if !(removed && child.is_empty()) {
        container.insert(head.to_string(), Node::Map(child));
    }
    removed
}
