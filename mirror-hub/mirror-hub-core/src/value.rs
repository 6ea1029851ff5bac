//! Document values held by a mirror.
//!
//! A mirror document is a tree of [`Node`]s. JSON `null` has no node of its
//! own: a null leaf means "absent", so it is dropped when JSON is converted
//! and a null write value is carried as `Option::<Node>::None`.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Number, Value};
use std::collections::BTreeMap;

/// Leaf value.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    String(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Node {
    Scalar(Scalar),
    /// Lists are leaves for deep writes until something descends through them.
    List(Vec<Node>),
    Map(BTreeMap<String, Node>),
}

impl Node {
    /// The empty container every mirror document starts as.
    pub fn empty() -> Self {
        Node::Map(BTreeMap::new())
    }

    /// Convert JSON into a node, returning `None` for `null`.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Node::Scalar(Scalar::Bool(b))),
            Value::Number(n) => Some(Node::Scalar(Scalar::Number(n))),
            Value::String(s) => Some(Node::Scalar(Scalar::String(s))),
            Value::Array(items) => Some(Node::List(
                items.into_iter().filter_map(Node::from_json).collect(),
            )),
            Value::Object(fields) => Some(Node::Map(
                fields
                    .into_iter()
                    .filter_map(|(k, v)| Node::from_json(v).map(|n| (k, n)))
                    .collect(),
            )),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Node::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Node::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            Node::Scalar(Scalar::String(s)) => Value::String(s.clone()),
            Node::List(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<_, _>>(),
            ),
        }
    }

    pub fn is_empty_map(&self) -> bool {
        matches!(self, Node::Map(m) if m.is_empty())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Follow `segments` through nested maps.
    pub fn get_path<S: AsRef<str>>(&self, segments: &[S]) -> Option<&Node> {
        segments
            .iter()
            .try_fold(self, |node, seg| node.get(seg.as_ref()))
    }

    /// Turn this node into a map so it can be descended into.
    ///
    /// Maps are returned as-is, lists become maps keyed by element index and
    /// scalars are discarded.
    pub(crate) fn into_container(self) -> BTreeMap<String, Node> {
        match self {
            Node::Map(m) => m,
            Node::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, n)| (i.to_string(), n))
                .collect(),
            Node::Scalar(_) => BTreeMap::new(),
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::empty()
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::from_json(value).unwrap_or_else(Node::empty)
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        node.to_json()
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Scalar(Scalar::Number(n.into()))
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Scalar(Scalar::String(s))
    }
}
