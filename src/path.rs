//! Path descriptors addressing objects inside the lab registry.
//!
//! Objects never hold live references to one another. A trigger input names its source with an
//! [`ObjectPath`], the waveform mapping stores marker targets as paths, and specifications name
//! the properties they write with a [`PropertyTarget`]. All of them are resolved through the
//! [`Laboratory`](crate::lab::Laboratory) registry at the point of use, so they survive device
//! re-creation and can be stored verbatim in a configuration snapshot.
//!
//! A path is an ordered list of `(name, role)` pairs, root first:
//!
//! ```
//! use labtiming_backend::path::*;
//!
//! let mkr = ObjectPath::hal("Wfm1")
//!     .child("CH1", PathRole::Channel)
//!     .child("CH1_mkr2", PathRole::Marker);
//! assert_eq!(mkr.root_name(), "Wfm1");
//! assert_eq!(mkr.scope(), "CH1/CH1_mkr2");
//! assert_eq!(format!("{}", mkr), "Wfm1/CH1/CH1_mkr2");
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a path node, i.e. how the parent object finds the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathRole {
    #[serde(rename = "HAL")]
    Hal,
    #[serde(rename = "PROC")]
    Processor,
    /// Pulse output of a delay generator
    #[serde(rename = "TRIG")]
    TriggerOutput,
    /// Output channel of an AWG waveform
    #[serde(rename = "CH")]
    Channel,
    #[serde(rename = "MKR")]
    Marker,
    #[serde(rename = "SEG")]
    Segment,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, PathRole)", into = "(String, PathRole)")]
pub struct PathNode {
    pub name: String,
    pub role: PathRole,
}

impl From<(String, PathRole)> for PathNode {
    fn from((name, role): (String, PathRole)) -> Self {
        PathNode { name, role }
    }
}
impl From<PathNode> for (String, PathRole) {
    fn from(node: PathNode) -> Self {
        (node.name, node.role)
    }
}

/// Ordered `(name, role)` descriptor of an object, root first.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectPath(Vec<PathNode>);

impl ObjectPath {
    /// Path of a registered HAL.
    pub fn hal(name: &str) -> Self {
        ObjectPath(vec![PathNode {
            name: name.to_string(),
            role: PathRole::Hal,
        }])
    }

    pub fn processor(name: &str) -> Self {
        ObjectPath(vec![PathNode {
            name: name.to_string(),
            role: PathRole::Processor,
        }])
    }

    pub fn from_nodes(nodes: Vec<PathNode>) -> Self {
        ObjectPath(nodes)
    }

    /// Returns a new path extended by one node.
    pub fn child(&self, name: &str, role: PathRole) -> Self {
        let mut nodes = self.0.clone();
        nodes.push(PathNode {
            name: name.to_string(),
            role,
        });
        ObjectPath(nodes)
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Name of the registered root object (empty for an empty path).
    pub fn root_name(&self) -> &str {
        self.0.first().map_or("", |node| node.name.as_str())
    }

    pub fn root_role(&self) -> Option<PathRole> {
        self.0.first().map(|node| node.role)
    }

    /// Nodes below the root.
    pub fn tail(&self) -> &[PathNode] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn leaf(&self) -> Option<&PathNode> {
        self.0.last()
    }

    /// Path of the parent object, `None` for roots.
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.0.len() < 2 {
            return None;
        }
        Some(ObjectPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Names below the root joined with `/`; empty for the root itself.
    /// Used as the scope key of property locks.
    pub fn scope(&self) -> String {
        self.tail()
            .iter()
            .map(|node| node.name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = self
            .0
            .iter()
            .map(|node| node.name.as_str())
            .collect::<Vec<_>>()
            .join("/");
        write!(f, "{}", names)
    }
}

/// A single property on an object: the unit of locking, specification writes and variable handles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyTarget {
    pub path: ObjectPath,
    pub property: String,
}

impl PropertyTarget {
    pub fn new(path: ObjectPath, property: &str) -> Self {
        PropertyTarget {
            path,
            property: property.to_string(),
        }
    }
}

impl fmt::Display for PropertyTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.path, self.property)
    }
}

/// Properties of one device that a generic configuration replay must leave alone.
///
/// Keys are `(scope, property)` where the scope is [`ObjectPath::scope`] relative to the device.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyLocks {
    locked: BTreeSet<(String, String)>,
}

impl PropertyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&mut self, scope: &str, property: &str) {
        self.locked.insert((scope.to_string(), property.to_string()));
    }

    pub fn unlock(&mut self, scope: &str, property: &str) {
        self.locked.remove(&(scope.to_string(), property.to_string()));
    }

    pub fn is_locked(&self, scope: &str, property: &str) -> bool {
        self.locked
            .contains(&(scope.to_string(), property.to_string()))
    }

    /// `true` if the property may be written by a configuration replay.
    pub fn permits(&self, scope: &str, property: &str) -> bool {
        !self.is_locked(scope, property)
    }

    pub fn is_empty(&self) -> bool {
        self.locked.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn path_serializes_as_name_role_pairs() {
        let path = ObjectPath::hal("ddg").child("A", PathRole::TriggerOutput);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"[["ddg","HAL"],["A","TRIG"]]"#);
        let back: ObjectPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn parent_and_scope() {
        let mkr = ObjectPath::hal("Wfm1")
            .child("CH2", PathRole::Channel)
            .child("CH2_mkr1", PathRole::Marker);
        assert_eq!(
            mkr.parent(),
            Some(ObjectPath::hal("Wfm1").child("CH2", PathRole::Channel))
        );
        assert_eq!(ObjectPath::hal("Wfm1").parent(), None);
        assert_eq!(ObjectPath::hal("Wfm1").scope(), "");
    }

    #[test]
    fn locks() {
        let mut locks = PropertyLocks::new();
        locks.lock("A", "TrigPulseDelay");
        assert!(!locks.permits("A", "TrigPulseDelay"));
        assert!(locks.permits("B", "TrigPulseDelay"));
        assert!(locks.permits("", "TrigPulseDelay"));
        locks.unlock("A", "TrigPulseDelay");
        assert!(locks.is_empty());
    }
}
