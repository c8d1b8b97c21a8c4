//! Ancestor forest of one Resource's Versions.
//!
//! [`AncestryGraph`] indexes a set of [`VersionInfo`]s by id and keeps a
//! forward-edge index (`children`) so positions and descendants can be
//! answered without rescanning.
//!
//! # Invariants
//!
//! - A root points at itself.
//! - Self-edges never appear in the `children` index.
//! - Ancestors outside the set (dangling or TBD) contribute no edge.

use std::collections::{BTreeMap, HashMap};

use super::VersionInfo;

/// Topological class of a Version, used as the primary ordering key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Position {
    Root = 0,
    Middle = 1,
    Leaf = 2,
}

#[derive(Debug)]
pub struct AncestryGraph<'a> {
    nodes: BTreeMap<&'a str, &'a VersionInfo>,
    children: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> AncestryGraph<'a> {
    pub fn new(versions: &'a [VersionInfo]) -> Self {
        let nodes: BTreeMap<&str, &VersionInfo> = versions.iter().map(|v| (v.id.as_str(), v)).collect();
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for v in versions {
            if v.ancestor != v.id && nodes.contains_key(v.ancestor.as_str()) {
                children.entry(v.ancestor.as_str()).or_default().push(v.id.as_str());
            }
        }
        for list in children.values_mut() {
            list.sort_unstable();
        }
        Self { nodes, children }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&'a VersionInfo> {
        self.nodes.get(id).copied()
    }

    /// Direct children of `id`, sorted.
    pub fn children(&self, id: &str) -> &[&'a str] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Where `id` sits in its tree. A pending (TBD) version ranks as a
    /// root, so order only after ancestors are repaired.
    pub fn position(&self, id: &str) -> Option<Position> {
        let v = self.nodes.get(id)?;
        Some(if v.is_root() || v.is_tbd() {
            Position::Root
        } else if self.children.contains_key(id) {
            Position::Middle
        } else {
            Position::Leaf
        })
    }

    /// Ids of every root, sorted.
    pub fn roots(&self) -> Vec<&'a str> {
        self.nodes
            .values()
            .filter(|v| v.is_root())
            .map(|v| v.id.as_str())
            .collect()
    }

    /// Every id ordered by (position, createdat, id).
    pub fn ordered(&self) -> Vec<&'a str> {
        let mut keyed: Vec<(Position, &VersionInfo)> = self
            .nodes
            .values()
            .map(|v| (self.position(&v.id).unwrap_or(Position::Root), *v))
            .collect();
        keyed.sort_by(|(pa, a), (pb, b)| {
            pa.cmp(pb)
                .then_with(|| a.createdat.cmp(&b.createdat))
                .then_with(|| a.id.cmp(&b.id))
        });
        keyed.into_iter().map(|(_, v)| v.id.as_str()).collect()
    }

    /// The last id of [`ordered`](Self::ordered).
    pub fn newest(&self) -> Option<&'a str> {
        self.ordered().pop()
    }

    /// Ids whose ancestor names a Version outside the set. The TBD
    /// sentinel is not dangling.
    pub fn dangling(&self) -> Vec<&'a VersionInfo> {
        self.nodes
            .values()
            .filter(|v| !v.is_root() && !v.is_tbd() && !self.nodes.contains_key(v.ancestor.as_str()))
            .copied()
            .collect()
    }

    /// Ids of every Version that lies on an ancestor cycle, sorted.
    ///
    /// Walks each ancestor chain once, marking nodes in progress; reaching
    /// an in-progress node closes a cycle made of the chain from that node
    /// onward.
    pub fn cycles(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut on_cycle: Vec<String> = Vec::new();

        for &start in self.nodes.keys() {
            if marks.contains_key(start) {
                continue;
            }
            let mut chain: Vec<&str> = Vec::new();
            let mut current = start;
            loop {
                match marks.get(current) {
                    Some(Mark::Done) => break,
                    Some(Mark::Active) => {
                        if let Some(at) = chain.iter().position(|id| *id == current) {
                            on_cycle.extend(chain[at..].iter().map(|id| id.to_string()));
                        }
                        break;
                    }
                    None => {
                        marks.insert(current, Mark::Active);
                        chain.push(current);
                        match self.next_ancestor(current) {
                            Some(next) => current = next,
                            None => break,
                        }
                    }
                }
            }
            for id in chain {
                marks.insert(id, Mark::Done);
            }
        }

        on_cycle.sort();
        on_cycle.dedup();
        on_cycle
    }

    fn next_ancestor(&self, id: &str) -> Option<&'a str> {
        let v = self.nodes.get(id)?;
        if v.is_root() {
            return None;
        }
        self.nodes.get_key_value(v.ancestor.as_str()).map(|(k, _)| *k)
    }
}

/// Versions sorted oldest first by (createdat, creation order, id).
pub fn by_age<'a>(versions: impl IntoIterator<Item = &'a VersionInfo>) -> Vec<&'a VersionInfo> {
    let mut list: Vec<&VersionInfo> = versions.into_iter().collect();
    list.sort_by(|a, b| {
        a.createdat
            .cmp(&b.createdat)
            .then_with(|| a.seq.cmp(&b.seq))
            .then_with(|| a.id.cmp(&b.id))
    });
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use xreg_types::Timestamp;

    fn v(id: &str, ancestor: &str, ms: i64) -> VersionInfo {
        VersionInfo::new(id, ancestor).with_createdat(Timestamp::from_millis(ms))
    }

    #[test]
    fn positions_and_order() {
        let versions = vec![v("v3", "v2", 3), v("v1", "v1", 1), v("v2", "v1", 2)];
        let g = AncestryGraph::new(&versions);
        assert_eq!(g.position("v1"), Some(Position::Root));
        assert_eq!(g.position("v2"), Some(Position::Middle));
        assert_eq!(g.position("v3"), Some(Position::Leaf));
        assert_eq!(g.ordered(), vec!["v1", "v2", "v3"]);
        assert_eq!(g.newest(), Some("v3"));
        assert_eq!(g.children("v1"), &["v2"]);
    }

    #[test]
    fn pending_version_ranks_as_root() {
        let versions = vec![v("v1", "v1", 1), v("v2", super::super::TBD, 2)];
        let g = AncestryGraph::new(&versions);
        assert_eq!(g.position("v2"), Some(Position::Root));
        assert!(g.children("v1").is_empty());
    }

    #[test]
    fn leaf_outranks_newer_root() {
        let versions = vec![v("a", "a", 1), v("b", "a", 2), v("c", "c", 9)];
        let g = AncestryGraph::new(&versions);
        assert_eq!(g.roots(), vec!["a", "c"]);
        assert_eq!(g.newest(), Some("b"));
    }

    #[test]
    fn equal_createdat_orders_by_id() {
        let versions = vec![v("b", "b", 1), v("a", "a", 1)];
        assert_eq!(AncestryGraph::new(&versions).ordered(), vec!["a", "b"]);
    }

    #[test]
    fn cycles_list_only_members() {
        let versions = vec![
            v("vb", "va", 1),
            v("va", "vb", 1),
            v("vc", "va", 2),
            v("root", "root", 0),
        ];
        let g = AncestryGraph::new(&versions);
        assert_eq!(g.cycles(), vec!["va".to_string(), "vb".to_string()]);
    }

    #[test]
    fn acyclic_has_no_cycles() {
        let versions = vec![v("v1", "v1", 1), v("v2", "v1", 2), v("v3", "v1", 3)];
        assert!(AncestryGraph::new(&versions).cycles().is_empty());
    }

    #[test]
    fn dangling_excludes_tbd() {
        let versions = vec![
            v("v1", "v1", 1),
            v("v2", "gone", 2),
            v("v3", crate::ancestry::TBD, 3),
        ];
        let g = AncestryGraph::new(&versions);
        let dangling: Vec<&str> = g.dangling().iter().map(|v| v.id.as_str()).collect();
        assert_eq!(dangling, vec!["v2"]);
    }

    #[test]
    fn age_order_uses_creation_sequence() {
        let versions = vec![
            v("b", "b", 1).with_seq(1),
            v("a", "a", 1).with_seq(2),
            v("z", "z", 0),
        ];
        let ids: Vec<&str> = by_age(&versions).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "b", "a"]);
    }
}
