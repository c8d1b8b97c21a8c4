use std::collections::HashSet;

use tracing::debug;
use xreg_types::{Problem, ProblemKind};

use super::graph::{by_age, AncestryGraph};
use super::{Reparent, VersionInfo, VersionMode};

/// Caller-managed ancestry.
///
/// Ancestors are taken as given. TBD ancestors are chained onto the
/// current newest Version, oldest pending Version first, so a batch of new
/// Versions chains in creation order. A dangling ancestor is never
/// repaired.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualMode;

impl VersionMode for ManualMode {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn check_ancestors(&self, versions: &[VersionInfo]) -> Result<Vec<Reparent>, Problem> {
        let graph = AncestryGraph::new(versions);
        if let Some(v) = graph.dangling().first() {
            return Err(Problem::new(ProblemKind::UnknownId)
                .with_arg("name", "ancestor")
                .with_arg("id", &v.ancestor)
                .with_arg("version", &v.id));
        }

        let (pending, settled): (Vec<&VersionInfo>, Vec<&VersionInfo>) =
            versions.iter().partition(|v| v.is_tbd());
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        // Versions below a pending one are not candidates for its ancestor.
        let pending_ids: HashSet<&str> = pending.iter().map(|v| v.id.as_str()).collect();
        let candidates: Vec<VersionInfo> = settled
            .into_iter()
            .filter(|v| !hangs_off_pending(&graph, &v.id, &pending_ids))
            .cloned()
            .collect();

        let mut newest = AncestryGraph::new(&candidates).newest().map(String::from);
        let mut repairs = Vec::with_capacity(pending.len());
        for v in by_age(pending.iter().copied()) {
            let ancestor = newest.take().unwrap_or_else(|| v.id.clone());
            debug!(version = %v.id, %ancestor, "assigned pending ancestor");
            repairs.push(Reparent::new(&v.id, ancestor));
            newest = Some(v.id.clone());
        }
        Ok(repairs)
    }

    fn will_delete(&self, versions: &[VersionInfo], doomed: &str) -> Vec<Reparent> {
        let ids: HashSet<&str> = versions.iter().map(|v| v.id.as_str()).collect();
        if !ids.contains(doomed) {
            return Vec::new();
        }
        versions
            .iter()
            .filter(|v| v.ancestor == doomed && v.id != doomed)
            .map(|v| Reparent::new(&v.id, &v.id))
            .collect()
    }
}

/// Returns `true` if the ancestor chain of `id` reaches a pending Version.
fn hangs_off_pending(graph: &AncestryGraph<'_>, id: &str, pending: &HashSet<&str>) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = graph.get(id);
    while let Some(v) = current {
        if pending.contains(v.ancestor.as_str()) {
            return true;
        }
        if v.is_root() || !seen.insert(v.id.as_str()) {
            return false;
        }
        current = graph.get(&v.ancestor);
    }
    false
}
