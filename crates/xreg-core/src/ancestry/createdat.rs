use tracing::debug;
use xreg_types::Problem;

use super::{Reparent, VersionInfo, VersionMode};

/// Ancestry derived from creation time.
///
/// Every Version's ancestor is the Version created just before it, ties
/// broken by id; the oldest is the single root. Caller-supplied ancestors
/// are overwritten.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreatedAtMode;

impl VersionMode for CreatedAtMode {
    fn name(&self) -> &'static str {
        "createdat"
    }

    fn check_ancestors(&self, versions: &[VersionInfo]) -> Result<Vec<Reparent>, Problem> {
        let mut sorted: Vec<&VersionInfo> = versions.iter().collect();
        sorted.sort_by(|a, b| a.createdat.cmp(&b.createdat).then_with(|| a.id.cmp(&b.id)));

        let mut repairs = Vec::new();
        let mut previous: Option<&str> = None;
        for v in sorted {
            let expected = previous.unwrap_or(&v.id);
            if v.ancestor != expected {
                debug!(version = %v.id, ancestor = %expected, "derived ancestor from createdat");
                repairs.push(Reparent::new(&v.id, expected));
            }
            previous = Some(&v.id);
        }
        Ok(repairs)
    }

    fn will_delete(&self, versions: &[VersionInfo], doomed: &str) -> Vec<Reparent> {
        let Some(gone) = versions.iter().find(|v| v.id == doomed) else {
            return Vec::new();
        };
        versions
            .iter()
            .filter(|v| v.ancestor == doomed && v.id != doomed)
            .map(|v| {
                let ancestor = if gone.is_root() { &v.id } else { &gone.ancestor };
                Reparent::new(&v.id, ancestor)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ancestry::TBD;
    use xreg_types::Timestamp;

    fn v(id: &str, ancestor: &str, ms: i64) -> VersionInfo {
        VersionInfo::new(id, ancestor).with_createdat(Timestamp::from_millis(ms))
    }

    #[test]
    fn chain_follows_createdat_not_insertion() {
        let versions = vec![v("t3", TBD, 3000), v("t1", TBD, 1000), v("t2", "t3", 2000)];
        let repairs = CreatedAtMode.check_ancestors(&versions).unwrap();
        assert_eq!(
            repairs,
            vec![
                Reparent::new("t1", "t1"),
                Reparent::new("t2", "t1"),
                Reparent::new("t3", "t2"),
            ]
        );
    }

    #[test]
    fn ties_break_by_id() {
        let versions = vec![v("b", "b", 1), v("a", "a", 1)];
        let repairs = CreatedAtMode.check_ancestors(&versions).unwrap();
        assert_eq!(repairs, vec![Reparent::new("b", "a")]);
    }

    #[test]
    fn consistent_chain_needs_no_repair() {
        let versions = vec![v("1", "1", 1), v("2", "1", 2)];
        assert!(CreatedAtMode.check_ancestors(&versions).unwrap().is_empty());
    }

    #[test]
    fn delete_splices_chain() {
        let versions = vec![v("1", "1", 1), v("2", "1", 2), v("3", "2", 3)];
        assert_eq!(CreatedAtMode.will_delete(&versions, "2"), vec![Reparent::new("3", "1")]);
        assert_eq!(CreatedAtMode.will_delete(&versions, "1"), vec![Reparent::new("2", "2")]);
    }
}
