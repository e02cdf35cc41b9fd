use std::collections::BTreeSet;

use crate::path_utils::TetherPath;
use crate::{DeletionSet, Side};

/// Paths in `destination` that `source` no longer has.
///
/// Both listings are full trees, not change sets: a deleted file has no mtime left to
/// compare, so deletions cannot be bounded by the discovery window.
pub fn destination_only(
    source: &BTreeSet<String>,
    destination: &BTreeSet<String>,
    destination_side: Side,
) -> DeletionSet {
    let mut set = DeletionSet::new(destination_side);
    for path in destination.difference(source) {
        if TetherPath::is_reserved(path) {
            continue;
        }
        set.insert(path.clone());
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn lists_destination_only_paths() {
        let remote = tree(&["a.txt", "b.txt"]);
        let local = tree(&["a.txt", "b.txt", "c.txt", ".tether-mark"]);

        let set = destination_only(&remote, &local, Side::Local);
        assert_eq!(set.destination, Side::Local);
        assert_eq!(set.to_vec(), vec!["c.txt".to_string()]);
    }

    #[test]
    fn source_only_paths_are_not_deletions() {
        let set = destination_only(&tree(&["new.txt"]), &tree(&[]), Side::Remote);
        assert!(set.is_empty());
    }
}
