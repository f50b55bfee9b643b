use std::path::{Path, PathBuf};

/// Per-project data directory: collection JSON, embedding cache, downloaded
/// models.
pub const STORE_DIR_NAME: &str = ".codeweaver";

pub const CACHE_DIR_NAME: &str = "codeweaver";

#[must_use]
pub fn store_dir_for_project_root(root: &Path) -> PathBuf {
    root.join(STORE_DIR_NAME)
}

#[must_use]
pub fn find_store_dir_from_path(path: &Path) -> Option<PathBuf> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir.file_name().and_then(|s| s.to_str()) == Some(STORE_DIR_NAME) {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

#[must_use]
pub fn is_store_dir_name(name: &str) -> bool {
    name == STORE_DIR_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_store_dir_above_a_nested_file() {
        let root = Path::new("/project/.codeweaver/collections/main.json");
        assert_eq!(find_store_dir_from_path(root), Some(PathBuf::from("/project/.codeweaver")));
    }

    #[test]
    fn returns_none_when_no_store_dir_is_an_ancestor() {
        let root = Path::new("/project/src/main.rs");
        assert_eq!(find_store_dir_from_path(root), None);
    }
}
