use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Directory names that are never walked, regardless of `.gitignore` state.
pub const IGNORED_SCOPES: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    ".hg",
    ".svn",
    "dist",
    "build",
    "out",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    ".nuxt",
    ".cache",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    "coverage",
    ".idea",
    ".vscode",
];

/// Hidden (dotfile) names that are source-relevant even though they start with `.`.
const ALLOWLISTED_HIDDEN_FILES: &[&str] = &[
    ".gitignore",
    ".gitattributes",
    ".gitmodules",
    ".editorconfig",
    ".eslintrc",
    ".eslintrc.json",
    ".eslintrc.yml",
    ".eslintrc.yaml",
    ".prettierrc",
    ".prettierrc.json",
    ".dockerignore",
    ".gitlab-ci.yml",
    ".env.example",
    ".env.sample",
];

/// Generated/lock files that carry no hand-authored meaning for `find_code`.
const NOISE_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
    "composer.lock",
    "Gemfile.lock",
    "poetry.lock",
    "docker-compose.yml",
    "docker-compose.yaml",
    "Makefile",
];

/// Files that commonly hold credentials; indexing their contents would leak secrets
/// into the vector store. `.env.example`/`.env.sample` are deliberately excluded from
/// this list via `ALLOWLISTED_HIDDEN_FILES`, which `is_secret_file` does not consult.
const SECRET_FILE_NAMES: &[&str] = &[".env", ".npmrc", ".pypirc", "credentials", "credentials.toml"];

const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// User-configurable scan behavior (spec's `indexer.include_patterns`/`exclude_patterns`).
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
        }
    }
}

/// Walks a project root for candidate source files, `.gitignore`-aware.
///
/// Language detection is left to the chunker: this scanner only filters out
/// ignored scopes, noise/secret files, and oversize files, so "which 170+
/// languages are supported" lives in one place (`codeweaver_chunker::language`).
pub struct FileScanner {
    root: PathBuf,
    options: ScanOptions,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_options(root, ScanOptions::default())
    }

    pub fn with_options(root: impl AsRef<Path>, options: ScanOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan the project root for candidate source files.
    ///
    /// Best-effort: entries that fail to read are logged and skipped rather
    /// than aborting the whole walk.
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        let overrides = self.build_overrides().unwrap_or_else(|err| {
            log::warn!("ignoring invalid include/exclude patterns: {err}");
            Override::empty()
        });

        let mut files = Vec::new();
        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&root);
        builder.hidden(false).overrides(overrides);
        builder.filter_entry(move |entry| is_walkable(&root, entry.path()));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    if entry.file_type().is_some_and(|ft| ft.is_file())
                        && self.is_source_file(entry.path())
                    {
                        files.push(entry.path().to_path_buf());
                    }
                }
                Err(err) => log::warn!("failed to read directory entry: {err}"),
            }
        }

        log::info!("found {} candidate source files", files.len());
        files
    }

    fn build_overrides(&self) -> Result<Override, ignore::Error> {
        let mut builder = OverrideBuilder::new(&self.root);
        for pattern in &self.options.include_patterns {
            builder.add(pattern)?;
        }
        for pattern in &self.options.exclude_patterns {
            builder.add(&format!("!{pattern}"))?;
        }
        builder.build()
    }

    fn is_source_file(&self, path: &Path) -> bool {
        if Self::is_noise_file(path) || Self::is_secret_file(path) {
            return false;
        }
        if is_bench_logs_json(path) {
            return false;
        }
        std::fs::metadata(path)
            .map(|meta| meta.len() <= self.options.max_file_size_bytes)
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_allowlisted_hidden(lowered_name: &str) -> bool {
        ALLOWLISTED_HIDDEN_FILES
            .iter()
            .any(|allowed| *allowed == lowered_name)
    }

    #[must_use]
    pub fn is_noise_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| NOISE_FILE_NAMES.iter().any(|noise| *noise == name))
    }

    #[must_use]
    pub fn is_secret_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| SECRET_FILE_NAMES.iter().any(|secret| *secret == name))
    }
}

fn is_bench_logs_json(path: &Path) -> bool {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return false;
    }
    let Some(parent) = path.parent() else {
        return false;
    };
    if !path_component_matches(parent, "logs") {
        return false;
    }
    parent
        .parent()
        .is_some_and(|grand| path_component_matches(grand, "bench"))
}

fn path_component_matches(path: &Path, target: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(target))
}

fn is_walkable(root: &Path, path: &Path) -> bool {
    if path == root {
        return true;
    }
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    for component in relative.components() {
        if let std::path::Component::Normal(name) = component {
            let lowered = name.to_string_lossy().to_lowercase();
            if IGNORED_SCOPES.iter().any(|ignored| *ignored == lowered) {
                return false;
            }
            if lowered.starts_with('.')
                && lowered != ".gitignore"
                && !FileScanner::is_allowlisted_hidden(&lowered)
            {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_finds_files_and_skips_ignored_scopes() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "module.exports = {};").unwrap();
        fs::write(root.join("yarn.lock"), "# lockfile").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join(".env.example"), "SECRET=").unwrap();

        let scanner = FileScanner::new(root);
        let files: Vec<_> = scanner
            .scan()
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert!(files.contains(&PathBuf::from("main.rs")));
        assert!(files.contains(&PathBuf::from(".env.example")));
        assert!(!files.iter().any(|p| p.starts_with("node_modules")));
        assert!(!files.contains(&PathBuf::from("yarn.lock")));
        assert!(!files.contains(&PathBuf::from(".env")));
    }

    #[test]
    fn exclude_pattern_removes_matching_files() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("keep.rs"), "fn keep() {}").unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("generated/schema.rs"), "// generated").unwrap();

        let options = ScanOptions {
            exclude_patterns: vec!["generated/**".to_string()],
            ..ScanOptions::default()
        };
        let scanner = FileScanner::with_options(root, options);
        let files: Vec<_> = scanner
            .scan()
            .into_iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert!(files.contains(&PathBuf::from("keep.rs")));
        assert!(!files.iter().any(|p| p.starts_with("generated")));
    }

    #[test]
    fn oversize_file_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::write(root.join("big.rs"), vec![b'a'; 1024]).unwrap();

        let options = ScanOptions {
            max_file_size_bytes: 16,
            ..ScanOptions::default()
        };
        let scanner = FileScanner::with_options(root, options);
        assert!(scanner.scan().is_empty());
    }
}
