//! Traversal rules shared by both crawlers: noise-directory pruning, the extension
//! allow-list, and a lazy depth-first walk of a root.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names (compared lowercase) whose whole subtree is never visited.
pub const NOISE_DIRS: &[&str] = &[
    "$recycle.bin",
    ".trash",
    ".trashes",
    "node_modules",
    ".git",
    ".svn",
    ".hg",
];

pub const IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic"];
pub const VIDEO_EXT: &[&str] = &["mp4", "mov", "mkv", "avi", "wmv"];
pub const DOC_EXT: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "md", "csv", "json",
];

/// Lowercased text after the last dot of the file name; empty when there is none
/// or the name ends in a dot.
pub fn extension_of(path: &Path) -> String {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return String::new(),
    };
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

/// Files without an extension pass; anything else must be on the allow-list.
pub fn is_allowed_extension(path: &Path) -> bool {
    let ext = extension_of(path);
    ext.is_empty()
        || IMAGE_EXT.contains(&ext.as_str())
        || VIDEO_EXT.contains(&ext.as_str())
        || DOC_EXT.contains(&ext.as_str())
}

pub fn is_noise_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| NOISE_DIRS.contains(&n.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct ScanFilter {
    excludes: GlobSet,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            excludes: GlobSet::empty(),
        }
    }
}

impl ScanFilter {
    pub fn new(exclude_patterns: &[String]) -> anyhow::Result<Self> {
        Ok(Self {
            excludes: build_globset(exclude_patterns)?,
        })
    }

    pub fn should_descend(&self, dir: &Path) -> bool {
        !is_noise_dir(dir) && !self.excludes.is_match(dir)
    }

    pub fn accepts_file(&self, path: &Path) -> bool {
        is_allowed_extension(path) && !self.excludes.is_match(path)
    }
}

#[derive(Debug)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub metadata: fs::Metadata,
}

/// Every accepted regular file under `root`, depth-unbounded, following symlinks.
/// Unreadable entries are skipped. Calling again restarts from the top.
pub fn walk(root: impl AsRef<Path>, filter: &ScanFilter) -> impl Iterator<Item = DiscoveredFile> {
    let descend = filter.clone();
    let accept = filter.clone();
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(move |e| !e.file_type().is_dir() || descend.should_descend(e.path()))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(move |e| accept.accepts_file(e.path()))
        .filter_map(|e| {
            let metadata = e.metadata().ok()?;
            Some(DiscoveredFile {
                path: e.into_path(),
                metadata,
            })
        })
}

/// `root` and every directory below it that survives pruning.
pub fn walk_dirs(root: impl AsRef<Path>, filter: &ScanFilter) -> impl Iterator<Item = PathBuf> {
    let descend = filter.clone();
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(move |e| e.file_type().is_dir() && descend.should_descend(e.path()))
        .filter_map(Result::ok)
        .map(|e| e.into_path())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn extension_rules() {
        assert_eq!(extension_of(Path::new("/a/B.JPG")), "jpg");
        assert_eq!(extension_of(Path::new("/a/archive.tar.gz")), "gz");
        assert_eq!(extension_of(Path::new("/a/README")), "");
        assert_eq!(extension_of(Path::new("/a/trailing.")), "");

        assert!(is_allowed_extension(Path::new("/a/photo.HEIC")));
        assert!(is_allowed_extension(Path::new("/a/clip.mkv")));
        assert!(is_allowed_extension(Path::new("/a/notes.md")));
        assert!(is_allowed_extension(Path::new("/a/Makefile")));
        assert!(!is_allowed_extension(Path::new("/a/main.rs")));
        assert!(!is_allowed_extension(Path::new("/a/setup.exe")));
    }

    #[test]
    fn noise_dirs_match_case_insensitively() {
        assert!(is_noise_dir(Path::new("C:/$Recycle.Bin")));
        assert!(is_noise_dir(Path::new("/src/Node_Modules")));
        assert!(is_noise_dir(Path::new("/repo/.git")));
        assert!(!is_noise_dir(Path::new("/repo/gitstuff")));
    }

    #[test]
    fn walk_prunes_noise_and_filters_extensions() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("deep/er")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".GIT/objects")).unwrap();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("a.jpg"), b"x").unwrap();
        fs::write(root.join("deep/er/b.pdf"), b"x").unwrap();
        fs::write(root.join("deep/LICENSE"), b"x").unwrap();
        fs::write(root.join("deep/skip.rs"), b"x").unwrap();
        fs::write(root.join("node_modules/pkg/index.json"), b"x").unwrap();
        fs::write(root.join(".GIT/objects/blob"), b"x").unwrap();
        fs::write(root.join("cache/c.png"), b"x").unwrap();

        let filter = ScanFilter::new(&["**/cache".to_string()]).unwrap();
        let found: BTreeSet<PathBuf> = walk(root, &filter)
            .map(|f| f.path.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        let expected: BTreeSet<PathBuf> = ["a.jpg", "deep/er/b.pdf", "deep/LICENSE"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(found, expected);

        // Restartable: a second pass yields the same set.
        assert_eq!(walk(root, &filter).count(), 3);
    }

    #[test]
    fn walk_dirs_lists_surviving_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("x/y")).unwrap();
        fs::create_dir_all(root.join("$RECYCLE.BIN/z")).unwrap();
        fs::write(root.join("x/file.txt"), b"x").unwrap();

        let dirs: BTreeSet<PathBuf> = walk_dirs(root, &ScanFilter::default()).collect();
        assert!(dirs.contains(root));
        assert!(dirs.contains(&root.join("x")));
        assert!(dirs.contains(&root.join("x/y")));
        assert_eq!(dirs.len(), 3);
    }
}
