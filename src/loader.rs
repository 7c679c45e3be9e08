//! Corpus scanning.
//!
//! [`Loader::scan`] walks the corpus root and lazily yields one
//! [`Document`] per matching file. Walking is sorted by file name so two
//! scans over the same tree yield the same sequence. A file that cannot be
//! read or decoded yields `Err(Error::UnreadableSource)` and the walk
//! continues with the next file. Error paths are relative to the root, like
//! [`Document::path`]; an unreadable directory reports the directory's path.

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;
use crate::error::{Error, Result};
use crate::extract;
use crate::models::Document;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

pub struct Loader {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
    max_file_bytes: u64,
}

impl Loader {
    /// Build a loader for `config.root`.
    ///
    /// Fails with [`Error::Configuration`] when the root is missing, is not
    /// a directory, or a glob pattern does not parse.
    pub fn new(config: &CorpusConfig) -> Result<Self> {
        let root = &config.root;
        if !root.exists() {
            return Err(Error::config(format!(
                "corpus root does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(Error::config(format!(
                "corpus root is not a directory: {}",
                root.display()
            )));
        }

        let include = build_globset(&config.include_globs)?;
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        let exclude = build_globset(&excludes)?;

        Ok(Self {
            root: root.clone(),
            include,
            exclude,
            follow_symlinks: config.follow_symlinks,
            max_file_bytes: config.max_file_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a new scan. Each call walks the tree from scratch.
    pub fn scan(&self) -> Scan<'_> {
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Scan {
            loader: self,
            walker,
        }
    }

    fn load(&self, path: &Path, rel: &str) -> Result<Document> {
        let metadata = std::fs::metadata(path).map_err(|e| Error::unreadable(rel, e))?;
        if metadata.len() > self.max_file_bytes {
            return Err(Error::unreadable(
                rel,
                format!(
                    "file is {} bytes, limit is {}",
                    metadata.len(),
                    self.max_file_bytes
                ),
            ));
        }
        let last_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        let bytes = std::fs::read(path).map_err(|e| Error::unreadable(rel, e))?;
        let content_type = extract::content_type_for(path);
        let raw_text =
            extract::extract_text(&bytes, content_type).map_err(|e| Error::unreadable(rel, e))?;

        Ok(Document {
            source_id: source_id_for(rel, &bytes),
            path: rel.to_string(),
            raw_text,
            content_type: content_type.to_string(),
            last_modified,
        })
    }
}

/// Lazy, restartable sequence of documents produced by [`Loader::scan`].
pub struct Scan<'a> {
    loader: &'a Loader,
    walker: walkdir::IntoIter,
}

impl Iterator for Scan<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let rel = e
                        .path()
                        .map(|p| normalize_relative(p.strip_prefix(&self.loader.root).unwrap_or(p)))
                        .unwrap_or_default();
                    return Some(Err(Error::unreadable(rel, e)));
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = normalize_relative(path.strip_prefix(&self.loader.root).unwrap_or(path));
            if self.loader.exclude.is_match(&rel) || !self.loader.include.is_match(&rel) {
                continue;
            }
            return Some(self.loader.load(path, &rel));
        }
    }
}

/// Source identity for one revision of a file: SHA-256 over the normalized
/// relative path and the raw content bytes.
pub fn source_id_for(relative_path: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn normalize_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn corpus() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.md"), "Beta document.").unwrap();
        fs::write(tmp.path().join("a.txt"), "Alpha document.").unwrap();
        fs::create_dir_all(tmp.path().join("nested/deeper")).unwrap();
        fs::write(tmp.path().join("nested/deeper/c.md"), "Gamma document.").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/HEAD.md"), "ref").unwrap();
        tmp
    }

    #[test]
    fn test_scan_filters_and_orders() {
        let tmp = corpus();
        let loader = Loader::new(&CorpusConfig::new(tmp.path())).unwrap();
        let paths: Vec<String> = loader.scan().map(|d| d.unwrap().path).collect();
        assert_eq!(paths, vec!["a.txt", "b.md", "nested/deeper/c.md"]);
    }

    #[test]
    fn test_scan_is_restartable_and_deterministic() {
        let tmp = corpus();
        let loader = Loader::new(&CorpusConfig::new(tmp.path())).unwrap();
        let first: Vec<String> = loader.scan().map(|d| d.unwrap().source_id).collect();
        let second: Vec<String> = loader.scan().map(|d| d.unwrap().source_id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_source_id_tracks_content_and_path() {
        let a = source_id_for("a.txt", b"hello");
        assert_eq!(a, source_id_for("a.txt", b"hello"));
        assert_ne!(a, source_id_for("a.txt", b"hello!"));
        assert_ne!(a, source_id_for("b.txt", b"hello"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_unreadable_file_does_not_abort_scan() {
        let tmp = corpus();
        fs::write(tmp.path().join("broken.txt"), [0xffu8, 0xfe, 0x00]).unwrap();
        let loader = Loader::new(&CorpusConfig::new(tmp.path())).unwrap();
        let results: Vec<Result<Document>> = loader.scan().collect();
        assert_eq!(results.len(), 4);
        let failures: Vec<&Error> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], Error::UnreadableSource { .. }));
        assert!(failures[0].to_string().contains("broken.txt"));
    }

    #[test]
    fn test_size_limit() {
        let tmp = corpus();
        let mut config = CorpusConfig::new(tmp.path());
        config.max_file_bytes = 5;
        let loader = Loader::new(&config).unwrap();
        assert!(loader.scan().all(|r| r.is_err()));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let err = Loader::new(&CorpusConfig::new(tmp.path().join("nope")))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
