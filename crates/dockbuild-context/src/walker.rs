//! ビルドコンテキストの走査
//!
//! `walkdir` でディレクトリを名前順・深さ優先に辿り、`.dockerignore` の
//! 判定を `filter_entry` で行います。

use crate::error::{ContextError, Result};
use crate::ignore::IgnoreRules;
use std::collections::BTreeSet;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use walkdir::{DirEntry, FilterEntry, WalkDir};

/// アーカイブに書き込むエントリの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// シンボリックリンク（リンク先はそのまま記録）
    Symlink { target: PathBuf },
}

/// ビルドコンテキストの1エントリ
///
/// ファイルの中身はここでは読まず、アーカイブ書き込み時に `path` から読みます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    /// コンテキストルートからの相対パス（バイト列はファイルシステムのまま）
    pub name: PathBuf,
    /// ローカルファイルシステム上のパス
    pub path: PathBuf,
    pub kind: EntryKind,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
}

impl ContextEntry {
    fn from_metadata(name: PathBuf, path: PathBuf, kind: EntryKind, meta: &Metadata) -> Self {
        let size = match kind {
            EntryKind::File => meta.len(),
            _ => 0,
        };
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            mode: file_mode(meta, &kind),
            name,
            path,
            kind,
            size,
            mtime,
        }
    }

    /// `.dockerignore` の照合に使う `/` 区切りの名前
    pub fn match_name(&self) -> String {
        match_key(&self.name)
    }
}

/// 相対パスを `/` 区切りの文字列にする
pub(crate) fn match_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(meta: &Metadata, _kind: &EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &Metadata, kind: &EntryKind) -> u32 {
    match kind {
        EntryKind::File => 0o644,
        _ => 0o755,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Include,
    /// 除外されるが、配下に例外パターンか強制追加があるので中に入る
    Descend,
    Skip,
}

/// 除外判定に必要な情報（`filter_entry` と本体で共有）
struct Selection {
    root: PathBuf,
    rules: IgnoreRules,
    forced: BTreeSet<String>,
}

impl Selection {
    fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    fn forced_under(&self, dir: &str) -> bool {
        let dir_slash = format!("{}/", dir);
        self.forced.iter().any(|f| f.starts_with(&dir_slash))
    }

    fn verdict(&self, entry: &DirEntry) -> Verdict {
        let name = match_key(self.relative(entry.path()));
        if self.forced.contains(&name) || !self.rules.matches(&name) {
            return Verdict::Include;
        }
        if entry.file_type().is_dir()
            && (self.rules.has_exception_under(&name) || self.forced_under(&name))
        {
            return Verdict::Descend;
        }
        tracing::trace!("Skipping ignored path {}", name);
        Verdict::Skip
    }
}

type EntryFilter = Box<dyn FnMut(&DirEntry) -> bool + Send>;

/// ビルドコンテキストを名前順・深さ優先で返すイテレータ
///
/// 除外対象は強制追加でない限り返さない。シンボリックリンクは辿らない。
/// 最初のエラーを返した後は `None` を返し続ける。
pub struct ContextWalker {
    selection: Arc<Selection>,
    inner: FilterEntry<walkdir::IntoIter, EntryFilter>,
    failed: bool,
}

impl ContextWalker {
    /// `root` の走査を開始する
    ///
    /// `forced` は `.dockerignore` に関係なく含める相対パス（`/` 区切り）。
    pub fn new(root: &Path, rules: IgnoreRules, forced: BTreeSet<String>) -> Result<Self> {
        let meta = match std::fs::metadata(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContextError::ContextNotFound(root.to_path_buf()));
            }
            Err(e) => return Err(ContextError::io(root, e)),
        };
        if !meta.is_dir() {
            return Err(ContextError::NotADirectory(root.to_path_buf()));
        }

        let selection = Arc::new(Selection {
            root: root.to_path_buf(),
            rules,
            forced,
        });
        let shared = Arc::clone(&selection);
        let filter: EntryFilter = Box::new(move |entry: &DirEntry| shared.verdict(entry) != Verdict::Skip);

        let inner = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
            .into_iter()
            .filter_entry(filter);

        Ok(Self {
            selection,
            inner,
            failed: false,
        })
    }

    fn walk_error(&self, err: walkdir::Error) -> ContextError {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.selection.root.clone());
        ContextError::io(path, std::io::Error::from(err))
    }

    /// 1エントリを評価する。`Ok(None)` は何も出力しないことを表す
    fn visit(&self, entry: DirEntry) -> Result<Option<ContextEntry>> {
        if self.selection.verdict(&entry) == Verdict::Descend {
            return Ok(None);
        }

        let name = self.selection.relative(entry.path()).to_path_buf();
        let meta = entry.metadata().map_err(|e| self.walk_error(e))?;
        let file_type = entry.file_type();
        let path = entry.into_path();

        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| ContextError::io(&path, e))?;
            EntryKind::Symlink { target }
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            tracing::debug!("Skipping special file {}", path.display());
            return Ok(None);
        };

        Ok(Some(ContextEntry::from_metadata(name, path, kind, &meta)))
    }
}

impl Iterator for ContextWalker {
    type Item = Result<ContextEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let visited = match self.inner.next()? {
                Ok(entry) => self.visit(entry),
                Err(e) => Err(self.walk_error(e)),
            };

            match visited {
                Ok(Some(entry)) => return Some(Ok(entry)),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(walker: ContextWalker) -> Vec<String> {
        walker.map(|e| e.unwrap().match_name()).collect()
    }

    #[test]
    fn test_walk_is_sorted_depth_first() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/z.txt"), "z").unwrap();
        fs::write(dir.path().join("sub/c.txt"), "c").unwrap();
        fs::write(dir.path().join("zz.txt"), "zz").unwrap();

        let walker = ContextWalker::new(dir.path(), IgnoreRules::default(), BTreeSet::new()).unwrap();
        assert_eq!(
            names(walker),
            vec!["a.txt", "b.txt", "sub", "sub/c.txt", "sub/z.txt", "zz.txt"]
        );
    }

    #[test]
    fn test_walk_skips_ignored_directory_entirely() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/out.bin"), "bin").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let rules = IgnoreRules::parse("target").unwrap();
        let walker = ContextWalker::new(dir.path(), rules, BTreeSet::new()).unwrap();
        assert_eq!(names(walker), vec!["main.rs"]);
    }

    #[test]
    fn test_walk_descends_for_exceptions_and_forced_includes() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/keep.txt"), "keep").unwrap();
        fs::write(dir.path().join("docs/drop.txt"), "drop").unwrap();
        fs::create_dir(dir.path().join("build")).unwrap();
        fs::write(dir.path().join("build/Dockerfile"), "FROM scratch").unwrap();
        fs::write(dir.path().join("build/other"), "x").unwrap();

        let rules = IgnoreRules::parse("docs\n!docs/keep.txt\nbuild").unwrap();
        let forced = BTreeSet::from(["build/Dockerfile".to_string()]);
        let walker = ContextWalker::new(dir.path(), rules, forced).unwrap();
        assert_eq!(names(walker), vec!["build/Dockerfile", "docs/keep.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_is_not_followed() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::write(dir.path().join("real/file"), "data").unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink("doesnotexist", dir.path().join("dangling")).unwrap();

        let walker = ContextWalker::new(dir.path(), IgnoreRules::default(), BTreeSet::new()).unwrap();
        let entries: Vec<ContextEntry> = walker.map(|e| e.unwrap()).collect();
        let names: Vec<String> = entries.iter().map(ContextEntry::match_name).collect();
        assert_eq!(names, vec!["dangling", "link", "real", "real/file"]);

        assert_eq!(
            entries[0].kind,
            EntryKind::Symlink {
                target: PathBuf::from("doesnotexist")
            }
        );
        assert_eq!(
            entries[1].kind,
            EntryKind::Symlink {
                target: PathBuf::from("real")
            }
        );
        assert_eq!(entries[1].size, 0);
    }

    #[test]
    fn test_error_mid_walk_stops_iteration() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/inner.txt"), "inner").unwrap();
        fs::write(dir.path().join("zz.txt"), "zz").unwrap();

        let mut walker =
            ContextWalker::new(dir.path(), IgnoreRules::default(), BTreeSet::new()).unwrap();
        assert_eq!(walker.next().unwrap().unwrap().match_name(), "a.txt");

        // 一覧取得後にディレクトリが消えた場合
        fs::remove_dir_all(dir.path().join("sub")).unwrap();

        match walker.next() {
            Some(Err(ContextError::Io { path, .. })) => assert_eq!(path, dir.path().join("sub")),
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_is_kept() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let raw = OsStr::from_bytes(b"caf\xe9.txt");
        fs::write(dir.path().join(raw), "x").unwrap();

        let walker = ContextWalker::new(dir.path(), IgnoreRules::default(), BTreeSet::new()).unwrap();
        let entries: Vec<ContextEntry> = walker.map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name.as_os_str().as_bytes(), b"caf\xe9.txt");
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = ContextWalker::new(&missing, IgnoreRules::default(), BTreeSet::new());
        assert!(matches!(result, Err(ContextError::ContextNotFound(p)) if p == missing));
    }

    #[test]
    fn test_root_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("Dockerfile");
        fs::write(&file, "FROM alpine").unwrap();
        let result = ContextWalker::new(&file, IgnoreRules::default(), BTreeSet::new());
        assert!(matches!(result, Err(ContextError::NotADirectory(_))));
    }
}
