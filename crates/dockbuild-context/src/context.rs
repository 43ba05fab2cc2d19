use crate::error::{ContextError, Result};
use crate::ignore::{IGNORE_FILE, IgnoreRules, clean_pattern};
use crate::walker::{ContextEntry, ContextWalker, EntryKind};
use flate2::write::GzEncoder;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, EntryType, Header};

/// Dockerfile のデフォルト名（コンテキストルートからの相対）
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

/// コンテキストアーカイブの圧縮方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextCompression {
    #[default]
    None,
    Gzip,
}

/// ディレクトリをビルドコンテキストのアーカイブにまとめる
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    root: PathBuf,
    dockerfile: String,
    compression: ContextCompression,
}

impl ContextBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dockerfile: DEFAULT_DOCKERFILE.to_string(),
            compression: ContextCompression::None,
        }
    }

    /// Dockerfile の場所（コンテキストからの相対パス、またはコンテキスト内の絶対パス）
    pub fn dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    pub fn compression(mut self, compression: ContextCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// コンテキストルートからの Dockerfile の相対パス（`/` 区切り）
    pub fn dockerfile_name(&self) -> Result<String> {
        let path = Path::new(&self.dockerfile);
        let relative = if path.is_absolute() {
            // ルートが相対パスでも比較できるよう、両方を絶対パスにそろえる
            let root = absolute_clean(&self.root)?;
            let file = absolute_clean(path)?;
            file.strip_prefix(&root)
                .map_err(|_| ContextError::DockerfileOutsideContext(path.to_path_buf()))?
                .to_string_lossy()
                .replace('\\', "/")
        } else {
            self.dockerfile.replace('\\', "/")
        };

        let cleaned = clean_pattern(&relative);
        if cleaned == "." || cleaned == ".." || cleaned.starts_with("../") {
            return Err(ContextError::DockerfileOutsideContext(path.to_path_buf()));
        }
        Ok(cleaned)
    }

    /// コンテキストに含まれるエントリを順に返す
    ///
    /// ignore ファイルと Dockerfile は `.dockerignore` の内容に関係なく含めます。
    pub fn entries(&self) -> Result<ContextWalker> {
        let forced = BTreeSet::from([IGNORE_FILE.to_string(), self.dockerfile_name()?]);
        let rules = IgnoreRules::from_dir(&self.root)?;
        ContextWalker::new(&self.root, rules, forced)
    }

    /// アーカイブを `writer` に書き出し、`writer` を返す
    pub fn write_to<W: Write>(&self, writer: W) -> Result<W> {
        let entries = self.entries()?;
        match self.compression {
            ContextCompression::None => write_archive(entries, writer),
            ContextCompression::Gzip => {
                let encoder = write_archive(entries, GzEncoder::new(writer, flate2::Compression::default()))?;
                encoder
                    .finish()
                    .map_err(|e| ContextError::io(&self.root, e))
            }
        }
    }

    /// ビルドコンテキストをメモリ上のアーカイブとして作成
    pub fn create_context(&self) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", self.root.display());

        let archive_data = self.write_to(Vec::new())?;

        tracing::debug!("Build context created: {} bytes", archive_data.len());
        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

/// 絶対パスにし、`.` と `..` を字句的に取り除く
fn absolute_clean(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| ContextError::io(path, e))?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    Ok(cleaned)
}

fn write_archive<W: Write>(entries: ContextWalker, writer: W) -> Result<W> {
    let mut tar = Builder::new(writer);

    let mut count = 0usize;
    for entry in entries {
        append_entry(&mut tar, &entry?)?;
        count += 1;
    }
    tracing::debug!("Archived {} context entries", count);

    tar.into_inner().map_err(|e| ContextError::io("<archive>", e))
}

fn entry_header(entry: &ContextEntry, entry_type: EntryType) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(entry.mode);
    header.set_mtime(entry.mtime);
    header.set_uid(0);
    header.set_gid(0);
    header.set_size(0);
    header
}

fn append_entry<W: Write>(tar: &mut Builder<W>, entry: &ContextEntry) -> Result<()> {
    let io_err = |e: io::Error| ContextError::io(&entry.path, e);

    match &entry.kind {
        EntryKind::Directory => {
            let mut header = entry_header(entry, EntryType::Directory);
            tar.append_data(&mut header, &entry.name, io::empty())
                .map_err(io_err)
        }
        EntryKind::Symlink { target } => {
            let mut header = entry_header(entry, EntryType::Symlink);
            tar.append_link(&mut header, &entry.name, target)
                .map_err(io_err)
        }
        EntryKind::File => {
            let file = File::open(&entry.path).map_err(io_err)?;

            // ヘッダーのサイズは走査時の値。途中で縮んだファイルは壊れたエントリになる
            let mut header = entry_header(entry, EntryType::Regular);
            header.set_size(entry.size);
            let mut body = file.take(entry.size);
            tar.append_data(&mut header, &entry.name, &mut body)
                .map_err(io_err)?;

            if body.limit() > 0 {
                return Err(io_err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "file shrank by {} bytes while the context was being archived",
                        body.limit()
                    ),
                )));
            }
            Ok(())
        }
    }
}
