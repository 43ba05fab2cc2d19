//! `.dockerignore` の解析と照合
//!
//! パターンはファイルの記述順に評価し、最後にマッチしたものが優先されます。
//! 先頭の `!` は例外パターンで、それ以前のパターンで除外されたパスを再び含めます。
//! ディレクトリにマッチしたパターンは、その配下すべてにもマッチします。

use crate::error::{ContextError, Result};
use glob::{MatchOptions, Pattern};
use std::path::Path;

/// コンテキストのルートで探す ignore ファイル名
pub const IGNORE_FILE: &str = ".dockerignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct IgnorePattern {
    /// エスケープを外した、`!` なしのパターン文字列
    text: String,
    /// 同じ意味を持つ glob の候補（どれかにマッチすればよい）
    globs: Vec<Pattern>,
    exclusion: bool,
}

impl IgnorePattern {
    fn matches_exact(&self, path: &str) -> bool {
        self.globs.iter().any(|g| g.matches_with(path, MATCH_OPTIONS))
    }

    fn matches_or_parent(&self, path: &str) -> bool {
        self.matches_exact(path)
            || path
                .match_indices('/')
                .any(|(idx, _)| self.matches_exact(&path[..idx]))
    }
}

/// ビルドコンテキストの ignore パターン列
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreRules {
    /// ignore ファイルの内容を解析
    ///
    /// `#` で始まる行はコメント、前後の空白は除去、空行は無視します。
    /// パターンはパスとして正規化し、先頭の `/` は取り除きます
    /// （`/foo/../bar` と `bar` は同じ）。`\` は次の1文字をエスケープします。
    pub fn parse(content: &str) -> Result<Self> {
        let mut patterns = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = if idx == 0 {
                raw.trim_start_matches('\u{feff}')
            } else {
                raw
            };
            if line.starts_with('#') {
                continue;
            }

            let line = line.trim();
            let (exclusion, body) = match line.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, line),
            };
            if body.is_empty() {
                continue;
            }

            let cleaned = clean_pattern(body);
            let globs = expand_recursive(&to_glob(&cleaned))
                .iter()
                .map(|form| Pattern::new(form))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|source| ContextError::InvalidPattern {
                    pattern: line.to_string(),
                    source,
                })?;

            patterns.push(IgnorePattern {
                text: cleaned.replace('\\', ""),
                globs,
                exclusion,
            });
        }

        Ok(Self { patterns })
    }

    /// `root` の `.dockerignore` を読む。ファイルが無ければ空のルール
    pub fn from_dir(root: &Path) -> Result<Self> {
        let path = root.join(IGNORE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let rules = Self::parse(&content)?;
                tracing::debug!("Loaded {} pattern(s) from {}", rules.len(), path.display());
                Ok(rules)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ContextError::io(path, e)),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `path`（`/` 区切りの相対パス）がコンテキストから除外されるか
    pub fn matches(&self, path: &str) -> bool {
        let mut excluded = false;
        for rule in &self.patterns {
            if rule.matches_or_parent(path) {
                excluded = !rule.exclusion;
            }
        }
        excluded
    }

    /// `dir` 配下を例外パターンが再び含める可能性があるか
    ///
    /// リテラルな接頭辞だけを見ます。`!dir/keep.txt` は `dir` を開きますが、
    /// `!*/keep.txt` は開きません。
    pub fn has_exception_under(&self, dir: &str) -> bool {
        let dir_slash = format!("{}/", dir);
        self.patterns
            .iter()
            .filter(|p| p.exclusion)
            .any(|p| format!("{}/", p.text).starts_with(&dir_slash))
    }
}

/// `/` 区切りのパターンを字句的に正規化し、先頭の `/` を取り除く
pub(crate) fn clean_pattern(raw: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in raw.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// `\x` のエスケープを glob の表記に置き換える
fn to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(escaped) => out.push_str(&Pattern::escape(escaped.encode_utf8(&mut [0; 4]))),
            // 末尾の `\` は文字そのもの
            None => out.push_str(&Pattern::escape("\\")),
        }
    }
    out
}

/// パス要素の一部にある `**` を、glob で書ける形に展開する
///
/// `A**B` は「1要素内の `A*B`」か「`A*` から始まり `*B` で終わる複数要素」。
/// 要素全体が `**` のものはそのまま残す。
fn expand_recursive(glob: &str) -> Vec<String> {
    let parts: Vec<&str> = glob.split('/').collect();
    let Some(idx) = parts.iter().position(|p| p.contains("**") && *p != "**") else {
        return vec![glob.to_string()];
    };

    let part = parts[idx];
    let at = part.find("**").unwrap_or(0);
    let head = &part[..at];
    let tail = part[at..].trim_start_matches('*');

    let replace = |component: String| {
        let mut rebuilt: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
        rebuilt[idx] = component;
        rebuilt.join("/")
    };

    let mut forms = expand_recursive(&replace(format!("{head}*{tail}")));
    forms.extend(expand_recursive(&replace(format!("{head}*/**/*{tail}"))));
    forms
}
