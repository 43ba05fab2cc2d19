use bollard::models::BuildInfo;
use dockbuild::{BuildRequest, BuildStream, BuildTransport};
use futures_util::stream::{self, StreamExt};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// リクエストを記録し、用意したレスポンスを返すトランスポート
#[derive(Default)]
pub struct RecordingTransport {
    pub requests: Mutex<Vec<BuildRequest>>,
    responses: Vec<BuildInfo>,
    stall: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<BuildInfo>) -> Self {
        Self {
            responses,
            ..Default::default()
        }
    }

    /// レスポンスを一切返さない
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl BuildTransport for RecordingTransport {
    fn build(&self, request: BuildRequest) -> BuildStream<'_> {
        self.requests.lock().unwrap().push(request);
        if self.stall {
            return stream::pending().boxed();
        }
        stream::iter(self.responses.clone().into_iter().map(Ok)).boxed()
    }
}

/// クローン可能なメモリ上の出力先
#[derive(Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// ignore ファイル・Dockerfile・除外されるファイル・残るファイルを持つビルドコンテキスト
pub struct ContextFixture {
    pub root: TempDir,
}

impl ContextFixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let fixture = Self { root };

        fixture.write(".dockerignore", "container.tar\ndockerfile.tar\nfoofile\n*.pem\n");
        fixture.write("Dockerfile", "FROM alpine\nCOPY barfile /barfile\n");
        fixture.write("barfile", "bar");
        fixture.write("foofile", "foo");
        fixture.write("ca.pem", "ca");
        fixture.write("key.pem", "key");
        fixture.write("container.tar", "tar");
        fixture.write("dockerfile.tar", "tar");
        fixture
    }

    pub fn write(&self, name: &str, content: &str) {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}

/// アーカイブのうちコンテキスト直下のエントリ名
pub fn top_level_entries(body: &[u8]) -> Vec<String> {
    let mut archive = tar::Archive::new(body);
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .filter(|name| !name.trim_end_matches('/').contains('/'))
        .collect()
}
