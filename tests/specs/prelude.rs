// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the end-to-end specs: an in-process master bound to a
//! loopback socket and a scripted worker client.

use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use warden_master::adapters::FakeAgentDb;
use warden_master::config::FilePolicy;
use warden_master::sync::archive;
use warden_master::{Config, Master};
use warden_wire::{codes, read_frame, write_frame, Frame};

/// A running master plus everything a spec needs to poke at it.
pub struct Cluster {
    pub master: Arc<Master>,
    pub db: Arc<FakeAgentDb>,
    dir: tempfile::TempDir,
}

impl Cluster {
    /// Start a master on an ephemeral loopback port.
    pub async fn start() -> (Cluster, SocketAddr) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.paths.base_dir = dir.path().to_path_buf();
        config.intervals.communication.timeout_receiving_file = 5;
        config.intervals.communication.timeout_dapi_request = 1;
        config.intervals.communication.timeout_cluster_request = 5;
        config
            .files
            .insert("etc/shared/".to_string(), FilePolicy::default());
        config.files.insert(
            "queue/agent-groups/".to_string(),
            FilePolicy {
                permissions: 0o660,
                extra_valid: true,
            },
        );

        let db = Arc::new(FakeAgentDb::new().with_agents(&["001", "002"]));
        let master = Master::new(config, db.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(Arc::clone(&master).run(listener));

        (Cluster { master, db, dir }, addr)
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Seed a file under the managed tree.
    pub fn seed_file(&self, relative: &str, content: &[u8]) {
        let path = self.base().join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }
}

/// A scripted worker speaking the wire protocol.
pub struct TestWorker {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    next_id: u64,
    /// Master-initiated requests read while waiting for a response.
    inbound: VecDeque<(u64, String, Vec<u8>)>,
}

impl TestWorker {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer,
            next_id: 0,
            inbound: VecDeque::new(),
        }
    }

    /// Connect and complete a valid hello as `name`.
    pub async fn join(cluster: &Cluster, addr: SocketAddr, name: &str) -> Self {
        let mut worker = Self::connect(addr).await;
        let hello = format!("{name} warden worker {}", cluster.master.version());
        let (ok, response) = worker.request(codes::HELLO, hello.as_bytes()).await;
        assert!(ok, "hello failed: {}", String::from_utf8_lossy(&response));
        worker
    }

    /// Send a request and wait for its response, buffering any
    /// master-initiated requests that arrive in between.
    pub async fn request(&mut self, command: &str, payload: &[u8]) -> (bool, Vec<u8>) {
        let id = self.next_id;
        self.next_id += 1;
        let frame = Frame::Request {
            id,
            command: command.to_string(),
            payload: payload.to_vec(),
        };
        write_frame(&mut self.writer, &frame).await.expect("write");

        loop {
            match read_frame(&mut self.reader).await.expect("read") {
                Frame::Response {
                    id: response_id,
                    ok,
                    payload,
                } => {
                    assert_eq!(response_id, id, "response for an unexpected request");
                    return (ok, payload);
                }
                Frame::Request {
                    id,
                    command,
                    payload,
                } => self.inbound.push_back((id, command, payload)),
            }
        }
    }

    /// Like `request`, asserting success.
    pub async fn request_ok(&mut self, command: &str, payload: &[u8]) -> Vec<u8> {
        let (ok, response) = self.request(command, payload).await;
        assert!(
            ok,
            "'{command}' failed: {}",
            String::from_utf8_lossy(&response)
        );
        response
    }

    /// Next master-initiated request (buffered or fresh).
    pub async fn expect_request(&mut self) -> (u64, String, Vec<u8>) {
        if let Some(queued) = self.inbound.pop_front() {
            return queued;
        }
        match read_frame(&mut self.reader).await.expect("read") {
            Frame::Request {
                id,
                command,
                payload,
            } => (id, command, payload),
            Frame::Response { .. } => panic!("unexpected response frame"),
        }
    }

    /// Raw read access, for specs asserting on connection closure.
    pub fn reader_mut(&mut self) -> &mut OwnedReadHalf {
        &mut self.reader
    }

    pub async fn respond(&mut self, id: u64, ok: bool, payload: &[u8]) {
        let frame = Frame::Response {
            id,
            ok,
            payload: payload.to_vec(),
        };
        write_frame(&mut self.writer, &frame).await.expect("write");
    }

    /// Upload a blob to the master through the chunked file facility.
    pub async fn upload(&mut self, relative: &str, content: &[u8]) {
        self.request_ok(codes::NEW_FILE, relative.as_bytes()).await;
        let mut chunk = relative.as_bytes().to_vec();
        chunk.push(0);
        chunk.extend_from_slice(content);
        self.request_ok(codes::FILE_UPD, &chunk).await;
        let digest = format!("{:x}", md5::compute(content));
        self.request_ok(codes::FILE_END, format!("{relative} {digest}").as_bytes())
            .await;
    }

    /// Receive a master file push: `new_file` .. `file_upd`* .. `file_end`,
    /// answering ok to each. Returns `(relative path, content)`.
    pub async fn receive_push(&mut self) -> (String, Vec<u8>) {
        let (id, command, payload) = self.expect_request().await;
        assert_eq!(command, codes::NEW_FILE);
        let relative = String::from_utf8(payload).expect("utf8 path");
        self.respond(id, true, b"Ready").await;

        let mut content = Vec::new();
        loop {
            let (id, command, payload) = self.expect_request().await;
            match command.as_str() {
                c if c == codes::FILE_UPD => {
                    let nul = payload.iter().position(|&b| b == 0).expect("separator");
                    assert_eq!(&payload[..nul], relative.as_bytes());
                    content.extend_from_slice(&payload[nul + 1..]);
                    self.respond(id, true, b"ok").await;
                }
                c if c == codes::FILE_END => {
                    let text = String::from_utf8(payload).expect("utf8");
                    let digest = text.rsplit(' ').next().expect("digest");
                    assert_eq!(digest, format!("{:x}", md5::compute(&content)));
                    self.respond(id, true, b"ok").await;
                    return (relative, content);
                }
                other => panic!("unexpected command during push: {other}"),
            }
        }
    }
}

/// Build an archive in `dir` from `(relative path, content)` pairs plus a
/// manifest, returning the archive bytes.
pub fn build_bundle<M: Serialize>(
    dir: &Path,
    manifest: &M,
    files: &[(&str, &[u8])],
) -> Vec<u8> {
    let src = dir.join("bundle-src");
    let mut paths = BTreeSet::new();
    for (relative, content) in files {
        let path = src.join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
        paths.insert(relative.to_string());
    }
    let out = dir.join("bundle.out");
    archive::compress_files(&out, &src, &paths, manifest).expect("compress");
    std::fs::read(out).expect("read bundle")
}

/// Write archive bytes to a temp file and unpack them.
pub fn open_bundle<M: serde::de::DeserializeOwned>(dir: &Path, bytes: &[u8]) -> (M, PathBuf) {
    let path = dir.join("received.bundle");
    std::fs::write(&path, bytes).expect("write");
    archive::decompress_files(&path).expect("decompress")
}

/// Poll until `check` passes or a five second deadline expires.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
