//! In-process stand-in for the module registry: a contents API, raw file hosting and
//! dependency downloads on one loopback port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use engine_modules::core::deps::DependencyInstaller;
use engine_modules::core::downloader::Downloader;
use engine_modules::core::hooks::HookRegistry;
use engine_modules::core::lifecycle::{ManagerParts, ModuleManager};
use engine_modules::core::manifest::{ModuleStore, RegistryClient};
use engine_modules::core::state::RegistrySettings;

#[derive(Clone)]
enum Route {
    Body {
        body: Vec<u8>,
        content_type: &'static str,
        delay: Duration,
    },
    Status(u16),
    /// Sends the headers and `sent` bytes of a larger body, then never finishes.
    Stall { sent: Vec<u8>, total_len: usize },
}

#[derive(Default)]
struct Shared {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

pub struct TestRegistry {
    base: String,
    shared: Arc<Mutex<Shared>>,
}

impl TestRegistry {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shared = Arc::new(Mutex::new(Shared::default()));

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        Self { base, shared }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn settings(&self) -> RegistrySettings {
        RegistrySettings {
            api_base: Some(format!("{}/contents", self.base)),
            raw_base: Some(format!("{}/raw", self.base)),
            ..RegistrySettings::default()
        }
    }

    fn set(&self, path: &str, route: Route) {
        self.shared
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), route);
    }

    pub fn bytes(&self, path: &str, body: Vec<u8>) {
        self.set(
            path,
            Route::Body {
                body,
                content_type: "application/octet-stream",
                delay: Duration::ZERO,
            },
        );
    }

    pub fn json(&self, path: &str, value: Value) {
        self.json_delayed(path, value, Duration::ZERO);
    }

    pub fn json_delayed(&self, path: &str, value: Value, delay: Duration) {
        self.set(
            path,
            Route::Body {
                body: serde_json::to_vec(&value).unwrap(),
                content_type: "application/json",
                delay,
            },
        );
    }

    pub fn status(&self, path: &str, status: u16) {
        self.set(path, Route::Status(status));
    }

    pub fn stall(&self, path: &str, sent: Vec<u8>, total_len: usize) {
        self.set(path, Route::Stall { sent, total_len });
    }

    pub fn hits(&self, path: &str) -> usize {
        self.shared
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Publishes a module: its listing under `modules/`, its own listing and every file.
    pub fn publish_module(&self, folder: &str, files: &[(&str, Vec<u8>)]) {
        let mut shared = self.shared.lock().unwrap();
        let mut dirs: HashMap<String, Vec<Value>> = HashMap::new();
        let root = format!("modules/{folder}");
        dirs.entry(root.clone()).or_default();
        for (rel, body) in files {
            let mut parent = root.clone();
            let parts: Vec<&str> = rel.split('/').collect();
            for (i, part) in parts.iter().enumerate() {
                let last = i == parts.len() - 1;
                let child = format!("{parent}/{part}");
                let entries = dirs.entry(parent.clone()).or_default();
                let kind = if last { "file" } else { "dir" };
                if !entries.iter().any(|e| e["name"] == *part) {
                    entries.push(json!({ "name": part, "type": kind }));
                }
                if !last {
                    dirs.entry(child.clone()).or_default();
                }
                parent = child;
            }
            shared.routes.insert(
                format!("/raw/{root}/{rel}"),
                Route::Body {
                    body: body.clone(),
                    content_type: "application/octet-stream",
                    delay: Duration::ZERO,
                },
            );
        }
        for (dir, entries) in dirs {
            shared.routes.insert(
                format!("/contents/{dir}"),
                Route::Body {
                    body: serde_json::to_vec(&entries).unwrap(),
                    content_type: "application/json",
                    delay: Duration::ZERO,
                },
            );
        }

        let listing_path = "/contents/modules".to_string();
        let mut listing: Vec<Value> = match shared.routes.get(&listing_path) {
            Some(Route::Body { body, .. }) => serde_json::from_slice(body).unwrap(),
            _ => Vec::new(),
        };
        if !listing.iter().any(|e| e["name"] == folder) {
            listing.push(json!({ "name": folder, "type": "dir" }));
        }
        shared.routes.insert(
            listing_path,
            Route::Body {
                body: serde_json::to_vec(&listing).unwrap(),
                content_type: "application/json",
                delay: Duration::ZERO,
            },
        );
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Mutex<Shared>>) {
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&request);
    let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let path = target.split('?').next().unwrap_or("/").to_string();

    let route = {
        let mut shared = shared.lock().unwrap();
        *shared.hits.entry(path.clone()).or_default() += 1;
        shared.routes.get(&path).cloned()
    };

    match route {
        Some(Route::Body {
            body,
            content_type,
            delay,
        }) => {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                content_type,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
        }
        Some(Route::Status(code)) => {
            let head = format!(
                "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                code
            );
            let _ = stream.write_all(head.as_bytes()).await;
        }
        Some(Route::Stall { sent, total_len }) => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                total_len
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&sent).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        None => {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    }
    let _ = stream.shutdown().await;
}

/// A zip archive holding `files`.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn manager(data_dir: &Path, registry: &TestRegistry, hooks: HookRegistry) -> ModuleManager {
    let client = reqwest::Client::new();
    ModuleManager::new(ManagerParts {
        store: ModuleStore::new(data_dir.join("modules")),
        registry: RegistryClient::new(client.clone(), registry.settings()),
        installer: DependencyInstaller::new(
            Downloader::new(client).with_progress_interval(Duration::from_millis(10)),
            0,
        )
        .with_arch("x86_64"),
        cache_dir: data_dir.join("cache"),
        remote_cache_ttl_secs: 600,
        hooks,
    })
}
