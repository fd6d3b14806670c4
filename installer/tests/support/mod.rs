//! Test support utilities for installer integration tests.
//!
//! This module provides a loopback HTTP server that serves canned responses
//! per path and counts requests, plus helpers for building install requests
//! against temporary directories.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use formula_installer::fetch::FetchPolicy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tiny_http::{Header, Response, Server, StatusCode};

/// A canned response for one path.
#[derive(Debug, Clone)]
pub enum Route {
    /// Respond 200 with the body.
    Body(Vec<u8>),
    /// Respond with the status and an empty body.
    Status(u16),
    /// Respond 302 pointing at the given location.
    Redirect(String),
}

/// A loopback HTTP server running on a background thread.
pub struct MockServer {
    server: Arc<Server>,
    base_url: String,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a server with no routes; every path answers 404 until routed.
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind mock server"));
        let addr = server
            .server_addr()
            .to_ip()
            .expect("mock server listens on IP");
        let routes: Arc<Mutex<HashMap<String, Route>>> = Arc::default();
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let handle = {
            let server = Arc::clone(&server);
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&hits);
            std::thread::spawn(move || {
                for request in server.incoming_requests() {
                    let path = request.url().to_owned();
                    *hits.lock().expect("hits lock").entry(path.clone()).or_default() += 1;
                    let route = routes.lock().expect("routes lock").get(&path).cloned();
                    let _ = request.respond(respond_with(route));
                }
            })
        };

        Self {
            server,
            base_url: format!("http://{addr}"),
            routes,
            hits,
            handle: Some(handle),
        }
    }

    /// Register `route` for `path`.
    pub fn route(&self, path: &str, route: Route) -> &Self {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_owned(), route);
        self
    }

    /// Return the server's base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Return the absolute URL for `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Return how many requests `path` has received.
    pub fn hits(&self, path: &str) -> usize {
        self.hits
            .lock()
            .expect("hits lock")
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond_with(route: Option<Route>) -> Response<std::io::Cursor<Vec<u8>>> {
    match route {
        Some(Route::Body(body)) => Response::from_data(body),
        Some(Route::Status(code)) => Response::from_data(Vec::new()).with_status_code(StatusCode(code)),
        Some(Route::Redirect(location)) => {
            let header = Header::from_bytes(&b"Location"[..], location.as_bytes())
                .expect("valid Location header");
            Response::from_data(Vec::new())
                .with_status_code(StatusCode(302))
                .with_header(header)
        }
        None => Response::from_data(b"not found".to_vec()).with_status_code(StatusCode(404)),
    }
}

/// Path at which `test_utils::tool_descriptor` expects the 1.0.0 archive.
pub const TOOL_ARCHIVE_PATH: &str = "/releases/v1.0.0/tool.tar.gz";

/// A fetch policy suited to loopback tests: plaintext allowed, no backoff.
pub fn loopback_policy() -> FetchPolicy {
    FetchPolicy {
        timeout: Duration::from_secs(5),
        backoff_base: Duration::ZERO,
        allow_insecure: true,
        ..FetchPolicy::default()
    }
}

/// Return the sorted names of the entries in `dir`.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}
