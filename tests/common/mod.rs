//! Common test utilities for the integration tests
//!
//! Provides shared functionality for:
//! - Installing the rustls crypto provider once per test binary
//! - Laying out configuration trees on disk
//! - Finding a free local port for mock servers

#![allow(dead_code)]

use std::path::Path;

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Write `files` (relative path, content) under `root`, creating directories
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

/// Bind a listener on a free local port
pub async fn local_listener() -> (tokio::net::TcpListener, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    (listener, addr)
}
