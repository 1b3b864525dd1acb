// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

#![allow(dead_code)] // Not every test binary uses every helper

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use message_signer::signature::LocalWalletSigner;
use message_signer::storage::{HttpTransport, Transport};
use url::Url;

pub const TEST_KEY_HEX: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

pub fn wallet() -> LocalWalletSigner {
    LocalWalletSigner::from_hex(TEST_KEY_HEX).unwrap()
}

pub fn base_url(server: &MockServer) -> Url {
    Url::parse(&server.base_url()).unwrap()
}

pub fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(base_url(server), Duration::from_secs(5)).unwrap()
}

pub fn bearer_transport(server: &MockServer, token: &str) -> Arc<dyn Transport> {
    Arc::new(transport(server).with_bearer_token(token))
}

pub fn api_key_transport(server: &MockServer, key: &str) -> Arc<dyn Transport> {
    Arc::new(transport(server).with_api_key(key))
}

/// A base URL nothing listens on.
pub fn dead_url() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}")).unwrap()
}
