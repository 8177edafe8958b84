//! Minimal HTTP GET for talking to a running server from test code.

use anyhow::{Context, Result};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// GET `url` and return the status code and body text.
///
/// Blocks on a private current-thread runtime; do not call from async code.
pub fn fetch(url: &str) -> Result<(u16, String)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Empty::<Bytes>::new())
            .with_context(|| format!("Invalid request for {}", url))?;

        let response = client
            .request(request)
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .context("Failed to read body")?
            .to_bytes();
        Ok((status, String::from_utf8_lossy(&body).into_owned()))
    })
}
