// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Prometheus metrics endpoint.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, Registry, TEXT_FORMAT, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serves `GET /metrics` on `listener` until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    registry: Registry,
    cancellation_token: CancellationToken,
) -> std::io::Result<()> {
    let router = Router::new()
        .route("/metrics", get(render))
        .with_state(registry);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Starting metrics endpoint");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(cancellation_token.cancelled_owned())
        .await?;

    tracing::info!("Shutting down metrics endpoint");
    Ok(())
}

async fn render(State(registry): State<Registry>) -> Response {
    let mut body = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut body) {
        tracing::error!(error=%e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response()
}

#[cfg(test)]
mod tests {
    use prometheus::IntCounter;
    use test_log::test;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn renders_registered_counters() {
        let registry = Registry::new();
        let counter = IntCounter::new("dsr_test_total", "test counter").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc_by(3);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, registry, token.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains("dsr_test_total 3"), "{response}");

        token.cancel();
        server.await.unwrap().unwrap();
    }
}
