//! Local chat-completions endpoint that replays a scripted SSE body.

use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes},
    routing::post,
};
use futures_util::{StreamExt, stream};
use tokio::net::TcpListener;

/// One piece of the response body.
#[derive(Debug, Clone, Copy)]
pub enum Part {
    Bytes(&'static [u8]),
    /// Fail the body, which drops the connection mid-response.
    Abort,
}

/// Serve `parts` to every POST, pausing between pieces so the client sees
/// them as separate reads. Returns the endpoint URL.
pub async fn serve(parts: Vec<Part>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let parts = parts.clone();
            async move {
                let body = stream::iter(parts).then(|part| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    match part {
                        Part::Bytes(b) => Ok(Bytes::from_static(b)),
                        Part::Abort => Err(std::io::Error::other("connection dropped")),
                    }
                });
                ([("content-type", "text/event-stream")], Body::from_stream(body))
            }
        }),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}/v1/chat/completions")
}
