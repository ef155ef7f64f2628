//! Built-in stand-in for the inference backend.
//!
//! Implements the same `POST /chat` contract as the real service and streams
//! a canned answer word by word, so the relay runs unchanged against it.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use docchat_relay::{BackendChatBody, USER_ID_HEADER};
use futures::stream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub fn router() -> Router {
    Router::new().route("/chat", post(handle_chat))
}

/// Serves the mock backend on an ephemeral loopback port.
pub async fn spawn() -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router()).await {
            tracing::error!(error = %err, "mock backend stopped");
        }
    });
    info!(%addr, "mock inference backend listening");
    Ok((addr, handle))
}

async fn handle_chat(headers: HeaderMap, Json(body): Json<BackendChatBody>) -> Response {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous");
    debug!(user_id, document_id = %body.document_id, "mock backend received chat turn");

    let words = answer_words(&body.message);
    let chunks = stream::unfold((words.into_iter(), 0_u64), |(mut words, i)| async move {
        let word = words.next()?;
        tokio::time::sleep(Duration::from_millis(jitter_ms(i))).await;
        Some((Ok::<_, Infallible>(Bytes::from(word)), (words, i + 1)))
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response()
}

/// Canned answer split into word chunks, each keeping its trailing space.
pub fn answer_words(prompt: &str) -> Vec<String> {
    let answer = format!(
        "I've analyzed the document you provided. {prompt}\n\n\
         Based on the content, here are the key points:\n\n\
         1. The document discusses important financial metrics for Q3\n\
         2. There was a 12% increase in revenue compared to the previous quarter\n\
         3. Operating expenses were reduced by 8% through various cost-cutting measures\n\
         4. Cash reserves increased to $24.5 million, which is $3.2 million more than before"
    );
    answer.split(' ').map(|word| format!("{word} ")).collect()
}

// Deterministic 10-59 ms spread between chunks.
fn jitter_ms(i: u64) -> u64 {
    10 + (i.wrapping_mul(37) % 50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_echoes_prompt_and_keeps_spacing() {
        let words = answer_words("Summarize page 1");
        let joined: String = words.concat();
        assert!(joined.contains("Summarize page 1"));
        assert!(words.iter().all(|w| w.ends_with(' ')));
    }

    #[test]
    fn jitter_stays_in_range() {
        assert!((0..200).map(jitter_ms).all(|ms| (10..60).contains(&ms)));
    }
}
