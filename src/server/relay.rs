//! Stream relay: re-frames internal proofread events into the service's own
//! SSE envelope and terminates the connection on completion or error.
//!
//! Header commitment is the one real state machine here. Before any byte is
//! written the handler can still answer with a plain JSON error
//! (`NotStarted` → `Closed`). Once a body stream exists the response is
//! committed: a failure becomes an in-band error frame
//! (`Streaming` → `Closed`) because the client cannot retroactively be given
//! a status code. `Closed` admits no further frames.

use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde_json::json;

use crate::sse::ProofreadEvent;

/// Progress of one relayed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    NotStarted,
    Streaming,
    Closed,
}

/// Encodes one event into the relay's `data: <payload>\n\n` framing.
pub fn encode_frame(event: &ProofreadEvent) -> Bytes {
    let frame = match event {
        ProofreadEvent::Content(content) => {
            format!("data: {}\n\n", json!({ "content": content }))
        }
        ProofreadEvent::Done => "data: [DONE]\n\n".to_string(),
        ProofreadEvent::Error(message) => {
            format!("data: {}\n\n", json!({ "error": message }))
        }
    };
    Bytes::from(frame)
}

/// Wraps a decoded event stream into a committed SSE response.
pub fn sse_response<S>(events: S) -> Response
where
    S: Stream<Item = ProofreadEvent> + Send + 'static,
{
    let frames = frame_stream(events).map(Ok::<_, std::convert::Infallible>);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames));
    match response {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// One frame per event, flushed as produced. A terminal event closes the
/// stream; an upstream end without one still closes the envelope with a
/// final `[DONE]` frame so clients always see a terminator.
fn frame_stream<S>(events: S) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = ProofreadEvent> + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(events), RelayState::NotStarted),
        |(mut events, state)| async move {
            if state == RelayState::Closed {
                return None;
            }
            match events.next().await {
                Some(event) => {
                    let next = if event.is_terminal() {
                        RelayState::Closed
                    } else {
                        RelayState::Streaming
                    };
                    Some((encode_frame(&event), (events, next)))
                }
                None => Some((
                    encode_frame(&ProofreadEvent::Done),
                    (events, RelayState::Closed),
                )),
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect_frames(events: Vec<ProofreadEvent>) -> Vec<String> {
        frame_stream(stream::iter(events))
            .map(|bytes| String::from_utf8(bytes.to_vec()).expect("utf-8 frame"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn content_and_done_events_are_framed_in_order() {
        let frames = collect_frames(vec![
            ProofreadEvent::Content("Hello".to_string()),
            ProofreadEvent::Content(" World".to_string()),
            ProofreadEvent::Done,
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                "data: {\"content\":\"Hello\"}\n\n",
                "data: {\"content\":\" World\"}\n\n",
                "data: [DONE]\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn nothing_follows_an_error_frame() {
        let frames = collect_frames(vec![
            ProofreadEvent::Content("partial".to_string()),
            ProofreadEvent::Error("connection reset".to_string()),
            ProofreadEvent::Content("never sent".to_string()),
            ProofreadEvent::Done,
        ])
        .await;
        assert_eq!(
            frames,
            vec![
                "data: {\"content\":\"partial\"}\n\n",
                "data: {\"error\":\"connection reset\"}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn exhausted_stream_without_terminator_is_closed_with_done() {
        let frames = collect_frames(vec![ProofreadEvent::Content("only".to_string())]).await;
        assert_eq!(
            frames,
            vec!["data: {\"content\":\"only\"}\n\n", "data: [DONE]\n\n"]
        );
    }

    #[tokio::test]
    async fn empty_stream_yields_a_lone_done_frame() {
        let frames = collect_frames(Vec::new()).await;
        assert_eq!(frames, vec!["data: [DONE]\n\n"]);
    }

    #[test]
    fn frame_payloads_are_json_escaped() {
        let frame = encode_frame(&ProofreadEvent::Content("line\nbreak \"quoted\"".to_string()));
        assert_eq!(
            frame,
            Bytes::from("data: {\"content\":\"line\\nbreak \\\"quoted\\\"\"}\n\n")
        );
    }

    #[test]
    fn sse_response_sets_streaming_headers() {
        let response = sse_response(stream::iter(vec![ProofreadEvent::Done]));
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
    }
}
