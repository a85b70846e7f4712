use super::CompletionStream;
use crate::connectors::ConnectorError;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use sse_stream::Sse;

/// One decoded event of an OpenAI-compatible completion stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// `None` for events that carry no text: keep-alives, role-only deltas and
/// empty content.
pub fn parse_event(sse: &Sse) -> Option<Result<StreamEvent, ConnectorError>> {
    let data = sse.data.as_deref()?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }

    let payload: ChunkPayload = match serde_json::from_str(data) {
        Ok(payload) => payload,
        Err(err) => {
            return Some(Err(ConnectorError::InvalidResponse(format!(
                "Invalid streaming chunk: {}",
                err
            ))))
        }
    };

    if let Some(error) = payload.error {
        return Some(Err(ConnectorError::HttpError(error.message)));
    }

    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty())
        .map(|content| Ok(StreamEvent::Delta(content)))
}

/// Turn parsed SSE events into text deltas. Stops at `[DONE]`, at the end
/// of the body, or after yielding the first error.
pub fn into_deltas<S>(events: S) -> CompletionStream
where
    S: Stream<Item = Result<Sse, sse_stream::Error>> + Send + 'static,
{
    futures::stream::unfold(Some(Box::pin(events)), |events| async move {
        let mut events = events?;
        loop {
            match events.next().await? {
                Ok(sse) => match parse_event(&sse) {
                    None => continue,
                    Some(Ok(StreamEvent::Delta(text))) => return Some((Ok(text), Some(events))),
                    Some(Ok(StreamEvent::Done)) => return None,
                    Some(Err(err)) => return Some((Err(err), None)),
                },
                Err(err) => {
                    let err = ConnectorError::ServiceUnavailable(format!(
                        "Completion stream interrupted: {err}"
                    ));
                    return Some((Err(err), None));
                }
            }
        }
    })
    .boxed()
}
