//! Typed JSON over the HTTP and WebSocket transports.

use std::marker::PhantomData;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    client::Client,
    error::{Error, Result},
    http::HttpRequest,
    websocket::{BoxRawResponse, Message, WsRequest},
};

/// Decode failure carrying the target type and the parser's error.
#[derive(Debug, thiserror::Error)]
#[error("failed to parse {type_name} response: {source}")]
pub struct ParseError {
    pub type_name: &'static str,
    #[source]
    pub source: serde_json::Error,
}

/// Decode a JSON payload into `T`.
pub fn parse<T: DeserializeOwned>(buff: &[u8]) -> std::result::Result<T, ParseError> {
    serde_json::from_slice(buff).map_err(|source| ParseError {
        type_name: std::any::type_name::<T>(),
        source,
    })
}

/// Encode a body value as JSON bytes.
pub fn encode_body<T: Serialize>(body: &T) -> Result<Bytes> {
    let buff = serde_json::to_vec(body)?;
    Ok(Bytes::from(buff))
}

/// Read and decode a whole response body.
pub async fn decode_body<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let buff = response.bytes().await?;
    Ok(parse(&buff)?)
}

/// Build an HTTP request with a JSON body and content type.
pub fn json_request<B: Serialize>(
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<&B>,
) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(method, url).with_headers(headers);
    if let Some(body) = body {
        request = request
            .with_header(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(encode_body(body)?);
    }
    Ok(request)
}

/// A typed view over an HTTP response whose body is JSON.
pub struct JsonHttpResponse<T> {
    raw: reqwest::Response,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> JsonHttpResponse<T> {
    /// The response status.
    pub fn status(&self) -> http::StatusCode {
        self.raw.status()
    }

    /// The raw response.
    pub fn raw(&self) -> &reqwest::Response {
        &self.raw
    }

    /// Consume the body and decode it.
    pub async fn value(self) -> Result<T> {
        decode_body(self.raw).await
    }
}

/// Perform a JSON request over an HTTP client stack.
pub async fn request_http_json<B, T>(
    client: &dyn Client<HttpRequest, reqwest::Response>,
    token: CancellationToken,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<&B>,
) -> Result<JsonHttpResponse<T>>
where
    B: Serialize,
    T: DeserializeOwned,
{
    let request = json_request(method, url, headers, body)?.with_token(token);
    let raw = client.request(request).await?;
    Ok(JsonHttpResponse {
        raw,
        _marker: PhantomData,
    })
}

/// One decoded WebSocket message: the raw message, the decoded value when
/// decoding succeeded, and the parse error when it did not. The raw bytes
/// stay available either way.
#[derive(Debug)]
pub struct JsonMessage<T> {
    pub raw: Message,
    pub value: Option<T>,
    pub error: Option<ParseError>,
}

impl<T> JsonMessage<T> {
    /// The raw payload bytes.
    pub fn buff(&self) -> Bytes {
        self.raw.buff()
    }

    /// The parse error if decoding failed, otherwise the raw message's
    /// error.
    pub fn err(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        match &self.error {
            Some(error) => Some(error),
            None => self.raw.err().map(|error| error as _),
        }
    }
}

/// A typed view over a raw WebSocket response: incoming messages are
/// decoded as `T`, outgoing values are encoded as JSON.
pub struct JsonWsResponse<T> {
    raw: BoxRawResponse,
    messages: tokio::sync::Mutex<mpsc::Receiver<JsonMessage<T>>>,
    done: CancellationToken,
}

/// Perform a WebSocket request and decode every incoming message as `T`.
pub async fn request_ws_json<T>(
    client: &dyn Client<WsRequest, BoxRawResponse>,
    request: WsRequest,
) -> Result<JsonWsResponse<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let buffer_size = request.buffer_size.max(1);
    let raw = client.request(request).await?;

    let (messages_tx, messages_rx) = mpsc::channel(buffer_size);
    let done = CancellationToken::new();

    let worker_raw = std::sync::Arc::clone(&raw);
    let worker_done = done.clone();
    tokio::spawn(async move {
        while let Some(raw_message) = worker_raw.recv().await {
            let mut message = JsonMessage {
                raw: raw_message,
                value: None,
                error: None,
            };
            if message.raw.err().is_none() {
                match parse::<T>(&message.raw.buff()) {
                    Ok(value) => message.value = Some(value),
                    Err(error) => message.error = Some(error),
                }
            }
            if messages_tx.send(message).await.is_err() {
                break;
            }
        }
        worker_done.cancel();
    });

    Ok(JsonWsResponse {
        raw,
        messages: tokio::sync::Mutex::new(messages_rx),
        done,
    })
}

impl<T> JsonWsResponse<T> {
    /// Encode `value` and send it on the underlying response.
    pub async fn send(&self, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        self.raw.send(Message::bytes(encode_body(value)?)).await
    }

    /// Receive the next decoded message.
    pub async fn recv(&self) -> Option<JsonMessage<T>> {
        self.messages.lock().await.recv().await
    }

    /// Token cancelled when the underlying response closes.
    pub fn closed(&self) -> CancellationToken {
        self.raw.closed()
    }

    /// Terminal error of the underlying response.
    pub fn err(&self) -> Option<std::sync::Arc<Error>> {
        self.raw.err()
    }

    /// Close the underlying response and join the decoding task.
    pub async fn close(&self) {
        self.raw.close().await;
        self.done.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::websocket::{with_side_effects, Mock, SideEffect};

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Payload {
        value: String,
    }

    #[test]
    fn parse_round_trip() {
        let body = encode_body(&Payload {
            value: "hey".into(),
        })
        .unwrap();
        let decoded: Payload = parse(&body).unwrap();
        assert_eq!(decoded.value, "hey");
    }

    #[test]
    fn parse_error_names_the_type_and_cause() {
        let err = parse::<Payload>(b"{\"value\": \"truncated").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Payload"));
        assert!(message.contains("failed to parse"));
        assert!(err.source.is_eof());
    }

    #[tokio::test]
    async fn malformed_frame_surfaces_a_parse_error_with_raw_bytes() {
        let raw = "{\"value\": \"unexpected json eof";
        let mock = Mock::with_options(
            CancellationToken::new(),
            vec![with_side_effects(vec![
                SideEffect::messages([Message::text(raw)]),
                SideEffect::Close,
            ])],
        )
        .await;

        let response = request_ws_json::<Payload>(&mock, WsRequest::new().with_buffer_size(8))
            .await
            .unwrap();

        let message = response.recv().await.expect("one message");
        assert!(message.value.is_none());
        assert_eq!(message.buff().as_ref(), raw.as_bytes());
        assert!(message.error.as_ref().expect("parse error").source.is_eof());
        let err = message.err().expect("parse error");
        assert!(err.to_string().contains("failed to parse"));

        assert!(response.recv().await.is_none());
        response.close().await;
        Client::close(&mock).await;
    }

    #[tokio::test]
    async fn well_formed_frames_decode() {
        let mock = Mock::with_options(
            CancellationToken::new(),
            vec![with_side_effects(vec![
                SideEffect::messages([Message::text("{\"value\": \"hey\"}")]),
                SideEffect::Close,
            ])],
        )
        .await;

        let response = request_ws_json::<Payload>(&mock, WsRequest::new().with_buffer_size(8))
            .await
            .unwrap();

        let message = response.recv().await.expect("one message");
        assert_eq!(
            message.value,
            Some(Payload {
                value: "hey".into()
            })
        );
        assert!(message.err().is_none());

        response.close().await;
        Client::close(&mock).await;
    }
}
