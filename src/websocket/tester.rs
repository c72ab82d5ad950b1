//! A parameterized driver for exercising WebSocket-shaped clients in
//! tests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::Client,
    error::Error,
    websocket::{BoxRawResponse, Message, RawResponse, WsRequest, DEFAULT_BUFFER_SIZE},
};

/// Issues N requests against a client and collects each response's
/// messages, bounded by a count and a timeout.
///
/// Results come back in request-major order: the message list is the
/// concatenation of each response's messages, and the error list has one
/// slot per request (`None` on success).
#[derive(Default)]
pub struct Tester {
    /// How many requests [`Tester::run_messages`] issues.
    pub requests_amount: usize,
    /// Factory for the i-th request; the default builds an empty request
    /// with the run's token and the default buffer size.
    pub request_factory: Option<Box<dyn Fn(usize) -> WsRequest + Send + Sync>>,
    /// Stop collecting a response after this many messages (0 = unbounded).
    pub listen_messages_max: usize,
    /// Stop collecting a response after this much time.
    pub listen_timeout: Option<Duration>,
    /// Keep only messages passing this filter.
    pub filter: Option<Box<dyn Fn(&Message) -> bool + Send + Sync>>,
}

impl Tester {
    /// Issue `requests_amount` requests built by the factory and collect
    /// their messages.
    pub async fn run_messages(
        &self,
        token: &CancellationToken,
        client: &dyn Client<WsRequest, BoxRawResponse>,
    ) -> (Vec<Message>, Vec<Option<Error>>) {
        let requests: Vec<WsRequest> = (0..self.requests_amount)
            .map(|i| match &self.request_factory {
                Some(factory) => factory(i),
                None => WsRequest::new()
                    .with_buffer_size(DEFAULT_BUFFER_SIZE)
                    .with_token(token.clone()),
            })
            .collect();

        self.request_messages(token, client, requests).await
    }

    /// Drive the given requests through the client and collect messages.
    pub async fn request_messages(
        &self,
        token: &CancellationToken,
        client: &dyn Client<WsRequest, BoxRawResponse>,
        requests: Vec<WsRequest>,
    ) -> (Vec<Message>, Vec<Option<Error>>) {
        let mut messages = Vec::new();
        let mut errors = Vec::new();

        for (i, request) in requests.into_iter().enumerate() {
            debug!(request = i, "sending request");
            match client.request(request).await {
                Err(err) => {
                    debug!(request = i, error = %err, "request failed");
                    errors.push(Some(err));
                }
                Ok(response) => {
                    let received = self.response_messages(token, response.as_ref()).await;
                    debug!(request = i, amount = received.len(), "messages received");
                    response.close().await;
                    errors.push(None);
                    messages.extend(received);
                }
            }
        }

        (messages, errors)
    }

    /// Collect one response's messages, bounded by the configured count
    /// and timeout.
    pub async fn response_messages(
        &self,
        token: &CancellationToken,
        response: &dyn RawResponse,
    ) -> Vec<Message> {
        let deadline = async {
            match self.listen_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut messages = Vec::new();
        let mut received = 0usize;
        while self.listen_messages_max == 0 || received < self.listen_messages_max {
            let message = tokio::select! {
                _ = token.cancelled() => break,
                _ = &mut deadline => break,
                message = response.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            received += 1;
            if self.filter.as_ref().is_none_or(|filter| filter(&message)) {
                messages.push(message);
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::mock::{with_side_effects, Mock, SideEffect};

    #[tokio::test]
    async fn collects_up_to_max_messages() {
        let mock = Mock::with_options(
            CancellationToken::new(),
            vec![with_side_effects(vec![SideEffect::texts([
                "0", "1", "2", "3", "4",
            ])])],
        )
        .await;

        let tester = Tester {
            requests_amount: 1,
            listen_messages_max: 3,
            listen_timeout: Some(Duration::from_millis(100)),
            ..Tester::default()
        };
        let (messages, errors) = tester
            .run_messages(&CancellationToken::new(), &mock)
            .await;

        Client::close(&mock).await;

        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_none());
        assert_eq!(
            messages,
            vec![Message::text("0"), Message::text("1"), Message::text("2")]
        );
    }

    #[tokio::test]
    async fn filter_drops_messages_but_counts_them() {
        let mock = Mock::with_options(
            CancellationToken::new(),
            vec![with_side_effects(vec![SideEffect::texts([
                "keep", "drop", "keep",
            ])])],
        )
        .await;

        let tester = Tester {
            requests_amount: 1,
            listen_messages_max: 3,
            listen_timeout: Some(Duration::from_millis(100)),
            filter: Some(Box::new(|message: &Message| {
                message.buff().as_ref() == b"keep"
            })),
            ..Tester::default()
        };
        let (messages, _errors) = tester
            .run_messages(&CancellationToken::new(), &mock)
            .await;

        Client::close(&mock).await;

        assert_eq!(messages, vec![Message::text("keep"), Message::text("keep")]);
    }

    #[tokio::test]
    async fn listen_timeout_bounds_an_idle_response() {
        let mock = Mock::new(CancellationToken::new(), Default::default()).await;

        let tester = Tester {
            requests_amount: 1,
            listen_messages_max: 5,
            listen_timeout: Some(Duration::from_millis(30)),
            ..Tester::default()
        };

        let started = std::time::Instant::now();
        let (messages, errors) = tester
            .run_messages(&CancellationToken::new(), &mock)
            .await;

        Client::close(&mock).await;

        assert!(messages.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
