//! Tests of the WebSocket leaf against an in-process tungstenite server.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message as Frame, WebSocketStream};
use tokio_util::sync::CancellationToken;
use wirestack::{
    client,
    websocket::{self, listen_slice, Message, RawResponse, WsRequest},
    Client, Error,
};

type ServerWs = WebSocketStream<TcpStream>;

/// Start a WebSocket server driving each accepted connection through
/// `handler`.
async fn start_ws_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(ServerWs) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let Ok(ws) = accept_async(stream).await else {
                continue;
            };
            tokio::spawn(handler(ws));
        }
    });

    addr
}

fn ws_url(addr: SocketAddr) -> url::Url {
    url::Url::parse(&format!("ws://{addr}/")).expect("ws url")
}

#[tokio::test]
async fn receives_pushed_messages_in_order() {
    let addr = start_ws_server(|mut ws| async move {
        for i in 0..10 {
            let _ = ws.send(Frame::text(format!("hey#{i:03}"))).await;
        }
        let _ = ws.close(None).await;
    })
    .await;

    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let token = CancellationToken::new();
    let messages = listen_slice(
        &token,
        cl.as_ref(),
        WsRequest::to(ws_url(addr)).with_token(token.clone()),
        11,
    )
    .await
    .unwrap();

    let want: Vec<Message> = (0..10).map(|i| Message::text(format!("hey#{i:03}"))).collect();
    assert_eq!(messages, want);

    cl.close().await;
}

#[tokio::test]
async fn clean_close_ends_the_stream_without_error() {
    let addr = start_ws_server(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let response = cl.request(WsRequest::to(ws_url(addr))).await.unwrap();
    assert!(response.recv().await.is_none());
    assert!(response.err().is_none());

    response.close().await;
    cl.close().await;
}

#[tokio::test]
async fn dial_failure_surfaces_as_an_error() {
    // Grab a port and release it; nothing listens there afterwards.
    let vacant = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = vacant.local_addr().unwrap();
    drop(vacant);

    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let result = cl.request(WsRequest::to(ws_url(addr))).await;
    assert!(matches!(result, Err(Error::WebSocket { .. })));

    cl.close().await;
}

#[tokio::test]
async fn request_without_url_is_a_config_error() {
    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let result = cl.request(WsRequest::new()).await;
    assert!(matches!(result, Err(Error::Config { .. })));

    cl.close().await;
}

#[tokio::test]
async fn receive_timeout_terminates_a_silent_connection() {
    let addr = start_ws_server(|mut ws| async move {
        // Keep the connection open but never send application data.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = ws.close(None).await;
    })
    .await;

    let shutdown = CancellationToken::new();
    let cl = client(
        shutdown.clone(),
        vec![websocket::transport(vec![websocket::with_receive_timeout(
            Duration::from_millis(50),
        )])],
    )
    .await
    .unwrap();

    let response = cl.request(WsRequest::to(ws_url(addr))).await.unwrap();

    assert!(response.recv().await.is_none());
    assert!(response.closed().is_cancelled());
    assert!(matches!(
        response.err().as_deref(),
        Some(Error::Timeout { .. })
    ));

    response.close().await;
    cl.close().await;
}

#[tokio::test]
async fn send_reaches_the_server() {
    let addr = start_ws_server(|mut ws| async move {
        // Echo one message back, prefixed.
        if let Some(Ok(Frame::Text(text))) = ws.next().await {
            let _ = ws.send(Frame::text(format!("echo:{}", text.as_str()))).await;
        }
        let _ = ws.close(None).await;
    })
    .await;

    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let response = cl.request(WsRequest::to(ws_url(addr))).await.unwrap();
    response.send(Message::text("hello")).await.unwrap();

    assert_eq!(response.recv().await, Some(Message::text("echo:hello")));

    response.close().await;
    cl.close().await;
}

#[tokio::test]
async fn client_close_tears_down_open_responses() {
    let addr = start_ws_server(|mut ws| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = ws.close(None).await;
    })
    .await;

    let shutdown = CancellationToken::new();
    let cl = client(shutdown.clone(), vec![websocket::transport(vec![])])
        .await
        .unwrap();

    let response = cl.request(WsRequest::to(ws_url(addr))).await.unwrap();

    // Closing the client joins the response reader; afterwards the
    // response stream is finished.
    cl.close().await;
    assert!(response.recv().await.is_none());
}
