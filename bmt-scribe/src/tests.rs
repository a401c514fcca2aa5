use std::net::SocketAddr;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use super::*;

/// Accepts a single connection and answers every call with the frames produced by `reply`.
async fn serve_once<F>(reply: F) -> SocketAddr
where
    F: Fn(i32, Vec<LogEntry>) -> Option<Bytes> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, protocol::frame_codec());
        while let Some(Ok(frame)) = framed.next().await {
            let (header, entries) = protocol::decode_log_call(frame.freeze()).unwrap();
            match reply(header.seqid, entries) {
                Some(response) => framed.send(response).await.unwrap(),
                None => return,
            }
        }
    });

    addr
}

#[tokio::test]
async fn sends_batches_in_sequence() {
    let addr = serve_once(|seqid, entries| {
        assert_eq!(entries.len(), 2);
        Some(protocol::encode_log_reply(seqid, ResultCode::Ok))
    })
    .await;

    let mut client = ScribeClient::connect(addr).await.unwrap();
    assert_eq!(client.peer_addr(), addr);

    let batch = [
        LogEntry::new("bmt_1", "a\n"),
        LogEntry::new("bmt_1", "b\n"),
    ];
    for _ in 0..3 {
        assert_eq!(client.log(&batch).await.unwrap(), ResultCode::Ok);
    }
}

#[tokio::test]
async fn reports_try_later() {
    let addr = serve_once(|seqid, _| Some(protocol::encode_log_reply(seqid, ResultCode::TryLater)))
        .await;

    let mut client = ScribeClient::connect(addr).await.unwrap();
    let code = client.log(&[LogEntry::new("bmt_1", "a\n")]).await.unwrap();
    assert_eq!(code, ResultCode::TryLater);
}

#[tokio::test]
async fn surfaces_exceptions() {
    let addr = serve_once(|seqid, _| Some(protocol::encode_exception(seqid, 6, "boom"))).await;

    let mut client = ScribeClient::connect(addr).await.unwrap();
    let err = client.log(&[]).await.unwrap_err();
    assert!(matches!(err, Error::Application { kind: 6, .. }), "{err:?}");
}

#[tokio::test]
async fn detects_closed_connections() {
    let addr = serve_once(|_, _| None).await;

    let mut client = ScribeClient::connect(addr).await.unwrap();
    let err = client.log(&[LogEntry::new("bmt_1", "a\n")]).await.unwrap_err();
    assert!(
        matches!(err, Error::ConnectionClosed | Error::Io(_)),
        "{err:?}"
    );
}

#[tokio::test]
async fn fails_to_connect_without_collector() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(matches!(
        ScribeClient::connect(addr).await,
        Err(Error::Io(_))
    ));
}
