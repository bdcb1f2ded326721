//! End-to-end polling of a JSON HTTP device: a stub server hands out an
//! incrementing counter and every due tick must log exactly one row with
//! the next value.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use jidl_core::device::json_http::JsonHttpClient;
use jidl_core::device::share;
use jidl_core::sink::{DummySink, TIMESTAMP_COLUMN};
use jidl_core::variable::{TagAddress, TagReader};
use jidl_core::{Connection, ConnectionKind, DataLogger, DataType, Value};

/// Serves `{"foo": N, "bar": "hello!", "baz": 127.2}` with `N`
/// incrementing per fetched document.
async fn stub_json_server() -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                // Drain the request head; the stub answers anything.
                let mut buf = [0u8; 1024];
                let mut head = Vec::new();
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) => return,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        Err(_) => return,
                    }
                }

                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let body = format!("{{\"foo\": {n}, \"bar\": \"hello!\", \"baz\": 127.2}}");
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, fetches)
}

#[tokio::test]
async fn every_tick_logs_the_next_counter_value() {
    let (addr, _fetches) = stub_json_server().await;
    let url = format!("http://{addr}/json");

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(DummySink::new("t", dir.path()));

    let mut connection = Connection::new(
        "c",
        ConnectionKind::Json,
        url.clone(),
        1, // one decisecond between polls
        vec![("url".to_string(), url.clone())],
        share(Box::new(JsonHttpClient::new(url))),
    )
    .unwrap();
    connection
        .add_reader(
            TagReader::new("x", TagAddress::JsonKey("foo".to_string()), DataType::Integer)
                .unwrap(),
        )
        .unwrap();
    let connection = Arc::new(connection);

    // Initialize and connect up front: the TCP probe consumes no
    // document, so the first logged value is 1.
    connection.initialize().await.unwrap();
    connection.connect().await.unwrap();

    let mut logger = DataLogger::new("t", sink.clone());
    logger.add_connection(connection).unwrap();
    let logger = logger.shared();

    logger.start(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(380)).await;
    logger.stop().await;

    let entries = sink.take_entries();
    assert!(
        entries.len() >= 3,
        "expected at least three polled rows, got {}",
        entries.len()
    );
    for (i, (table, row)) in entries.iter().take(3).enumerate() {
        assert_eq!(table, "c");
        assert!(row.get(TIMESTAMP_COLUMN).is_some());
        assert_eq!(row.get("x"), Some(&Value::Int(i as i64 + 1)));
    }
}

#[tokio::test]
async fn fields_coerce_to_their_declared_types() {
    let (addr, _fetches) = stub_json_server().await;
    let url = format!("http://{addr}/json");

    let mut client = JsonHttpClient::new(url);
    use jidl_core::device::DeviceClient;
    client.initialize().await.unwrap();

    let mut readers = vec![
        TagReader::new("x", TagAddress::JsonKey("foo".into()), DataType::Integer).unwrap(),
        TagReader::new("label", TagAddress::JsonKey("bar".into()), DataType::Text(None)).unwrap(),
        TagReader::new("level", TagAddress::JsonKey("baz".into()), DataType::Real).unwrap(),
        TagReader::new("ghost", TagAddress::JsonKey("nope".into()), DataType::Integer).unwrap(),
    ];
    client.read(&mut readers).await.unwrap();

    assert_eq!(readers[0].value(), Some(Value::Int(1)));
    assert_eq!(readers[1].value(), Some(Value::Text("hello!".to_string())));
    assert_eq!(readers[2].value(), Some(Value::Float(127.2)));
    // Missing keys leave the tag valueless; the row proceeds with NULL.
    assert_eq!(readers[3].value(), None);
}
