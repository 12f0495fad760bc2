use std::sync::{Arc, Mutex};
use std::time::Duration;

use restbase_update::http::{HttpTransport, InvalidationRequest, ReqwestTransport};
use restbase_update::model::DependencyTable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP/1.1 responder: 503 for paths containing `/down/`, 200 otherwise.
/// Every request head is recorded, lowercased.
async fn spawn_restbase() -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_lowercase();
                let (status, body) = if head.starts_with("get /v1/down/") {
                    ("503 Service Unavailable", "down")
                } else {
                    ("200 OK", "ok")
                };
                seen.lock().unwrap().push(head);
                let resp = format!(
                    "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    (format!("http://{}", addr), heads)
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::new("restbase-update-test", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn outcomes_follow_request_order_and_report_bad_statuses() {
    let (base, heads) = spawn_restbase().await;
    let requests = vec![
        InvalidationRequest::page_edit(format!("{}/v1/page/html/Foo/1", base), Some(0)),
        InvalidationRequest::page_batch(format!("{}/v1/down/Bar/2", base), DependencyTable::Templatelinks),
        InvalidationRequest::page_batch(format!("{}/v1/page/html/Baz/3", base), DependencyTable::Imagelinks),
    ];

    let outcomes = transport().run_multi(requests, 3).await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].status, Some(200));
    assert!(outcomes[0].error.is_none());
    assert_eq!(outcomes[1].status, Some(503));
    let err = outcomes[1].error.as_deref().expect("503 is an error");
    assert!(err.contains("503"), "{}", err);
    assert_eq!(outcomes[2].status, Some(200));
    assert!(outcomes[2].error.is_none());

    let heads = heads.lock().unwrap().clone();
    assert_eq!(heads.len(), 3);
    assert!(heads.iter().all(|h| h.contains("cache-control: no-cache")));
    assert!(heads.iter().all(|h| h.contains("user-agent: restbase-update-test")));
    let foo = heads.iter().find(|h| h.starts_with("get /v1/page/html/foo/1 ")).unwrap();
    assert!(foo.contains("x-restbase-parentrevision: 0"));
    assert!(!foo.contains("x-restbase-mode"));
    let bar = heads.iter().find(|h| h.starts_with("get /v1/down/bar/2 ")).unwrap();
    assert!(bar.contains("x-restbase-mode: templates"));
    let baz = heads.iter().find(|h| h.starts_with("get /v1/page/html/baz/3 ")).unwrap();
    assert!(baz.contains("x-restbase-mode: files"));
}

#[tokio::test]
async fn refused_connection_has_no_status() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcomes = transport()
        .run_multi(
            vec![InvalidationRequest::revision(format!("http://{}/v1/page/revision/7", addr))],
            1,
        )
        .await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, None);
    assert!(outcomes[0].error.is_some());
}
