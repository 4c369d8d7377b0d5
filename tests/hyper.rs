use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_xsendfile::{ConfigTree, DirectoryConfig, TriFlag, XSendFile, XSendFileConf};
use std::convert::Infallible;
use std::fs;
use tempdir::TempDir;
use tokio::net::{TcpListener, TcpStream};

// Demonstrates that an `XSendFile` instance can be used as a hyper service directly, and that
// the substituted file makes it over the wire.
#[tokio::test]
async fn test_usable_as_hyper_service() {
    let dir = TempDir::new("hyper-xsendfile-service").unwrap();
    fs::create_dir_all(dir.path().join("files")).unwrap();
    fs::write(dir.path().join("files/hello.txt"), "hello from disk").unwrap();

    let conf = XSendFileConf {
        server: DirectoryConfig {
            xsendfile: TriFlag::Enabled,
            ..Default::default()
        },
        ..Default::default()
    };
    let app = service_fn(|_req: Request<Incoming>| async {
        Ok::<_, Infallible>(
            Response::builder()
                .header("X-Sendfile", "hello.txt")
                .body(Full::new(Bytes::from_static(b"generated")))
                .unwrap(),
        )
    });
    let service = XSendFile::new(app, ConfigTree::new(conf), dir.path());

    // Bind to port "0" to allow the OS to pick one that's free, avoiding
    // the risk of collisions.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
            .unwrap();
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let req = Request::get("/files/index")
        .header(header::HOST, "localhost")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_LENGTH], "15");
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"hello from disk");
}
