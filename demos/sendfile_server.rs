// This example fronts a tiny "application" with X-Sendfile, serving files from the crate's
// `target/doc/` directory.
//
// Run `cargo doc && cargo run --example sendfile_server`, then point your browser to
// http://localhost:3000/hyper_xsendfile/ and any other path below it. An optional argument
// names a YAML configuration file to use instead of the built-in one.

use std::convert::Infallible;
use std::net::SocketAddr;

use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_xsendfile::{ConfigTree, XSendFile, XSendFileConf};
use log::{error, info};
use tokio::net::TcpListener;

const DEFAULT_CONFIG: &str = r#"
xsendfile: on
enable_sendfile: on
"#;

/// The application. It decides which file a path maps to, and leaves sending it to the filter.
async fn app(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path();
    if path == "/" {
        return Ok(Response::builder()
            .status(StatusCode::MOVED_PERMANENTLY)
            .header(header::LOCATION, "/hyper_xsendfile/")
            .body(Full::default())
            .expect("unable to build response"));
    }

    let file = if path.ends_with('/') {
        "index.html"
    } else {
        path.rsplit('/').next().unwrap_or("index.html")
    };
    Ok(Response::builder()
        .header("X-Sendfile", file)
        .body(Full::new(Bytes::from_static(b"the file is on its way")))
        .expect("unable to build response"))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let conf = match std::env::args().nth(1) {
        Some(path) => XSendFileConf::load_from_yaml(path),
        None => XSendFileConf::from_yaml_str(DEFAULT_CONFIG),
    }
    .expect("unable to load configuration");
    let service = XSendFile::new(service_fn(app), ConfigTree::new(conf), "target/doc/");

    let addr: SocketAddr = ([127, 0, 0, 1], 3000).into();
    let listener = TcpListener::bind(addr)
        .await
        .expect("unable to bind TCP listener");
    info!("Sendfile server running on http://{addr}/");

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .expect("unable to accept TCP connection");

        let service = service.clone();
        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                error!("Error serving connection: {err:?}");
            }
        });
    }
}
