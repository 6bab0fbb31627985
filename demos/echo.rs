use wisp_http::{BufferedHandler, Exchange, Server, StaticHandler, StatusCode};

fn echo(ex: &mut Exchange, body: &[u8]) -> Vec<u8> {
    ex.set_response_header("Content-Type", "application/json");

    let query: Vec<_> = ex.query_params().iter().collect();
    format!(
        r#"{{"method": {:?}, "path": {:?}, "wildcards": {:?}, "query": {:?}, "body": {:?}}}"#,
        ex.method().as_str(),
        ex.path(),
        ex.wildcards(),
        query,
        String::from_utf8_lossy(body),
    )
    .into_bytes()
}

fn main() {
    tracing_subscriber::fmt().init();

    let mut server = Server::builder().access_log(std::io::stdout()).build();

    server.bind_handler("/echo", BufferedHandler::new(echo)).unwrap();
    server.bind_handler("/echo/*", BufferedHandler::new(echo)).unwrap();
    server.bind_handler("/users/*/posts/*", BufferedHandler::new(echo)).unwrap();
    server.set_404_handler(Some(
        StaticHandler::new(r#"{"error": "Not Found"}"#)
            .with_status(StatusCode::NotFound)
            .with_content_type("application/json"),
    ));

    server.start("127.0.0.1:8080", 4).unwrap();
    std::thread::park();
}
