use wisp_http::{Server, StaticHandler};

fn main() {
    tracing_subscriber::fmt().init();

    let mut server = Server::new();
    server
        .bind_handler("/", StaticHandler::new("Hello, world!").with_content_type("text/plain"))
        .unwrap();
    server.start("127.0.0.1:8080", 2).unwrap();

    std::thread::park();
}
