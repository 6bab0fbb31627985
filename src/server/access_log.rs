use chrono::{DateTime, Local};
use std::{
    io::Write,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
    time::Duration,
};

/// Shared sink receiving one line per completed exchange.
///
/// Lines use the common log layout followed by the processing time of
/// [`process_request`](crate::RequestHandler::process_request) in
/// milliseconds:
///
/// ```text
/// 127.0.0.1 - - [19/Oct/2026:14:03:11] "GET /hello HTTP/1.1" 200 2 0.0123
/// ```
pub(crate) struct AccessLog {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl AccessLog {
    pub(crate) fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub(crate) fn record(
        &self,
        peer: Option<SocketAddr>,
        request_line: &str,
        code: u16,
        length: u64,
        took: Duration,
    ) {
        let line = format_line(peer, Local::now(), request_line, code, length, took);

        // Poisoned only if a writer panicked mid-line
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            tracing::warn!(error = %err, "access log write failed");
        }
    }
}

fn format_line(
    peer: Option<SocketAddr>,
    now: DateTime<Local>,
    request_line: &str,
    code: u16,
    length: u64,
    took: Duration,
) -> String {
    let ip = peer.map(|p| p.ip().to_string());

    format!(
        "{} - - [{}] \"{}\" {} {} {:.4}\n",
        ip.as_deref().unwrap_or("-"),
        now.format("%d/%b/%Y:%H:%M:%S"),
        request_line,
        code,
        length,
        took.as_secs_f64() * 1000.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn line_layout() {
        let now = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 2).unwrap();
        let line = format_line(
            Some("10.1.2.3:4567".parse().unwrap()),
            now,
            "GET /hello HTTP/1.1",
            200,
            2,
            Duration::from_micros(1500),
        );

        assert_eq!(
            line,
            "10.1.2.3 - - [07/Mar/2026:09:05:02] \"GET /hello HTTP/1.1\" 200 2 1.5000\n"
        );
    }

    #[test]
    fn unknown_peer() {
        let now = Local.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let line = format_line(None, now, "POST /x HTTP/1.0", 404, 0, Duration::ZERO);

        assert!(line.starts_with("- - - [31/Dec/2026:23:59:59] "));
        assert!(line.ends_with(" 404 0 0.0000\n"));
    }

    #[test]
    fn record_writes_one_line() {
        let out = Shared::default();
        let log = AccessLog::new(Box::new(out.clone()));

        log.record(None, "GET / HTTP/1.1", 500, 0, Duration::ZERO);
        log.record(None, "GET / HTTP/1.1", 500, 0, Duration::ZERO);

        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
