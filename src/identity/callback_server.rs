//! Loopback listener for the interactive redirect.
//!
//! Binds to the redirect origin, waits for a single authorization response,
//! shows a short result page and hands the full URL back to the client.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, error, info};
use url::Url;

use crate::error::ProviderError;

/// Result from the callback listener.
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// Received a redirect carrying `code` or `error`, with the full URL.
    Success(String),
    /// The waiting side went away.
    Cancelled,
    /// Listener failed.
    Error(String),
}

/// A bound, not yet accepting, redirect listener.
pub struct CallbackListener {
    listener: TcpListener,
    origin: String,
}

impl CallbackListener {
    /// Bind to the host and port of `redirect_uri`.
    ///
    /// Binding happens before the browser opens so the redirect cannot race it.
    pub fn bind(redirect_uri: &str) -> Result<Self, ProviderError> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| ProviderError::CallbackFailed(format!("invalid redirect URI: {}", e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProviderError::CallbackFailed("redirect URI has no host".into()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProviderError::CallbackFailed("redirect URI has no port".into()))?;

        let bind_host = if host == "localhost" { "127.0.0.1" } else { host };
        let addr = format!("{}:{}", bind_host, port);

        let listener = TcpListener::bind(&addr).map_err(|e| {
            error!("Failed to bind callback listener to {}: {}", addr, e);
            ProviderError::CallbackFailed(format!("failed to start listener: {}", e))
        })?;

        // Non-blocking so cancellation is noticed between accepts
        listener
            .set_nonblocking(true)
            .map_err(|e| ProviderError::CallbackFailed(e.to_string()))?;

        info!("Redirect listener bound on {}", addr);

        Ok(Self {
            listener,
            origin: url.origin().ascii_serialization(),
        })
    }

    /// Block until one authorization response arrives or `cancel_rx` fires or
    /// disconnects.
    pub fn wait(self, cancel_rx: mpsc::Receiver<()>) -> CallbackResult {
        loop {
            match cancel_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Redirect listener cancelled");
                    return CallbackResult::Cancelled;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!("Connection from {}", peer_addr);
                    if let Some(url) = handle_connection(stream, &self.origin) {
                        info!("Authorization response received");
                        return CallbackResult::Success(url);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return CallbackResult::Error(format!("connection error: {}", e));
                }
            }
        }
    }
}

/// Handle one HTTP connection.
///
/// Returns the full URL if the request carried an authorization response.
fn handle_connection(mut stream: TcpStream, origin: &str) -> Option<String> {
    // Accepted sockets inherit non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    match classify_request(request_line) {
        RequestKind::Authorized(path) => {
            send_page(&mut stream, "Authentication Successful", "You can close this tab now.");
            Some(format!("{}{}", origin, path))
        }
        RequestKind::Failed(path) => {
            send_page(&mut stream, "Authentication Failed", &error_description(path));
            // The client still needs the URL to report the error
            Some(format!("{}{}", origin, path))
        }
        RequestKind::Rejected(status, message) => {
            send_error_response(&mut stream, status, message);
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RequestKind<'a> {
    Authorized(&'a str),
    Failed(&'a str),
    Rejected(u16, &'static str),
}

fn classify_request(request_line: &str) -> RequestKind<'_> {
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return RequestKind::Rejected(400, "Bad Request");
    };

    if method != "GET" {
        return RequestKind::Rejected(405, "Method Not Allowed");
    }

    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    let has_param = |name: &str| {
        query
            .split('&')
            .any(|pair| pair.split('=').next() == Some(name))
    };

    if has_param("error") {
        RequestKind::Failed(path)
    } else if has_param("code") {
        RequestKind::Authorized(path)
    } else {
        // favicon and similar
        RequestKind::Rejected(404, "Not Found")
    }
}

/// Extract and decode `error_description` from a request path.
fn error_description(path: &str) -> String {
    if let Some(start) = path.find("error_description=") {
        let start = start + "error_description=".len();
        let end = path[start..].find('&').map(|i| start + i).unwrap_or(path.len());
        urlencoding::decode(&path[start..end].replace('+', " "))
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "Authentication failed".to_string())
    } else {
        "Authentication was cancelled or failed.".to_string()
    }
}

fn send_page(stream: &mut TcpStream, title: &str, message: &str) {
    let html = format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>{title}</title></head>\n\
         <body style=\"font-family: sans-serif; text-align: center; padding-top: 4rem\">\n\
         <h1>{title}</h1>\n<p>{message}</p>\n</body>\n</html>",
        title = title,
        message = escape_html(message),
    );

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn send_error_response(stream: &mut TcpStream, status: u16, message: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        message,
        message.len(),
        message
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_request() {
        assert_eq!(
            classify_request("GET /?code=abc&state=xyz HTTP/1.1"),
            RequestKind::Authorized("/?code=abc&state=xyz")
        );
        assert_eq!(
            classify_request("GET /?error=access_denied HTTP/1.1"),
            RequestKind::Failed("/?error=access_denied")
        );
        assert_eq!(
            classify_request("GET /favicon.ico HTTP/1.1"),
            RequestKind::Rejected(404, "Not Found")
        );
        assert_eq!(
            classify_request("POST /?code=abc HTTP/1.1"),
            RequestKind::Rejected(405, "Method Not Allowed")
        );
        assert_eq!(classify_request("GET"), RequestKind::Rejected(400, "Bad Request"));
    }

    #[test]
    fn test_error_description() {
        assert_eq!(
            error_description("/?error=x&error_description=User%20cancelled+login&state=s"),
            "User cancelled login"
        );
        assert_eq!(
            error_description("/?error=x"),
            "Authentication was cancelled or failed."
        );
    }

    #[test]
    fn test_listener_receives_redirect() {
        // Port 0 lets the OS pick a free port.
        let listener = CallbackListener::bind("http://127.0.0.1:0").unwrap();
        let port = listener.listener.local_addr().unwrap().port();
        let (_cancel_tx, cancel_rx) = mpsc::channel();

        let handle = std::thread::spawn(move || listener.wait(cancel_rx));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"GET /?code=abc&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        assert_eq!(
            handle.join().unwrap(),
            CallbackResult::Success("http://127.0.0.1:0/?code=abc&state=xyz".into())
        );
    }

    #[test]
    fn test_listener_cancelled_when_sender_dropped() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").unwrap();
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        drop(cancel_tx);

        assert_eq!(listener.wait(cancel_rx), CallbackResult::Cancelled);
    }
}
