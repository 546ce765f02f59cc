//! Integration tests against a minimal in-process mock server: a background
//! thread wrapping `std::net::TcpListener` that understands just enough of
//! the `check`/`get`/`set` request shapes to answer them (§10.4).

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use kachery_digest::{hash_bytes, Alg};
use kachery_remote::{Client, Endpoint};

struct MockServer {
    addr: String,
    store: Arc<Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MockServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let store: Arc<Mutex<std::collections::HashMap<String, Vec<u8>>>> =
            Arc::new(Mutex::new(std::collections::HashMap::new()));
        let store_clone = store.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let store = store_clone.clone();
                thread::spawn(move || handle_connection(stream, store));
            }
        });

        Self { addr: format!("http://{addr}"), store }
    }

    fn seed(&self, alg: Alg, hash: &str, bytes: Vec<u8>) {
        self.store
            .lock()
            .unwrap()
            .insert(format!("{}/{}", alg.name(), hash), bytes);
    }
}

fn handle_connection(
    mut stream: TcpStream,
    store: Arc<Mutex<std::collections::HashMap<String, Vec<u8>>>>,
) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");

    let mut content_length = 0usize;
    let mut range_header: Option<String> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length: ") {
            content_length = v.parse().unwrap_or(0);
        }
        if let Some(v) = line.strip_prefix("Range: ") {
            range_header = Some(v.to_owned());
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).unwrap();
    }

    let path = target.split('?').next().unwrap_or(target);
    let mut segments = path.trim_start_matches('/').split('/');
    let op = segments.next().unwrap_or("");
    let alg = segments.next().unwrap_or("");
    let hash = segments.next().unwrap_or("");
    let key = format!("{alg}/{hash}");

    match (method, op) {
        ("GET", "check") => {
            let found = store.lock().unwrap().contains_key(&key);
            let body = if found {
                let size = store.lock().unwrap().get(&key).unwrap().len();
                format!(r#"{{"success":true,"found":true,"size":{size}}}"#)
            } else {
                r#"{"success":true,"found":false}"#.to_owned()
            };
            write_response(&mut stream, 200, "application/json", body.as_bytes());
        }
        ("GET", "get") => {
            let data = store.lock().unwrap().get(&key).cloned();
            match data {
                None => write_response(&mut stream, 404, "text/plain", b"not found"),
                Some(bytes) => {
                    if let Some(range) = range_header {
                        let spec = range.trim_start_matches("bytes=");
                        let mut it = spec.split('-');
                        let start: usize = it.next().unwrap_or("0").parse().unwrap_or(0);
                        let end: usize = it
                            .next()
                            .filter(|s| !s.is_empty())
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(bytes.len() - 1);
                        let slice = &bytes[start..=end.min(bytes.len() - 1)];
                        write_response(&mut stream, 200, "application/octet-stream", slice);
                    } else {
                        write_response(&mut stream, 200, "application/octet-stream", &bytes);
                    }
                }
            }
        }
        ("POST", "set") => {
            store.lock().unwrap().insert(key, body);
            write_response(&mut stream, 200, "application/json", br#"{"success":true}"#);
        }
        _ => write_response(&mut stream, 404, "text/plain", b"unknown route"),
    }
}

fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) {
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
}

#[test]
fn check_reports_absence_then_presence_after_upload() {
    kachery_remote::reset();
    let server = MockServer::start();
    let endpoint = Endpoint { url: server.addr.clone(), channel: "ch".to_owned(), password: "pw".to_owned() };
    let client = Client::new().unwrap();

    let bytes = b"hello kachery".to_vec();
    let hash = hash_bytes(&bytes, Alg::Sha1);

    assert!(client.check(&endpoint, Alg::Sha1, &hash).unwrap().is_none());

    client.upload(&endpoint, Alg::Sha1, &hash, bytes.clone()).unwrap();

    let found = client.check(&endpoint, Alg::Sha1, &hash).unwrap();
    assert_eq!(found.unwrap().size, Some(bytes.len() as u64));
}

#[test]
fn download_full_artifact_matches_uploaded_bytes() {
    kachery_remote::reset();
    let server = MockServer::start();
    let endpoint = Endpoint { url: server.addr.clone(), channel: "ch".to_owned(), password: "pw".to_owned() };
    let client = Client::new().unwrap();

    let bytes = b"a reasonably sized payload for download".to_vec();
    let hash = hash_bytes(&bytes, Alg::Sha1);
    server.seed(Alg::Sha1, hash.hex(), bytes.clone());

    let mut out = Vec::new();
    client.download(&endpoint, Alg::Sha1, &hash, None, &mut out).unwrap();
    assert_eq!(out, bytes);
}

#[test]
fn download_range_returns_only_the_requested_slice() {
    kachery_remote::reset();
    let server = MockServer::start();
    let endpoint = Endpoint { url: server.addr.clone(), channel: "ch".to_owned(), password: "pw".to_owned() };
    let client = Client::new().unwrap();

    let bytes: Vec<u8> = (0u8..=255).collect();
    let hash = hash_bytes(&bytes, Alg::Sha1);
    server.seed(Alg::Sha1, hash.hex(), bytes.clone());

    let mut out = Vec::new();
    client.download(&endpoint, Alg::Sha1, &hash, Some((10, 20)), &mut out).unwrap();
    assert_eq!(out, bytes[10..20]);
}

#[test]
fn check_positive_response_is_memoized_and_survives_store_clear() {
    kachery_remote::reset();
    let server = MockServer::start();
    let endpoint = Endpoint { url: server.addr.clone(), channel: "ch".to_owned(), password: "pw".to_owned() };
    let client = Client::new().unwrap();

    let bytes = b"memoized payload".to_vec();
    let hash = hash_bytes(&bytes, Alg::Sha1);
    server.seed(Alg::Sha1, hash.hex(), bytes.clone());

    assert!(client.check(&endpoint, Alg::Sha1, &hash).unwrap().is_some());

    server.store.lock().unwrap().clear();

    // The positive check response is memoized by URL, so clearing the
    // server's backing store does not invalidate it.
    assert!(client.check(&endpoint, Alg::Sha1, &hash).unwrap().is_some());

    kachery_remote::reset();
}
