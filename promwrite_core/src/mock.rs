//! An in-process stand-in for a Prometheus server, for tests.

use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct MockPrometheus {
    /// e.g. http://127.0.0.1:43117
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockPrometheus {
    /// Serve `(path, status, body)` routes; any other path answers 404
    pub fn start(routes: Vec<(&'static str, u16, String)>) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&requests);
        std::thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let url = request.url().to_owned();
                let mut parts = url.splitn(2, '?');
                let path = parts.next().unwrap_or("").to_owned();
                let query = parts.next().map(str::to_owned);

                let mut body = Vec::new();
                let _ = request.as_reader().read_to_end(&mut body);
                recorded.lock().unwrap().push(RecordedRequest {
                    method: request.method().to_string(),
                    path: path.clone(),
                    query,
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| (h.field.to_string(), h.value.to_string()))
                        .collect(),
                    body,
                });

                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, body)| (*status, body.clone()))
                    .unwrap_or((404, "not found".to_owned()));
                let response = tiny_http::Response::from_string(body).with_status_code(status);
                let _ = request.respond(response);
            }
        });

        MockPrometheus {
            url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// A url where nothing is listening
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// A url that accepts connections but never answers
pub fn silent_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        // Hold every connection open without reading or replying
        let mut held = Vec::new();
        for stream in listener.incoming() {
            held.push(stream);
        }
    });
    format!("http://{}", addr)
}
