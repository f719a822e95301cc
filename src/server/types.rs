use hickory_server::server::Request;
use std::time::Instant;

/// Per-request facts used for logging.
#[derive(Clone)]
pub struct QueryContext {
    pub client_ip: String,
    pub name: String,
    pub qtype: String,
    pub start: Instant,
}

impl QueryContext {
    pub fn from_request(request: &Request) -> Self {
        let (name, qtype) = match request.queries().first() {
            Some(query) => {
                let mut name = query.name().to_string();
                if name.ends_with('.') {
                    name.pop();
                }
                name.make_ascii_lowercase();
                (name, query.query_type().to_string())
            }
            None => (String::new(), String::new()),
        };

        Self {
            client_ip: request.src().ip().to_string(),
            name,
            qtype,
            start: Instant::now(),
        }
    }
}
