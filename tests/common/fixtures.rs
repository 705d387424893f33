//! Mock upstreams and producers for integration tests

use std::sync::Arc;
use swell_collector::{BundleContext, Error, Producer, Record, from_fn};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serve `body` at `route`, expecting exactly `calls` requests
pub async fn serve_bytes(server: &MockServer, route: &str, body: &[u8], calls: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(calls)
        .mount(server)
        .await;
}

/// Answer `route` with `status`
pub async fn serve_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Producer that downloads each `(filename, url)` pair
///
/// Saves what it gets and fails when nothing could be fetched.
pub fn fetching(name: &str, files: Vec<(String, String)>) -> Arc<dyn Producer> {
    let source = name.to_uppercase();
    let owned = name.to_string();
    from_fn(name, move |ctx: BundleContext| {
        let files = files.clone();
        let source = source.clone();
        let name = owned.clone();
        async move {
            let mut records = Vec::new();
            for (filename, url) in files {
                if let Some(data) = ctx.get(&url).await {
                    let saved = ctx.save(&filename, &data).await?;
                    records.push(Record::new(source.clone(), "test", saved, 1).url(url));
                }
            }
            if records.is_empty() {
                return Err(Error::producer(name, "no data available"));
            }
            Ok(records)
        }
    })
}
