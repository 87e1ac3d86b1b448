// Brewtemp - Fermentation temperature publisher for InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::encode_text;
use crate::settings::{Settings, SettingsSender};
use hyper::body::HttpBody;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::{Registry, TEXT_FORMAT};
use serde::Serialize;
use std::sync::Arc;

const JSON_FORMAT: &str = "application/json";

/// Largest settings update accepted, anything bigger is rejected without being read in full.
pub const MAX_SETTINGS_BODY: usize = 4096;

/// Global state shared between all HTTP requests via Arc.
pub struct RequestContext {
    registry: Registry,
    settings: SettingsSender,
}

impl RequestContext {
    pub fn new(registry: Registry, settings: SettingsSender) -> Self {
        RequestContext { registry, settings }
    }

    fn current_settings(&self) -> Settings {
        *self.settings.borrow()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Route a request to the metrics or settings endpoints.
///
/// * `GET /metrics` renders Prometheus metrics in the text exposition format.
/// * `GET /settings` returns the current settings as JSON.
/// * `PUT /settings` replaces the current settings, taking effect on the next cycle.
///   Bodies larger than `MAX_SETTINGS_BODY` bytes are rejected with a 413.
pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = match (&method, path.as_ref()) {
        (&Method::GET, "/metrics") => match encode_text(&context.registry) {
            Ok(buffer) => {
                let mut res = Response::new(Body::from(buffer));
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                res
            }
            Err(e) => {
                tracing::error!(message = "error encoding metrics to text format", error = %e);
                http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },

        (&Method::GET, "/settings") => http_json(StatusCode::OK, &context.current_settings()),

        (&Method::PUT, "/settings") => update_settings(req, &context).await?,

        (_, "/metrics") | (_, "/settings") => http_status_no_body(StatusCode::METHOD_NOT_ALLOWED),

        _ => http_status_no_body(StatusCode::NOT_FOUND),
    };

    Ok(res)
}

async fn update_settings(req: Request<Body>, context: &RequestContext) -> Result<Response<Body>, hyper::Error> {
    let body = match read_body(req.into_body(), MAX_SETTINGS_BODY).await? {
        Some(body) => body,
        None => {
            tracing::warn!(message = "settings update too large", limit = MAX_SETTINGS_BODY);
            let error = format!("body larger than {} bytes", MAX_SETTINGS_BODY);
            return Ok(http_json(StatusCode::PAYLOAD_TOO_LARGE, &ErrorBody { error }));
        }
    };

    let res = match serde_json::from_slice::<Settings>(&body) {
        Ok(settings) => {
            let previous = context.settings.send_replace(settings);
            tracing::info!(
                message = "updated settings",
                previous_mode = %previous.mode,
                mode = %settings.mode,
            );

            http_json(StatusCode::OK, &settings)
        }
        Err(e) => {
            tracing::warn!(message = "invalid settings update", error = %e);
            http_json(StatusCode::BAD_REQUEST, &ErrorBody { error: e.to_string() })
        }
    };

    Ok(res)
}

/// Read a request body, returning `None` as soon as it is known to be larger than `limit`.
async fn read_body(mut body: Body, limit: usize) -> Result<Option<Vec<u8>>, hyper::Error> {
    // Content-Length, when present, lets us reject before reading anything
    if body.size_hint().lower() > limit as u64 {
        return Ok(None);
    }

    let mut buf = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Ok(None);
        }

        buf.extend_from_slice(&chunk);
    }

    Ok(Some(buf))
}

fn http_json<T: Serialize>(code: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(buffer) => {
            let mut res = Response::new(Body::from(buffer));
            *res.status_mut() = code;
            res.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_FORMAT));
            res
        }
        Err(e) => {
            tracing::error!(message = "error encoding response to JSON", error = %e);
            http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn http_status_no_body(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}

#[cfg(test)]
mod test {
    use super::{http_route, RequestContext, MAX_SETTINGS_BODY};
    use crate::metrics::CycleMetrics;
    use crate::settings::{self, SensorMode, Settings, SettingsReceiver};
    use hyper::header::CONTENT_TYPE;
    use hyper::{Body, Method, Request, Response, StatusCode};
    use prometheus::{Registry, TEXT_FORMAT};
    use std::io;
    use std::sync::Arc;

    fn new_context() -> (Arc<RequestContext>, SettingsReceiver) {
        let reg = Registry::new();
        let _metrics = CycleMetrics::new(&reg).unwrap();
        let (tx, rx) = settings::channel(Settings::default());

        (Arc::new(RequestContext::new(reg, tx)), rx)
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_string(res: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(res.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_metrics() {
        let (context, _rx) = new_context();
        let res = http_route(request(Method::GET, "/metrics", ""), context).await.unwrap();

        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(TEXT_FORMAT, res.headers()[CONTENT_TYPE]);
        assert!(body_string(res).await.contains("brewtemp_cycles_total 0"));
    }

    #[tokio::test]
    async fn test_post_metrics() {
        let (context, _rx) = new_context();
        let res = http_route(request(Method::POST, "/metrics", ""), context).await.unwrap();

        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
    }

    #[tokio::test]
    async fn test_get_settings() {
        let (context, _rx) = new_context();
        let res = http_route(request(Method::GET, "/settings", ""), context).await.unwrap();

        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(r#"{"mode":"auto"}"#, body_string(res).await);
    }

    #[tokio::test]
    async fn test_put_settings() {
        let (context, rx) = new_context();
        let req = request(Method::PUT, "/settings", r#"{"mode": "simulated"}"#);
        let res = http_route(req, context.clone()).await.unwrap();

        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(r#"{"mode":"simulated"}"#, body_string(res).await);
        assert_eq!(SensorMode::Simulated, rx.borrow().mode);

        let res = http_route(request(Method::GET, "/settings", ""), context).await.unwrap();
        assert_eq!(r#"{"mode":"simulated"}"#, body_string(res).await);
    }

    #[tokio::test]
    async fn test_put_settings_invalid() {
        let (context, rx) = new_context();
        let req = request(Method::PUT, "/settings", r#"{"mode": "sometimes"}"#);
        let res = http_route(req, context).await.unwrap();

        assert_eq!(StatusCode::BAD_REQUEST, res.status());
        assert!(body_string(res).await.contains("error"));
        assert_eq!(SensorMode::Auto, rx.borrow().mode);
    }

    #[tokio::test]
    async fn test_put_settings_too_large() {
        let (context, rx) = new_context();
        let body = format!(r#"{{"mode": "simulated", "padding": "{}"}}"#, "x".repeat(MAX_SETTINGS_BODY));
        let res = http_route(request(Method::PUT, "/settings", &body), context).await.unwrap();

        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, res.status());
        assert!(body_string(res).await.contains("error"));
        assert_eq!(SensorMode::Auto, rx.borrow().mode);
    }

    #[tokio::test]
    async fn test_put_settings_too_large_no_length() {
        let (context, rx) = new_context();
        let chunks = (0..8).map(|_| Ok::<_, io::Error>(vec![b' '; 1024]));
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/settings")
            .body(Body::wrap_stream(futures_util::stream::iter(chunks)))
            .unwrap();
        let res = http_route(req, context).await.unwrap();

        assert_eq!(StatusCode::PAYLOAD_TOO_LARGE, res.status());
        assert_eq!(SensorMode::Auto, rx.borrow().mode);
    }

    #[tokio::test]
    async fn test_delete_settings() {
        let (context, _rx) = new_context();
        let res = http_route(request(Method::DELETE, "/settings", ""), context).await.unwrap();

        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (context, _rx) = new_context();
        let res = http_route(request(Method::GET, "/", ""), context).await.unwrap();

        assert_eq!(StatusCode::NOT_FOUND, res.status());
    }
}
