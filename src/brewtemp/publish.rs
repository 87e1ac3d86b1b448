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

use crate::sensor::{Reading, Source};
use hyper::client::HttpConnector;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::http::uri::InvalidUri;
use hyper::{Body, Client, Method, Request, StatusCode, Uri};
use std::error::Error;
use std::fmt::{self, Formatter};
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_URL: &str = "http://localhost:8086";
pub const DEFAULT_DATABASE: &str = "sensor_db";
pub const REAL_MEASUREMENT: &str = "real_data";
pub const SIMULATED_MEASUREMENT: &str = "simulated_data";
pub const TEMPERATURE_FIELD: &str = "temperature";

const LINE_PROTOCOL: &str = "text/plain; charset=utf-8";
const MAX_ERROR_BODY: usize = 256;

/// Error building a `PublishTarget` from user supplied configuration.
#[derive(Debug)]
pub enum ConfigError {
    InvalidUrl(String, InvalidUri),
    UnsupportedScheme(String),
    MissingHost(String),
    InvalidDatabase(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidUrl(url, e) => write!(f, "invalid URL '{}': {}", url, e),
            ConfigError::UnsupportedScheme(url) => write!(f, "unsupported scheme in '{}', only http is supported", url),
            ConfigError::MissingHost(url) => write!(f, "missing host in '{}'", url),
            ConfigError::InvalidDatabase(db) => write!(f, "invalid database name '{}'", db),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::InvalidUrl(_, ref e) => Some(e),
            _ => None,
        }
    }
}

/// Where readings are written: an InfluxDB `/write` endpoint for a particular database.
#[derive(Debug, Clone)]
pub struct PublishTarget {
    write_uri: Uri,
    database: String,
    token: Option<String>,
}

impl PublishTarget {
    /// Build a target from the base URL of an InfluxDB server (e.g. `http://localhost:8086`)
    /// and the name of the database to write to, returning an error if either is invalid.
    pub fn new(base_url: &str, database: &str, token: Option<String>) -> Result<Self, ConfigError> {
        let base: Uri = base_url
            .parse()
            .map_err(|e| ConfigError::InvalidUrl(base_url.to_owned(), e))?;

        if base.scheme_str() != Some("http") {
            return Err(ConfigError::UnsupportedScheme(base_url.to_owned()));
        }

        let authority = base
            .authority()
            .ok_or_else(|| ConfigError::MissingHost(base_url.to_owned()))?;

        let valid_db = !database.is_empty()
            && database
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_db {
            return Err(ConfigError::InvalidDatabase(database.to_owned()));
        }

        let write = format!(
            "http://{}{}/write?db={}",
            authority,
            base.path().trim_end_matches('/'),
            database
        );
        let write_uri = write.parse::<Uri>().map_err(|e| ConfigError::InvalidUrl(write, e))?;

        Ok(Self {
            write_uri,
            database: database.to_owned(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn write_uri(&self) -> &Uri {
        &self.write_uri
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Measurement a reading is written to, based on where it came from. Downstream
    /// aggregation prefers `real_data` over `simulated_data` for the same window.
    pub fn measurement(source: Source) -> &'static str {
        match source {
            Source::Real => REAL_MEASUREMENT,
            Source::Simulated => SIMULATED_MEASUREMENT,
        }
    }

    /// Render a reading in InfluxDB line protocol, e.g. `real_data temperature=21.43`
    pub fn line(reading: &Reading) -> String {
        format!(
            "{} {}={}",
            Self::measurement(reading.source()),
            TEMPERATURE_FIELD,
            f64::from(reading.value())
        )
    }
}

/// Potential kinds of errors that can be encountered writing a reading
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum PublishErrorKind {
    Network,
    Status,
    Timeout,
}

impl PublishErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishErrorKind::Network => "network",
            PublishErrorKind::Status => "status",
            PublishErrorKind::Timeout => "timeout",
        }
    }
}

/// Error writing a reading to a time-series database
#[derive(Debug)]
pub enum PublishError {
    Status(StatusCode, String),
    Timeout(Duration),
    KindMsgCause(PublishErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl PublishError {
    pub fn kind(&self) -> PublishErrorKind {
        match self {
            PublishError::Status(_, _) => PublishErrorKind::Status,
            PublishError::Timeout(_) => PublishErrorKind::Timeout,
            PublishError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Status(code, body) if body.is_empty() => write!(f, "unexpected status {}", code),
            PublishError::Status(code, body) => write!(f, "unexpected status {}: {}", code, body),
            PublishError::Timeout(d) => write!(f, "no response after {:?}", d),
            PublishError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for PublishError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PublishError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Abstraction around a time-series database write to allow for easier testing.
pub trait Publisher {
    fn publish(&self, reading: &Reading) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Write readings to InfluxDB over HTTP using the v1 `/write` API.
#[derive(Debug, Clone)]
pub struct InfluxPublisher {
    client: Client<HttpConnector>,
    target: PublishTarget,
}

impl InfluxPublisher {
    pub fn new(target: PublishTarget) -> Self {
        Self {
            client: Client::new(),
            target,
        }
    }

    pub fn target(&self) -> &PublishTarget {
        &self.target
    }

    fn request(&self, reading: &Reading) -> Result<Request<Body>, PublishError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.target.write_uri().clone())
            .header(CONTENT_TYPE, LINE_PROTOCOL);

        if let Some(token) = self.target.token() {
            builder = builder.header(AUTHORIZATION, format!("Token {}", token));
        }

        builder
            .body(Body::from(PublishTarget::line(reading)))
            .map_err(|e| PublishError::KindMsgCause(PublishErrorKind::Network, "unable to build write request", Box::new(e)))
    }
}

impl Publisher for InfluxPublisher {
    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        let req = self.request(reading)?;
        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| PublishError::KindMsgCause(PublishErrorKind::Network, "unable to send write request", Box::new(e)))?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        // InfluxDB explains what went wrong in the body, keep some of it for the logs.
        let body = hyper::body::to_bytes(res.into_body())
            .await
            .map(|b| String::from_utf8_lossy(&b).trim().chars().take(MAX_ERROR_BODY).collect())
            .unwrap_or_default();

        Err(PublishError::Status(status, body))
    }
}

#[cfg(test)]
mod test {
    use super::{ConfigError, InfluxPublisher, PublishErrorKind, PublishTarget, Publisher};
    use crate::sensor::{Reading, TemperatureCelsius};
    use hyper::header::AUTHORIZATION;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use std::net::{SocketAddr, TcpListener};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedWrite {
        uri: String,
        auth: Option<String>,
        body: String,
    }

    /// Start an HTTP server that records each request and responds with the given status.
    async fn fake_influx(status: StatusCode, body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<CapturedWrite>>>) {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let captured = writes.clone();

        let service = make_service_fn(move |_| {
            let captured = captured.clone();

            async move {
                Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                    let captured = captured.clone();

                    async move {
                        let uri = req.uri().to_string();
                        let auth = req
                            .headers()
                            .get(AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(|v| v.to_owned());
                        let bytes = hyper::body::to_bytes(req.into_body()).await?;

                        captured.lock().unwrap().push(CapturedWrite {
                            uri,
                            auth,
                            body: String::from_utf8_lossy(&bytes).into_owned(),
                        });

                        Ok::<_, hyper::Error>(Response::builder().status(status).body(Body::from(body)).unwrap())
                    }
                }))
            }
        });

        let server = Server::bind(&([127, 0, 0, 1], 0).into()).serve(service);
        let addr = server.local_addr();
        tokio::spawn(server);

        (addr, writes)
    }

    fn publisher_for(addr: SocketAddr, token: Option<String>) -> InfluxPublisher {
        let target = PublishTarget::new(&format!("http://{}", addr), "sensor_db", token).unwrap();
        InfluxPublisher::new(target)
    }

    #[test]
    fn test_target_write_uri() {
        let target = PublishTarget::new("http://localhost:8086", "sensor_db", None).unwrap();
        assert_eq!("http://localhost:8086/write?db=sensor_db", target.write_uri().to_string());
        assert_eq!("sensor_db", target.database());
        assert_eq!(None, target.token());
    }

    #[test]
    fn test_target_write_uri_base_path() {
        let target = PublishTarget::new("http://pi.local:8086/influx/", "brew", Some("".to_owned())).unwrap();
        assert_eq!("http://pi.local:8086/influx/write?db=brew", target.write_uri().to_string());
        assert_eq!(None, target.token());
    }

    #[test]
    fn test_target_invalid_url() {
        let res = PublishTarget::new("not a url", "sensor_db", None);
        assert!(matches!(res, Err(ConfigError::InvalidUrl(_, _))));
    }

    #[test]
    fn test_target_unsupported_scheme() {
        let res = PublishTarget::new("https://localhost:8086", "sensor_db", None);
        assert!(matches!(res, Err(ConfigError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_target_missing_scheme() {
        let res = PublishTarget::new("localhost:8086", "sensor_db", None);
        assert!(res.is_err());
    }

    #[test]
    fn test_target_invalid_database() {
        let res = PublishTarget::new("http://localhost:8086", "sensor db&x=1", None);
        assert!(matches!(res, Err(ConfigError::InvalidDatabase(_))));

        let res = PublishTarget::new("http://localhost:8086", "", None);
        assert!(matches!(res, Err(ConfigError::InvalidDatabase(_))));
    }

    #[test]
    fn test_line_real() {
        let reading = Reading::real(TemperatureCelsius::from(21.875));
        assert_eq!("real_data temperature=21.875", PublishTarget::line(&reading));
    }

    #[test]
    fn test_line_simulated() {
        let reading = Reading::simulated(TemperatureCelsius::from(21.43));
        assert_eq!("simulated_data temperature=21.43", PublishTarget::line(&reading));
    }

    #[tokio::test]
    async fn test_publish_success() {
        let (addr, writes) = fake_influx(StatusCode::NO_CONTENT, "").await;
        let publisher = publisher_for(addr, Some("s3cret".to_owned()));

        let reading = Reading::real(TemperatureCelsius::from(21.875));
        publisher.publish(&reading).await.unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(1, writes.len());
        assert_eq!("/write?db=sensor_db", writes[0].uri);
        assert_eq!(Some("Token s3cret".to_owned()), writes[0].auth);
        assert_eq!("real_data temperature=21.875", writes[0].body);
    }

    #[tokio::test]
    async fn test_publish_server_error() {
        let (addr, writes) = fake_influx(StatusCode::INTERNAL_SERVER_ERROR, "{\"error\":\"timeout\"}").await;
        let publisher = publisher_for(addr, None);

        let reading = Reading::simulated(TemperatureCelsius::from(25.0));
        let err = publisher.publish(&reading).await.unwrap_err();

        assert_eq!(PublishErrorKind::Status, err.kind());
        assert_eq!("unexpected status 500 Internal Server Error: {\"error\":\"timeout\"}", err.to_string());
        assert_eq!(None, writes.lock().unwrap()[0].auth);
    }

    #[tokio::test]
    async fn test_publish_connection_refused() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let publisher = publisher_for(addr, None);
        let reading = Reading::simulated(TemperatureCelsius::from(25.0));
        let err = publisher.publish(&reading).await.unwrap_err();

        assert_eq!(PublishErrorKind::Network, err.kind());
    }
}
