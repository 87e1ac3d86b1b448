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

use brewtemp::cycle::{SensorPublishLoop, DEFAULT_INTERVAL_SECS, DEFAULT_PUBLISH_TIMEOUT_SECS};
use brewtemp::http::{http_route, RequestContext};
use brewtemp::metrics::CycleMetrics;
use brewtemp::publish::{ConfigError, InfluxPublisher, PublishTarget, DEFAULT_DATABASE, DEFAULT_URL};
use brewtemp::sensor::{W1Sensor, DEFAULT_DEVICE_ROOT};
use brewtemp::settings::{self, SensorMode, Settings};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use futures_util::future::FutureExt;
use hyper::server::conn::AddrIncoming;
use hyper::server::Builder;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use prometheus::process_collector::ProcessCollector;
use prometheus::Registry;
use std::error::Error;
use std::fmt::{self, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{io, process};
use tokio::runtime;
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9781);
const SHUTDOWN_TIMEOUT_SECS: u64 = 1;

/// Publish fermentation temperature from a DS18B20 probe to InfluxDB
///
/// Read the temperature from a DS18B20 one-wire probe attached to a local machine,
/// usually a Raspberry PI, and write it to an InfluxDB database at a fixed interval.
/// When no probe is attached, simulated readings are written instead so that the rest
/// of the monitoring stack can be set up and tested without hardware.
///
/// Readings from the probe are written to the `real_data` measurement, simulated
/// readings to the `simulated_data` measurement. Both use the field `temperature`.
#[derive(Debug, Parser)]
#[command(name = "brewtemp", version = clap::crate_version!())]
struct BrewtempApplication {
    /// Read the probe and publish the reading at this interval, in seconds
    #[arg(
        long,
        env = "POLL_INTERVAL",
        default_value_t = DEFAULT_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    interval_secs: u64,

    /// Directory containing one-wire devices. The first `28-*` device is used.
    #[arg(long, env = "W1_DEVICE_ROOT", default_value = DEFAULT_DEVICE_ROOT)]
    sensor_root: PathBuf,

    /// Base URL of the InfluxDB server to write readings to. Only http is supported.
    #[arg(long, env = "INFLUX_URL", default_value = DEFAULT_URL)]
    influx_url: String,

    /// InfluxDB database to write readings to
    #[arg(long, env = "INFLUX_DB", default_value = DEFAULT_DATABASE)]
    influx_db: String,

    /// Token to authenticate writes with, if required by the server
    #[arg(long, env = "INFLUX_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// Give up on writing a reading after this many seconds
    #[arg(
        long,
        env = "PUBLISH_TIMEOUT",
        default_value_t = DEFAULT_PUBLISH_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    publish_timeout_secs: u64,

    /// Ignore the probe and always write simulated readings. This can be changed
    /// while running with `PUT /settings`. The environment variable accepts values
    /// like 'true', 'yes', '1', 'false', 'no', and '0'.
    #[arg(long, env = "SIMULATE", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    simulate: bool,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, env = "LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind the metrics and settings server to. By default, brewtemp only binds
    /// to localhost since settings can be changed via this server.
    #[arg(long, env = "BIND_ADDR", default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

/// Everything validated or acquired before the publish loop starts.
struct Startup {
    target: PublishTarget,
    registry: Registry,
    metrics: CycleMetrics,
    server: Builder<AddrIncoming>,
}

/// Fatal error encountered before the publish loop starts.
#[derive(Debug)]
enum StartupError {
    Target(ConfigError),
    Metrics(prometheus::Error),
    Bind(SocketAddr, hyper::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Target(e) => write!(f, "invalid publish target: {}", e),
            StartupError::Metrics(e) => write!(f, "failed to register metrics: {}", e),
            StartupError::Bind(addr, e) => write!(f, "error starting server on {}: {}", addr, e),
        }
    }
}

impl Error for StartupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StartupError::Target(e) => Some(e),
            StartupError::Metrics(e) => Some(e),
            StartupError::Bind(_, e) => Some(e),
        }
    }
}

/// Validate configuration, register metrics, and bind the server. Nothing is read
/// from the probe or written to the database until this has succeeded. Must be
/// called from within a tokio runtime.
fn prepare(opts: &BrewtempApplication) -> Result<Startup, StartupError> {
    let target =
        PublishTarget::new(&opts.influx_url, &opts.influx_db, opts.influx_token.clone()).map_err(StartupError::Target)?;

    let registry = Registry::new();
    let metrics = CycleMetrics::new(&registry).map_err(StartupError::Metrics)?;
    registry
        .register(Box::new(ProcessCollector::for_self()))
        .map_err(StartupError::Metrics)?;

    let server = Server::try_bind(&opts.bind).map_err(|e| StartupError::Bind(opts.bind, e))?;

    Ok(Startup {
        target,
        registry,
        metrics,
        server,
    })
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = BrewtempApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let res = rt.block_on(run(opts));

    // A probe read stuck in the kernel can't be cancelled, don't wait on it forever
    rt.shutdown_timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS));
    res
}

async fn run(opts: BrewtempApplication) -> Result<(), Box<dyn Error + Send + Sync>> {
    let started = Instant::now();
    let Startup {
        target,
        registry,
        metrics,
        server,
    } = prepare(&opts).unwrap_or_else(|e| {
        tracing::error!(message = "unable to start", error = %e);
        process::exit(1)
    });

    let mode = if opts.simulate {
        SensorMode::Simulated
    } else {
        SensorMode::Auto
    };
    let (settings_tx, settings_rx) = settings::channel(Settings::new(mode));

    // Both the publish loop and the server stop on the first SIGTERM or SIGINT.
    let shutdown = async {
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }
    }
    .boxed()
    .shared();

    let context = Arc::new(RequestContext::new(registry, settings_tx));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::span!(Level::DEBUG, "brewtemp_request"))
            }))
        }
    });

    tracing::info!(
        message = "publishing readings",
        write_uri = %target.write_uri(),
        mode = %mode,
    );

    let publish_loop = SensorPublishLoop::new(
        W1Sensor::new(&opts.sensor_root),
        InfluxPublisher::new(target),
        settings_rx,
        metrics,
    )
    .with_publish_timeout(Duration::from_secs(opts.publish_timeout_secs));

    let loop_task = task::spawn(publish_loop.run(Duration::from_secs(opts.interval_secs), shutdown.clone()));

    tracing::info!(message = "server started", address = %opts.bind);
    server.serve(service).with_graceful_shutdown(shutdown).await?;
    loop_task.await?;

    tracing::info!(
        message = "server shutdown",
        runtime_secs = %started.elapsed().as_secs(),
    );

    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
