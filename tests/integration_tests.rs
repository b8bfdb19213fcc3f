use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use iioflux::{
    config::HostConfig,
    metrics::PointSink,
    poll::{BuildError, PointBuilder},
    sensor::{IiodClient, SensorClient, SensorConnector},
    DeviceSpec, Error, InfluxClient, InfluxConfig, Point, Result, SensorConfig, Submitter,
};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

const CONTEXT_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<context name="network" description="fake iiod">
  <device id="iio:device0" name="ina219">
    <channel id="voltage0" type="input">
      <attribute name="raw" filename="in_voltage0_raw" />
      <attribute name="scale" filename="in_voltage0_scale" />
    </channel>
    <channel id="current0" type="input">
      <attribute name="input" filename="in_current0_input" />
    </channel>
  </device>
  <device id="iio:device1" name="bme280">
    <channel id="temp0" type="input">
      <attribute name="raw" filename="in_temp0_raw" />
    </channel>
  </device>
</context>"#;

/// Attribute the fake iiod always answers with `-EBUSY`.
const BUSY_ATTRIBUTE: &str = "READ iio:device1 INPUT temp0 raw";

/// Minimal iiod: answers TIMEOUT, PRINT and READ for `iio:device0`. Reads on
/// `iio:device1` fail with `-EBUSY`.
struct FakeIiod {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    printed: Arc<Notify>,
}

impl FakeIiod {
    /// Start the server. With `fail_first_print`, the first PRINT is answered with `-EIO`.
    async fn start(fail_first_print: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let printed = Arc::new(Notify::new());
        let failed_once = Arc::new(AtomicBool::new(!fail_first_print));

        let attributes: Arc<BTreeMap<&'static str, &'static str>> = Arc::new(BTreeMap::from([
            ("READ iio:device0 INPUT voltage0 raw", "1650"),
            ("READ iio:device0 INPUT voltage0 scale", "2"),
            ("READ iio:device0 INPUT current0 input", "125.5"),
        ]));

        {
            let connections = Arc::clone(&connections);
            let printed = Arc::clone(&printed);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let attributes = Arc::clone(&attributes);
                    let printed = Arc::clone(&printed);
                    let failed_once = Arc::clone(&failed_once);

                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut lines = BufReader::new(reader).lines();

                        while let Ok(Some(line)) = lines.next_line().await {
                            let command = line.trim_end_matches('\r');
                            let reply = if command.starts_with("TIMEOUT ") {
                                "0\n".to_string()
                            } else if command == "PRINT" {
                                if !failed_once.swap(true, Ordering::SeqCst) {
                                    "-5\n".to_string()
                                } else {
                                    printed.notify_one();
                                    format!("{}\n{}\n", CONTEXT_XML.len(), CONTEXT_XML)
                                }
                            } else if command == BUSY_ATTRIBUTE {
                                "-16\n".to_string()
                            } else if let Some(value) = attributes.get(command) {
                                format!("{}\n{}\n", value.len(), value)
                            } else {
                                "-22\n".to_string()
                            };

                            if writer.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    });
                }
            });
        }

        Self {
            addr,
            connections,
            printed,
        }
    }
}

/// What the fake InfluxDB saw.
#[derive(Clone, Default)]
struct FakeInflux {
    lines: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    authorizations: Arc<Mutex<Vec<String>>>,
    health_status: Arc<Mutex<String>>,
    reject_writes: Arc<AtomicBool>,
}

impl FakeInflux {
    async fn start(health_status: &str) -> (Self, String) {
        let state = FakeInflux::default();
        *state.health_status.lock().unwrap() = health_status.to_string();

        let app = Router::new()
            .route("/health", get(health))
            .route("/api/v2/write", post(write))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (state, url)
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

async fn health(State(state): State<FakeInflux>) -> (StatusCode, String) {
    let status = state.health_status.lock().unwrap().clone();
    let code = if status == "pass" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = format!(
        r#"{{"name":"influxdb","message":"fake","status":"{}","checks":[],"version":"v2.7.1"}}"#,
        status
    );
    (code, body)
}

async fn write(
    State(state): State<FakeInflux>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    if state.reject_writes.load(Ordering::SeqCst) {
        return StatusCode::BAD_REQUEST;
    }

    state.queries.lock().unwrap().push(query);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.authorizations.lock().unwrap().push(auth.to_string());
    }
    state
        .lines
        .lock()
        .unwrap()
        .extend(body.lines().map(str::to_string));
    StatusCode::NO_CONTENT
}

fn influx_config(url: &str) -> InfluxConfig {
    InfluxConfig::new(url, "secret-token")
        .with_org("home")
        .with_bucket("sensors")
        // only the final flush on close delivers anything
        .with_flush_interval(Duration::from_secs(3600))
}

/// Strip the trailing timestamp from a line protocol line.
fn without_timestamp(line: &str) -> &str {
    line.rsplit_once(' ').map(|(head, _)| head).unwrap_or(line)
}

#[tokio::test]
async fn test_iiod_client_reads_channel_values() {
    let iiod = FakeIiod::start(false).await;
    let client = IiodClient::connect("sensor1", &iiod.addr.to_string(), Duration::from_secs(5))
        .await
        .expect("Should connect to fake iiod");

    let context = client.refresh_attributes().await.expect("Should refresh");
    let device = context.find_device(Some("ina219"), None).expect("Should find ina219");

    // (raw + offset) * scale
    assert_eq!(device.channel("voltage0").unwrap().value(), Some(3300.0));
    assert_eq!(device.channel("current0").unwrap().value(), Some(125.5));

    // the connection is reused
    assert_ok!(client.refresh_attributes().await);
    assert_eq!(iiod.connections.load(Ordering::SeqCst), 1);
}

/// A busy attribute only costs its own device; the rest of the host is still read
/// over the same connection.
#[tokio::test]
async fn test_iiod_busy_attribute_skips_only_its_device() {
    let iiod = FakeIiod::start(false).await;
    let client = IiodClient::connect("sensor1", &iiod.addr.to_string(), Duration::from_secs(5))
        .await
        .expect("Should connect to fake iiod");

    let context = client
        .refresh_attributes()
        .await
        .expect("a busy attribute should not fail the refresh");

    let bme280 = context.find_device(Some("bme280"), None).expect("Should find bme280");
    assert_eq!(bme280.channel("temp0").unwrap().attributes.get("raw"), Some(&None));
    assert_eq!(bme280.channel("temp0").unwrap().value(), None);

    let builder = PointBuilder::new("sensor1");
    let point = builder
        .build_for(&DeviceSpec::by_name("temp0", "ina219"), &context)
        .expect("ina219 should still yield a point");
    assert_eq!(point.field("current0"), Some(125.5));
    assert_eq!(
        builder.build_for(&DeviceSpec::by_name("climate", "bme280"), &context),
        Err(BuildError::Empty {
            device: "climate".to_string(),
            host: "sensor1".to_string(),
        })
    );

    // the stream stayed in sync, so no reconnect was needed
    assert_ok!(client.refresh_attributes().await);
    assert_eq!(iiod.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_iiod_client_reconnects_after_error() {
    let iiod = FakeIiod::start(true).await;
    let client = IiodClient::connect("sensor1", &iiod.addr.to_string(), Duration::from_secs(5))
        .await
        .expect("Should connect to fake iiod");

    let err = client.refresh_attributes().await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "unexpected error: {}", err);

    assert_ok!(client.refresh_attributes().await);
    assert_eq!(iiod.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_write_buffer_flushes_on_close() {
    let (influx, url) = FakeInflux::start("pass").await;
    let client = InfluxClient::connect(influx_config(&url)).unwrap();
    let health = client.check_health().await.expect("Should be healthy");
    assert_eq!(health.version.as_deref(), Some("v2.7.1"));

    let buffer = client.write_buffer().unwrap();
    for host in ["sensor1", "sensor2"] {
        let mut point = Point::new("temp0").add_tag("host", host);
        point.add_field("voltage", 3.3);
        buffer.submit(point);
    }
    client.close().await;

    let lines = influx.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(without_timestamp(&lines[0]), "temp0,host=sensor1 voltage=3.3");
    assert_eq!(without_timestamp(&lines[1]), "temp0,host=sensor2 voltage=3.3");
    assert_eq!(buffer.stats().written(), 2);

    let query = influx.queries.lock().unwrap()[0].clone();
    assert_eq!(query.get("org").map(String::as_str), Some("home"));
    assert_eq!(query.get("bucket").map(String::as_str), Some("sensors"));
    assert_eq!(query.get("precision").map(String::as_str), Some("ns"));
    assert_eq!(
        influx.authorizations.lock().unwrap()[0],
        "Token secret-token"
    );
}

#[tokio::test]
async fn test_write_buffer_flushes_full_batches() {
    let (influx, url) = FakeInflux::start("pass").await;
    let client = InfluxClient::connect(influx_config(&url).with_batch_size(2)).unwrap();
    let buffer = client.write_buffer().unwrap();

    for i in 0..2 {
        let mut point = Point::new("m");
        point.add_field("i", i as f64);
        buffer.submit(point);
    }

    // the batch is written without waiting for the flush interval or close
    tokio::time::timeout(Duration::from_secs(5), async {
        while influx.lines().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("full batch should be flushed");

    client.close().await;
}

#[tokio::test]
async fn test_rejected_writes_are_counted_not_surfaced() {
    let (influx, url) = FakeInflux::start("pass").await;
    influx.reject_writes.store(true, Ordering::SeqCst);
    let client = InfluxClient::connect(influx_config(&url)).unwrap();
    let buffer = client.write_buffer().unwrap();

    let mut point = Point::new("m");
    point.add_field("x", 1.0);
    buffer.submit(point);
    client.close().await;

    assert_eq!(buffer.stats().written(), 0);
    assert_eq!(buffer.stats().failed(), 1);
    assert!(influx.lines().is_empty());
}

#[tokio::test]
async fn test_unhealthy_backend_aborts_startup() {
    let (_influx, url) = FakeInflux::start("fail").await;
    let sensors = SensorConfig::default();

    let err = Submitter::with_connector(&sensors, influx_config(&url), "1m", &NeverConnector)
        .await
        .err()
        .expect("startup should fail");

    match err {
        Error::Unhealthy { status } => assert_eq!(status, "fail"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_unreachable_host_aborts_startup() {
    let (_influx, url) = FakeInflux::start("pass").await;

    // bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let sensors = SensorConfig::from_yaml(&format!(
        "hosts:\n  - name: sensor1\n    remote: {}\n    devices: []\n",
        dead
    ))
    .unwrap();

    let err = Submitter::new(&sensors, influx_config(&url), "1m")
        .await
        .err()
        .expect("startup should fail");

    match err {
        Error::Connection { host, .. } => assert_eq!(host, "sensor1"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_malformed_interval_aborts_startup() {
    let (_influx, url) = FakeInflux::start("pass").await;
    let err = Submitter::with_connector(&SensorConfig::default(), influx_config(&url), "often", &NeverConnector)
        .await
        .err()
        .expect("startup should fail");
    assert!(matches!(err, Error::Interval(_)));
}

/// Points submitted in the cycle that was running when shutdown was requested reach
/// the backend before `shutdown` returns.
#[tokio::test]
async fn test_end_to_end_shutdown_flushes_final_cycle() {
    let iiod = FakeIiod::start(false).await;
    let (influx, url) = FakeInflux::start("pass").await;

    let sensors = SensorConfig::from_yaml(&format!(
        r#"
hosts:
  - name: sensor1
    remote: {}
    devices:
      - name: temp0
        match:
          name: ina219
      - name: missing
        match:
          id: iio:device7
"#,
        iiod.addr
    ))
    .unwrap();

    let submitter = Submitter::new(&sensors, influx_config(&url), "1h")
        .await
        .expect("Should start");
    assert_eq!(submitter.registry().len(), 1);

    let token = CancellationToken::new();
    {
        // cancel while the first cycle is talking to iiod
        let token = token.clone();
        let printed = Arc::clone(&iiod.printed);
        tokio::spawn(async move {
            printed.notified().await;
            token.cancel();
        });
    }

    let cycles = submitter.run(token).await;
    assert_eq!(cycles, 1);
    assert!(influx.lines().is_empty(), "nothing is flushed before shutdown");

    submitter.shutdown().await;

    let lines = influx.lines();
    assert_eq!(lines.len(), 1);
    assert!(
        lines[0].starts_with("temp0,host=sensor1 voltage0=3300,current0=125.5 "),
        "unexpected line: {}",
        lines[0]
    );
}

/// Connector for configurations without hosts.
struct NeverConnector;

#[async_trait]
impl SensorConnector for NeverConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn SensorClient>> {
        Err(Error::connection_error(&host.name, "not expected"))
    }
}
