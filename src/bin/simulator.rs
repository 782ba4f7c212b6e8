use clap::{App, Arg};
use std::sync::Arc;
use std::time::Duration;
use teledrive::protocol::{Request, RequestCodec, Response};
use teledrive::telemetry::TelemetryCollector;
use teledrive::{CommandIngress, Controller, LogIndicator, SafetyConfig, SimulatedActuator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_PORT: &str = "8080";
const TELEMETRY_BROADCAST_BUFFER_SIZE: usize = 64;
const TELEMETRY_PERIOD_MS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("teledrive-simulator")
        .version("0.1.0")
        .about("Teleoperated vehicle controller with a simulated dual H-bridge")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for JSON-lines clients")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON file with safety configuration overrides")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("auto-stop-ms")
                .long("auto-stop-ms")
                .value_name("MS")
                .help("Idle operator stop timeout")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("heartbeat-ms")
                .long("heartbeat-ms")
                .value_name("MS")
                .help("Link loss timeout")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => SafetyConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SafetyConfig::default(),
    };
    if let Some(ms) = matches.value_of("auto-stop-ms") {
        config.auto_stop_timeout_ms = ms.parse()?;
    }
    if let Some(ms) = matches.value_of("heartbeat-ms") {
        config.heartbeat_timeout_ms = ms.parse()?;
    }
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    let actuator = SimulatedActuator::new();
    let controller = Arc::new(Mutex::new(Some(Controller::start(
        config,
        actuator.clone(),
        LogIndicator,
    )?)));
    let ingress = match controller.lock().await.as_ref() {
        Some(controller) => controller.ingress(),
        None => return Ok(()),
    };

    let (telemetry_tx, _) = broadcast::channel(TELEMETRY_BROADCAST_BUFFER_SIZE);

    let tcp_controller = Arc::clone(&controller);
    let tcp_telemetry_tx = telemetry_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, ingress, tcp_controller, tcp_telemetry_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut collector = TelemetryCollector::new();
    let mut interval = time::interval(Duration::from_millis(TELEMETRY_PERIOD_MS));
    let started = time::Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = match controller.lock().await.as_ref() {
                    Some(controller) => controller.snapshot(),
                    None => break,
                };
                let frame = collector.collect(snapshot, started.elapsed().as_millis() as u64);
                match TelemetryCollector::serialize(&frame) {
                    Ok(telemetry) => {
                        // No subscribers is not an error.
                        let _ = telemetry_tx.send(telemetry.clone());
                        info!(
                            left = ?actuator.channel(teledrive::protocol::Side::Left),
                            right = ?actuator.channel(teledrive::protocol::Side::Right),
                            "TELEMETRY: {}", telemetry
                        );
                    }
                    Err(e) => warn!("Failed to serialize telemetry: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    tcp_server.abort();
    if let Some(controller) = controller.lock().await.take() {
        let report = controller.shutdown().await?;
        info!(?report, "Controller stopped");
    }

    Ok(())
}

async fn start_tcp_server(
    port: u16,
    ingress: CommandIngress,
    controller: Arc<Mutex<Option<Controller>>>,
    telemetry_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New client connected: {}", addr);
                let client_ingress = ingress.clone();
                let client_controller = Arc::clone(&controller);
                let client_telemetry_rx = telemetry_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) =
                        handle_client(stream, client_ingress, client_controller, client_telemetry_rx).await
                    {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    ingress: CommandIngress,
    controller: Arc<Mutex<Option<Controller>>>,
    mut telemetry_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let telemetry_writer = Arc::clone(&writer);
    let telemetry_task = tokio::spawn(async move {
        while let Ok(telemetry) = telemetry_rx.recv().await {
            let mut writer_guard = telemetry_writer.lock().await;
            if let Err(e) = writer_guard.write_all(telemetry.as_bytes()).await {
                warn!("Failed to send telemetry: {}", e);
                break;
            }
            if let Err(e) = writer_guard.write_all(b"\n").await {
                warn!("Failed to send telemetry newline: {}", e);
                break;
            }
        }
    });

    let mut codec = RequestCodec::new();
    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }

                let response = match codec.parse_request(&line) {
                    Ok(request) => handle_request(request, &ingress, &controller).await,
                    Err(e) => {
                        warn!("Failed to parse request: {}", e);
                        Response::parse_error(e)
                    }
                };

                let response_json = RequestCodec::encode_response(&response)?;
                let mut writer_guard = writer.lock().await;
                writer_guard.write_all(response_json.as_bytes()).await?;
                writer_guard.write_all(b"\n").await?;
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    telemetry_task.abort();
    Ok(())
}

async fn handle_request(
    request: Request,
    ingress: &CommandIngress,
    controller: &Arc<Mutex<Option<Controller>>>,
) -> Response {
    match request {
        Request::Command { kind, speed } => match ingress.enqueue(kind, speed).await {
            Ok(()) => Response::accepted(),
            Err(e) => Response::rejected(e),
        },
        Request::Heartbeat => {
            ingress.touch_heartbeat();
            Response::accepted()
        }
        Request::Activity => {
            ingress.touch_user_activity();
            Response::accepted()
        }
        Request::Disconnect => {
            ingress.set_connected(false);
            Response::accepted()
        }
        Request::Status => match controller.lock().await.as_ref() {
            Some(controller) => Response::status(controller.snapshot()),
            None => Response::rejected(teledrive::AdmissionError::Closed),
        },
    }
}
