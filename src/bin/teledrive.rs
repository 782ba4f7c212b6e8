use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::time::Duration;
use teledrive::protocol::{CommandKind, Request, RequestCodec, Response, ResponseStatus, WheelState};
use teledrive::telemetry::TelemetryFrame;
use teledrive::DisplaySignal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const DEFAULT_SPEED: &str = "128";
const RESPONSE_TIMEOUT_SECS: u64 = 5;
const KEEPALIVE_PERIOD_MS: u64 = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let speed_arg = Arg::with_name("speed")
        .short("s")
        .long("speed")
        .value_name("SPEED")
        .help("Duty cycle 1-255")
        .takes_value(true)
        .default_value(DEFAULT_SPEED)
        .validator(|v| match v.parse::<u32>() {
            Ok(speed) if (1..=255).contains(&speed) => Ok(()),
            _ => Err("Speed must be between 1 and 255".into()),
        });

    let wheel_subcommand = |name: &'static str, about: &'static str| {
        SubCommand::with_name(name)
            .about(about)
            .arg(
                Arg::with_name("direction")
                    .help("Wheel direction")
                    .required(true)
                    .possible_values(&["forward", "backward", "stop"]),
            )
            .arg(speed_arg.clone())
    };

    let matches = App::new("teledrive")
        .version("0.1.0")
        .author("Vehicle Systems Engineering Team")
        .about("Operator client for the teledrive vehicle controller")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Controller host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Controller port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(wheel_subcommand("left", "Drive the left wheel"))
        .subcommand(wheel_subcommand("right", "Drive the right wheel"))
        .subcommand(SubCommand::with_name("estop").about("Emergency stop: both wheels idle, lock released"))
        .subcommand(
            SubCommand::with_name("lock")
                .about("Suppress or restore the idle auto-stop")
                .arg(
                    Arg::with_name("state")
                        .help("Lock state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(SubCommand::with_name("heartbeat").about("Send a single link heartbeat"))
        .subcommand(SubCommand::with_name("disconnect").about("End the session and force a stop"))
        .subcommand(SubCommand::with_name("status").about("Show the controller safety snapshot"))
        .subcommand(
            SubCommand::with_name("keepalive")
                .about("Keep the operator marked active")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("How long to send activity signals")
                        .takes_value(true)
                        .default_value("10"),
                ),
        )
        .subcommand(SubCommand::with_name("monitor").about("Stream live telemetry"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    let mut client = Client::connect(host, port).await?;

    match matches.subcommand() {
        ("left", Some(sub_matches)) => {
            let kind = wheel_command(sub_matches, CommandKind::MoveLeftForward, CommandKind::MoveLeftBackward, CommandKind::StopLeft);
            let response = client.send(&command_request(kind, sub_matches)?).await?;
            print_command_result("Left wheel", &response, format);
        }
        ("right", Some(sub_matches)) => {
            let kind = wheel_command(sub_matches, CommandKind::MoveRightForward, CommandKind::MoveRightBackward, CommandKind::StopRight);
            let response = client.send(&command_request(kind, sub_matches)?).await?;
            print_command_result("Right wheel", &response, format);
        }
        ("estop", _) => {
            let request = Request::Command { kind: CommandKind::EmergencyStop, speed: 0 };
            let response = client.send(&request).await?;
            print_command_result("Emergency stop", &response, format);
        }
        ("lock", Some(sub_matches)) => {
            let kind = if sub_matches.value_of("state") == Some("on") {
                CommandKind::LockOn
            } else {
                CommandKind::LockOff
            };
            let response = client.send(&Request::Command { kind, speed: 0 }).await?;
            print_command_result("Lock", &response, format);
        }
        ("heartbeat", _) => {
            let response = client.send(&Request::Heartbeat).await?;
            print_command_result("Heartbeat", &response, format);
        }
        ("disconnect", _) => {
            let response = client.send(&Request::Disconnect).await?;
            print_command_result("Disconnect", &response, format);
        }
        ("status", _) => {
            let response = client.send(&Request::Status).await?;
            print_status(&response, format);
        }
        ("keepalive", Some(sub_matches)) => {
            let seconds = sub_matches.value_of("duration").unwrap_or("10").parse::<u64>()?;
            handle_keepalive(&mut client, seconds, format).await?;
        }
        ("monitor", _) => {
            println!("{}", "Monitoring controller telemetry (Press Ctrl+C to stop)...".bright_blue().bold());
            client.monitor(format).await?;
        }
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

struct Client {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Result<Self, Box<dyn std::error::Error>> {
        let addr = format!("{}:{}", host, port);
        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("{} Failed to connect to controller at {}", "x".red(), addr.bright_white());
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    eprintln!("{} Controller is not running. Start it with:", "!".yellow());
                    eprintln!("   {}", "cargo run --bin teledrive-simulator".bright_cyan());
                }
                return Err(e.into());
            }
        };

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Sends one request and waits for its response, skipping interleaved
    /// telemetry lines.
    async fn send(&mut self, request: &Request) -> Result<Response, Box<dyn std::error::Error>> {
        let line = RequestCodec::encode_request(request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        match tokio::time::timeout(Duration::from_secs(RESPONSE_TIMEOUT_SECS), self.read_response()).await {
            Ok(result) => result,
            Err(_) => {
                eprintln!("{} Request timed out after {} seconds", "!".yellow(), RESPONSE_TIMEOUT_SECS);
                Err("Request timeout".into())
            }
        }
    }

    async fn read_response(&mut self) -> Result<Response, Box<dyn std::error::Error>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err("Server closed connection".into());
            }
            if let Ok(response) = serde_json::from_str::<Response>(line.trim()) {
                return Ok(response);
            }
        }
    }

    async fn monitor(&mut self, format: &str) -> Result<(), Box<dyn std::error::Error>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                break;
            }

            let Ok(frame) = serde_json::from_str::<TelemetryFrame>(line.trim()) else {
                continue;
            };

            match format {
                "json" => println!("{}", line.trim()),
                "compact" => println!("#{} {}", frame.sequence_number, signal_label(frame.signal)),
                _ => {
                    let snapshot = frame.snapshot;
                    println!(
                        "| {:>8} | {} | L {} | R {} | speed {:>3} | hb {:>6} |",
                        frame.uptime_ms / 1000,
                        signal_label(frame.signal),
                        wheel_label(snapshot.left_wheel),
                        wheel_label(snapshot.right_wheel),
                        snapshot.speed,
                        age_label(snapshot.age_of_heartbeat_ms),
                    );
                }
            }
        }
        Ok(())
    }
}

async fn handle_keepalive(client: &mut Client, seconds: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut interval = tokio::time::interval(Duration::from_millis(KEEPALIVE_PERIOD_MS));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);

    while tokio::time::Instant::now() < deadline {
        interval.tick().await;
        let response = client.send(&Request::Activity).await?;
        if response.status != ResponseStatus::Accepted {
            print_command_result("Keepalive", &response, format);
            return Ok(());
        }
    }

    if format != "json" {
        println!("{} {}", "ok".green(), "Keepalive finished".bright_green());
    }
    Ok(())
}

// Helper functions

fn wheel_command(matches: &ArgMatches<'_>, forward: CommandKind, backward: CommandKind, stop: CommandKind) -> CommandKind {
    match matches.value_of("direction") {
        Some("forward") => forward,
        Some("backward") => backward,
        _ => stop,
    }
}

fn command_request(kind: CommandKind, matches: &ArgMatches<'_>) -> Result<Request, Box<dyn std::error::Error>> {
    let speed = if kind.is_motion() {
        matches.value_of("speed").unwrap_or(DEFAULT_SPEED).parse::<u32>()?
    } else {
        0
    };
    Ok(Request::Command { kind, speed })
}

fn print_command_result(action: &str, response: &Response, format: &str) {
    match format {
        "json" => {
            if let Ok(json) = RequestCodec::encode_response(response) {
                println!("{}", json);
            }
        }
        "compact" => println!("{:?}", response.status),
        _ => match response.status {
            ResponseStatus::Accepted => println!("{} {} {}", "ok".green(), action.bright_white(), "accepted".bright_green()),
            _ => println!(
                "{} {} {}: {}",
                "x".red(),
                action.bright_white(),
                "rejected".bright_red(),
                response.message.as_deref().unwrap_or("no reason given")
            ),
        },
    }
}

fn print_status(response: &Response, format: &str) {
    let Some(snapshot) = response.snapshot else {
        print_command_result("Status", response, format);
        return;
    };

    match format {
        "json" => {
            if let Ok(json) = RequestCodec::encode_response(response) {
                println!("{}", json);
            }
        }
        "compact" => println!("{}", signal_label(snapshot.display_signal())),
        _ => {
            println!("{}", "Controller Status".bright_blue().bold());
            println!("{} {}", "Signal:".bright_white(), signal_label(snapshot.display_signal()));
            println!("{} {}", "Connected:".bright_white(), snapshot.connected);
            println!("{} {}", "Locked:".bright_white(), snapshot.locked);
            println!("{} {} / {}", "Wheels (L/R):".bright_white(), wheel_label(snapshot.left_wheel), wheel_label(snapshot.right_wheel));
            println!("{} {}", "Speed:".bright_white(), snapshot.speed);
            println!("{} {}", "Activity age:".bright_white(), age_label(snapshot.age_of_user_activity_ms));
            println!("{} {}", "Heartbeat age:".bright_white(), age_label(snapshot.age_of_heartbeat_ms));
            println!("{} {}", "Last command age:".bright_white(), age_label(snapshot.age_of_last_command_ms));
            println!(
                "{} {} link loss, {} idle, {} requested",
                "Forced stops:".bright_white(),
                snapshot.stats.link_loss_stops,
                snapshot.stats.idle_stops,
                snapshot.stats.explicit_disconnects
            );
        }
    }
}

fn signal_label(signal: DisplaySignal) -> ColoredString {
    match signal {
        DisplaySignal::Disconnected => "DISCONNECTED".bright_red(),
        DisplaySignal::Locked => "LOCKED".bright_yellow(),
        DisplaySignal::Active => "ACTIVE".bright_green(),
        DisplaySignal::Idle => "IDLE".white(),
    }
}

fn wheel_label(wheel: WheelState) -> ColoredString {
    match wheel {
        WheelState::Idle => "idle".white(),
        WheelState::Forward => "fwd".bright_green(),
        WheelState::Backward => "back".bright_yellow(),
    }
}

fn age_label(age_ms: Option<u64>) -> String {
    match age_ms {
        Some(ms) => format!("{}ms", ms),
        None => "never".to_string(),
    }
}
