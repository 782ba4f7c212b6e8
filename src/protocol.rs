use crate::error::{AdmissionError, ProtocolError};
use crate::telemetry::SafetySnapshot;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

pub const MAX_REQUEST_SIZE: usize = 512;

pub type RequestBuffer = ArrayString<MAX_REQUEST_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    MoveLeftForward,
    MoveLeftBackward,
    StopLeft,
    MoveRightForward,
    MoveRightBackward,
    StopRight,
    EmergencyStop,
    LockOn,
    LockOff,
}

impl CommandKind {
    /// Commands that set a wheel in motion and therefore carry a speed.
    pub fn is_motion(self) -> bool {
        matches!(
            self,
            CommandKind::MoveLeftForward
                | CommandKind::MoveLeftBackward
                | CommandKind::MoveRightForward
                | CommandKind::MoveRightBackward
        )
    }

    pub fn side(self) -> Option<Side> {
        match self {
            CommandKind::MoveLeftForward | CommandKind::MoveLeftBackward | CommandKind::StopLeft => {
                Some(Side::Left)
            }
            CommandKind::MoveRightForward
            | CommandKind::MoveRightBackward
            | CommandKind::StopRight => Some(Side::Right),
            CommandKind::EmergencyStop | CommandKind::LockOn | CommandKind::LockOff => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WheelState {
    #[default]
    Idle,
    Forward,
    Backward,
}

impl WheelState {
    pub fn is_moving(self) -> bool {
        self != WheelState::Idle
    }
}

/// A normalized command as admitted by the ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCommand {
    pub kind: CommandKind,
    pub speed: u8,
}

impl RawCommand {
    /// Validates the wire speed for `kind`.
    ///
    /// Motion commands need a speed in `1..=255`. Every other command accepts
    /// any speed up to 255 and is normalized to 0.
    pub fn new(kind: CommandKind, speed: u32) -> Result<Self, AdmissionError> {
        let valid = if kind.is_motion() {
            (1..=u32::from(u8::MAX)).contains(&speed)
        } else {
            speed <= u32::from(u8::MAX)
        };
        if !valid {
            return Err(AdmissionError::InvalidSpeed { kind, speed });
        }

        let speed = if kind.is_motion() { speed as u8 } else { 0 };
        Ok(Self { kind, speed })
    }
}

/// Fully resolved actuation target handed from the processor to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedCommand {
    pub left: WheelState,
    pub right: WheelState,
    pub speed: u8,
    pub lock_mode: bool,
    /// Arbiter forced-stop count the processor had seen when it built this
    /// target. The arbiter refuses targets built before its latest stop.
    pub forced_stops: u32,
}

impl ProcessedCommand {
    pub fn wheel(&self, side: Side) -> WheelState {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

// Wire protocol: one JSON object per line.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Command {
        kind: CommandKind,
        #[serde(default)]
        speed: u32,
    },
    Heartbeat,
    Activity,
    Disconnect,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Accepted,
    Rejected,
    Status,
    ParseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SafetySnapshot>,
}

impl Response {
    pub fn accepted() -> Self {
        Self {
            status: ResponseStatus::Accepted,
            message: None,
            snapshot: None,
        }
    }

    pub fn rejected(error: AdmissionError) -> Self {
        Self {
            status: ResponseStatus::Rejected,
            message: Some(error.to_string()),
            snapshot: None,
        }
    }

    pub fn status(snapshot: SafetySnapshot) -> Self {
        Self {
            status: ResponseStatus::Status,
            message: None,
            snapshot: Some(snapshot),
        }
    }

    pub fn parse_error(error: ProtocolError) -> Self {
        Self {
            status: ResponseStatus::ParseError,
            message: Some(error.to_string()),
            snapshot: None,
        }
    }
}

/// Line codec with a preallocated, bounded request frame.
#[derive(Debug, Default)]
pub struct RequestCodec {
    request_buffer: RequestBuffer,
}

impl RequestCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_request(&mut self, line: &str) -> Result<Request, ProtocolError> {
        self.request_buffer.clear();
        self.request_buffer
            .try_push_str(line.trim())
            .map_err(|_| ProtocolError::MessageTooLarge)?;

        serde_json::from_str::<Request>(&self.request_buffer).map_err(|_| ProtocolError::InvalidJson)
    }

    pub fn encode_response(response: &Response) -> Result<String, ProtocolError> {
        serde_json::to_string(response).map_err(|_| ProtocolError::SerializationError)
    }

    pub fn encode_request(request: &Request) -> Result<String, ProtocolError> {
        serde_json::to_string(request).map_err(|_| ProtocolError::SerializationError)
    }
}
