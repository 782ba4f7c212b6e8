//! # Teledrive
//!
//! Command and safety pipeline for a remotely operated two-motor vehicle.
//!
//! A network client issues short-lived directional commands. The controller
//! turns them into differential-drive actuation and, independently of the
//! command stream, halts the vehicle whenever the operator goes idle, the
//! link drops or an explicit stop is requested.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use teledrive::{Controller, SafetyConfig, SimulatedActuator, LogIndicator};
//! use teledrive::protocol::CommandKind;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = Controller::start(
//!     SafetyConfig::default(),
//!     SimulatedActuator::new(),
//!     LogIndicator,
//! )?;
//!
//! let ingress = controller.ingress();
//! ingress.touch_heartbeat();
//! ingress.enqueue(CommandKind::MoveLeftForward, 180).await?;
//!
//! println!("{:?}", controller.snapshot());
//! controller.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`ingress`] - boundary handle: bounded admission and clock touches
//! - [`processor`] - folds raw commands into per-side wheel state
//! - [`arbiter`] - owns the safety state and enforces both timeouts
//! - [`status`] - read-only display signal
//! - [`clock`] - user-activity, heartbeat and command-cadence stamps
//! - [`actuation`] - the wheel output interface
//! - [`controller`] - spawns and stops the three pipeline tasks

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]

pub mod actuation;
pub mod arbiter;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod ingress;
pub mod processor;
pub mod protocol;
pub mod status;
pub mod telemetry;

// Re-export main public types for convenience
pub use actuation::{Actuator, DriveDirection, SimulatedActuator};
pub use arbiter::{MotorArbiter, SafetyState};
pub use config::SafetyConfig;
pub use controller::Controller;
pub use error::{AdmissionError, ControllerError};
pub use ingress::CommandIngress;
pub use status::{DisplaySignal, LogIndicator, StatusSignaler};
pub use telemetry::SafetySnapshot;
