//! Pipeline wiring.
//!
//! [`Controller::start`] builds both bounded queues and the state channel,
//! then spawns the command processor, the motor arbiter and the status
//! signaler on the current tokio runtime.

use crate::actuation::Actuator;
use crate::arbiter::{ArbiterStats, MotorArbiter, PublishedState};
use crate::clock::SafetyClocks;
use crate::config::SafetyConfig;
use crate::error::ControllerError;
use crate::ingress::CommandIngress;
use crate::processor::{CommandProcessor, ProcessorStats};
use crate::protocol::{ProcessedCommand, RawCommand};
use crate::status::{StatusIndicator, StatusSignaler};
use crate::telemetry::SafetySnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// State shared by every pipeline task.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub config: SafetyConfig,
    pub clocks: Arc<SafetyClocks>,
    running: Arc<AtomicBool>,
}

impl PipelineContext {
    pub fn new(config: SafetyConfig, clocks: Arc<SafetyClocks>) -> Self {
        Self {
            config,
            clocks,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownReport {
    pub processor: ProcessorStats,
    pub arbiter: ArbiterStats,
}

#[derive(Debug)]
pub struct Controller {
    context: PipelineContext,
    ingress: CommandIngress,
    published: watch::Receiver<PublishedState>,
    processor_task: Option<JoinHandle<ProcessorStats>>,
    arbiter_task: Option<JoinHandle<ArbiterStats>>,
    status_task: Option<JoinHandle<()>>,
}

impl Controller {
    /// Validates `config` and spawns the pipeline. Nothing is spawned when
    /// a safety channel cannot be built from the configuration.
    pub fn start<A, I>(config: SafetyConfig, actuator: A, indicator: I) -> Result<Self, ControllerError>
    where
        A: Actuator + Send + 'static,
        I: StatusIndicator + Send + 'static,
    {
        config.validate()?;

        let clocks = Arc::new(SafetyClocks::new());
        let context = PipelineContext::new(config, Arc::clone(&clocks));

        let (raw_tx, raw_rx) = mpsc::channel::<RawCommand>(config.raw_queue_capacity);
        let (processed_tx, processed_rx) =
            mpsc::channel::<ProcessedCommand>(config.processed_queue_capacity);

        let arbiter = MotorArbiter::new(actuator, &config);
        let (published_tx, published_rx) = watch::channel(arbiter.published());

        let processor_task = tokio::spawn(CommandProcessor::new().run(
            raw_rx,
            processed_tx,
            published_rx.clone(),
            context.clone(),
        ));
        let arbiter_task = tokio::spawn(arbiter.run(processed_rx, published_tx, context.clone()));
        let status_task = tokio::spawn(StatusSignaler::new(indicator).run(published_rx.clone(), context.clone()));

        info!(
            auto_stop_ms = config.auto_stop_timeout_ms,
            heartbeat_ms = config.heartbeat_timeout_ms,
            "controller started"
        );

        Ok(Self {
            ingress: CommandIngress::new(raw_tx, clocks, &config),
            context,
            published: published_rx,
            processor_task: Some(processor_task),
            arbiter_task: Some(arbiter_task),
            status_task: Some(status_task),
        })
    }

    pub fn ingress(&self) -> CommandIngress {
        self.ingress.clone()
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.context.config
    }

    pub fn subscribe(&self) -> watch::Receiver<PublishedState> {
        self.published.clone()
    }

    pub fn snapshot(&self) -> SafetySnapshot {
        let published = *self.published.borrow();
        let clocks = &self.context.clocks;
        SafetySnapshot::capture(&published.state, &published.stats, &clocks.read(), clocks.now_ms())
    }

    /// Stops every task and waits for them. The arbiter zeroes the outputs
    /// on its way out.
    pub async fn shutdown(mut self) -> Result<ShutdownReport, ControllerError> {
        self.context.stop();
        let mut report = ShutdownReport::default();

        if let Some(task) = self.processor_task.take() {
            report.processor = task.await?;
        }
        if let Some(task) = self.arbiter_task.take() {
            report.arbiter = task.await?;
        }
        if let Some(task) = self.status_task.take() {
            task.await?;
        }

        info!(?report, "controller stopped");
        Ok(report)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.context.stop();
    }
}
