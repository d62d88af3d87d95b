//! The sample generator.
//!
//! A [`Generator`] is either `Idle` or `Collecting`. While collecting it owns a
//! ticker task that produces one sample per interval, appends it to the local
//! log (if any) and publishes it. `start` and `stop` are idempotent, and `stop`
//! never cancels a tick that is already running: it only prevents the next one.

pub mod log;
pub mod model;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::command::{Command, CommandMessage};
use crate::config::CommandPolicy;
use crate::mqtt::Publish;

pub use log::{CsvRecord, ReadingLog};
pub use model::{DistanceModel, FitnessModel, SampleModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Collecting,
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Identity used for addressed commands.
    pub uid: String,
    pub topic: String,
    pub interval: Duration,
    pub command_policy: CommandPolicy,
}

struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything one tick needs, shared with the ticker task.
struct Tick<M: SampleModel> {
    model: Arc<Mutex<M>>,
    publisher: Arc<dyn Publish>,
    log: Option<Arc<ReadingLog<M::Sample>>>,
    topic: String,
}

impl<M: SampleModel> Clone for Tick<M> {
    fn clone(&self) -> Self {
        Tick {
            model: self.model.clone(),
            publisher: self.publisher.clone(),
            log: self.log.clone(),
            topic: self.topic.clone(),
        }
    }
}

impl<M: SampleModel> Tick<M> {
    async fn run(&self) {
        let sample = self.model.lock().await.next_sample(Utc::now());

        if let Some(log) = &self.log {
            if let Err(e) = log.append(&sample).await {
                error!("{} ({})", e, log.path().display());
            }
        }

        let payload = match serde_json::to_vec(&sample) {
            Ok(payload) => payload,
            Err(e) => {
                error!("cannot serialize sample: {}", e);
                return;
            }
        };

        match self.publisher.publish(&self.topic, payload).await {
            Ok(()) => debug!("Sent: {:?}", sample),
            Err(e) => error!("Publish error: {}", e),
        }
    }
}

pub struct Generator<M: SampleModel> {
    options: GeneratorOptions,
    tick: Tick<M>,
    ticker: Option<Ticker>,
}

impl<M: SampleModel> Generator<M> {
    pub fn new(
        options: GeneratorOptions,
        model: M,
        publisher: Arc<dyn Publish>,
        log: Option<ReadingLog<M::Sample>>,
    ) -> Self {
        let tick = Tick {
            model: Arc::new(Mutex::new(model)),
            publisher,
            log: log.map(Arc::new),
            topic: options.topic.clone(),
        };
        Generator {
            options,
            tick,
            ticker: None,
        }
    }

    /// `Idle` also when the ticker task has died.
    pub fn mode(&self) -> Mode {
        match &self.ticker {
            Some(ticker) if !ticker.handle.is_finished() => Mode::Collecting,
            _ => Mode::Idle,
        }
    }

    pub fn uid(&self) -> &str {
        &self.options.uid
    }

    /// Begins ticking. Returns false if already collecting.
    pub fn start(&mut self) -> bool {
        if self.ticker.as_ref().is_some_and(|t| t.handle.is_finished()) {
            self.ticker = None;
        }
        if self.ticker.is_some() {
            debug!("Already collecting, ignoring start");
            return false;
        }

        info!(
            "Starting publisher interval ({:?}) on {}",
            self.options.interval, self.options.topic
        );

        let (stop, mut stopped) = oneshot::channel();
        let tick = self.tick.clone();
        let period = self.options.interval;
        // first sample after one full period, like setInterval
        let first = Instant::now() + period;

        let ticking = tokio::spawn(async move {
            tick.model.lock().await.on_start();

            let mut interval = interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = interval.tick() => {}
                }
                tick.run().await;
            }
        });
        let handle = tokio::spawn(async move {
            if let Err(e) = ticking.await {
                error!("Generator task ended abnormally, publishing has stopped: {}", e);
            }
        });

        self.ticker = Some(Ticker { stop, handle });
        true
    }

    /// Stops ticking. Returns false if already idle.
    pub fn stop(&mut self) -> bool {
        match self.ticker.take() {
            Some(ticker) => {
                // the task exits on its own; a running tick is left to finish
                let _ = ticker.stop.send(());
                info!("Publishing stopped");
                true
            }
            None => {
                debug!("Already idle, ignoring stop");
                false
            }
        }
    }

    /// Applies a control message addressed to this generator.
    pub fn handle_command(&mut self, message: &CommandMessage) -> Mode {
        if !message.is_for(&self.options.uid, self.options.command_policy) {
            debug!("Ignoring command {} not addressed to {}", message, self.options.uid);
            return self.mode();
        }

        info!("Received command: {}", message);
        match message.command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
        };
        self.mode()
    }

    /// Stops ticking and waits for the last tick to finish.
    pub async fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.stop.send(());
            if let Err(e) = ticker.handle.await {
                error!("generator task failed: {:?}", e);
            }
        }
    }
}

impl<M: SampleModel> Drop for Generator<M> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.stop.send(());
        }
    }
}
