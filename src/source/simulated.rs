use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::trace;

use super::{Reading, ReadingValue, Subscriptions, ValueSource};

/// Lowest value the random walk can reach
pub const LOWER_BOUND: f64 = 20.0;
/// Highest value the random walk can reach
pub const UPPER_BOUND: f64 = 40.0;
/// Value the walk starts from
pub const INITIAL_VALUE: f64 = 30.0;
/// Default tick period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Source of uniformly distributed numbers in `[0, 1)`
pub type Jitter = Box<dyn FnMut() -> f64 + Send>;

/// One step of the random walk.
pub fn next_value(current: f64, random: f64) -> f64 {
    (current + 0.5 - random).clamp(LOWER_BOUND, UPPER_BOUND)
}

struct Walk {
    subscriptions: Subscriptions<Reading>,
    jitter: Mutex<Jitter>,
}

impl Walk {
    fn step(&self) -> Arc<Reading> {
        let random = {
            let mut jitter = self.jitter.lock().unwrap_or_else(PoisonError::into_inner);
            (jitter)()
        };

        self.subscriptions.publish_with(|previous| {
            let current = match previous.map(Reading::value) {
                Some(ReadingValue::Number(value)) => *value,
                _ => INITIAL_VALUE,
            };
            Reading::succeeding(previous, ReadingValue::Number(next_value(current, random)))
        })
    }
}

/// Simulated temperature sensor
///
/// A single timer per source advances the walk once per period and publishes
/// the result, whether or not the value moved. Every observer of the source
/// therefore sees the same sequence of values. The timer starts on
/// construction and stops when the source is dropped.
pub struct SimulatedSource {
    walk: Arc<Walk>,
    timer: Option<JoinHandle<()>>,
}

impl SimulatedSource {
    /// Starts a walk ticking every `period`. Must be called inside a tokio runtime.
    pub fn new(period: Duration) -> Self {
        Self::with_jitter(period, Box::new(rand::random::<f64>))
    }

    /// Like [`SimulatedSource::new`] with a custom random number source.
    pub fn with_jitter(period: Duration, jitter: Jitter) -> Self {
        let mut source = Self::manual(jitter);
        let walk = Arc::clone(&source.walk);

        source.timer = Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let reading = walk.step();
                trace!(value = %reading.value(), "Simulated tick");
            }
        }));

        source
    }

    /// A walk without a timer, advanced only through [`SimulatedSource::tick`].
    pub fn manual(jitter: Jitter) -> Self {
        let walk = Walk {
            subscriptions: Subscriptions::new(),
            jitter: Mutex::new(jitter),
        };
        walk.subscriptions
            .publish(Reading::succeeding(None, ReadingValue::Number(INITIAL_VALUE)));

        Self {
            walk: Arc::new(walk),
            timer: None,
        }
    }

    /// Advances the walk by one step and publishes the new reading.
    pub fn tick(&self) -> Arc<Reading> {
        self.walk.step()
    }

    /// Stops the timer. Readings stay available.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|timer| !timer.is_finished())
    }
}

impl ValueSource for SimulatedSource {
    fn subscriptions(&self) -> &Subscriptions<Reading> {
        &self.walk.subscriptions
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.stop();
    }
}
