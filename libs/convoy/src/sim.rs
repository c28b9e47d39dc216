use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    error::Error,
    geo::{EntityId, Position},
};

pub const DEFAULT_ROUTE_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_WALK_INTERVAL: Duration = Duration::from_millis(10000);
pub const DEFAULT_WALK_SPREAD: f64 = 0.01;

/// How a simulated entity moves from one tick to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Motion {
    /// Steps through `route` forever, wrapping back to the first point.
    Route { route: Vec<Position>, index: usize },
    /// Adds a uniform offset in `-spread..spread` degrees to each coordinate.
    RandomWalk { current: Position, spread: f64 },
}

impl Motion {
    pub fn route(entity: &EntityId, route: Vec<Position>) -> Result<Self, Error> {
        if route.len() < 2 {
            return Err(Error::RouteTooShort(entity.clone()));
        }
        Ok(Motion::Route { route, index: 0 })
    }

    pub fn random_walk(entity: &EntityId, start: Position, spread: f64) -> Result<Self, Error> {
        if !spread.is_finite() || spread < 0.0 {
            return Err(Error::InvalidSpread {
                entity: entity.clone(),
                spread,
            });
        }
        Ok(Motion::RandomWalk {
            current: start,
            spread,
        })
    }

    /// The position the entity occupies before the first tick.
    pub fn current(&self) -> Position {
        match self {
            Motion::Route { route, index } => route[*index],
            Motion::RandomWalk { current, .. } => *current,
        }
    }

    pub fn step(&mut self, rng: &mut fastrand::Rng) -> Position {
        match self {
            Motion::Route { route, index } => {
                *index = (*index + 1) % route.len();
                route[*index]
            }
            Motion::RandomWalk { current, spread } => {
                *current = jitter(*current, *spread, rng);
                *current
            }
        }
    }
}

pub(crate) fn jitter(from: Position, spread: f64, rng: &mut fastrand::Rng) -> Position {
    let mut offset = || (rng.f64() * 2.0 - 1.0) * spread;
    let d_lon = offset();
    let d_lat = offset();
    from.offset(d_lon, d_lat)
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Synthesises positions for one entity on a fixed cadence.
///
/// Each [`PositionSimulator::start`] runs from the initial motion state, so a
/// restarted route begins again at index 0. At most one timer is active.
pub struct PositionSimulator {
    motion: Motion,
    interval: Duration,
    seed: Option<u64>,
    timer: Option<Timer>,
}

impl PositionSimulator {
    pub fn new(motion: Motion, interval: Duration) -> Self {
        Self {
            motion,
            interval: interval.max(Duration::from_millis(1)),
            seed: None,
            timer: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn motion(&self) -> &Motion {
        &self.motion
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Spawns the tick timer, replacing any timer already running.
    ///
    /// The first tick fires one interval after the call.
    pub fn start(&mut self, tick: impl FnMut(Position) + Send + 'static) {
        self.start_with(CancellationToken::new(), tick)
    }

    /// Like [`Self::start`], stopping early once `parent` is cancelled.
    pub fn start_with(
        &mut self,
        parent: CancellationToken,
        mut tick: impl FnMut(Position) + Send + 'static,
    ) {
        self.stop();
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let mut motion = self.motion.clone();
        let mut rng = self.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                // a tick that raced with cancellation must not be delivered
                if task_cancel.is_cancelled() {
                    break;
                }
                let pos = motion.step(&mut rng);
                trace!(%pos, "simulated tick");
                tick(pos);
            }
            debug!("simulator timer stopped");
        });
        self.timer = Some(Timer { cancel, handle });
    }

    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel.cancel();
            timer.handle.abort();
        }
    }
}

impl Drop for PositionSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}
