//! Session player
//!
//! Drives a [`ReplaySchedule`] from a ~1 ms ticker and hands due frames to
//! a [`FrameSink`]. Rejected operations are logged and returned; they never
//! disturb playback.

use mocap_core::replay::{DeliveryMode, PlaybackState, ReplaySchedule};
use mocap_core::{ReplayError, Session};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RouterError;
use crate::periodic::spawn_periodic;
use crate::sink::FrameSink;

/// Default tick period
pub const DEFAULT_TICK: Duration = Duration::from_millis(1);

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// Replays a session in real time
pub struct SessionPlayer {
    schedule: Arc<Mutex<ReplaySchedule>>,
    sink: Arc<dyn FrameSink>,
    tick: Duration,
    /// Cancels the running tick task
    ticker: Mutex<Option<CancellationToken>>,
}

impl SessionPlayer {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self::build(sink, DeliveryMode::default(), DEFAULT_TICK)
    }

    /// Custom delivery mode and tick period. The tick must be non-zero.
    pub fn with_options(
        sink: Arc<dyn FrameSink>,
        mode: DeliveryMode,
        tick: Duration,
    ) -> crate::Result<Self> {
        if tick.is_zero() {
            return Err(RouterError::Config(
                "replay tick must be greater than zero".to_string(),
            ));
        }
        Ok(Self::build(sink, mode, tick))
    }

    fn build(sink: Arc<dyn FrameSink>, mode: DeliveryMode, tick: Duration) -> Self {
        Self {
            schedule: Arc::new(Mutex::new(ReplaySchedule::with_mode(mode))),
            sink,
            tick,
            ticker: Mutex::new(None),
        }
    }

    /// Load a session, stopping any current playback
    pub fn load(&self, session: Session) -> Result<(), ReplayError> {
        let name = session.name.clone();
        let frames = session.frames.len();

        let duration = {
            let mut schedule = self.schedule.lock();
            schedule.load(session).map_err(|e| {
                warn!("Cannot load session: {}", e);
                e
            })?;
            schedule.duration()
        };
        self.stop_ticker();

        info!("Loaded session '{}': {} frames over {} ms", name, frames, duration);
        Ok(())
    }

    /// Load a session from a JSON file
    pub async fn load_file(&self, path: impl AsRef<Path>) -> crate::Result<()> {
        let path = path.as_ref();
        let data = tokio::fs::read_to_string(path).await?;
        let session = Session::from_json(&data)?;
        debug!("Read session file {}", path.display());
        self.load(session)?;
        Ok(())
    }

    /// Start or resume playback
    pub fn play(&self) -> Result<(), ReplayError> {
        self.schedule
            .lock()
            .play(now())
            .map_err(|e| {
                warn!("Cannot play: {}", e);
                e
            })?;
        self.start_ticker();
        Ok(())
    }

    /// Freeze playback at the current position
    pub fn pause(&self) {
        self.stop_ticker();
        self.schedule.lock().pause();
        debug!("Playback paused at {} ms", self.position());
    }

    /// Freeze playback and rewind to the start
    pub fn stop(&self) {
        self.stop_ticker();
        self.schedule.lock().stop();
        debug!("Playback stopped");
    }

    /// Move the playback position
    pub fn jump(&self, millis: u64) -> Result<(), ReplayError> {
        self.schedule
            .lock()
            .jump(millis)
            .map_err(|e| {
                warn!("Cannot jump: {}", e);
                e
            })
    }

    pub fn state(&self) -> PlaybackState {
        self.schedule.lock().state()
    }

    /// Current position in milliseconds
    pub fn position(&self) -> u64 {
        self.schedule.lock().position()
    }

    /// Session span in milliseconds
    pub fn duration(&self) -> u64 {
        self.schedule.lock().duration()
    }

    fn start_ticker(&self) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let schedule = self.schedule.clone();
        let sink = self.sink.clone();
        spawn_periodic(self.tick, cancel.clone(), move || {
            let due = schedule.lock().tick(now());
            for frame in due {
                sink.deliver(frame);
            }
        });

        *ticker = Some(cancel);
    }

    fn stop_ticker(&self) {
        if let Some(cancel) = self.ticker.lock().take() {
            cancel.cancel();
        }
    }
}

impl Drop for SessionPlayer {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
