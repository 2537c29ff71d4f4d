//! Session replay scheduling
//!
//! Reproduces the recorded relative timing of a [`Session`].
//! The schedule is a pure state machine: callers feed it wall-clock
//! instants (usually from a ~1 ms ticker) and get back the frames that
//! became due.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use mocap_core::{Frame, Session};
//! use mocap_core::replay::ReplaySchedule;
//!
//! let session = Session::new("take", vec![
//!     Frame::new("kinect", "k", 0),
//!     Frame::new("kinect", "k", 10),
//! ]);
//!
//! let mut schedule = ReplaySchedule::new();
//! schedule.load(session).unwrap();
//!
//! let t0 = Instant::now();
//! schedule.play(t0).unwrap();
//! assert_eq!(schedule.tick(t0).len(), 1);
//! assert_eq!(schedule.tick(t0 + Duration::from_millis(10)).len(), 1);
//! ```

use std::time::Instant;

use crate::{Frame, ReplayError, Session};

/// State of session playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing playing. A session may still be resident after a stop.
    Idle,
    /// Session loaded and grouped, not started
    Loaded,
    /// Advancing with the wall clock
    Playing,
    /// Frozen at the current position
    Paused,
}

/// Which frames a tick delivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every group whose timestamp was passed since the previous delivery.
    /// Ticks coarser than 1 ms never skip frames.
    #[default]
    CatchUp,
    /// Only the group whose timestamp equals the current millisecond.
    /// Groups that fall between two ticks are skipped.
    Exact,
}

/// Frames recorded at the same elapsed millisecond, in recorded order
#[derive(Debug, Clone)]
struct FrameGroup {
    key: u64,
    frames: Vec<Frame>,
}

/// Replay state machine for one session
#[derive(Debug, Clone)]
pub struct ReplaySchedule {
    session: Option<Session>,
    groups: Vec<FrameGroup>,
    start: u64,
    end: u64,
    /// Playback position in milliseconds
    position_ms: u64,
    /// Sub-millisecond remainder of the elapsed time, below 1000
    carry_us: u64,
    /// Lowest timestamp not yet delivered in the current pass (catch-up mode)
    cursor: u64,
    /// Last timestamp delivered (exact mode)
    last_delivered: Option<u64>,
    /// Wall-clock baseline of the previous tick; `None` while not playing
    last_tick: Option<Instant>,
    state: PlaybackState,
    mode: DeliveryMode,
}

impl Default for ReplaySchedule {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplaySchedule {
    pub fn new() -> Self {
        Self::with_mode(DeliveryMode::default())
    }

    pub fn with_mode(mode: DeliveryMode) -> Self {
        Self {
            session: None,
            groups: Vec::new(),
            start: 0,
            end: 0,
            position_ms: 0,
            carry_us: 0,
            cursor: 0,
            last_delivered: None,
            last_tick: None,
            state: PlaybackState::Idle,
            mode,
        }
    }

    /// Load a session, replacing (and stopping) the current one.
    ///
    /// Empty sessions are rejected without touching the current state.
    pub fn load(&mut self, session: Session) -> Result<(), ReplayError> {
        if session.is_empty() {
            return Err(ReplayError::EmptySession(session.name));
        }

        self.stop();
        self.session = Some(session);
        self.derive_groups();
        self.state = PlaybackState::Loaded;
        Ok(())
    }

    /// Start or resume playback
    pub fn play(&mut self, now: Instant) -> Result<(), ReplayError> {
        match self.state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused | PlaybackState::Loaded => {}
            PlaybackState::Idle => {
                if self.session.is_none() {
                    return Err(ReplayError::NoSession);
                }
                self.derive_groups();
            }
        }

        self.last_tick = Some(now);
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Freeze playback at the current position
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.last_tick = None;
            self.state = PlaybackState::Paused;
        }
    }

    /// Freeze playback and rewind to the session start
    pub fn stop(&mut self) {
        self.last_tick = None;
        self.rewind_to(self.start);
        self.state = PlaybackState::Idle;
    }

    /// Move the playback position without touching the wall-clock baseline
    pub fn jump(&mut self, millis: u64) -> Result<(), ReplayError> {
        if self.session.is_none() {
            return Err(ReplayError::NoSession);
        }
        if millis < self.start || millis > self.end {
            return Err(ReplayError::JumpOutOfRange {
                requested: millis,
                start: self.start,
                end: self.end,
            });
        }

        self.rewind_to(millis);
        Ok(())
    }

    /// Advance by the wall-clock time since the previous tick and return the
    /// frames that became due, in timestamp order and recorded order within
    /// a timestamp.
    pub fn tick(&mut self, now: Instant) -> Vec<Frame> {
        if self.state != PlaybackState::Playing {
            return Vec::new();
        }

        let last = self.last_tick.replace(now).unwrap_or(now);
        let delta = now.saturating_duration_since(last);
        let elapsed_us = u128::from(self.carry_us) + delta.as_micros();
        let whole_ms = u64::try_from(elapsed_us / 1000).unwrap_or(u64::MAX);
        self.position_ms = self.position_ms.saturating_add(whole_ms);
        self.carry_us = (elapsed_us % 1000) as u64;

        let mut due = Vec::new();
        match self.mode {
            DeliveryMode::CatchUp => {
                if self.position() > self.end {
                    self.collect_range(self.cursor, self.end, &mut due);
                    self.rewind_to(self.start);
                }
                let position = self.position();
                self.collect_range(self.cursor, position, &mut due);
                match position.checked_add(1) {
                    Some(next) => self.cursor = next,
                    // nothing follows the last representable timestamp
                    None => self.rewind_to(self.start),
                }
            }
            DeliveryMode::Exact => {
                if self.position() > self.end {
                    self.rewind_to(self.start);
                }
                let position = self.position();
                if self.last_delivered != Some(position) {
                    self.collect_range(position, position, &mut due);
                    self.last_delivered = Some(position);
                }
            }
        }

        due
    }

    /// Current playback position in milliseconds
    pub fn position(&self) -> u64 {
        self.position_ms
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// First timestamp of the session
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last timestamp of the session
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Span between first and last frame
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }

    /// Number of distinct timestamps
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn derive_groups(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let mut frames = session.frames.clone();
        // stable: recorded order survives inside a timestamp
        frames.sort_by_key(|f| f.elapsed_millis);

        let mut groups: Vec<FrameGroup> = Vec::new();
        for frame in frames {
            match groups.last_mut() {
                Some(group) if group.key == frame.elapsed_millis => group.frames.push(frame),
                _ => groups.push(FrameGroup {
                    key: frame.elapsed_millis,
                    frames: vec![frame],
                }),
            }
        }

        self.start = groups.first().map(|g| g.key).unwrap_or(0);
        self.end = groups.last().map(|g| g.key).unwrap_or(0);
        self.groups = groups;
        self.rewind_to(self.start);
    }

    fn rewind_to(&mut self, millis: u64) {
        self.position_ms = millis;
        self.carry_us = 0;
        self.cursor = millis;
        self.last_delivered = None;
    }

    fn collect_range(&self, from: u64, to: u64, out: &mut Vec<Frame>) {
        if from > to {
            return;
        }
        let first = self.groups.partition_point(|g| g.key < from);
        for group in self.groups[first..].iter().take_while(|g| g.key <= to) {
            out.extend(group.frames.iter().cloned());
        }
    }
}
