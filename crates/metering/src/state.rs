use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Exposure scalars shared between the frame loop and the readback path.
///
/// `target` is written only by the aggregator, `current` only by the
/// controller. Each is a single `f32` stored as its bit pattern, so a reader
/// always sees some complete value that was actually written.
#[derive(Debug)]
pub struct SharedExposure {
    target: AtomicU32,
    current: AtomicU32,
    detached: AtomicBool,
}

impl SharedExposure {
    /// Both exposures start at zero, attached.
    pub fn new() -> Self {
        Self {
            target: AtomicU32::new(0.0f32.to_bits()),
            current: AtomicU32::new(0.0f32.to_bits()),
            detached: AtomicBool::new(false),
        }
    }

    /// Latest target exposure stored by the aggregator.
    pub fn target(&self) -> f32 {
        f32::from_bits(self.target.load(Ordering::Acquire))
    }

    /// Smoothed exposure as of the last controller step.
    pub fn current(&self) -> f32 {
        f32::from_bits(self.current.load(Ordering::Acquire))
    }

    /// Stores a new target. Non-finite values are dropped so the finite
    /// invariant holds no matter what the GPU produced.
    pub fn store_target(&self, value: f32) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.target.store(value.to_bits(), Ordering::Release);
        true
    }

    pub(crate) fn store_current(&self, value: f32) {
        if value.is_finite() {
            self.current.store(value.to_bits(), Ordering::Release);
        }
    }

    /// Marks the owning feature as torn down. Late readbacks check this
    /// before writing.
    pub fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Whether [`detach`](Self::detach) has been called.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

impl Default for SharedExposure {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the smoothed exposure for host UI or diagnostics.
#[derive(Debug, Clone)]
pub struct ExposureReader {
    shared: Arc<SharedExposure>,
}

impl ExposureReader {
    /// Smoothed exposure the tone-map pass is using.
    pub fn current(&self) -> f32 {
        self.shared.current()
    }

    /// Exposure the controller is moving toward.
    pub fn target(&self) -> f32 {
        self.shared.target()
    }

    /// True once the owning feature has been disposed.
    pub fn is_detached(&self) -> bool {
        self.shared.is_detached()
    }
}

/// Persistent exposure state for one feature instance.
///
/// Created zeroed when the feature activates. The frame loop owns it and is
/// the only writer of everything except the target, which arrives through
/// [`SharedExposure`].
#[derive(Debug)]
pub struct ExposureState {
    pub(crate) shared: Arc<SharedExposure>,
    pub(crate) last_update: Instant,
    pub(crate) frame_skip_counter: u32,
}

impl ExposureState {
    /// Zeroed state whose first controller step measures time from `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            shared: Arc::new(SharedExposure::new()),
            last_update: now,
            frame_skip_counter: 0,
        }
    }

    /// Target exposure from the shared cell.
    pub fn target_exposure(&self) -> f32 {
        self.shared.target()
    }

    /// Current smoothed exposure from the shared cell.
    pub fn current_exposure(&self) -> f32 {
        self.shared.current()
    }

    /// When the controller last advanced.
    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Frames since the last reduction dispatch, counting the dispatch frame.
    pub fn frame_skip_counter(&self) -> u32 {
        self.frame_skip_counter
    }

    /// The cell shared with the aggregator and readers.
    pub fn shared(&self) -> &Arc<SharedExposure> {
        &self.shared
    }

    pub(crate) fn downgrade(&self) -> Weak<SharedExposure> {
        Arc::downgrade(&self.shared)
    }

    /// A cloneable read-only handle on the shared exposure.
    pub fn reader(&self) -> ExposureReader {
        ExposureReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Forces both exposures to `value`, e.g. to seed from a previous session.
    pub fn reset(&mut self, value: f32, now: Instant) {
        if self.shared.store_target(value) {
            self.shared.store_current(value);
        }
        self.last_update = now;
        self.frame_skip_counter = 0;
    }
}
