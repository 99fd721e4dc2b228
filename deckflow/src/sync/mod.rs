//! Client-side synchronization state machine.
//!
//! Tracks one job from a client's point of view across a best-effort push
//! channel. The machine owns no timers and never reads the wall clock:
//! every method that depends on time takes `now: Instant`, so staleness
//! and reconnect behavior are testable without real waits.
//!
//! Merges are gated on the job version. A full snapshot applies whenever
//! it is newer than the held state; an incremental event applies only when
//! it is exactly one version ahead, because patching over a gap would
//! claim a version whose state the client does not actually hold. A gap
//! drops the machine into polling so the next snapshot repairs it.
//! Duplicate and out-of-order deliveries are discarded, which makes
//! applying the same event twice a no-op.

use crate::core::{DeckArtifact, EventKind, JobStatus, ProgressEvent, SlideType, StageState};
use crate::job::JobSnapshot;
use crate::pipeline::RetryPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection phase of the sync machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No connection; a reconnect is pending.
    Disconnected,
    /// Subscribe sent; waiting for the synthetic snapshot.
    Connecting,
    /// Receiving events normally.
    Live,
    /// Nominally connected but silent past the staleness window; polling
    /// the store until something fresh arrives.
    StalePolling,
}

/// What the host driving the machine should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Nothing to do.
    Idle,
    /// Poll the job store and feed the result to [`ClientSync::merge_poll`].
    Poll,
}

/// Per-job sync state for one client.
#[derive(Debug)]
pub struct ClientSync {
    phase: SyncPhase,
    staleness_window: Duration,
    reconnect: RetryPolicy,
    reconnect_attempt: u32,
    last_update: Option<Instant>,
    base: Option<JobSnapshot>,
    edits: HashMap<(SlideType, u32), Value>,
}

impl ClientSync {
    /// Creates a disconnected machine.
    #[must_use]
    pub fn new(staleness_window: Duration, reconnect: RetryPolicy) -> Self {
        Self {
            phase: SyncPhase::Disconnected,
            staleness_window,
            reconnect,
            reconnect_attempt: 0,
            last_update: None,
            base: None,
            edits: HashMap::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// The version of the held snapshot, or 0 before the first merge.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.base.as_ref().map_or(0, |s| s.version)
    }

    /// The held snapshot, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<&JobSnapshot> {
        self.base.as_ref()
    }

    /// Records that a (re)connect attempt has started.
    pub fn connect_started(&mut self) {
        if self.phase == SyncPhase::Disconnected {
            self.phase = SyncPhase::Connecting;
        }
    }

    /// Records that the connection closed. Returns the delay before the
    /// next reconnect attempt, growing exponentially on repeated failures.
    pub fn on_disconnected(&mut self, _now: Instant) -> Duration {
        self.phase = SyncPhase::Disconnected;
        let delay = self.reconnect.delay(self.reconnect_attempt);
        self.reconnect_attempt += 1;
        debug!(attempt = self.reconnect_attempt, ?delay, "connection lost; reconnect scheduled");
        delay
    }

    /// Feeds one pushed event into the machine. Returns whether the event
    /// changed the held state.
    ///
    /// In `Connecting`, receipt of the synthetic snapshot completes the
    /// handshake and moves the machine to `Live` even when the snapshot is
    /// at the version already held (a reconnect to an unchanged job). In
    /// `Live` or `StalePolling`, any event that merges proves the channel
    /// alive and (re)enters `Live`; a same-version snapshot while stale
    /// proves liveness too, mirroring [`Self::merge_poll`].
    pub fn on_event(&mut self, event: &ProgressEvent, now: Instant) -> bool {
        if self.phase == SyncPhase::Disconnected {
            return false;
        }

        let applied = match event.kind {
            EventKind::Snapshot => self.merge_snapshot_payload(event),
            _ => self.patch_from_event(event),
        };

        let proves_live = applied
            || (event.kind == EventKind::Snapshot
                && event.version == self.version()
                && matches!(
                    self.phase,
                    SyncPhase::Connecting | SyncPhase::StalePolling
                ));

        if proves_live {
            self.last_update = Some(now);
            if self.phase == SyncPhase::Connecting {
                // Handshake complete; the channel is proven good.
                self.reconnect_attempt = 0;
            }
            self.phase = SyncPhase::Live;
        }
        applied
    }

    /// Merges a polled snapshot. Returns whether it advanced the held
    /// state.
    ///
    /// A poll result at the version already held still proves liveness: it
    /// resumes `Live` from `StalePolling` without changing state.
    pub fn merge_poll(&mut self, snapshot: JobSnapshot, now: Instant) -> bool {
        let held = self.version();
        if snapshot.version > held {
            self.base = Some(snapshot);
            self.last_update = Some(now);
            if self.phase != SyncPhase::Disconnected {
                self.phase = SyncPhase::Live;
            }
            return true;
        }

        if snapshot.version == held && self.phase == SyncPhase::StalePolling {
            self.last_update = Some(now);
            self.phase = SyncPhase::Live;
        }
        false
    }

    /// Advances the staleness check. While `Live` with no event inside the
    /// staleness window, drops to `StalePolling` and asks the host to poll.
    pub fn tick(&mut self, now: Instant) -> SyncAction {
        match self.phase {
            SyncPhase::Live => {
                let stale = self
                    .last_update
                    .is_some_and(|at| now.duration_since(at) >= self.staleness_window);
                if stale {
                    warn!("no event within staleness window; falling back to polling");
                    self.phase = SyncPhase::StalePolling;
                    SyncAction::Poll
                } else {
                    SyncAction::Idle
                }
            }
            SyncPhase::StalePolling => SyncAction::Poll,
            SyncPhase::Disconnected | SyncPhase::Connecting => SyncAction::Idle,
        }
    }

    /// Records a local optimistic edit to an already-delivered slide,
    /// identified by type and deck position (a deck can hold several
    /// `Custom` slides). Returns false when no such slide is present in the
    /// synced base; a still-in-progress stage's output is not editable.
    pub fn edit_slide(&mut self, slide_type: SlideType, order: u32, content: Value) -> bool {
        let editable = self.base.as_ref().is_some_and(|s| {
            s.artifact
                .slides
                .iter()
                .any(|slide| slide.slide_type == slide_type && slide.order == order)
        });
        if editable {
            self.edits.insert((slide_type, order), content);
        }
        editable
    }

    /// The merged artifact: synced base with local edits layered on top.
    /// Edits survive newer syncs; an older sync never reaches the base at
    /// all, so it cannot clobber them either.
    #[must_use]
    pub fn view(&self) -> Option<DeckArtifact> {
        let mut artifact = self.base.as_ref()?.artifact.clone();
        for slide in &mut artifact.slides {
            if let Some(content) = self.edits.get(&(slide.slide_type, slide.order)) {
                slide.content = content.clone();
            }
        }
        Some(artifact)
    }

    fn merge_snapshot_payload(&mut self, event: &ProgressEvent) -> bool {
        if event.version <= self.version() {
            return false;
        }
        match serde_json::from_value::<JobSnapshot>(event.payload.clone()) {
            Ok(snapshot) => {
                self.base = Some(snapshot);
                true
            }
            Err(error) => {
                warn!(%error, "discarding malformed snapshot payload");
                false
            }
        }
    }

    /// Applies an incremental event to the held snapshot. Without a base
    /// (handshake not done) there is nothing to patch.
    ///
    /// The event must be exactly one version ahead: patching over a gap
    /// would claim a version whose intermediate state was never received,
    /// and every later same-version sync would then be discarded as a
    /// duplicate. On a gap the held version is kept and the machine falls
    /// back to polling, which repairs state with a full snapshot.
    fn patch_from_event(&mut self, event: &ProgressEvent) -> bool {
        if event.version <= self.version() {
            return false;
        }
        let Some(base) = self.base.as_mut() else {
            return false;
        };

        if event.version != base.version + 1 {
            warn!(
                held = base.version,
                received = event.version,
                "missed an update; falling back to polling"
            );
            if self.phase == SyncPhase::Live {
                self.phase = SyncPhase::StalePolling;
            }
            return false;
        }

        match event.kind {
            EventKind::JobCompleted => base.status = JobStatus::Completed,
            EventKind::JobFailed => base.status = JobStatus::Failed,
            // Snapshots merge via merge_snapshot_payload.
            EventKind::Snapshot => return false,
            EventKind::StageStarted
            | EventKind::StageSucceeded
            | EventKind::StageRetrying
            | EventKind::StageFailed => {
                let Some(record) = event.stage().and_then(|name| {
                    base.stage_results
                        .iter_mut()
                        .find(|r| r.stage_name == name)
                }) else {
                    // A stage this snapshot does not know about; only a
                    // full snapshot can reconcile that.
                    if self.phase == SyncPhase::Live {
                        self.phase = SyncPhase::StalePolling;
                    }
                    return false;
                };

                match event.kind {
                    EventKind::StageStarted => record.state = StageState::Running,
                    EventKind::StageSucceeded => {
                        record.state = StageState::Succeeded;
                        record.error = None;
                        if let Some(attempts) = payload_u32(&event.payload, "attempts") {
                            record.attempts = attempts;
                        }
                        record.output_ref = payload_str(&event.payload, "outputRef");
                    }
                    EventKind::StageRetrying => {
                        record.state = StageState::Retrying;
                        if let Some(attempt) = payload_u32(&event.payload, "attempt") {
                            record.attempts = attempt;
                        }
                        record.error = payload_str(&event.payload, "error");
                    }
                    _ => {
                        record.state = StageState::Failed;
                        record.error = payload_str(&event.payload, "error");
                    }
                }
            }
        }

        base.version = event.version;
        base.recompute_progress();
        true
    }
}

fn payload_str(payload: &Value, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn payload_u32(payload: &Value, key: &str) -> Option<u32> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
