use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::error::SessionError;
use crate::models::analysis_types::{
    AnalysisResult, ImageHandle, SessionSnapshot, SessionState,
};
use crate::services::analysis::AnalysisEngine;

/// Pause between a high-risk result landing and the warning being raised.
pub const DEFAULT_WARNING_DELAY: Duration = Duration::from_millis(500);

#[derive(Default)]
struct SessionInner {
    image: Option<ImageHandle>,
    state: SessionState,
    result: Option<AnalysisResult>,
    warning: bool,
}

impl SessionInner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            result: self.result.clone(),
            warning: self.warning,
            can_analyze: self.image.is_some() && !self.state.is_analyzing(),
        }
    }
}

/// Owns the lifecycle of one analysis session:
/// image selection → analysis → result or failure → reset, cycling forever.
///
/// Cloneable handle over shared state; every mutation happens under one lock
/// and is published as a [`SessionSnapshot`] through a watch channel.
///
/// There is no explicit cancellation of an in-flight classifier call.
/// Instead, every request carries a generation number; superseding actions
/// (`select_image`, `reset`, a later `start_analysis`) advance the counter,
/// and an outcome whose generation no longer matches is dropped on arrival.
/// The delayed warning task re-validates the same way at fire time. The
/// generation only advances while the session lock is held, so it always
/// moves in step with the state it protects.
#[derive(Clone)]
pub struct SessionManager {
    engine: Arc<AnalysisEngine>,
    inner: Arc<Mutex<SessionInner>>,
    generation: Arc<AtomicU64>,
    warning_delay: Duration,
    updates: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionManager {
    pub fn new(engine: AnalysisEngine) -> Self {
        Self::with_warning_delay(engine, DEFAULT_WARNING_DELAY)
    }

    pub fn with_warning_delay(engine: AnalysisEngine, warning_delay: Duration) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            engine: Arc::new(engine),
            inner: Arc::new(Mutex::new(SessionInner::default())),
            generation: Arc::new(AtomicU64::new(0)),
            warning_delay,
            updates: Arc::new(updates),
        }
    }

    /// Select the image for the next analysis. Valid from any state; a
    /// selection made while analyzing disowns the in-flight request.
    /// Clears any previous result and warning and returns to `Idle`.
    pub fn select_image(&self, image: ImageHandle) {
        let snapshot = {
            let mut s = self.inner.lock().unwrap();
            let generation = self.advance_generation();
            s.image = Some(image);
            s.state = SessionState::Idle;
            s.result = None;
            s.warning = false;
            debug!("image selected, session back to idle (generation {generation})");
            s.snapshot()
        };
        self.updates.send_replace(snapshot);
    }

    /// Run one analysis on the selected image.
    ///
    /// A call while an analysis is already in flight is a no-op — the
    /// exclusion lives here, not in whatever UI sits on top. With no image
    /// selected the session moves to `Failed` and the precondition error is
    /// returned without touching the classifier. Classifier failures are not
    /// returned: they surface as the `Failed` state.
    pub async fn start_analysis(&self) -> Result<(), SessionError> {
        let (image, generation) = {
            let mut s = self.inner.lock().unwrap();
            if s.state.is_analyzing() {
                debug!("start_analysis ignored: analysis already in flight");
                return Ok(());
            }
            let Some(image) = s.image.clone() else {
                let err = SessionError::NoImageSelected;
                s.state = SessionState::Failed(err.to_string());
                s.result = None;
                s.warning = false;
                let snapshot = s.snapshot();
                drop(s);
                self.updates.send_replace(snapshot);
                return Err(err);
            };
            let generation = self.advance_generation();
            s.state = SessionState::Analyzing;
            s.result = None;
            s.warning = false;
            let snapshot = s.snapshot();
            drop(s);
            self.updates.send_replace(snapshot);
            (image, generation)
        };
        info!("analysis started (generation {generation})");

        let outcome = self.engine.execute(image).await;

        let (snapshot, schedule_warning) = {
            let mut s = self.inner.lock().unwrap();
            if generation != self.generation.load(Ordering::Relaxed) {
                debug!("dropping superseded analysis outcome (generation {generation})");
                return Ok(());
            }
            let mut schedule_warning = false;
            match outcome {
                Ok(result) => {
                    schedule_warning = result.needs_secondary_checkup();
                    s.state = SessionState::Succeeded;
                    s.result = Some(result);
                }
                Err(err) => {
                    warn!("analysis failed: {err}");
                    s.state = SessionState::Failed(err.to_string());
                    s.result = None;
                    s.warning = false;
                }
            }
            (s.snapshot(), schedule_warning)
        };
        self.updates.send_replace(snapshot);

        if schedule_warning {
            self.schedule_warning(generation);
        }
        Ok(())
    }

    /// Drop everything and return to `Idle`. Idempotent; also disowns any
    /// in-flight request or pending warning.
    pub fn reset(&self) {
        let snapshot = {
            let mut s = self.inner.lock().unwrap();
            let generation = self.advance_generation();
            *s = SessionInner::default();
            debug!("session reset (generation {generation})");
            s.snapshot()
        };
        self.updates.send_replace(snapshot);
    }

    /// Lower the secondary-checkup warning. Leaves the session state alone.
    pub fn dismiss_warning(&self) {
        let snapshot = {
            let mut s = self.inner.lock().unwrap();
            if !s.warning {
                return;
            }
            s.warning = false;
            s.snapshot()
        };
        self.updates.send_replace(snapshot);
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn result(&self) -> Option<AnalysisResult> {
        self.inner.lock().unwrap().result.clone()
    }

    pub fn warning_flag(&self) -> bool {
        self.inner.lock().unwrap().warning
    }

    pub fn selected_image(&self) -> Option<ImageHandle> {
        self.inner.lock().unwrap().image.clone()
    }

    pub fn is_analyzing(&self) -> bool {
        self.inner.lock().unwrap().state.is_analyzing()
    }

    pub fn has_result(&self) -> bool {
        self.inner.lock().unwrap().result.is_some()
    }

    pub fn can_analyze(&self) -> bool {
        let s = self.inner.lock().unwrap();
        s.image.is_some() && !s.state.is_analyzing()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().unwrap().snapshot()
    }

    /// Subscribe to session changes. The receiver always starts with the
    /// current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    // Callers must hold the session lock.
    fn advance_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn schedule_warning(&self, generation: u64) {
        debug!(
            "secondary-checkup warning armed for generation {generation} in {:?}",
            self.warning_delay
        );
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(session.warning_delay).await;
            session.fire_warning(generation);
        });
    }

    fn fire_warning(&self, generation: u64) {
        let snapshot = {
            let mut s = self.inner.lock().unwrap();
            let stale = generation != self.generation.load(Ordering::Relaxed)
                || s.state != SessionState::Succeeded;
            if stale {
                debug!("skipping superseded warning (generation {generation})");
                return;
            }
            s.warning = true;
            s.snapshot()
        };
        info!("secondary-checkup warning raised");
        self.updates.send_replace(snapshot);
    }
}
