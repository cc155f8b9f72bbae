//! Privileged half of a capture: admits sessions, consumes frames,
//! snapshots the surface and assembles tiles.
//!
//! The orchestrator never scrolls the page itself; it reacts to the
//! sequencer's frame requests, so the two sides stay in lockstep no
//! matter how slow snapshotting or compositing turns out to be.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::output::{CaptureArtifacts, ObjectStore};
use crate::policy::AddressPolicy;
use crate::protocol::FrameRequest;
use crate::sequencer;
use crate::session::{CaptureSession, FinishedCapture};
use crate::surface::{Surface, SurfaceId};
use crate::{CaptureConfig, CaptureOptions};

/// Runs captures against surfaces, one session per surface at a time.
pub struct Orchestrator {
    config: CaptureConfig,
    policy: AddressPolicy,
    active: Arc<Mutex<HashSet<SurfaceId>>>,
}

/// Registry reservation for one surface; dropping it releases the slot
/// on every exit path, including early errors.
struct Admission {
    id: SurfaceId,
    active: Arc<Mutex<HashSet<SurfaceId>>>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        lock_registry(&self.active).remove(&self.id);
    }
}

fn lock_registry(active: &Mutex<HashSet<SurfaceId>>) -> std::sync::MutexGuard<'_, HashSet<SurfaceId>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Orchestrator {
    /// Builds an orchestrator, validating the configuration and
    /// compiling the address policy up front.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let policy = AddressPolicy::new(&config.deny_addresses, &config.allow_addresses)?;
        Ok(Orchestrator {
            config,
            policy,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Captures the full page and persists the artifacts in one call.
    pub async fn start_capture(
        &self,
        surface: Arc<dyn Surface>,
        store: &dyn ObjectStore,
        opts: &CaptureOptions,
    ) -> Result<CaptureArtifacts> {
        let finished = self.capture(surface, opts).await?;
        match finished.persist(store, &opts.base_name).await {
            Ok(artifacts) => {
                info!(
                    "surface {}: stored {} image(s) and manifest at {}",
                    finished.surface_id,
                    artifacts.images.len(),
                    artifacts.manifest.0
                );
                Ok(artifacts)
            }
            Err(e) => {
                warn!("surface {}: persistence failed: {}", finished.surface_id, e);
                if let Some(cb) = &opts.on_error {
                    cb(&e);
                }
                Err(e)
            }
        }
    }

    /// Runs the scroll walk and hands back the assembled tiles without
    /// persisting them, so callers can retry storage on their own terms.
    pub async fn capture(
        &self,
        surface: Arc<dyn Surface>,
        opts: &CaptureOptions,
    ) -> Result<FinishedCapture> {
        let result = self.capture_inner(surface, opts).await;
        if let Err(e) = &result {
            warn!("capture failed: {e}");
            if let Some(cb) = &opts.on_error {
                cb(e);
            }
        }
        result
    }

    fn admit(&self, id: SurfaceId) -> Result<Admission> {
        let mut active = lock_registry(&self.active);
        if !active.insert(id) {
            return Err(Error::CaptureInProgress(id.0));
        }
        Ok(Admission {
            id,
            active: Arc::clone(&self.active),
        })
    }

    async fn capture_inner(
        &self,
        surface: Arc<dyn Surface>,
        opts: &CaptureOptions,
    ) -> Result<FinishedCapture> {
        let address = surface.address();
        self.policy.check(&address)?;
        let _admission = self.admit(surface.id())?;
        info!("surface {}: capturing {}", surface.id(), address);

        let (request_tx, mut request_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some(user_cancel) = opts.cancel.clone() {
            forward_cancel(user_cancel, cancel_tx.clone());
        }
        let handle = sequencer::inject(
            Arc::clone(&surface),
            request_tx,
            cancel_rx,
            self.config.sequencer_config(),
        )?;

        let mut session = CaptureSession::new(surface.id());
        let window = Duration::from_millis(self.config.injection_window_ms);
        let mut next = match timeout(window, request_rx.recv()).await {
            Ok(request) => request,
            Err(_) => {
                // No opening frame inside the window; tear the walk down
                // and wait so any partial view changes are undone first.
                let _ = cancel_tx.send(true);
                let _ = handle.join().await;
                return Err(Error::InjectionTimeout(self.config.injection_window_ms));
            }
        };

        loop {
            let Some(request) = next else {
                // The channel closed before the final frame; the walk's
                // own outcome carries the real reason.
                return Err(match handle.join().await {
                    Ok(()) => Error::SequencerGone(
                        "frame stream ended before the final frame".to_string(),
                    ),
                    Err(e) => e,
                });
            };
            let last = request.frame.is_last();
            if let Err(e) = self.process_frame(surface.as_ref(), &mut session, request, opts).await {
                let _ = cancel_tx.send(true);
                let _ = handle.join().await;
                return Err(e);
            }
            if last {
                break;
            }
            next = request_rx.recv().await;
        }

        // Let the sequencer finish restoring the view before reporting
        // success; a clean walk must not leave a clean error behind.
        handle.join().await?;
        session.finish()
    }

    async fn process_frame(
        &self,
        surface: &dyn Surface,
        session: &mut CaptureSession,
        request: FrameRequest,
        opts: &CaptureOptions,
    ) -> Result<()> {
        let FrameRequest { frame, ack } = request;
        tokio::time::sleep(Duration::from_millis(self.config.snapshot_settle_ms)).await;

        let absorbed = match surface.snapshot().await {
            Ok(snapshot) => snapshot
                .decode()
                .and_then(|bitmap| session.absorb(&frame, &bitmap, &self.config.tile_caps)),
            Err(e) => Err(e),
        };
        match absorbed {
            Ok(outcome) => {
                if outcome.planned_now && outcome.tile_count > 1 {
                    info!(
                        "surface {}: output exceeds tile caps, splitting into {} tiles",
                        session.surface_id, outcome.tile_count
                    );
                    if let Some(cb) = &opts.on_split {
                        cb(outcome.tile_count);
                    }
                }
                let _ = ack.send(true);
                debug!(
                    "surface {}: frame at ({}, {}) absorbed, progress {:.2}",
                    session.surface_id, frame.x, frame.y, frame.progress
                );
                if let Some(cb) = &opts.on_progress {
                    cb(frame.progress);
                }
                Ok(())
            }
            Err(e) => {
                let _ = ack.send(false);
                Err(e)
            }
        }
    }
}

/// Bridges an external cancellation watch onto the session's internal
/// one. Dropping the external controller is not a cancellation; an
/// explicit `true` is.
fn forward_cancel(mut user: watch::Receiver<bool>, internal: watch::Sender<bool>) {
    tokio::spawn(async move {
        loop {
            if *user.borrow() {
                let _ = internal.send(true);
                return;
            }
            tokio::select! {
                changed = user.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = internal.closed() => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{ruled_document, SyntheticSurface};

    fn quick_config() -> CaptureConfig {
        CaptureConfig {
            scroll_settle_ms: 1,
            snapshot_settle_ms: 0,
            ..CaptureConfig::default()
        }
    }

    #[tokio::test]
    async fn denied_address_fails_before_touching_the_surface() {
        let orchestrator = Orchestrator::new(CaptureConfig {
            deny_addresses: vec!["^https?://addons\\.example\\.test/.*".to_string()],
            ..quick_config()
        })
        .unwrap();
        let surface = Arc::new(
            SyntheticSurface::new(ruled_document(256, 256), 256, 256)
                .with_address("https://addons.example.test/detail/thing"),
        );

        let err = orchestrator
            .capture(surface.clone(), &CaptureOptions::default())
            .await
            .expect_err("deny pattern must win");
        assert!(matches!(err, Error::AddressNotPermitted(_)));
        assert_eq!(surface.snapshots_taken(), 0);
        assert_eq!(surface.scroll_history(), Vec::new());
    }

    #[tokio::test]
    async fn unscriptable_surface_reports_injection_failure() {
        let orchestrator = Orchestrator::new(quick_config()).unwrap();
        let surface = Arc::new(
            SyntheticSurface::new(ruled_document(256, 256), 256, 256).not_scriptable(),
        );
        let err = orchestrator
            .capture(surface, &CaptureOptions::default())
            .await
            .expect_err("injection must fail");
        assert!(matches!(err, Error::InjectionFailed(_)));
    }

    #[tokio::test]
    async fn stalled_injection_times_out_and_cleans_up() {
        let config = CaptureConfig {
            injection_window_ms: 50,
            ..quick_config()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let surface = Arc::new(
            SyntheticSurface::new(ruled_document(1024, 3000), 1024, 800)
                .with_metrics_delay(Duration::from_millis(400)),
        );
        let err = orchestrator
            .capture(surface.clone(), &CaptureOptions::default())
            .await
            .expect_err("injection window must expire");
        assert!(matches!(err, Error::InjectionTimeout(50)));
        // The walk never got far enough to disturb the view.
        assert_eq!(surface.snapshots_taken(), 0);
        assert!(!surface.overflow_hidden());

        // The registry slot is free again.
        let err2 = orchestrator
            .capture(surface.clone(), &CaptureOptions::default())
            .await;
        assert!(!matches!(err2, Err(Error::CaptureInProgress(_))));
    }
}
