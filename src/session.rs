//! Per-frame processing for a tabletop AR view: marker poses, world placement,
//! piece positions on the board, tracking and the board grid.

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use nalgebra as na;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::board::BoardLayout;
use crate::camera::CameraIntrinsics;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::estimate::{MarkerPoseEstimator, MarkerTransform};
use crate::frame::{OwnedPixelBuffer, PixelBuffer};
use crate::overlay::{GridOverlay, OverlayUpdate};
use crate::tracker::{MarkerTracker, Observation, TrackerUpdate};

/// One captured camera frame.
#[derive(Debug, Clone)]
pub struct CameraFrame<'a> {
    pub image: PixelBuffer<'a>,
    pub intrinsics: CameraIntrinsics<f64>,
    /// Camera pose in the world, scene camera convention
    pub camera_to_world: na::Isometry3<f64>,
}

/// A [`CameraFrame`] owning its pixels, for handing to a [`SessionWorker`].
#[derive(Debug, Clone)]
pub struct OwnedCameraFrame {
    pub image: OwnedPixelBuffer,
    pub intrinsics: CameraIntrinsics<f64>,
    pub camera_to_world: na::Isometry3<f64>,
}

impl OwnedCameraFrame {
    pub fn as_frame(&self) -> CameraFrame<'_> {
        CameraFrame {
            image: self.image.as_buffer(),
            intrinsics: self.intrinsics,
            camera_to_world: self.camera_to_world,
        }
    }
}

impl From<&CameraFrame<'_>> for OwnedCameraFrame {
    fn from(frame: &CameraFrame<'_>) -> Self {
        Self {
            image: OwnedPixelBuffer::from(&frame.image),
            intrinsics: frame.intrinsics,
            camera_to_world: frame.camera_to_world,
        }
    }
}

/// Everything one frame changed.
#[derive(Debug, Clone, Default)]
pub struct FrameUpdate {
    /// Marker-to-camera transforms of every marker found
    pub markers: Vec<MarkerTransform>,
    /// World poses and board positions of the same markers
    pub observations: Vec<Observation>,
    pub tracker: TrackerUpdate,
    pub overlay: OverlayUpdate,
}

#[derive(Debug, Clone, Default)]
pub struct ArSession {
    estimator: MarkerPoseEstimator,
    layout: BoardLayout,
    tracker: MarkerTracker,
    overlay: GridOverlay,
}

impl ArSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            estimator: MarkerPoseEstimator::new(config.detector),
            tracker: MarkerTracker::new(&config.tracker),
            overlay: GridOverlay::new(config.overlay),
            layout: config.layout,
        }
    }

    pub fn layout(&self) -> &BoardLayout {
        &self.layout
    }

    pub fn tracker(&self) -> &MarkerTracker {
        &self.tracker
    }

    pub fn overlay(&self) -> &GridOverlay {
        &self.overlay
    }

    /// Detects the markers in `frame`, sizing each by whether it belongs to the
    /// board, and updates the tracked markers and the grid.
    pub fn process(&mut self, frame: &CameraFrame, now: Instant) -> Result<FrameUpdate> {
        let layout = &self.layout;
        let markers = self
            .estimator
            .estimate_with(&frame.image, &frame.intrinsics, |id| layout.marker_size(id))?;

        let (board, pieces) = layout.partition(&markers);

        let observations: Vec<Observation> = markers
            .iter()
            .map(|m| Observation {
                id: m.aruco_id,
                world: frame.camera_to_world * m.transform,
                label: layout.locate(m.aruco_id, &board, &pieces),
            })
            .collect();

        let board_world: Vec<MarkerTransform> = board
            .iter()
            .map(|b| MarkerTransform {
                aruco_id: b.aruco_id,
                transform: frame.camera_to_world * b.transform,
            })
            .collect();

        let tracker = self.tracker.observe(&observations, now);
        let overlay = self.overlay.update(layout, &board_world);

        if !tracker.spawned.is_empty() || !tracker.expired.is_empty() {
            info!(
                spawned = ?tracker.spawned,
                expired = ?tracker.expired,
                tracked = self.tracker.markers().len(),
                "tracked markers changed"
            );
        }
        debug!(
            board = board.len(),
            pieces = pieces.len(),
            grid_points = self.overlay.points().len(),
            "processed frame"
        );

        Ok(FrameUpdate {
            markers,
            observations,
            tracker,
            overlay,
        })
    }

    /// Drops stale markers on frames that are not processed.
    pub fn expire(&mut self, now: Instant) -> Vec<i32> {
        self.tracker.expire(now)
    }
}

/// Runs an [`ArSession`] on a background thread, one frame at a time.
///
/// Frames submitted while the previous one is still being processed are
/// dropped.
pub struct SessionWorker {
    frames: Option<Sender<OwnedCameraFrame>>,
    updates: Receiver<Result<FrameUpdate>>,
    handle: Option<JoinHandle<ArSession>>,
}

impl SessionWorker {
    pub fn spawn(session: ArSession) -> Self {
        // Zero capacity: a send only succeeds while the worker waits for a frame
        let (frame_tx, frame_rx) = channel::bounded::<OwnedCameraFrame>(0);
        let (update_tx, update_rx) = channel::unbounded();

        let handle = thread::spawn(move || {
            let mut session = session;
            for frame in frame_rx {
                let update = session.process(&frame.as_frame(), Instant::now());
                if update_tx.send(update).is_err() {
                    warn!("update receiver dropped, stopping session worker");
                    break;
                }
            }
            session
        });

        Self {
            frames: Some(frame_tx),
            updates: update_rx,
            handle: Some(handle),
        }
    }

    /// Hands a frame to the worker. Returns `false` if it was dropped because
    /// the worker is busy or gone.
    pub fn submit(&self, frame: OwnedCameraFrame) -> bool {
        let Some(frames) = &self.frames else {
            return false;
        };
        match frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("session worker busy, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("session worker stopped, frame dropped");
                false
            }
        }
    }

    /// Results of the processed frames, in order.
    pub fn updates(&self) -> &Receiver<Result<FrameUpdate>> {
        &self.updates
    }

    /// Stops the worker and returns its session.
    pub fn shutdown(mut self) -> Option<ArSession> {
        self.stop()
    }

    fn stop(&mut self) -> Option<ArSession> {
        drop(self.frames.take());
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(session) => Some(session),
            Err(_) => {
                warn!("session worker panicked");
                None
            }
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
