pub mod board;
pub mod camera;
pub mod config;
pub mod cv;
pub mod detector;
pub mod dictionary;
mod error;
pub mod estimate;
pub mod frame;
pub mod overlay;
pub mod pose;
pub mod session;
pub mod synth;
pub mod tracker;

pub use camera::{vision_to_scene, CameraIntrinsics};
pub use config::SessionConfig;
pub use detector::{Detector, DetectorParameters, Marker};
pub use dictionary::Dictionary;
pub use error::{Error, Result};
pub use estimate::{estimate_pose, MarkerPoseEstimator, MarkerTransform};
pub use frame::{PixelBuffer, PixelFormat, Plane};
pub use pose::{MarkerPose, PoseSolver};
pub use session::{ArSession, CameraFrame, SessionWorker};
