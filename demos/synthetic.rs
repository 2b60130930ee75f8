//! Drives an `ArSession` with rendered frames of the default board while the
//! camera orbits it, printing what each frame changed.
//!
//! `RUST_LOG=cvaruco=debug cargo run --example synthetic`

use std::time::{Duration, Instant};

use cvaruco::frame::OwnedPixelBuffer;
use cvaruco::session::OwnedCameraFrame;
use cvaruco::synth::{render_scene, SceneMarker};
use cvaruco::{ArSession, CameraIntrinsics, Dictionary, SessionConfig, SessionWorker};
use nalgebra as na;
use tracing::info;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn scene(config: &SessionConfig, yaw: f64, piece_at: (f64, f64)) -> Vec<SceneMarker> {
    let facing = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI);
    let rotation = na::UnitQuaternion::from_euler_angles(0.3, yaw, 0.0) * facing;
    let centre = rotation * na::Vector3::new(0.075, 0.075, 0.0);
    let board = na::Isometry3::from_parts(
        na::Translation3::from(na::Vector3::new(0.0, 0.0, 0.55) - centre),
        rotation,
    );

    let layout = &config.layout;
    let mut markers: Vec<SceneMarker> = layout
        .fixed
        .iter()
        .filter_map(|(&id, p)| {
            Some(SceneMarker {
                id: u32::try_from(id).ok()?,
                size: layout.board_marker_size,
                pose: board * na::Isometry3::translation(p.x, p.y, p.z),
            })
        })
        .collect();
    markers.push(SceneMarker {
        id: 7,
        size: layout.piece_marker_size,
        pose: board * na::Isometry3::translation(piece_at.0, piece_at.1, 0.0),
    });
    markers
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let intrinsics = CameraIntrinsics::new(800.0, 800.0, WIDTH as f64 / 2.0, HEIGHT as f64 / 2.0)?;
    let dictionary = Dictionary::default();

    let worker = SessionWorker::spawn(ArSession::new(config.clone()));
    let mut dropped = 0;

    for step in 0..20 {
        let t = step as f64 / 20.0;
        let markers = scene(&config, -0.3 + 0.6 * t, (0.03 + 0.09 * t, 0.075));
        let image = render_scene(&dictionary, &markers, &intrinsics, WIDTH, HEIGHT)?;

        let frame = OwnedCameraFrame {
            image: OwnedPixelBuffer::from_gray(&image),
            intrinsics,
            camera_to_world: na::Isometry3::identity(),
        };

        if !worker.submit(frame) {
            dropped += 1;
        }

        while let Ok(update) = worker.updates().try_recv() {
            let update = update?;
            for obs in &update.observations {
                if let Some(label) = obs.label {
                    println!(
                        "marker {:>4} at board ({:.3}, {:.3})",
                        obs.id, label.x, label.y
                    );
                }
            }
        }

        std::thread::sleep(Duration::from_millis(30));
    }

    let start = Instant::now();
    while let Ok(update) = worker.updates().recv_timeout(Duration::from_millis(500)) {
        update?;
    }
    info!(dropped, waited = ?start.elapsed(), "done");

    Ok(())
}
