use cvaruco::synth::render_marker_view;
use cvaruco::{estimate_pose, CameraIntrinsics, Dictionary, PixelBuffer};
use nalgebra as na;

fn main() -> Result<(), cvaruco::Error> {
    let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;

    // A 5 cm marker 40 cm in front of the camera, facing it
    let pose = na::Isometry3::from_parts(
        na::Translation3::new(0.0, 0.0, 0.4),
        na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI),
    );
    let image = render_marker_view(&Dictionary::default(), 42, 0.05, &pose, &intrinsics, 640, 480)?;
    let frame = PixelBuffer::gray(image.as_raw(), 640, 480, 640);

    for marker in estimate_pose(&frame, &intrinsics, 0.05)? {
        println!("id: {}", marker.aruco_id);
        println!("translation: {}", marker.transform.translation.vector);
        println!("rotation: {:?}", marker.transform.rotation.euler_angles());
    }

    Ok(())
}
