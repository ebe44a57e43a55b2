pub mod guard;
pub mod kalman;
pub mod measurements;
pub mod orientation_state;
pub mod pose_state;
pub mod process;

pub use guard::{check_state, state_contents_valid, FilterHealth};
pub use kalman::{
    CorrectionInProgress, FilterState, KalmanFilter, Measurement, ProcessModel, RotationalState,
};
pub use measurements::{
    AbsoluteOrientationMeasurement, AbsolutePositionMeasurement, AngularVelocityMeasurement,
};
pub use orientation_state::OrientationState;
pub use pose_state::PoseState;
pub use process::{
    OrientationConstantVelocity, PoseConstantVelocity, PoseDampedConstantVelocity,
    PoseSeparatelyDampedConstantVelocity,
};
