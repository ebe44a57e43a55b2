//! Per-target tracking driver
//!
//! Ties the beacon identifier and the pose filter together for one tracked
//! device:
//! - blobs from a camera frame are associated with tracked LEDs
//! - identified LEDs are handed to a [`PoseSolver`]
//! - the solved pose corrects the Kalman filter
//!
//! The driver also owns the NaN policy: after every filter step the
//! contents are checked and, if configured, the filter is reset.

use std::sync::Arc;

use nalgebra::{UnitQuaternion, Vector3};

use crate::beacons::{Led, LedIdentifier, ZeroBasedBeaconId};
use crate::config::FilterConfig;
use crate::filters::{
    check_state, AbsoluteOrientationMeasurement, AbsolutePositionMeasurement,
    AngularVelocityMeasurement, FilterHealth, KalmanFilter, Measurement, PoseConstantVelocity,
    PoseDampedConstantVelocity, PoseSeparatelyDampedConstantVelocity, PoseState,
};
use crate::types::{LedMeasurement, PoseSnapshot, POSE_STATE_DIM};

/// Pose filter with the process model chosen at runtime
#[derive(Clone)]
pub enum TrackingFilter {
    ConstantVelocity(KalmanFilter<PoseConstantVelocity, POSE_STATE_DIM>),
    Damped(KalmanFilter<PoseDampedConstantVelocity, POSE_STATE_DIM>),
    SeparatelyDamped(KalmanFilter<PoseSeparatelyDampedConstantVelocity, POSE_STATE_DIM>),
}

macro_rules! with_filter {
    ($self:expr, $kf:ident => $body:expr) => {
        match $self {
            TrackingFilter::ConstantVelocity($kf) => $body,
            TrackingFilter::Damped($kf) => $body,
            TrackingFilter::SeparatelyDamped($kf) => $body,
        }
    };
}

impl TrackingFilter {
    pub fn predict(&mut self, dt: f64) {
        with_filter!(self, kf => kf.predict(dt))
    }

    pub fn correct<Meas, const M: usize>(&mut self, meas: &Meas) -> bool
    where
        Meas: Measurement<PoseState, POSE_STATE_DIM, M>,
    {
        with_filter!(self, kf => kf.correct(meas))
    }

    pub fn state(&self) -> &PoseState {
        with_filter!(self, kf => kf.state())
    }

    pub fn set_state(&mut self, state: PoseState) {
        with_filter!(self, kf => kf.set_state(state))
    }

    pub fn model_name(&self) -> &'static str {
        match self {
            TrackingFilter::ConstantVelocity(_) => "constant_velocity",
            TrackingFilter::Damped(_) => "damped",
            TrackingFilter::SeparatelyDamped(_) => "separately_damped",
        }
    }
}

/// A pose reported by a solver, in room coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedPose {
    pub position: Vector3<f64>,
    /// `None` when the solver could only recover position
    pub orientation: Option<UnitQuaternion<f64>>,
    pub position_variance: Vector3<f64>,
    pub orientation_variance: f64,
}

/// One filtered device and its update policy
pub struct TrackedBody {
    filter: TrackingFilter,
    config: FilterConfig,
    last_timestamp: Option<f64>,
    resets: u64,
}

impl TrackedBody {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            filter: config.build_filter(),
            config,
            last_timestamp: None,
            resets: 0,
        }
    }

    /// Advance the filter to `timestamp` (seconds). The first call only
    /// records the time; a timestamp that does not advance predicts by
    /// `min_dt`.
    pub fn predict_to(&mut self, timestamp: f64) {
        let Some(last) = self.last_timestamp else {
            self.last_timestamp = Some(timestamp);
            return;
        };
        let mut dt = timestamp - last;
        if !(dt > 0.0) {
            dt = self.config.min_dt;
        }
        self.filter.predict(dt);
        self.last_timestamp = Some(timestamp.max(last));
        self.enforce_validity();
    }

    /// Correct with a solved pose. Returns false if any part of the
    /// correction was discarded.
    pub fn observe_pose(&mut self, pose: &ObservedPose) -> bool {
        let position = AbsolutePositionMeasurement::new(pose.position, pose.position_variance);
        let mut accepted = self.filter.correct(&position);
        if let Some(orientation) = pose.orientation {
            let meas =
                AbsoluteOrientationMeasurement::with_variance(orientation, pose.orientation_variance);
            accepted &= self.filter.correct(&meas);
        }
        self.enforce_validity();
        accepted
    }

    pub fn observe_angular_velocity(&mut self, angular_velocity: Vector3<f64>, variance: Vector3<f64>) -> bool {
        let meas = AngularVelocityMeasurement::new(angular_velocity, variance);
        let accepted = self.filter.correct(&meas);
        self.enforce_validity();
        accepted
    }

    pub fn pose(&self) -> PoseSnapshot {
        self.filter.state().snapshot()
    }

    pub fn health(&self) -> FilterHealth {
        check_state(self.filter.state())
    }

    pub fn filter(&self) -> &TrackingFilter {
        &self.filter
    }

    /// Replace the filter state; contents are checked like any other step
    pub fn set_state(&mut self, state: PoseState) {
        self.filter.set_state(state);
        self.enforce_validity();
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Back to the default state; the next `predict_to` restarts timing
    pub fn reset(&mut self) {
        self.filter.set_state(PoseState::new());
        self.last_timestamp = None;
    }

    fn enforce_validity(&mut self) {
        let health = self.health();
        if health == FilterHealth::Valid {
            return;
        }
        if self.config.reset_on_invalid {
            log::warn!("[TRACK] Filter contents invalid ({:?}), resetting", health);
            self.reset();
            self.resets += 1;
        } else {
            log::warn!("[TRACK] Filter contents invalid ({:?})", health);
        }
    }
}

/// An identified beacon seen in the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconObservation {
    pub id: ZeroBasedBeaconId,
    pub location: (f32, f32),
    pub image_size: (u32, u32),
}

/// Beacon positions in the tracked body's frame, indexed by zero-based id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeaconLayout {
    positions: Vec<Option<Vector3<f64>>>,
}

impl BeaconLayout {
    pub fn new(positions: Vec<Option<Vector3<f64>>>) -> Self {
        Self { positions }
    }

    pub fn position(&self, id: ZeroBasedBeaconId) -> Option<Vector3<f64>> {
        id.as_index()
            .and_then(|i| self.positions.get(i).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Turns identified beacons into a pose
pub trait PoseSolver {
    fn solve(&self, observations: &[BeaconObservation], layout: &BeaconLayout) -> Option<ObservedPose>;
}

/// Position-only solver for a camera looking down +Z at a roughly planar,
/// fronto-parallel target.
///
/// Depth comes from the ratio of image spread to model spread, lateral
/// position from the image centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct WeakPerspectiveSolver {
    pub focal_length_px: f64,
    pub min_beacons: usize,
    pub position_variance: Vector3<f64>,
}

impl Default for WeakPerspectiveSolver {
    fn default() -> Self {
        Self {
            focal_length_px: 700.0,
            min_beacons: 3,
            position_variance: Vector3::new(1e-4, 1e-4, 1e-3),
        }
    }
}

impl PoseSolver for WeakPerspectiveSolver {
    fn solve(&self, observations: &[BeaconObservation], layout: &BeaconLayout) -> Option<ObservedPose> {
        let pairs: Vec<((f64, f64), Vector3<f64>)> = observations
            .iter()
            .filter_map(|obs| {
                let model = layout.position(obs.id)?;
                let (w, h) = obs.image_size;
                let u = obs.location.0 as f64 - w as f64 / 2.0;
                let v = obs.location.1 as f64 - h as f64 / 2.0;
                Some(((u, v), model))
            })
            .collect();
        if pairs.len() < self.min_beacons.max(2) {
            return None;
        }

        let n = pairs.len() as f64;
        let (mut uc, mut vc) = (0.0, 0.0);
        let mut model_centroid = Vector3::zeros();
        for ((u, v), m) in &pairs {
            uc += u;
            vc += v;
            model_centroid += m;
        }
        uc /= n;
        vc /= n;
        model_centroid /= n;

        let (mut image_spread, mut model_spread) = (0.0, 0.0);
        for ((u, v), m) in &pairs {
            image_spread += (u - uc).powi(2) + (v - vc).powi(2);
            model_spread += (m.x - model_centroid.x).powi(2) + (m.y - model_centroid.y).powi(2);
        }
        if image_spread <= f64::EPSILON || model_spread <= f64::EPSILON {
            return None;
        }
        let scale = (image_spread / model_spread).sqrt();
        let depth = self.focal_length_px / scale;

        let centroid = Vector3::new(uc * depth / self.focal_length_px, vc * depth / self.focal_length_px, depth);
        Some(ObservedPose {
            position: centroid - model_centroid,
            orientation: None,
            position_variance: self.position_variance,
            orientation_variance: 0.0,
        })
    }
}

/// What happened while processing one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub pose: PoseSnapshot,
    pub blobs: usize,
    pub beacons_identified: usize,
    /// A solver pose was applied to the filter this frame
    pub corrected: bool,
}

/// Camera-frame tracking for one rigid body
pub struct TrackingPipeline {
    identifier: Arc<dyn LedIdentifier>,
    leds: Vec<Led>,
    body: TrackedBody,
    layout: BeaconLayout,
    keep_ids: bool,
    /// Max blob motion between frames, pixels
    match_threshold: f32,
}

impl TrackingPipeline {
    pub fn new(
        identifier: Arc<dyn LedIdentifier>,
        layout: BeaconLayout,
        filter: FilterConfig,
        keep_ids: bool,
    ) -> Self {
        Self {
            identifier,
            leds: Vec::new(),
            body: TrackedBody::new(filter),
            layout,
            keep_ids,
            match_threshold: 10.0,
        }
    }

    pub fn with_match_threshold(mut self, pixels: f32) -> Self {
        self.match_threshold = pixels;
        self
    }

    pub fn body(&self) -> &TrackedBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut TrackedBody {
        &mut self.body
    }

    pub fn leds(&self) -> &[Led] {
        &self.leds
    }

    pub fn process_frame(
        &mut self,
        timestamp: f64,
        blobs: &[LedMeasurement],
        solver: &dyn PoseSolver,
    ) -> FrameOutcome {
        self.body.predict_to(timestamp);
        self.associate(blobs);

        let observations: Vec<BeaconObservation> = self
            .leds
            .iter_mut()
            .filter(|led| led.identified())
            .map(|led| {
                led.mark_as_used();
                BeaconObservation {
                    id: led.id(),
                    location: led.location(),
                    image_size: led.measurement().image_size,
                }
            })
            .collect();

        let corrected = match solver.solve(&observations, &self.layout) {
            Some(pose) => self.body.observe_pose(&pose),
            None => false,
        };

        FrameOutcome {
            pose: self.body.pose(),
            blobs: blobs.len(),
            beacons_identified: observations.len(),
            corrected,
        }
    }

    /// Greedy nearest-neighbour association. LEDs with no blob nearby are
    /// dropped; unclaimed blobs start new LEDs.
    fn associate(&mut self, blobs: &[LedMeasurement]) {
        let mut claimed = vec![false; blobs.len()];
        let mut kept = Vec::with_capacity(blobs.len());

        for mut led in self.leds.drain(..) {
            led.reset_used();
            let here = led.location();
            let best = blobs
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, b)| (i, b.distance_squared_to(here)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match best {
                Some((i, d2)) if d2 <= self.match_threshold * self.match_threshold => {
                    claimed[i] = true;
                    led.add_measurement(blobs[i].clone(), self.keep_ids);
                    kept.push(led);
                }
                _ => {}
            }
        }

        for (blob, _) in blobs.iter().zip(&claimed).filter(|(_, c)| !**c) {
            kept.push(Led::new(Some(Arc::clone(&self.identifier)), blob.clone()));
        }
        self.leds = kept;
    }
}
