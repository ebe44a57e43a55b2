use std::collections::VecDeque;
use std::sync::Arc;

use super::identifier::LedIdentifier;
use super::ids::{OneBasedBeaconId, ZeroBasedBeaconId};
use crate::types::LedMeasurement;

/// Frames a freshly (re)identified LED stays "novel"
pub const MAX_NOVELTY: u8 = 4;

/// One tracked blob: its latest measurement, brightness history and the
/// beacon id decoded from that history.
pub struct Led {
    latest: LedMeasurement,
    history: VecDeque<f32>,
    id: ZeroBasedBeaconId,
    identifier: Option<Arc<dyn LedIdentifier>>,
    last_bright: bool,
    novelty: u8,
    used_last_frame: bool,
}

impl Led {
    /// Start tracking a blob from its first measurement
    pub fn new(identifier: Option<Arc<dyn LedIdentifier>>, measurement: LedMeasurement) -> Self {
        let capacity = identifier.as_ref().map_or(1, |i| i.length().max(1));
        let mut led = Self {
            latest: measurement.clone(),
            history: VecDeque::with_capacity(capacity + 1),
            id: ZeroBasedBeaconId::INSUFFICIENT_DATA,
            identifier,
            last_bright: false,
            novelty: MAX_NOVELTY,
            used_last_frame: false,
        };
        led.add_measurement(measurement, false);
        led
    }

    /// Record this frame's measurement and re-run identification.
    pub fn add_measurement(&mut self, measurement: LedMeasurement, keep_id: bool) {
        self.history.push_back(measurement.brightness);
        self.latest = measurement;

        let Some(identifier) = self.identifier.as_ref() else {
            self.id = ZeroBasedBeaconId::INSUFFICIENT_DATA;
            while self.history.len() > 1 {
                self.history.pop_front();
            }
            return;
        };

        let previous = self.id;
        let result = identifier.get_id(previous, &mut self.history, keep_id);
        self.id = result.id;
        if let Some(bright) = result.last_bright {
            self.last_bright = bright;
        }

        if previous != self.id {
            self.novelty = MAX_NOVELTY;
        } else {
            self.novelty = self.novelty.saturating_sub(1);
        }
    }

    pub fn measurement(&self) -> &LedMeasurement {
        &self.latest
    }

    pub fn id(&self) -> ZeroBasedBeaconId {
        self.id
    }

    pub fn one_based_id(&self) -> OneBasedBeaconId {
        self.id.to_one_based()
    }

    pub fn identified(&self) -> bool {
        self.id.is_identified()
    }

    pub fn novelty(&self) -> u8 {
        self.novelty
    }

    pub fn is_bright(&self) -> bool {
        self.last_bright
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn location(&self) -> (f32, f32) {
        self.latest.location
    }

    /// Location mirrored through the image center
    pub fn inverse_location(&self) -> (f32, f32) {
        let (w, h) = self.latest.image_size;
        (w as f32 - self.latest.location.0, h as f32 - self.latest.location.1)
    }

    pub fn was_used_last_frame(&self) -> bool {
        self.used_last_frame
    }

    pub fn mark_as_used(&mut self) {
        self.used_last_frame = true;
    }

    pub fn reset_used(&mut self) {
        self.used_last_frame = false;
    }

    /// Drop the id and restart the history from the newest sample
    pub fn mark_misidentified(&mut self) {
        self.id = ZeroBasedBeaconId::INSUFFICIENT_DATA;
        if !self.history.is_empty() {
            self.history.clear();
            self.history.push_back(self.latest.brightness);
        }
    }

    /// Index of the measurement closest to this LED, if within `threshold` pixels
    pub fn nearest(&self, measurements: &[LedMeasurement], threshold: f32) -> Option<usize> {
        let here = self.location();
        let (index, dist_sq) = measurements
            .iter()
            .map(|m| m.distance_squared_to(here))
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        (dist_sq <= threshold * threshold).then_some(index)
    }
}
