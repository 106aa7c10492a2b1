//! ROI classification.
//!
//! `RoiClassifier::classify` filters detections for the active event type,
//! assigns each survivor to every region whose polygon contains its box
//! center, applies the event's alert policy and renders the overlay.
//!
//! The classifier owns the blink phase, a 0..=9 counter that drives alert
//! flashing. It advances once per `classify` call and is never reset, not
//! even when the region set is replaced on an event switch.

pub mod render;

use ab_glyph::FontArc;
use anyhow::Result;
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::detect::{Detection, CLASS_BICYCLE, CLASS_CAR, CLASS_MOTORCYCLE, CLASS_PERSON};
use crate::error::PipelineError;
use crate::roi::geometry::locate;
use crate::roi::{EventConfig, RoiRegion, RoiSlot, ALERT_COLOR};
use crate::EventType;

use render::{OverlayRenderer, RegionPaint};

/// Blink cycle length. Alerts show during the first half.
pub const BLINK_PERIOD: u8 = 10;
const BLINK_ON_PHASES: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassifyParams {
    /// Detections must score strictly above this.
    pub threshold: f32,
    /// Overlay opacity.
    pub alpha: f32,
    /// EventStat occupancy at which a region starts alerting.
    pub vehicle_threshold: u32,
}

impl Default for ClassifyParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            alpha: 0.15,
            vehicle_threshold: 5,
        }
    }
}

// ----------------------------------------------------------------------------
// Results
// ----------------------------------------------------------------------------

/// Occupant count per slot. Always lists all five slots; serialises as
/// `{"ROI 1": n, ..., "ROI 5": n}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RegionCounts(BTreeMap<RoiSlot, u32>);

impl RegionCounts {
    pub fn zeroed() -> Self {
        Self(RoiSlot::ALL.into_iter().map(|slot| (slot, 0)).collect())
    }

    pub fn get(&self, slot: RoiSlot) -> u32 {
        self.0.get(&slot).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RoiSlot, u32)> + '_ {
        self.0.iter().map(|(slot, count)| (*slot, *count))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn increment(&mut self, slot: RoiSlot) {
        *self.0.entry(slot).or_insert(0) += 1;
    }
}

impl Default for RegionCounts {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaggedDetection {
    pub detection: Detection,
    /// Every matching slot, in slot order. Overlapping regions each count it.
    pub regions: Vec<RoiSlot>,
}

/// Per-region outcome for one active region.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionOutcome {
    pub slot: RoiSlot,
    pub count: u32,
    pub alerting: bool,
    pub caption: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ClassificationResult {
    /// Present only when a frame was supplied.
    pub annotated_frame: Option<RgbImage>,
    pub counts: RegionCounts,
    pub tagged: Vec<TaggedDetection>,
    /// Active regions only, in slot order.
    pub regions: Vec<RegionOutcome>,
    /// Blink phase used for this call.
    pub blink_phase: u8,
}

// ----------------------------------------------------------------------------
// Event policies
// ----------------------------------------------------------------------------

fn keeps(event_type: EventType, det: &Detection, threshold: f32) -> bool {
    if det.score.is_nan() || det.score <= threshold || !det.is_finite() {
        return false;
    }
    match event_type {
        EventType::EventStat => det.class_id > -1,
        EventType::AlertStranger => det.class_id == CLASS_PERSON,
        EventType::MonitorVehicle => matches!(
            det.class_id,
            CLASS_BICYCLE | CLASS_CAR | CLASS_MOTORCYCLE
        ),
    }
}

fn blink_on(phase: u8) -> bool {
    phase < BLINK_ON_PHASES
}

fn is_alerting(event_type: EventType, count: u32, phase: u8, params: &ClassifyParams) -> bool {
    if !blink_on(phase) {
        return false;
    }
    match event_type {
        EventType::EventStat => count >= params.vehicle_threshold,
        EventType::AlertStranger => count > 0,
        // absence is the alert
        EventType::MonitorVehicle => count == 0,
    }
}

fn caption(
    event_type: EventType,
    slot: RoiSlot,
    count: u32,
    last_match: Option<&Detection>,
) -> Option<String> {
    let n = slot.number();
    match event_type {
        EventType::EventStat if count > 0 => Some(format!("Lane {} : {}", n, count)),
        EventType::AlertStranger if count > 0 => {
            Some(format!("{} Stranger Intrusion in Location {}", count, n))
        }
        EventType::MonitorVehicle if count == 0 => {
            Some(format!("!!!No or missing vehicle Alert in Location {}!!!", n))
        }
        EventType::MonitorVehicle => {
            let label = last_match.map(Detection::label).unwrap_or("Unknown");
            Some(format!("My {} in Location {}", label, n))
        }
        _ => None,
    }
}

// ----------------------------------------------------------------------------
// Classifier
// ----------------------------------------------------------------------------

pub struct RoiClassifier {
    config: EventConfig,
    blink_phase: u8,
    renderer: OverlayRenderer,
}

impl RoiClassifier {
    pub fn new(config: EventConfig) -> Self {
        Self {
            config,
            blink_phase: 0,
            renderer: OverlayRenderer::default(),
        }
    }

    /// Use `font` for status text and centroid labels.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.renderer = OverlayRenderer::new(Some(font));
        self
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn event_type(&self) -> EventType {
        self.config.event_type()
    }

    pub fn blink_phase(&self) -> u8 {
        self.blink_phase
    }

    /// Swap in a new region set wholesale. The blink phase carries over.
    pub fn replace_config(&mut self, config: EventConfig) {
        self.config = config;
    }

    /// Classify one frame's detections against the loaded region set.
    ///
    /// `event_type` must match the loaded configuration; a mismatch is
    /// `PipelineError::EventMismatch` and leaves the blink phase untouched.
    pub fn classify(
        &mut self,
        detections: &[Detection],
        frame: Option<&RgbImage>,
        event_type: EventType,
        params: &ClassifyParams,
    ) -> Result<ClassificationResult> {
        if event_type != self.config.event_type() {
            return Err(PipelineError::EventMismatch {
                loaded: self.config.event_type().name(),
                requested: event_type.name(),
            }
            .into());
        }

        let phase = self.blink_phase;
        let mut tagged: Vec<TaggedDetection> = detections
            .iter()
            .filter(|det| keeps(event_type, det, params.threshold))
            .map(|det| TaggedDetection {
                detection: *det,
                regions: Vec::new(),
            })
            .collect();

        let mut counts = RegionCounts::zeroed();
        let mut outcomes = Vec::new();
        let mut paints = Vec::new();

        for region in self.config.active_regions() {
            let last_match = Self::match_region(region, &mut tagged, &mut counts);
            let count = counts.get(region.slot);
            let alerting = is_alerting(event_type, count, phase, params);
            let color = region_fill(region.slot, alerting);
            let text = caption(event_type, region.slot, count, last_match.as_ref());

            log::debug!(
                "{} {}: count={} alerting={} phase={}",
                event_type,
                region.slot,
                count,
                alerting,
                phase
            );

            if frame.is_some() {
                paints.push(RegionPaint {
                    vertices: &region.vertices,
                    fill: color,
                    number: region.slot.number(),
                    caption: text.clone().map(|t| (t, color)),
                });
            }
            outcomes.push(RegionOutcome {
                slot: region.slot,
                count,
                alerting,
                caption: text,
            });
        }

        let annotated_frame = frame.map(|f| self.renderer.compose(f, &paints, params.alpha));

        self.blink_phase = (self.blink_phase + 1) % BLINK_PERIOD;

        Ok(ClassificationResult {
            annotated_frame,
            counts,
            tagged,
            regions: outcomes,
            blink_phase: phase,
        })
    }

    /// Tag every detection whose center lies in `region`. Returns the last match.
    fn match_region(
        region: &RoiRegion,
        tagged: &mut [TaggedDetection],
        counts: &mut RegionCounts,
    ) -> Option<Detection> {
        let mut last = None;
        for entry in tagged.iter_mut() {
            if locate(entry.detection.center_px(), &region.vertices).is_member() {
                log::debug!(
                    "region {} has {} (score {:.2})",
                    region.slot.number(),
                    entry.detection.label(),
                    entry.detection.score
                );
                entry.regions.push(region.slot);
                counts.increment(region.slot);
                last = Some(entry.detection);
            }
        }
        last
    }
}

/// Color a region is painted with for the given outcome.
pub fn region_fill(slot: RoiSlot, alerting: bool) -> Rgb<u8> {
    if alerting {
        ALERT_COLOR
    } else {
        slot.color()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [[i32; 2]; 4] = [[0, 0], [100, 0], [100, 100], [0, 100]];

    fn config_with(event_type: EventType, regions: &[(RoiSlot, &[[i32; 2]])]) -> EventConfig {
        let mut config = EventConfig::empty(event_type);
        for (slot, vertices) in regions {
            config.set_vertices(*slot, vertices.to_vec());
        }
        config
    }

    fn det(class_id: i32, score: f32, bbox: (f32, f32, f32, f32)) -> Detection {
        Detection {
            class_id,
            score,
            xmin: bbox.0,
            ymin: bbox.1,
            xmax: bbox.2,
            ymax: bbox.3,
        }
    }

    fn outcome(result: &ClassificationResult, slot: RoiSlot) -> &RegionOutcome {
        result.regions.iter().find(|r| r.slot == slot).expect("region outcome")
    }

    #[test]
    fn parked_car_counts_without_alert() {
        let config = config_with(EventType::MonitorVehicle, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let car = det(CLASS_CAR, 0.9, (10.0, 10.0, 50.0, 50.0));

        let result = classifier
            .classify(&[car], None, EventType::MonitorVehicle, &ClassifyParams::default())
            .unwrap();

        assert_eq!(result.counts.get(RoiSlot::Roi1), 1);
        let roi1 = outcome(&result, RoiSlot::Roi1);
        assert!(!roi1.alerting);
        assert_eq!(roi1.caption.as_deref(), Some("My car in Location 1"));
        assert_eq!(result.tagged[0].regions, vec![RoiSlot::Roi1]);
        assert!(result.annotated_frame.is_none());
    }

    #[test]
    fn stranger_alerts_only_in_first_half_of_blink_cycle() {
        let config = config_with(EventType::AlertStranger, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let person = det(CLASS_PERSON, 0.9, (10.0, 10.0, 50.0, 50.0));
        let params = ClassifyParams::default();

        for call in 0..10u8 {
            let result = classifier
                .classify(&[person], None, EventType::AlertStranger, &params)
                .unwrap();
            assert_eq!(result.blink_phase, call);
            assert_eq!(result.counts.get(RoiSlot::Roi1), 1);
            let roi1 = outcome(&result, RoiSlot::Roi1);
            assert_eq!(roi1.alerting, call < 5, "phase {}", call);
            assert_eq!(
                roi1.caption.as_deref(),
                Some("1 Stranger Intrusion in Location 1")
            );
        }
        assert_eq!(classifier.blink_phase(), 0);
    }

    #[test]
    fn low_scores_are_filtered_in_every_event_type() {
        for event_type in EventType::ALL {
            let config = config_with(event_type, &[(RoiSlot::Roi1, &SQUARE)]);
            let mut classifier = RoiClassifier::new(config);
            let weak = det(CLASS_CAR, 0.4, (10.0, 10.0, 50.0, 50.0));
            let weak_person = det(CLASS_PERSON, 0.4, (10.0, 10.0, 50.0, 50.0));
            let at_threshold = det(CLASS_CAR, 0.5, (10.0, 10.0, 50.0, 50.0));

            let result = classifier
                .classify(
                    &[weak, weak_person, at_threshold],
                    None,
                    event_type,
                    &ClassifyParams::default(),
                )
                .unwrap();
            assert_eq!(result.counts.get(RoiSlot::Roi1), 0, "{}", event_type);
            assert!(result.tagged.is_empty());
        }
    }

    #[test]
    fn nan_scores_and_non_finite_boxes_are_dropped() {
        let config = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let nan_score = det(CLASS_CAR, f32::NAN, (10.0, 10.0, 20.0, 20.0));
        let infinite = det(CLASS_CAR, 0.9, (10.0, 10.0, f32::INFINITY, 20.0));
        let nan_box = det(CLASS_CAR, 0.9, (f32::NAN, 10.0, 20.0, 20.0));

        let result = classifier
            .classify(
                &[nan_score, infinite, nan_box],
                None,
                EventType::EventStat,
                &ClassifyParams::default(),
            )
            .unwrap();
        assert_eq!(result.counts.get(RoiSlot::Roi1), 0);
        assert!(result.tagged.is_empty());
    }

    #[test]
    fn huge_boxes_land_outside_without_overflow() {
        let config = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let wide = det(CLASS_CAR, 0.9, (0.0, 10.0, f32::MAX, 20.0));
        let far_left = det(CLASS_CAR, 0.9, (-f32::MAX, 10.0, 0.0, 20.0));

        let result = classifier
            .classify(&[wide, far_left], None, EventType::EventStat, &ClassifyParams::default())
            .unwrap();
        assert_eq!(result.counts.get(RoiSlot::Roi1), 0);
        assert_eq!(result.tagged.len(), 2);
        assert!(result.tagged.iter().all(|t| t.regions.is_empty()));
    }

    #[test]
    fn annotated_frame_blinks_between_alert_and_slot_color() {
        let config = config_with(EventType::AlertStranger, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let person = det(CLASS_PERSON, 0.9, (10.0, 10.0, 50.0, 50.0));
        let frame = RgbImage::new(130, 130);
        let params = ClassifyParams {
            alpha: 1.0,
            ..ClassifyParams::default()
        };

        for call in 0..10u8 {
            let result = classifier
                .classify(&[person], Some(&frame), EventType::AlertStranger, &params)
                .unwrap();
            let annotated = result.annotated_frame.expect("annotated frame");
            let expected = if call < 5 { ALERT_COLOR } else { RoiSlot::Roi1.color() };
            assert_eq!(annotated.get_pixel(50, 50), &expected, "phase {}", call);
            // outside every region the frame is untouched
            assert_eq!(annotated.get_pixel(120, 120), &Rgb([0, 0, 0]));
        }
    }

    #[test]
    fn empty_vehicle_region_raises_missing_alert() {
        let config = config_with(EventType::MonitorVehicle, &[(RoiSlot::Roi2, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        // a person is not a vehicle
        let person = det(CLASS_PERSON, 0.9, (10.0, 10.0, 50.0, 50.0));

        let result = classifier
            .classify(&[person], None, EventType::MonitorVehicle, &ClassifyParams::default())
            .unwrap();
        let roi2 = outcome(&result, RoiSlot::Roi2);
        assert_eq!(roi2.count, 0);
        assert!(roi2.alerting);
        assert_eq!(
            roi2.caption.as_deref(),
            Some("!!!No or missing vehicle Alert in Location 2!!!")
        );
    }

    #[test]
    fn event_stat_alerts_at_vehicle_threshold() {
        let config = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let params = ClassifyParams {
            vehicle_threshold: 3,
            ..ClassifyParams::default()
        };
        let two: Vec<Detection> = (0..2).map(|_| det(7, 0.8, (10.0, 10.0, 20.0, 20.0))).collect();
        let three: Vec<Detection> = (0..3).map(|_| det(CLASS_CAR, 0.8, (10.0, 10.0, 20.0, 20.0))).collect();

        let below = classifier.classify(&two, None, EventType::EventStat, &params).unwrap();
        assert!(!outcome(&below, RoiSlot::Roi1).alerting);
        assert_eq!(outcome(&below, RoiSlot::Roi1).caption.as_deref(), Some("Lane 1 : 2"));

        let at = classifier.classify(&three, None, EventType::EventStat, &params).unwrap();
        assert!(outcome(&at, RoiSlot::Roi1).alerting);

        let empty = classifier.classify(&[], None, EventType::EventStat, &params).unwrap();
        assert_eq!(outcome(&empty, RoiSlot::Roi1).caption, None);
    }

    #[test]
    fn overlapping_regions_each_count_the_detection() {
        let inner: [[i32; 2]; 4] = [[20, 20], [60, 20], [60, 60], [20, 60]];
        let config = config_with(
            EventType::EventStat,
            &[(RoiSlot::Roi1, &SQUARE), (RoiSlot::Roi3, &inner)],
        );
        let mut classifier = RoiClassifier::new(config);
        let car = det(CLASS_CAR, 0.9, (20.0, 20.0, 40.0, 40.0));
        let outside = det(CLASS_CAR, 0.9, (200.0, 200.0, 220.0, 220.0));

        let result = classifier
            .classify(&[car, outside], None, EventType::EventStat, &ClassifyParams::default())
            .unwrap();
        assert_eq!(result.counts.get(RoiSlot::Roi1), 1);
        assert_eq!(result.counts.get(RoiSlot::Roi3), 1);
        assert_eq!(result.counts.total(), 2);
        assert_eq!(result.tagged.len(), 2);
        assert_eq!(result.tagged[0].regions, vec![RoiSlot::Roi1, RoiSlot::Roi3]);
        assert!(result.tagged[1].regions.is_empty());
    }

    #[test]
    fn boundary_center_is_inside() {
        let config = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        // center (100, 50) sits on the right edge
        let edge = det(CLASS_CAR, 0.9, (90.0, 40.0, 110.0, 60.0));
        let result = classifier
            .classify(&[edge], None, EventType::EventStat, &ClassifyParams::default())
            .unwrap();
        assert_eq!(result.counts.get(RoiSlot::Roi1), 1);
    }

    #[test]
    fn inactive_regions_are_neutral() {
        let config = config_with(EventType::MonitorVehicle, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let car = det(CLASS_CAR, 0.9, (10.0, 10.0, 50.0, 50.0));
        let frame = RgbImage::new(200, 200);

        let result = classifier
            .classify(&[car], Some(&frame), EventType::MonitorVehicle, &ClassifyParams::default())
            .unwrap();
        for slot in [RoiSlot::Roi2, RoiSlot::Roi3, RoiSlot::Roi4, RoiSlot::Roi5] {
            assert_eq!(result.counts.get(slot), 0);
        }
        // only the active region reports, so no missing-vehicle alerts elsewhere
        assert_eq!(result.regions.len(), 1);
        let annotated = result.annotated_frame.unwrap();
        assert_eq!(annotated.get_pixel(150, 150), &Rgb([0, 0, 0]));
    }

    #[test]
    fn result_is_invariant_under_vertex_rotation() {
        let base: Vec<[i32; 2]> = vec![[0, 0], [80, 0], [80, 80], [40, 30], [0, 80]];
        let dets = vec![
            det(CLASS_CAR, 0.9, (10.0, 5.0, 30.0, 15.0)),
            det(CLASS_CAR, 0.9, (30.0, 50.0, 50.0, 70.0)),
            det(CLASS_CAR, 0.9, (70.0, 70.0, 90.0, 90.0)),
        ];
        let mut expected = None;
        for shift in 0..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(shift);
            let config = config_with(EventType::EventStat, &[(RoiSlot::Roi4, &rotated)]);
            let mut classifier = RoiClassifier::new(config);
            let result = classifier
                .classify(&dets, None, EventType::EventStat, &ClassifyParams::default())
                .unwrap();
            let tags: Vec<Vec<RoiSlot>> = result.tagged.iter().map(|t| t.regions.clone()).collect();
            let observed = (result.counts.clone(), tags);
            match &expected {
                None => expected = Some(observed),
                Some(first) => assert_eq!(&observed, first, "rotation {}", shift),
            }
        }
    }

    #[test]
    fn replacing_config_isolates_regions_and_keeps_blink_phase() {
        let stat = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let far: [[i32; 2]; 4] = [[500, 500], [600, 500], [600, 600], [500, 600]];
        let stranger = config_with(EventType::AlertStranger, &[(RoiSlot::Roi2, &far)]);
        let mut classifier = RoiClassifier::new(stat);
        let person = det(CLASS_PERSON, 0.9, (10.0, 10.0, 50.0, 50.0));
        let params = ClassifyParams::default();

        classifier.classify(&[person], None, EventType::EventStat, &params).unwrap();
        classifier.classify(&[person], None, EventType::EventStat, &params).unwrap();
        classifier.replace_config(stranger);
        assert_eq!(classifier.blink_phase(), 2);

        let result = classifier
            .classify(&[person], None, EventType::AlertStranger, &params)
            .unwrap();
        assert_eq!(result.counts.total(), 0);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].slot, RoiSlot::Roi2);
        assert_eq!(result.blink_phase, 2);
    }

    #[test]
    fn mismatched_event_type_is_rejected() {
        let config = config_with(EventType::EventStat, &[(RoiSlot::Roi1, &SQUARE)]);
        let mut classifier = RoiClassifier::new(config);
        let err = classifier
            .classify(&[], None, EventType::MonitorVehicle, &ClassifyParams::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EventMismatch { .. })
        ));
        assert_eq!(classifier.blink_phase(), 0);
    }

    #[test]
    fn counts_serialise_with_slot_names() {
        let mut counts = RegionCounts::zeroed();
        counts.increment(RoiSlot::Roi3);
        assert_eq!(
            counts.to_json().unwrap(),
            r#"{"ROI 1":0,"ROI 2":0,"ROI 3":1,"ROI 4":0,"ROI 5":0}"#
        );
        assert_eq!(region_fill(RoiSlot::Roi2, true), ALERT_COLOR);
        assert_eq!(region_fill(RoiSlot::Roi2, false), RoiSlot::Roi2.color());
    }
}
