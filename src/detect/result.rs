use serde::{Deserialize, Serialize};

pub const CLASS_PERSON: i32 = 0;
pub const CLASS_BICYCLE: i32 = 1;
pub const CLASS_CAR: i32 = 2;
pub const CLASS_MOTORCYCLE: i32 = 3;

/// One detector output box, in frame pixel space.
///
/// Matches the detector's `[class, score, xmin, ymin, xmax, ymax]` row layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub score: f32,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl Detection {
    /// Bounding-box center.
    pub fn center(&self) -> (f32, f32) {
        (
            self.xmin + (self.xmax - self.xmin) / 2.0,
            self.ymin + (self.ymax - self.ymin) / 2.0,
        )
    }

    /// Center truncated to whole pixels, as used for region membership.
    ///
    /// Saturates to the `i32` range that ROI vertices live in; NaN maps to 0.
    pub fn center_px(&self) -> (i64, i64) {
        let (x, y) = self.center();
        (x as i32 as i64, y as i32 as i64)
    }

    /// True when every box coordinate is finite.
    pub fn is_finite(&self) -> bool {
        [self.xmin, self.ymin, self.xmax, self.ymax]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn label(&self) -> &'static str {
        class_label(self.class_id)
    }
}

pub fn class_label(class_id: i32) -> &'static str {
    match class_id {
        CLASS_PERSON => "person",
        CLASS_BICYCLE => "bicycle",
        CLASS_CAR => "car",
        CLASS_MOTORCYCLE => "motorcycle",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_truncates_toward_zero() {
        let det = Detection {
            class_id: CLASS_CAR,
            score: 0.9,
            xmin: 10.0,
            ymin: 10.0,
            xmax: 51.0,
            ymax: 50.0,
        };
        assert_eq!(det.center(), (30.5, 30.0));
        assert_eq!(det.center_px(), (30, 30));
        assert_eq!(det.label(), "car");
        assert_eq!(class_label(17), "Unknown");
    }

    #[test]
    fn center_saturates_to_vertex_range() {
        let det = Detection {
            class_id: CLASS_CAR,
            score: 0.9,
            xmin: 0.0,
            ymin: -f32::MAX,
            xmax: f32::MAX,
            ymax: 0.0,
        };
        assert!(det.is_finite());
        assert_eq!(det.center_px(), (i32::MAX as i64, i32::MIN as i64));

        let broken = Detection { xmax: f32::INFINITY, ..det };
        assert!(!broken.is_finite());
    }
}
