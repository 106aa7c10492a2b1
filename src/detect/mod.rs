mod backend;
mod backends;
mod result;

pub use backend::{build_detector, Detector, DetectorKind, DetectorOptions};
pub use backends::{ReplayDetector, StubDetector};
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use result::{class_label, Detection, CLASS_BICYCLE, CLASS_CAR, CLASS_MOTORCYCLE, CLASS_PERSON};
