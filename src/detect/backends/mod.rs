pub mod replay;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayDetector;
pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
