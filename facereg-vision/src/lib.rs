pub mod descriptor;
pub mod extractor;
pub mod frame;
pub mod pixel;
#[cfg(feature = "v4l")]
pub mod video;

// Re-export commonly used types
pub use descriptor::{Descriptor, Detection};
pub use extractor::{CommandExtractor, DescriptorExtractor};
pub use frame::{Frame, FrameSource, StillFrame};
#[cfg(feature = "v4l")]
pub use video::Camera;
