pub mod config;
pub mod identity;
pub mod matcher;
pub mod session;
pub mod storage;

// Re-export vision types for convenience
pub use facereg_vision::{
    CommandExtractor, Descriptor, DescriptorExtractor, Detection, Frame, FrameSource, StillFrame,
};
pub use identity::Identity;
pub use session::{LastResult, Session, SessionError, SessionOptions};
