pub mod codec;
pub mod config;
pub mod errors;
pub mod feedback;
pub mod profile;
pub mod types;

pub use codec::{FrameCodec, RawCodec};
pub use config::{ClientConfig, QosConfig};
pub use errors::{CallError, DirectoryError, MediaError, VidLinkError};
pub use feedback::MediaFeedback;
pub use profile::UserProfile;
pub use types::*;
