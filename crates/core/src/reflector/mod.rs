//! The reflector core: Frame Buffer, Reflector Stream, Reflector Session,
//! Session Registry, and the broadcast-name parsing they share (spec §2-§4).

pub mod frame_buffer;
pub mod output;
pub mod path;
pub mod registry;
pub mod session;
pub mod source;
pub mod stream;

pub use frame_buffer::{Entry, FrameBuffer, PacketKind, ReadResult};
pub use output::{OutputSink, SubscriberOutput};
pub use path::{extract_broadcast_path, strip_one_sdp_suffix, BroadcastPath};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{ReflectorSession, SetupError, SubscriberHandle};
pub use source::{SetupDirection, SourceDescriptor, StreamDescriptor, TrackTransport};
pub use stream::{Offer, ReflectorStream, StreamState, SubscriberId};
