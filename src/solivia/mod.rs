//! Delta Solivia serial protocol: checksum, command table, framing and the
//! request/reply session that owns the serial channel.

pub mod catalog;
pub mod checksum;
pub mod frame;
pub mod session;

pub use catalog::{Catalog, CatalogError, CommandCode, CommandSchema, DecodeError, DecodedSample, PayloadKind, Value};
pub use frame::{decode_response, encode_frame, encode_request, Frame, FrameDecoder, FrameError};
pub use session::{RequestError, Session, SessionOptions, SessionStats, State, TransportCause};
