//! Shared wire and session data types for the ETCS OBU/RBC demonstrator:
//! session state, handshake keys, bit-packed message templates, the
//! logical ETCS message envelope, Packet 15, the Secure PDU byte layout,
//! and the fixed topic/queue/NID name tables.

mod fields;
mod handshake_wire;
mod keys;
mod message;
mod packet15;
mod pdu;
mod session;
mod source;
mod template;

pub mod nid;
pub mod topics;

pub use fields::FieldValues;
pub use handshake_wire::{Au1Wire, Au2Wire, KeyUpdateWire};
pub use keys::SessionKeys;
pub use message::EtcsMessage;
pub use packet15::{Packet15, SectionRecord, Sensor, Station, Topology, Track};
pub use pdu::{PduError, SecurePdu};
pub use session::{Event, SessionState, Transition, TransitionHistory};
pub use source::Source;
pub use template::{FieldSpec, MessageTemplate, TemplateTable};
