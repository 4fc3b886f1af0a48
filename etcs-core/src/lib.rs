//! Shared protocol logic for the ETCS OBU/RBC demonstrator: the
//! bit-packed codec, the safety encapsulation layer, the handshake and
//! key derivation, the session state machine, the message engine, the
//! Movement Authority generator, dedup, and KPI bookkeeping.

pub mod clock;
pub mod codec;
pub mod dedup;
pub mod engine;
pub mod handshake;
pub mod kpi;
pub mod packet15;
pub mod safety;
pub mod state_machine;
