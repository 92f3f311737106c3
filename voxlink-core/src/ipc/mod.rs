//! Types handed across the client/host boundary.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON (log sinks, a UI bridge, a control socket).

pub mod events;
