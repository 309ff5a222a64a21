//! Backend capability traits and error types.
//!
//! A backend supplies ports; everything above (bus state machines, clock
//! emission, registries) is backend-agnostic. `MasterBus` is generic over
//! a `MidiBackend` implementation, so swapping midir for a loopback — or a
//! future platform layer — touches nothing in the engine.

use segno_core::MidiMsg;
use std::time::Duration;

/// Error type for MIDI port operations.
#[derive(Debug)]
pub enum MidiError {
    /// Backend-level failure (client init, enumeration)
    Backend(String),
    /// A specific port refused to open
    PortOpen(String),
    /// Write to a port that is not open
    Closed,
    /// No ports available at all
    NoPorts,
    /// Operation the backend cannot provide
    Unsupported(&'static str),
}

impl std::fmt::Display for MidiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MidiError::Backend(msg) => write!(f, "MIDI backend error: {}", msg),
            MidiError::PortOpen(msg) => write!(f, "Port open error: {}", msg),
            MidiError::Closed => write!(f, "Port is not open"),
            MidiError::NoPorts => write!(f, "No MIDI ports available"),
            MidiError::Unsupported(what) => write!(f, "Backend does not support {}", what),
        }
    }
}

impl std::error::Error for MidiError {}

/// Identity of one enumerated port. `client`/`port` are the hardware
/// identifiers used to match hot-unplug events; backends without native
/// ids synthesize stable ones from enumeration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    pub client: i32,
    pub port: i32,
    pub name: String,
}

impl PortInfo {
    pub fn new(client: i32, port: i32, name: impl Into<String>) -> Self {
        Self { client, port, name: name.into() }
    }
}

/// An open output port.
pub trait PortOut: Send {
    /// Write one encoded message.
    fn write(&mut self, bytes: &[u8]) -> Result<(), MidiError>;

    /// Push any buffered output to the wire. Default: nothing buffered.
    fn flush(&mut self) {}
}

/// An open input port.
pub trait PortIn: Send {
    /// Block up to `timeout` for data. Returns true if a read will succeed.
    fn poll(&mut self, timeout: Duration) -> bool;

    /// Non-blocking read of the next decoded message.
    fn read(&mut self) -> Option<MidiMsg>;
}

/// A platform MIDI layer: enumerates and opens ports.
pub trait MidiBackend: Send {
    type Out: PortOut;
    type In: PortIn;

    fn client_name(&self) -> &str;

    fn scan_outputs(&self) -> Result<Vec<PortInfo>, MidiError>;
    fn scan_inputs(&self) -> Result<Vec<PortInfo>, MidiError>;

    fn open_out(&mut self, info: &PortInfo) -> Result<Self::Out, MidiError>;
    fn open_in(&mut self, info: &PortInfo) -> Result<Self::In, MidiError>;

    /// Create an app-owned virtual output port.
    fn virtual_out(&mut self, _name: &str) -> Result<Self::Out, MidiError> {
        Err(MidiError::Unsupported("virtual output ports"))
    }

    /// Create an app-owned virtual input port.
    fn virtual_in(&mut self, _name: &str) -> Result<Self::In, MidiError> {
        Err(MidiError::Unsupported("virtual input ports"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_cleanly() {
        assert_eq!(MidiError::Closed.to_string(), "Port is not open");
        assert_eq!(
            MidiError::PortOpen("busy".into()).to_string(),
            "Port open error: busy"
        );
        assert_eq!(
            MidiError::Unsupported("virtual ports").to_string(),
            "Backend does not support virtual ports"
        );
    }
}
