//! midir-based backend for real hardware and virtual ALSA/CoreMIDI ports.
//!
//! midir hands each connection its own client, so every open creates a
//! fresh `MidiInput`/`MidiOutput`. Input bytes are decoded inside the
//! midir callback and forwarded over a bounded channel; the input thread
//! polls the channel, never the device.

use crate::traits::{MidiBackend, MidiError, PortIn, PortInfo, PortOut};
use crossbeam_channel::{bounded, Receiver};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use segno_core::MidiMsg;
use std::time::Duration;

const INPUT_CAPACITY: usize = 1024;

/// Backend over the midir crate.
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self { client_name: client_name.into() }
    }

    fn out_client(&self) -> Result<MidiOutput, MidiError> {
        MidiOutput::new(&self.client_name).map_err(|e| MidiError::Backend(e.to_string()))
    }

    fn in_client(&self) -> Result<MidiInput, MidiError> {
        let mut input =
            MidiInput::new(&self.client_name).map_err(|e| MidiError::Backend(e.to_string()))?;
        input.ignore(Ignore::None);
        Ok(input)
    }
}

pub struct MidirOut {
    conn: MidiOutputConnection,
}

impl PortOut for MidirOut {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        self.conn
            .send(bytes)
            .map_err(|e| MidiError::Backend(e.to_string()))
    }
}

pub struct MidirIn {
    // Held so the callback stays alive; dropping it closes the port.
    _conn: MidiInputConnection<()>,
    rx: Receiver<MidiMsg>,
    pending: Option<MidiMsg>,
}

impl PortIn for MidirIn {
    fn poll(&mut self, timeout: Duration) -> bool {
        if self.pending.is_some() || !self.rx.is_empty() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => {
                self.pending = Some(msg);
                true
            }
            Err(_) => false,
        }
    }

    fn read(&mut self) -> Option<MidiMsg> {
        if let Some(msg) = self.pending.take() {
            return Some(msg);
        }
        self.rx.try_recv().ok()
    }
}

impl MidiBackend for MidirBackend {
    type Out = MidirOut;
    type In = MidirIn;

    fn client_name(&self) -> &str {
        &self.client_name
    }

    fn scan_outputs(&self) -> Result<Vec<PortInfo>, MidiError> {
        let client = self.out_client()?;
        Ok(client
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let name = client.port_name(p).unwrap_or_else(|_| format!("out {}", i));
                PortInfo::new(0, i as i32, name)
            })
            .collect())
    }

    fn scan_inputs(&self) -> Result<Vec<PortInfo>, MidiError> {
        let client = self.in_client()?;
        Ok(client
            .ports()
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let name = client.port_name(p).unwrap_or_else(|_| format!("in {}", i));
                PortInfo::new(0, i as i32, name)
            })
            .collect())
    }

    fn open_out(&mut self, info: &PortInfo) -> Result<Self::Out, MidiError> {
        let client = self.out_client()?;
        let ports = client.ports();
        // Prefer the name; enumeration order shifts under hot-plug
        let port = ports
            .iter()
            .find(|p| client.port_name(p).map(|n| n == info.name).unwrap_or(false))
            .or_else(|| ports.get(info.port as usize))
            .ok_or_else(|| MidiError::PortOpen(format!("{} not found", info.name)))?;
        let conn = client
            .connect(port, &self.client_name)
            .map_err(|e| MidiError::PortOpen(e.to_string()))?;
        Ok(MidirOut { conn })
    }

    fn open_in(&mut self, info: &PortInfo) -> Result<Self::In, MidiError> {
        let client = self.in_client()?;
        let ports = client.ports();
        let port = ports
            .iter()
            .find(|p| client.port_name(p).map(|n| n == info.name).unwrap_or(false))
            .or_else(|| ports.get(info.port as usize))
            .cloned()
            .ok_or_else(|| MidiError::PortOpen(format!("{} not found", info.name)))?;

        let (tx, rx) = bounded(INPUT_CAPACITY);
        let conn = client
            .connect(
                &port,
                &self.client_name,
                move |_stamp, bytes, _| {
                    if let Some(msg) = MidiMsg::from_bytes(bytes) {
                        // Drop on overflow; input must never block the driver
                        let _ = tx.try_send(msg);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::PortOpen(e.to_string()))?;

        Ok(MidirIn { _conn: conn, rx, pending: None })
    }

    #[cfg(unix)]
    fn virtual_out(&mut self, name: &str) -> Result<Self::Out, MidiError> {
        use midir::os::unix::VirtualOutput;
        let client = self.out_client()?;
        let conn = client
            .create_virtual(name)
            .map_err(|e| MidiError::PortOpen(e.to_string()))?;
        Ok(MidirOut { conn })
    }

    #[cfg(unix)]
    fn virtual_in(&mut self, name: &str) -> Result<Self::In, MidiError> {
        use midir::os::unix::VirtualInput;
        let client = self.in_client()?;
        let (tx, rx) = bounded(INPUT_CAPACITY);
        let conn = client
            .create_virtual(
                name,
                move |_stamp, bytes, _| {
                    if let Some(msg) = MidiMsg::from_bytes(bytes) {
                        let _ = tx.try_send(msg);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::PortOpen(e.to_string()))?;
        Ok(MidirIn { _conn: conn, rx, pending: None })
    }
}
