//! In-process loopback backend.
//!
//! Outputs record every written message into shared logs; inputs replay
//! whatever a test (or the CLI's portless mode) feeds them. This is a
//! first-class backend, not a test shim: virtual ports are part of the
//! bus model, and the integration suite drives the whole engine through
//! it without any hardware.

use crate::traits::{MidiBackend, MidiError, PortIn, PortInfo, PortOut};
use crossbeam_channel::{bounded, Receiver, Sender};
use segno_core::MidiMsg;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const FEED_CAPACITY: usize = 1024;

/// Shared view of one output port's written messages.
#[derive(Clone, Default)]
pub struct OutTap {
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl OutTap {
    /// Everything written so far, in order.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().clone()
    }

    /// Count of messages whose status byte matches exactly.
    pub fn count_status(&self, status: u8) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.first() == Some(&status))
            .count()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for pushing events into a loopback input port.
#[derive(Clone)]
pub struct Feeder {
    tx: Sender<MidiMsg>,
}

impl Feeder {
    pub fn feed(&self, msg: MidiMsg) {
        let _ = self.tx.try_send(msg);
    }
}

pub struct LoopbackOut {
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PortOut for LoopbackOut {
    fn write(&mut self, bytes: &[u8]) -> Result<(), MidiError> {
        self.log.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

pub struct LoopbackIn {
    rx: Receiver<MidiMsg>,
    /// A message consumed by poll(), held for the next read().
    pending: Option<MidiMsg>,
}

impl PortIn for LoopbackIn {
    fn poll(&mut self, timeout: Duration) -> bool {
        // recv_timeout consumes, so peek via is_empty first
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

/// A fixed set of virtual ports created up front.
pub struct LoopbackBackend {
    taps: Vec<OutTap>,
    feeders: Vec<Feeder>,
    pending_ins: Vec<Option<Receiver<MidiMsg>>>,
}

impl LoopbackBackend {
    /// Backend with `outs` output ports and `ins` input ports.
    pub fn new(outs: usize, ins: usize) -> Self {
        let taps = (0..outs).map(|_| OutTap::default()).collect();
        let mut feeders = Vec::with_capacity(ins);
        let mut pending_ins = Vec::with_capacity(ins);
        for _ in 0..ins {
            let (tx, rx) = bounded(FEED_CAPACITY);
            feeders.push(Feeder { tx });
            pending_ins.push(Some(rx));
        }
        Self { taps, feeders, pending_ins }
    }

    /// Observer for output port `port`; clone before handing the backend
    /// to `MasterBus`.
    pub fn tap(&self, port: usize) -> Option<OutTap> {
        self.taps.get(port).cloned()
    }

    /// Feeder for input port `port`.
    pub fn feeder(&self, port: usize) -> Option<Feeder> {
        self.feeders.get(port).cloned()
    }
}

impl MidiBackend for LoopbackBackend {
    type Out = LoopbackOut;
    type In = LoopbackIn;

    fn client_name(&self) -> &str {
        "loopback"
    }

    fn scan_outputs(&self) -> Result<Vec<PortInfo>, MidiError> {
        Ok((0..self.taps.len())
            .map(|i| PortInfo::new(0, i as i32, format!("loopback out {}", i)))
            .collect())
    }

    fn scan_inputs(&self) -> Result<Vec<PortInfo>, MidiError> {
        Ok((0..self.feeders.len())
            .map(|i| PortInfo::new(0, i as i32, format!("loopback in {}", i)))
            .collect())
    }

    fn open_out(&mut self, info: &PortInfo) -> Result<Self::Out, MidiError> {
        let tap = self
            .taps
            .get(info.port as usize)
            .ok_or_else(|| MidiError::PortOpen(format!("no such port {}", info.port)))?;
        Ok(LoopbackOut { log: tap.log.clone() })
    }

    fn open_in(&mut self, info: &PortInfo) -> Result<Self::In, MidiError> {
        let slot = self
            .pending_ins
            .get_mut(info.port as usize)
            .ok_or_else(|| MidiError::PortOpen(format!("no such port {}", info.port)))?;
        let rx = slot
            .take()
            .ok_or_else(|| MidiError::PortOpen(format!("port {} already open", info.port)))?;
        Ok(LoopbackIn { rx, pending: None })
    }

    fn virtual_out(&mut self, _name: &str) -> Result<Self::Out, MidiError> {
        let tap = OutTap::default();
        let out = LoopbackOut { log: tap.log.clone() };
        self.taps.push(tap);
        Ok(out)
    }

    fn virtual_in(&mut self, _name: &str) -> Result<Self::In, MidiError> {
        let (tx, rx) = bounded(FEED_CAPACITY);
        self.feeders.push(Feeder { tx });
        Ok(LoopbackIn { rx, pending: None })
    }
}
