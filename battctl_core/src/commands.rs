//! Operator commands delivered to a running core.
//!
//! Senders may live on any thread; the core drains the queue at the start of
//! every poll cycle so a command takes effect atomically with one cycle.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Set the SoC estimate, clamped to 0..=100.
    ResetSoc(f64),
    ForceChargeOff(bool),
    ForceDischargeOff(bool),
    ForceBalancingOff(bool),
    ForceHeatingOff(bool),
    /// Reset the lifetime history counters.
    ClearHistory,
}

/// Force-off toggles layered on the published `allow_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Overrides {
    pub charge_off: bool,
    pub discharge_off: bool,
    pub balancing_off: bool,
    pub heating_off: bool,
}

impl Overrides {
    /// Apply a toggle. Returns `false` for commands that are not toggles.
    pub fn apply(&mut self, cmd: Command) -> bool {
        let (slot, on) = match cmd {
            Command::ForceChargeOff(v) => (&mut self.charge_off, v),
            Command::ForceDischargeOff(v) => (&mut self.discharge_off, v),
            Command::ForceBalancingOff(v) => (&mut self.balancing_off, v),
            Command::ForceHeatingOff(v) => (&mut self.heating_off, v),
            Command::ResetSoc(_) | Command::ClearHistory => return false,
        };
        *slot = on;
        true
    }
}

/// Cloneable handle for submitting commands.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    pub fn send(&self, cmd: Command) -> Result<(), CoreError> {
        self.tx.send(cmd).map_err(|_| CoreError::CommandQueueClosed)
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Everything queued so far, in submission order.
    pub fn drain(&self) -> Vec<Command> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => out.push(cmd),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order() {
        let q = CommandQueue::new();
        let tx = q.sender();
        tx.send(Command::ForceChargeOff(true)).unwrap();
        tx.send(Command::ResetSoc(42.0)).unwrap();
        assert_eq!(
            q.drain(),
            vec![Command::ForceChargeOff(true), Command::ResetSoc(42.0)]
        );
        assert!(q.drain().is_empty());
    }

    #[test]
    fn sender_fails_once_queue_is_gone() {
        let q = CommandQueue::new();
        let tx = q.sender();
        drop(q);
        assert_eq!(
            tx.send(Command::ForceHeatingOff(true)),
            Err(CoreError::CommandQueueClosed)
        );
    }

    #[test]
    fn toggles_set_and_clear() {
        let mut o = Overrides::default();
        assert!(o.apply(Command::ForceDischargeOff(true)));
        assert!(o.discharge_off);
        assert!(o.apply(Command::ForceDischargeOff(false)));
        assert!(!o.discharge_off);
        assert!(!o.apply(Command::ResetSoc(10.0)));
    }
}
