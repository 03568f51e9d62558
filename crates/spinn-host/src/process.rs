//! Batched request/response exchanges
//!
//! A [`MultiConnectionProcess`] collects requests for many cores, sends them
//! with a bounded number in flight, waits for every reply at
//! [`finish`](MultiConnectionProcess::finish) and then reports all failures
//! at once. Nothing is cancelled early: a failure on one core never stops
//! the requests to the others.
//!
//! ```text
//! send_request ─┐
//! send_request ─┼─► queue ─► [worker × window] ─► transceiver.exchange
//! send_request ─┘                   │
//!                                   └─► failures (Mutex<Vec<_>>)
//! finish ─► barrier ─► check_for_error ─► BatchFailed { failures }
//! ```

use crate::address::CoreSubsets;
use crate::config::ExchangeConfig;
use crate::error::{HostError, ProtocolFailure, Result};
use crate::scp::{ScpCommand, ScpRequest, ScpResponse};
use crate::transceiver::Transceiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, info};

/// Send one request and check its reply
fn exchange_one(transceiver: &dyn Transceiver, request: &ScpRequest, seq: u16) -> Result<()> {
    let core = request.destination();
    let reply = transceiver
        .exchange(core, request.encode(seq))?
        .ok_or(HostError::Timeout {
            opcode: request.opcode(),
            core,
        })?;
    ScpResponse::decode(request, seq, reply)?.check_ok(request)
}

/// Concurrent batch of SCP requests with a single error barrier
#[derive(Debug)]
pub struct MultiConnectionProcess<'a> {
    transceiver: &'a dyn Transceiver,
    config: ExchangeConfig,
    queued: Vec<(ScpRequest, u16)>,
    next_seq: u16,
    sent: usize,
    failures: Mutex<Vec<ProtocolFailure>>,
}

impl<'a> MultiConnectionProcess<'a> {
    /// Process sending through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver, config: ExchangeConfig) -> Self {
        Self {
            transceiver,
            config,
            queued: Vec::new(),
            next_seq: 0,
            sent: 0,
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Queue `request`; returns the sequence number it will carry
    pub fn send_request(&mut self, request: ScpRequest) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.queued.push((request, seq));
        seq
    }

    /// Requests queued and not yet sent
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queued.len()
    }

    /// Send every queued request and wait for every reply
    ///
    /// At most `config.window` requests are in flight at once. Failures are
    /// recorded, not returned; see [`check_for_error`](Self::check_for_error).
    pub fn finish(&mut self) {
        let batch = std::mem::take(&mut self.queued);
        if batch.is_empty() {
            return;
        }
        let workers = self.config.window.min(batch.len());
        let next = AtomicUsize::new(0);
        let transceiver = self.transceiver;
        let failures = &self.failures;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some((request, seq)) = batch.get(i) else {
                        break;
                    };
                    debug!(
                        "SCP seq {seq}: command {} to {}",
                        request.opcode(),
                        request.destination()
                    );
                    if let Err(error) = exchange_one(transceiver, request, *seq) {
                        failures.lock().push(ProtocolFailure {
                            core: request.destination(),
                            opcode: request.opcode(),
                            error,
                        });
                    }
                });
            }
        });

        self.sent += batch.len();
        debug!("Batch of {} requests finished with {workers} workers", batch.len());
    }

    /// Raise every failure recorded since the last check
    ///
    /// # Errors
    ///
    /// Returns `HostError::BatchFailed` listing each failed request.
    pub fn check_for_error(&mut self) -> Result<()> {
        let failures = std::mem::take(&mut *self.failures.lock());
        let total = std::mem::take(&mut self.sent);
        if failures.is_empty() {
            return Ok(());
        }
        Err(HostError::BatchFailed { total, failures })
    }
}

/// Route-table commands for the extra monitor cores
#[derive(Debug)]
pub struct McRoutesProcess<'a> {
    transceiver: &'a dyn Transceiver,
    config: ExchangeConfig,
}

impl<'a> McRoutesProcess<'a> {
    /// Process sending through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver, config: ExchangeConfig) -> Self {
        Self {
            transceiver,
            config,
        }
    }

    /// Load the system multicast routes on every core
    ///
    /// # Errors
    ///
    /// Returns `HostError::BatchFailed` naming every core that did not
    /// acknowledge.
    pub fn load_system_mc_routes(&self, cores: &CoreSubsets) -> Result<()> {
        self.run(cores, ScpCommand::LoadSystemMcRoutes)
    }

    /// Load the application multicast routes on every core
    ///
    /// # Errors
    ///
    /// Returns `HostError::BatchFailed` naming every core that did not
    /// acknowledge.
    pub fn load_application_mc_routes(&self, cores: &CoreSubsets) -> Result<()> {
        self.run(cores, ScpCommand::LoadApplicationMcRoutes)
    }

    /// Save the current application routes on every core
    ///
    /// # Errors
    ///
    /// Returns `HostError::BatchFailed` naming every core that did not
    /// acknowledge.
    pub fn save_application_mc_routes(&self, cores: &CoreSubsets) -> Result<()> {
        self.run(cores, ScpCommand::SaveApplicationMcRoutes)
    }

    fn run(&self, cores: &CoreSubsets, command: ScpCommand) -> Result<()> {
        let mut process = MultiConnectionProcess::new(self.transceiver, self.config);
        for core in cores.cores() {
            process.send_request(ScpRequest::new(core, command));
        }
        info!("{}: {} cores", command.description(), process.pending());
        process.finish();
        process.check_for_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ChipAddress;
    use crate::backends::{SoftwareTransceiver, WireOp};
    use spinn_chip::scp::result;

    fn cores(n: u8) -> CoreSubsets {
        (1..=n)
            .map(|p| ChipAddress::new(0, 0, p).unwrap())
            .collect()
    }

    #[test]
    fn sequence_numbers_increase_per_request() {
        let machine = SoftwareTransceiver::new();
        let mut process = MultiConnectionProcess::new(&machine, ExchangeConfig::default());
        let core = ChipAddress::new(0, 0, 1).unwrap();
        assert_eq!(process.send_request(ScpRequest::load_system_mc_routes(core)), 0);
        assert_eq!(process.send_request(ScpRequest::load_system_mc_routes(core)), 1);
        assert_eq!(process.pending(), 2);
        process.finish();
        assert_eq!(process.pending(), 0);
        process.check_for_error().unwrap();
    }

    #[test]
    fn all_cores_acknowledge() {
        let machine = SoftwareTransceiver::new();
        let routes = McRoutesProcess::new(&machine, ExchangeConfig::with_window(3));
        let targets = cores(10);
        routes.load_application_mc_routes(&targets).unwrap();
        for core in targets.cores() {
            assert!(machine.application_routes_loaded(core));
        }
        assert_eq!(machine.count(|op| matches!(op, WireOp::Scp { .. })), 10);
    }

    #[test]
    fn save_then_restore_system_table() {
        let machine = SoftwareTransceiver::new();
        let routes = McRoutesProcess::new(&machine, ExchangeConfig::default());
        let targets = cores(2);
        routes.load_application_mc_routes(&targets).unwrap();
        routes.save_application_mc_routes(&targets).unwrap();
        routes.load_system_mc_routes(&targets).unwrap();
        for core in targets.cores() {
            assert!(machine.application_routes_saved(core));
            assert!(machine.system_routes_loaded(core));
            assert!(!machine.application_routes_loaded(core));
        }
        assert_eq!(
            ScpCommand::SaveApplicationMcRoutes.description(),
            "save application multicast routes"
        );
    }

    #[test]
    fn nak_and_timeout_are_aggregated() {
        let machine = SoftwareTransceiver::new();
        let nak = ChipAddress::new(0, 0, 3).unwrap();
        let silent = ChipAddress::new(0, 0, 5).unwrap();
        let opcode = ScpCommand::LoadSystemMcRoutes.opcode();
        machine.inject_nak(nak, opcode, result::BUF);
        machine.make_silent(silent);

        let routes = McRoutesProcess::new(&machine, ExchangeConfig::with_window(2));
        let err = routes.load_system_mc_routes(&cores(6)).unwrap_err();

        let HostError::BatchFailed { total, failures } = &err else {
            panic!("expected a batch failure, got {err}");
        };
        assert_eq!(*total, 6);
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|f| f.core == nak
            && matches!(f.error, HostError::NegativeAcknowledgement { rc, .. } if rc == result::BUF)));
        assert!(failures
            .iter()
            .any(|f| f.core == silent && matches!(f.error, HostError::Timeout { .. })));

        // Every request was still attempted
        assert_eq!(machine.count(|op| matches!(op, WireOp::Scp { .. })), 6);
        let mut failed = err.failed_cores();
        failed.sort();
        assert_eq!(failed, vec![nak, silent]);
    }
}
