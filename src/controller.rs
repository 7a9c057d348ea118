//! The allocate-verify-classify-reclaim state machine.
//!
//! `LockController` keeps allocating slices and verifying them until the
//! device runs out of memory. It then gives back every slice that verified
//! clean, keeps the faulty ones, and parks forever holding them.

use crate::error::{RegistryError, VramLockError};
use crate::registry::{RegistrySnapshot, SliceRegistry};
use crate::render::{Frame, PresentationSink};
use crate::traits::{Allocation, LockConfig, SliceDevice};
use crate::verify::{IntegrityVerifier, Verdict};
use log::{debug, info, warn};
use std::time::Instant;

/// Phase of the lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Allocating and verifying slices.
    Probing,
    /// The device reported exhaustion; clean slices are about to be released.
    Finalizing,
    /// Only faulty slices are held. Terminal.
    Parked,
}

impl Phase {
    /// Returns the human-readable name of this phase.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Probing => "probing",
            Self::Finalizing => "finalizing",
            Self::Parked => "parked",
        }
    }
}

/// Drives a `SliceDevice` through the lock protocol.
///
/// Single-threaded: each `step` runs allocate, verify, classify and render
/// to completion before returning.
pub struct LockController<D: SliceDevice, S: PresentationSink> {
    device: D,
    sink: S,
    registry: SliceRegistry<D::Handle>,
    verifier: IntegrityVerifier,
    config: LockConfig,
    header: String,
    phase: Phase,
    started: Instant,
    last_event: String,
}

impl<D: SliceDevice, S: PresentationSink> LockController<D, S> {
    /// Creates a controller in the `Probing` phase.
    ///
    /// Allocates the two host read-back buffers up front.
    pub fn new(device: D, sink: S, config: LockConfig) -> Result<Self, VramLockError> {
        let verifier = IntegrityVerifier::new(config.slice_size, config.fill_byte)?;
        let header = device.device_info();

        Ok(Self {
            device,
            sink,
            registry: SliceRegistry::new(),
            verifier,
            config,
            header,
            phase: Phase::Probing,
            started: Instant::now(),
            last_event: "Starting...".to_string(),
        })
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[cfg(test)]
    pub fn registry(&self) -> &SliceRegistry<D::Handle> {
        &self.registry
    }

    /// Runs one transition of the state machine and returns the new phase.
    ///
    /// # Errors
    ///
    /// Any device error other than exhaustion, and any registry misuse, is
    /// returned as is. Both mean the tool is malfunctioning.
    pub fn step(&mut self) -> Result<Phase, VramLockError> {
        match self.phase {
            Phase::Probing => self.probe_next()?,
            Phase::Finalizing => self.finalize()?,
            Phase::Parked => {}
        }
        Ok(self.phase)
    }

    /// Steps until the controller is parked.
    pub fn run_until_parked(&mut self) -> Result<(), VramLockError> {
        info!(
            "Starting on {}. Slice size = {} bytes",
            self.header, self.config.slice_size
        );
        self.render();

        while self.step()? != Phase::Parked {}
        Ok(())
    }

    /// Re-renders without touching any slice. Called on every park wake-up.
    pub fn heartbeat(&mut self) {
        debug!(
            "parked for {}s, holding {} faulty slice(s)",
            self.started.elapsed().as_secs(),
            self.registry.counts().faulty
        );
        self.render();
    }

    /// Blocks forever, holding every faulty slice.
    ///
    /// Wakes every `heartbeat` interval to redraw so the process visibly stays
    /// alive; never allocates, verifies or releases anything again.
    pub fn park(mut self) -> ! {
        debug_assert_eq!(self.phase, Phase::Parked);
        debug_assert!(self.registry.is_finalized());
        let ticker = crossbeam::channel::tick(self.config.heartbeat);
        loop {
            // A tick channel never disconnects.
            let _ = ticker.recv();
            self.heartbeat();
        }
    }

    fn probe_next(&mut self) -> Result<(), VramLockError> {
        let next = self.registry.len();

        match self.device.allocate(self.config.slice_size)? {
            Allocation::Exhausted { reason } => {
                info!("Allocation failed at slice #{}: {}", next, reason);
                self.phase = Phase::Finalizing;
                self.last_event = format!(
                    "STOP: allocation failed at slice #{} ({}). Freeing all OK slices; keeping only faulty locked.",
                    next, reason
                );
            }
            Allocation::Granted(handle) => {
                let index = self.registry.record_new(handle)?;
                debug!("Allocated slice #{}", index);
                self.last_event = "Allocated slice; filling pattern...".to_string();
                self.render();

                let handle = self
                    .registry
                    .handle(index)
                    .ok_or(RegistryError::OutOfRange {
                        index,
                        len: self.registry.len(),
                    })?;
                let verdict = self.verifier.verify(&mut self.device, handle)?;
                self.registry.classify(index, verdict.into())?;

                match verdict {
                    Verdict::Match => {
                        debug!("OK slice #{}", index);
                        self.last_event = "OK".to_string();
                    }
                    Verdict::Mismatch => {
                        warn!("MISMATCH at slice #{}: read-backs differ, locking it", index);
                        self.last_event = format!(
                            "MISMATCH detected at slice #{}: locking faulty chunk and continuing...",
                            index
                        );
                    }
                }
            }
        }

        self.render();
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), VramLockError> {
        let handles = self.registry.reclaim_non_faulty()?;
        let released = handles.len();
        for handle in handles {
            self.device.release(handle)?;
        }

        let counts = self.registry.counts();
        info!(
            "Released {} slice(s); holding {} faulty slice(s)",
            released,
            self.registry.held_count()
        );
        debug_assert_eq!(counts.held(), counts.faulty);
        self.phase = Phase::Parked;
        self.last_event = "Sleeping forever holding only faulty VRAM allocations.".to_string();
        self.render();
        Ok(())
    }

    fn render(&mut self) {
        let snapshot: RegistrySnapshot = self.registry.snapshot();
        let frame = Frame {
            device: &self.header,
            slice_size: self.config.slice_size,
            phase: self.phase,
            snapshot: &snapshot,
            elapsed: self.started.elapsed(),
            last_event: &self.last_event,
        };
        self.sink.render(&frame);
    }

    #[cfg(test)]
    fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    fn last_event(&self) -> &str {
        &self.last_event
    }
}
