//! The single writer thread: drains the ready queue, validates and decodes
//! each datagram, appends the result to the rolling output file, and runs
//! the shutdown seal when asked to stop.
//!
//! Grounded on `WriteThread`/`WriteThreadHandler` in the reference daemon.
//! There, a pthread cancellation handler performs the shutdown seal and the
//! write region disables cancellation so a signal can't land mid-write. Here
//! the writer instead polls an explicit shutdown flag between
//! `take_ready_timeout` calls, so the seal is a normal return path rather
//! than a signal-driven one and there is nothing to disable.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::cflowd::decode_datagram;
use crate::config::Config;
use crate::error::DecodeError;
use crate::pool::BufferPool;
use crate::rotator::{AppendOutcome, Rotator};
use crate::sequence::SequenceTracker;

/// How often the writer wakes up to re-check the shutdown flag while the
/// ready queue is empty.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

pub struct Writer {
    pool: Arc<BufferPool>,
    shutdown: Arc<AtomicBool>,
    rotator: Rotator,
    tracker: SequenceTracker,
    max_drop_silent: u32,
    dropped_since_rotation: u32,
}

impl Writer {
    pub fn new(pool: Arc<BufferPool>, shutdown: Arc<AtomicBool>, config: &Config) -> Self {
        let rotator = Rotator::new(
            config.current_path.clone(),
            config.saved_prefix.clone(),
            config.current_mode,
            config.saved_mode,
            Duration::from_secs(config.save_interval_secs),
        );

        Writer {
            pool,
            shutdown,
            rotator,
            tracker: SequenceTracker::new(),
            max_drop_silent: config.max_drop_silent,
            dropped_since_rotation: 0,
        }
    }

    /// Runs until the shutdown flag is observed, then seals the in-flight
    /// current file into the archive and returns.
    pub fn run(&mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let buffer = match self.pool.take_ready_timeout(SHUTDOWN_POLL) {
                Some(b) => b,
                None => continue,
            };

            let router = buffer.router;
            let drop_detection = buffer.drop_detection;
            let datagram = &buffer.data[..buffer.len];

            match decode_datagram(datagram, router, drop_detection, &mut self.tracker) {
                Ok(decoded) => {
                    self.record_drops(router, decoded.flow_sequence, decoded.dropped);

                    match self.rotator.append(&decoded.bytes) {
                        Ok(AppendOutcome::Rotated) => {
                            self.dropped_since_rotation = 0;
                        }
                        Ok(AppendOutcome::Normal) => {}
                        Err(e) => {
                            error!("fatal error writing current file: {}", e);
                            std::process::exit(1);
                        }
                    }
                }
                Err(e) => self.log_decode_error(&e),
            }

            self.pool.release_free(buffer);
        }

        info!("write thread ending, sealing current file.");
        if let Err(e) = self.rotator.shutdown() {
            error!("fatal error sealing current file on shutdown: {}", e);
            std::process::exit(1);
        }
        info!("write thread ended.");
    }

    fn record_drops(&mut self, router: Ipv4Addr, flow_sequence: u32, dropped: u32) {
        if dropped == 0 {
            return;
        }

        self.dropped_since_rotation += dropped;

        if self.dropped_since_rotation >= self.max_drop_silent {
            let range_start = flow_sequence.wrapping_sub(dropped);
            let range_end = flow_sequence.wrapping_sub(1);
            warn!(
                "dropped {} flows ({} - {}) from router {}.",
                dropped, range_start, range_end, router
            );
        }
    }

    fn log_decode_error(&self, err: &DecodeError) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        match err {
            DecodeError::UnsupportedVersion { .. } => {
                // already logged once, process-wide, by the decoder
            }
            other => warn!("dropping malformed datagram: {}", other),
        }
    }
}
