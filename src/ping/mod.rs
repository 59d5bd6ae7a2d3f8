//! # Ping-Pong Module
//!
//! Continuous link-quality probe over a [`RadioLink`].
//!
//! This module handles:
//! - Initiator role: send a timestamp, wait for its echo, measure the round trip
//! - Responder role: echo the newest received timestamp back
//! - Cancellation at every wait through a `watch` shutdown signal
//! - Per-iteration [`ProbeReport`]s and aggregate [`LinkStats`]
//!
//! Send failures, timeouts and transport faults are reported and the loop
//! carries on; only the shutdown signal ends it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{PeriphLinkError, Result};
use crate::radio::codec::{decode_payload, encode_timestamp, ticks_between, PROBE_SIZE};
use crate::radio::RadioLink;

/// Default wait for an echo
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Default pause between probes
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Default responder pause after echoing
pub const DEFAULT_RESPONDER_HOLDOFF_MS: u64 = 925;

/// Default spacing of `available()` polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

/// Payloads the transceiver can queue before it stops acknowledging
const RX_FIFO_DEPTH: usize = 3;

/// Which side of the exchange this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Sends probes and measures round trips
    Initiator,
    /// Echoes probes back
    Responder,
}

/// Timing of the exchange loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingTiming {
    pub timeout: Duration,
    pub interval: Duration,
    pub responder_holdoff: Duration,
    pub poll_interval: Duration,
}

impl Default for PingTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            responder_holdoff: Duration::from_millis(DEFAULT_RESPONDER_HOLDOFF_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Millisecond tick source for probe timestamps
///
/// Counts from a session epoch on the tokio clock, so paused-time tests see
/// exact values.
#[derive(Debug, Clone, Copy)]
pub struct ProbeClock {
    epoch: Instant,
    offset: u64,
}

impl Default for ProbeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeClock {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Clock whose first reading is `ticks`
    pub fn starting_at(ticks: u64) -> Self {
        Self {
            epoch: Instant::now(),
            offset: ticks,
        }
    }

    pub fn now_ticks(&self) -> u64 {
        self.offset + self.epoch.elapsed().as_millis() as u64
    }
}

/// Outcome of one initiator iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripResult {
    Completed(Duration),
    TimedOut,
}

/// One event of the exchange loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProbeReport {
    /// The probe was not acknowledged after the hardware retries
    SendFailed { sent: u64 },
    /// An echo arrived in time
    Completed { sent: u64, echoed: u64, delay_ms: u64 },
    /// No echo within the timeout window
    TimedOut { sent: u64 },
    /// Responder sent a timestamp back
    Echoed { timestamp: u64 },
    /// Transport fault; the loop carries on
    Fault { message: String },
}

impl ProbeReport {
    /// Round-trip outcome, for initiator reports that end an iteration
    pub fn round_trip(&self) -> Option<RoundTripResult> {
        match self {
            ProbeReport::Completed { delay_ms, .. } => {
                Some(RoundTripResult::Completed(Duration::from_millis(*delay_ms)))
            }
            ProbeReport::TimedOut { .. } => Some(RoundTripResult::TimedOut),
            _ => None,
        }
    }
}

/// Aggregate link statistics over one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub send_failures: u64,
    pub echoed: u64,
    pub faults: u64,
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    total_delay_ms: u64,
}

impl LinkStats {
    pub fn record(&mut self, report: &ProbeReport) {
        match report {
            ProbeReport::SendFailed { .. } => self.send_failures += 1,
            ProbeReport::Completed { delay_ms, .. } => {
                self.completed += 1;
                self.total_delay_ms += delay_ms;
                self.min_delay_ms = Some(self.min_delay_ms.map_or(*delay_ms, |m| m.min(*delay_ms)));
                self.max_delay_ms = Some(self.max_delay_ms.map_or(*delay_ms, |m| m.max(*delay_ms)));
            }
            ProbeReport::TimedOut { .. } => self.timed_out += 1,
            ProbeReport::Echoed { .. } => self.echoed += 1,
            ProbeReport::Fault { .. } => self.faults += 1,
        }
    }

    pub fn average_delay_ms(&self) -> Option<f64> {
        (self.completed > 0).then(|| self.total_delay_ms as f64 / self.completed as f64)
    }

    /// Share of probes that came back, 0.0..=1.0
    pub fn success_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.completed as f64 / self.sent as f64
        }
    }
}

/// Ping-pong exchange loop over one radio link
///
/// # Examples
///
/// ```no_run
/// use periphlink::ping::{PingPong, PingTiming, Role};
/// use periphlink::radio::sim::{simulated_radio, Air};
/// use tokio::sync::watch;
///
/// # async fn demo() -> periphlink::error::Result<()> {
/// let air = Air::new();
/// let (mut radio, _) = simulated_radio(&air)?;
/// radio.begin()?;
/// radio.open_writing_pipe(b"1Node")?;
/// radio.open_reading_pipe(1, b"2Node")?;
///
/// let (stop, shutdown) = watch::channel(false);
/// let task = tokio::spawn(PingPong::new(radio, Role::Initiator, PingTiming::default(), shutdown).run());
/// stop.send(true).ok();
/// let stats = task.await.expect("ping task");
/// println!("{} probes sent", stats.sent);
/// # Ok(())
/// # }
/// ```
pub struct PingPong<L: RadioLink> {
    link: Arc<Mutex<L>>,
    role: Role,
    timing: PingTiming,
    clock: ProbeClock,
    shutdown: watch::Receiver<bool>,
    reports: Option<mpsc::UnboundedSender<ProbeReport>>,
    stats: LinkStats,
}

impl<L: RadioLink + 'static> PingPong<L> {
    pub fn new(link: L, role: Role, timing: PingTiming, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            link: Arc::new(Mutex::new(link)),
            role,
            timing,
            clock: ProbeClock::new(),
            shutdown,
            reports: None,
            stats: LinkStats::default(),
        }
    }

    /// Forward every report to `reports` as well as the log
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<ProbeReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn with_clock(mut self, clock: ProbeClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run until the shutdown signal is set (or its sender dropped)
    pub async fn run(mut self) -> LinkStats {
        info!("Ping-pong started as {:?}", self.role);
        match self.role {
            Role::Initiator => self.run_initiator().await,
            Role::Responder => self.run_responder().await,
        }
        info!(
            "Ping-pong stopped: {} sent, {} completed, {} timed out, {} send failures, {} echoed",
            self.stats.sent,
            self.stats.completed,
            self.stats.timed_out,
            self.stats.send_failures,
            self.stats.echoed
        );
        self.stats
    }

    async fn run_initiator(&mut self) {
        self.resume_listening();

        while !self.is_cancelled() {
            match self.initiator_round().await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    self.report(ProbeReport::Fault { message: e.to_string() });
                    // The next round clears the RX FIFO, which needs Listening
                    self.resume_listening();
                }
            }
            if !self.pause(self.timing.interval).await {
                break;
            }
        }
    }

    /// One probe; `None` when cancelled while waiting for the echo
    async fn initiator_round(&mut self) -> Result<Option<RoundTripResult>> {
        self.discard_stale()?;

        let sent = self.clock.now_ticks();
        debug!("Sending probe {}", sent);
        let delivered = self.transmit(encode_timestamp(sent), true).await?;
        self.stats.sent += 1;
        if !delivered {
            self.report(ProbeReport::SendFailed { sent });
        }

        let started = Instant::now();
        let report = loop {
            let Some(arrived) = self.wait_for_payload(started, self.timing.timeout).await? else {
                return Ok(None);
            };
            if !arrived {
                break ProbeReport::TimedOut { sent };
            }
            let payload = self.with_link(|link| link.read(PROBE_SIZE))?;
            let echoed = decode_payload(&payload)?;
            if is_echo_of(echoed, sent) {
                let delay_ms = ticks_between(sent, self.clock.now_ticks());
                break ProbeReport::Completed { sent, echoed, delay_ms };
            }
            debug!("Discarding echo {} while waiting for {}", echoed, sent);
        };
        let result = report.round_trip();
        self.report(report);
        Ok(result)
    }

    /// Drop payloads left over from earlier probes
    fn discard_stale(&self) -> Result<()> {
        let discarded = self.with_link(|link| {
            let mut discarded = 0;
            while discarded < RX_FIFO_DEPTH && link.available()? {
                link.read(PROBE_SIZE)?;
                discarded += 1;
            }
            Ok(discarded)
        })?;
        if discarded > 0 {
            debug!("Discarded {} late echoes", discarded);
        }
        Ok(())
    }

    /// Poll `available()` until it holds or `timeout` after `started` passes
    ///
    /// `Some(true)` on arrival, `Some(false)` on timeout, `None` when
    /// cancelled.
    async fn wait_for_payload(&mut self, started: Instant, timeout: Duration) -> Result<Option<bool>> {
        loop {
            if self.with_link(|link| link.available())? {
                return Ok(Some(true));
            }
            if started.elapsed() > timeout {
                return Ok(Some(false));
            }
            if !self.pause(self.timing.poll_interval).await {
                return Ok(None);
            }
        }
    }

    async fn run_responder(&mut self) {
        self.resume_listening();

        while !self.is_cancelled() {
            let waited = match self.responder_round().await {
                Ok(true) => self.pause(self.timing.responder_holdoff).await
                    && self.resume_listening(),
                Ok(false) => self.pause(self.timing.poll_interval).await,
                Err(e) => {
                    self.report(ProbeReport::Fault { message: e.to_string() });
                    self.pause(self.timing.poll_interval).await && self.resume_listening()
                }
            };
            if !waited {
                break;
            }
        }
    }

    /// Echo the newest queued probe; `false` when nothing was waiting
    async fn responder_round(&mut self) -> Result<bool> {
        let latest = self.with_link(|link| {
            let mut latest = None;
            while link.available()? {
                latest = Some(link.read(PROBE_SIZE)?);
            }
            Ok(latest)
        })?;
        let Some(latest) = latest else {
            return Ok(false);
        };
        let timestamp = decode_payload(&latest)?;

        if self.transmit(encode_timestamp(timestamp), false).await? {
            self.report(ProbeReport::Echoed { timestamp });
        } else {
            self.report(ProbeReport::SendFailed { sent: timestamp });
        }
        Ok(true)
    }

    fn resume_listening(&mut self) -> bool {
        if let Err(e) = self.with_link(|link| link.start_listening()) {
            self.report(ProbeReport::Fault { message: e.to_string() });
        }
        true
    }

    /// Short register-level access to the link
    fn with_link<T>(&self, op: impl FnOnce(&mut L) -> Result<T>) -> Result<T> {
        let mut link = self.link.lock().map_err(|_| PeriphLinkError::LockPoisoned)?;
        op(&mut *link)
    }

    /// Switch to Transmitting and send `payload` on the blocking pool
    ///
    /// `write` spins until the ack or the last retransmit, which must not
    /// hold up a runtime worker. With `listen_after` the link is back in
    /// Listening when this returns.
    async fn transmit(&self, payload: [u8; PROBE_SIZE], listen_after: bool) -> Result<bool> {
        let link = Arc::clone(&self.link);
        task::spawn_blocking(move || -> Result<bool> {
            let mut link = link.lock().map_err(|_| PeriphLinkError::LockPoisoned)?;
            link.stop_listening()?;
            let delivered = link.write(&payload)?;
            if listen_after {
                link.start_listening()?;
            }
            Ok(delivered)
        })
        .await?
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Sleep unless cancelled first; `false` means stop
    async fn pause(&mut self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = sleep(duration) => true,
            _ = stopped(&mut self.shutdown) => false,
        }
    }

    fn report(&mut self, report: ProbeReport) {
        match &report {
            ProbeReport::SendFailed { sent } => warn!("Send failed (probe {})", sent),
            ProbeReport::Completed { sent, echoed, delay_ms } => info!(
                "Got response {}, sent {}, round-trip delay {} ms",
                echoed, sent, delay_ms
            ),
            ProbeReport::TimedOut { sent } => warn!("Response timed out (probe {})", sent),
            ProbeReport::Echoed { timestamp } => info!("Echoed payload {}", timestamp),
            ProbeReport::Fault { message } => warn!("Radio fault: {}", message),
        }
        self.stats.record(&report);
        if let Some(reports) = &self.reports {
            // A dropped receiver only stops forwarding
            let _ = reports.send(report);
        }
    }
}

/// Whether `echoed` carries the 32 bits of `sent` that go over the air
fn is_echo_of(echoed: u64, sent: u64) -> bool {
    echoed as u32 == sent as u32
}

/// Resolves once shutdown is requested or the sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
