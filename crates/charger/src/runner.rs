//! Async driver for a [`ChargerSession`].
//!
//! The session itself never sleeps. [`ChargerRunner::run`] owns the wait:
//! it sleeps until the deadline recorded in the session's [`DeadlineSlot`],
//! a control request arrives on the request channel, or the PPS keep-alive
//! ticker fires, then runs the matching session call with the lock held.
//!
//! ```ignore
//! static SESSION: Mutex<CriticalSectionRawMutex, Session> = ...;
//! static REQUESTS: RequestChannel<CriticalSectionRawMutex> = Channel::new();
//!
//! let runner = ChargerRunner::new(&SESSION, &REQUESTS);
//! runner.run().await;
//! ```

use core::future::pending;

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::mutex::Mutex;
use embassy_time::{Ticker, Timer};
use embedded_hal::delay::DelayNs;
use platform::{AdapterProvider, ChargerIc, DeadlineSlot, Scheduler};

use crate::error::ChargerError;
use crate::log::{dc_debug, dc_info, dc_warn};
use crate::session::ChargerSession;
use crate::state::ChargingState;

/// Requests that can be queued for the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerRequest {
    /// Start (`1` wired, `2` wireless) or stop (`0`) charging.
    SetChargingEnabled(u8),
    /// New battery current / float voltage targets (non-positive = keep).
    SetTarget {
        /// Battery current target, µA.
        cc_max: i32,
        /// Float voltage target, µV.
        fv_uv: i32,
    },
    /// The adapter was unplugged.
    AdapterRemoved,
}

/// Depth of the control request queue.
pub const REQUEST_QUEUE_DEPTH: usize = 8;

/// Channel carrying [`ChargerRequest`]s to a runner.
pub type RequestChannel<M> = Channel<M, ChargerRequest, REQUEST_QUEUE_DEPTH>;

/// Session driven by a runner: scheduling goes through a [`DeadlineSlot`].
pub type SharedSession<M, IC, TA, RX, D> = Mutex<M, ChargerSession<IC, TA, RX, D, DeadlineSlot>>;

impl<IC, TA, RX, D, S> ChargerSession<IC, TA, RX, D, S>
where
    IC: ChargerIc,
    TA: AdapterProvider,
    RX: AdapterProvider,
    D: DelayNs,
    S: Scheduler,
{
    /// Apply one queued control request.
    pub fn handle_request(&mut self, request: ChargerRequest) -> Result<(), ChargerError> {
        match request {
            ChargerRequest::SetChargingEnabled(index) => self.set_charging_enabled(index),
            ChargerRequest::SetTarget { cc_max, fv_uv } => self.set_target(cc_max, fv_uv),
            ChargerRequest::AdapterRemoved => {
                if self.charging_state() != ChargingState::NoCharging {
                    dc_info!("dc: adapter removed");
                    self.stop_charging();
                }
                Ok(())
            }
        }
    }
}

/// Runs one shared session.
pub struct ChargerRunner<'a, M: RawMutex, IC, TA, RX, D> {
    session: &'a SharedSession<M, IC, TA, RX, D>,
    requests: Receiver<'a, M, ChargerRequest, REQUEST_QUEUE_DEPTH>,
}

impl<'a, M, IC, TA, RX, D> ChargerRunner<'a, M, IC, TA, RX, D>
where
    M: RawMutex,
    IC: ChargerIc,
    TA: AdapterProvider,
    RX: AdapterProvider,
    D: DelayNs,
{
    /// Bind a runner to `session`, consuming requests from `requests`.
    pub fn new(
        session: &'a SharedSession<M, IC, TA, RX, D>,
        requests: &'a RequestChannel<M>,
    ) -> Self {
        Self {
            session,
            requests: requests.receiver(),
        }
    }

    /// Drive the session forever.
    pub async fn run(&self) {
        let keepalive = self.session.lock().await.config().timings.pps_keepalive;
        let mut ticker = Ticker::every(keepalive);

        loop {
            let deadline = self.session.lock().await.scheduler().deadline();
            let tick = async move {
                match deadline {
                    Some(at) => Timer::at(at).await,
                    None => pending::<()>().await,
                }
            };

            match select3(self.requests.receive(), tick, ticker.next()).await {
                Either3::First(request) => {
                    let mut session = self.session.lock().await;
                    if let Err(err) = session.handle_request(request) {
                        dc_warn!("dc: request rejected: {}", err);
                    }
                }
                Either3::Second(()) => {
                    let mut session = self.session.lock().await;
                    if session.scheduler_mut().take().is_some() {
                        if let Err(err) = session.handle_timer() {
                            dc_debug!("dc: session ended: {}", err);
                        }
                    }
                }
                Either3::Third(()) => {
                    let mut session = self.session.lock().await;
                    if let Err(err) = session.keepalive() {
                        dc_warn!("dc: keep-alive: {}", err);
                    }
                }
            }
        }
    }
}
