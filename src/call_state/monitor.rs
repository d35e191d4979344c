use super::sink::CallEventSink;
use super::state::{CallState, CallStateEvent};
use super::telephony::{CallStateListener, TelephonyService};
use crate::background_jobs::HookEvent;
use crate::call_log::CallLogReader;
use crate::clock::Clock;
use crate::metrics;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Off-hook bookkeeping, reset on every IDLE.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OffhookSession {
    is_offhook: bool,
    offhook_since_ms: i64,
}

struct MonitorCore {
    session: Mutex<OffhookSession>,
    clock: Arc<dyn Clock>,
    call_log: Arc<CallLogReader>,
    sink: Arc<dyn CallEventSink>,
    hook_sender: Option<mpsc::Sender<HookEvent>>,
}

impl MonitorCore {
    fn handle(&self, state: CallState, number: Option<String>) -> Option<CallStateEvent> {
        let event = match state {
            CallState::Idle => {
                let ended = {
                    let mut session = self.session.lock().unwrap();
                    let ended = *session;
                    *session = OffhookSession::default();
                    ended
                };

                let call_duration = if ended.is_offhook && ended.offhook_since_ms > 0 {
                    let elapsed_ms = (self.clock.now_ms() - ended.offhook_since_ms).max(0);
                    let seconds = (elapsed_ms / 1000) as u64;
                    debug!("Call lasted {}s since off-hook", seconds);
                    Some(seconds)
                } else {
                    let from_log = self.call_log.last_outgoing_call_duration();
                    debug!("No off-hook time recorded, call log says {:?}", from_log);
                    from_log
                };

                if ended.is_offhook {
                    self.notify_call_ended();
                }
                CallStateEvent::Idle { call_duration }
            }
            CallState::Ringing => CallStateEvent::Ringing { number },
            CallState::Offhook => {
                let mut session = self.session.lock().unwrap();
                if session.is_offhook {
                    debug!("Still off-hook");
                    return None;
                }
                session.is_offhook = true;
                session.offhook_since_ms = self.clock.now_ms();
                CallStateEvent::Offhook { number }
            }
        };

        info!("Call state: {}", state);
        metrics::record_call_state_event(state.as_str());
        self.sink.send(&event);
        Some(event)
    }

    fn notify_call_ended(&self) {
        let Some(sender) = &self.hook_sender else {
            return;
        };
        if let Err(e) = sender.try_send(HookEvent::OnCallEnded) {
            warn!("Failed to signal call end to the scheduler: {}", e);
        }
    }
}

impl CallStateListener for MonitorCore {
    fn on_call_state_changed(&self, state: CallState, number: Option<String>) {
        self.handle(state, number);
    }
}

/// Tracks the telephony state machine and emits one event per transition.
///
/// - IDLE reports the call duration: seconds since the first OFFHOOK when one
///   was seen, otherwise the newest outgoing call-log duration.
/// - RINGING is passed through with its number.
/// - Only the first OFFHOOK after an IDLE is emitted; repeats are absorbed
///   without moving the recorded start time.
pub struct CallStateMonitor {
    core: Arc<MonitorCore>,
    telephony: Arc<dyn TelephonyService>,
    started: Mutex<bool>,
}

impl CallStateMonitor {
    pub fn new(
        telephony: Arc<dyn TelephonyService>,
        call_log: Arc<CallLogReader>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn CallEventSink>,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                session: Mutex::new(OffhookSession::default()),
                clock,
                call_log,
                sink,
                hook_sender: None,
            }),
            telephony,
            started: Mutex::new(false),
        }
    }

    /// Fire [`HookEvent::OnCallEnded`] when a connected call goes back to idle.
    pub fn with_hook_sender(mut self, hook_sender: mpsc::Sender<HookEvent>) -> Self {
        match Arc::get_mut(&mut self.core) {
            Some(core) => core.hook_sender = Some(hook_sender),
            None => warn!("Hook sender must be set before the monitor is started"),
        }
        self
    }

    /// Register with the telephony service. A second call is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut started = self.started.lock().unwrap();
        if *started {
            debug!("Call state monitor already started");
            return Ok(());
        }
        let listener: Arc<dyn CallStateListener> = self.core.clone();
        self.telephony.register(listener)?;
        *started = true;
        info!("Call state monitor started");
        Ok(())
    }

    /// Unregister from the telephony service. Safe when never started.
    pub fn stop(&self) {
        let mut started = self.started.lock().unwrap();
        if !*started {
            return;
        }
        self.telephony.unregister();
        *started = false;
        info!("Call state monitor stopped");
    }

    pub fn is_started(&self) -> bool {
        *self.started.lock().unwrap()
    }

    /// Feed one callback directly. Returns the emitted event, if any.
    pub fn handle(&self, state: CallState, number: Option<String>) -> Option<CallStateEvent> {
        self.core.handle(state, number)
    }
}
