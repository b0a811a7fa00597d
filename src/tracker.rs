// src/tracker.rs
//
// Recovery coordination as messages instead of callbacks. The cluster side
// holds a RecoverySignal and sends events at the moments it chooses; the
// DispatchTracker relays them to the clients and keeps an ordered log of
// dispatches, completions and deliveries.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::executor::{DispatchStatus, HostGroup, RemoteExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// Stop client load now (blocking recovery)
    Interrupt,
    /// The disruption cycle is over (background recovery)
    Finished,
}

/// Sending half handed to the cluster controller. Sends never block.
#[derive(Debug, Clone)]
pub struct RecoverySignal {
    tx: mpsc::UnboundedSender<RecoveryEvent>,
}

impl RecoverySignal {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RecoveryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false when nobody is listening anymore
    pub fn notify(&self, event: RecoveryEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    Dispatched { hosts: String, command: String },
    Completed { command: String, status: DispatchStatus },
    /// Interrupt command ran on the clients
    InterruptDelivered { status: DispatchStatus },
    RecoveryFinished,
}

type EventLog = Arc<Mutex<Vec<TrackerEvent>>>;

struct Relay {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct DispatchTracker {
    events: EventLog,
    relay: Mutex<Option<Relay>>,
}

impl DispatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TrackerEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of the log, in the order things happened
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.lock().clone()
    }

    pub fn is_armed(&self) -> bool {
        self.relay.lock().is_some()
    }

    /// Start relaying recovery events. `Interrupt` runs `interrupt_cmd` on
    /// `clients`. Arming again replaces the previous relay.
    pub fn arm(
        &self,
        executor: Arc<dyn RemoteExecutor>,
        clients: HostGroup,
        interrupt_cmd: String,
    ) -> RecoverySignal {
        let (signal, mut rx) = RecoverySignal::channel();
        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let events = Arc::clone(&self.events);

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        // deliver whatever was sent before shutdown
                        while let Ok(event) = rx.try_recv() {
                            relay(event, executor.as_ref(), &clients, &interrupt_cmd, &events).await;
                        }
                        break;
                    }
                };
                relay(event, executor.as_ref(), &clients, &interrupt_cmd, &events).await;
            }
            debug!("recovery relay stopped");
        });

        if let Some(old) = self.relay.lock().replace(Relay { shutdown, task }) {
            old.task.abort();
        }
        signal
    }

    /// Stop relaying. Events already sent are delivered first.
    pub async fn disarm(&self) {
        let relay = self.relay.lock().take();
        if let Some(relay) = relay {
            let _ = relay.shutdown.send(());
            if let Err(e) = relay.task.await {
                warn!("recovery relay ended abnormally: {}", e);
            }
        }
    }
}

async fn relay(
    event: RecoveryEvent,
    executor: &dyn RemoteExecutor,
    clients: &HostGroup,
    interrupt_cmd: &str,
    events: &EventLog,
) {
    match event {
        RecoveryEvent::Interrupt => {
            info!("Recovery requested interrupt, signalling fio on {}", clients);
            let status = match executor.execute(clients, interrupt_cmd).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Failed to deliver interrupt: {:#}", e);
                    DispatchStatus::Failed { code: None }
                }
            };
            events.lock().push(TrackerEvent::InterruptDelivered { status });
        }
        RecoveryEvent::Finished => {
            info!("Recovery thread completed");
            events.lock().push(TrackerEvent::RecoveryFinished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;

    #[tokio::test]
    async fn test_events_sent_before_disarm_are_delivered() {
        let tracker = DispatchTracker::new();
        let signal = tracker.arm(
            Arc::new(DryRunExecutor),
            HostGroup::from_addresses(&["a"]),
            "killall -2 fio".to_string(),
        );
        tracker.record(TrackerEvent::Dispatched {
            hosts: "a".into(),
            command: "fio".into(),
        });
        assert!(signal.notify(RecoveryEvent::Interrupt));
        assert!(signal.notify(RecoveryEvent::Finished));
        tracker.disarm().await;

        let events = tracker.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TrackerEvent::Dispatched { .. }));
        assert_eq!(
            events[1],
            TrackerEvent::InterruptDelivered {
                status: DispatchStatus::Success
            }
        );
        assert_eq!(events[2], TrackerEvent::RecoveryFinished);
        assert!(!tracker.is_armed());
    }

    #[tokio::test]
    async fn test_notify_after_disarm_reports_no_listener() {
        let tracker = DispatchTracker::new();
        let signal = tracker.arm(Arc::new(DryRunExecutor), HostGroup::default(), String::new());
        tracker.disarm().await;
        assert!(!signal.notify(RecoveryEvent::Finished));
    }
}
