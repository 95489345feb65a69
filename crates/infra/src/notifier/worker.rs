use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use stockledger_events::Event;
use stockledger_inventory::{LedgerEvent, Topic};

use super::{ChangeNotifier, Trigger, bump};

/// Handle to control and join the notifier worker.
///
/// Dropping the handle without calling `shutdown` also stops the worker.
#[derive(Debug)]
pub struct NotifierHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl NotifierHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// The notifier's background loop, created by `ChangeNotifier::new`.
pub struct NotifierWorker {
    notifier: Arc<ChangeNotifier>,
    intake: mpsc::Receiver<LedgerEvent>,
    sweep_interval: Duration,
}

impl NotifierWorker {
    pub(super) fn new(
        notifier: Arc<ChangeNotifier>,
        intake: mpsc::Receiver<LedgerEvent>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            notifier,
            intake,
            sweep_interval,
        }
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(self) -> NotifierHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(shutdown_rx));
        NotifierHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        info!(sweep_interval_ms = self.sweep_interval.as_millis() as u64, "change notifier started");

        // Highest revision already delivered per topic.
        let mut covered: HashMap<Topic, u64> = HashMap::new();
        let mut cursor = match self.notifier.store.revision().await {
            Ok(rev) => rev,
            Err(err) => {
                warn!(error = %err, "could not read initial revision; sweeping from 0");
                0
            }
        };

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = self.intake.recv() => match event {
                    Some(event) => self.deliver_immediate(event, &mut covered).await,
                    None => break,
                },
                _ = ticker.tick() => self.sweep(&mut cursor, &mut covered).await,
            }
        }

        info!("change notifier stopped");
    }

    async fn deliver_immediate(&self, event: LedgerEvent, covered: &mut HashMap<Topic, u64>) {
        debug!(event = event.event_type(), revision = event.revision, "delivering ledger event");
        for topic in event.topics() {
            if covered.get(&topic).is_some_and(|rev| *rev >= event.revision) {
                // An earlier notification's snapshot already included this change.
                continue;
            }
            let trigger = Trigger::Immediate { event: event.clone() };
            if let Some(rev) = self.notifier.fan_out(topic, trigger).await {
                cover(covered, topic, rev);
            }
        }
    }

    async fn sweep(&self, cursor: &mut u64, covered: &mut HashMap<Topic, u64>) {
        bump(&self.notifier.counters.sweeps, 1);

        let changes = match self.notifier.store.changes_since(*cursor).await {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, cursor = *cursor, "notifier sweep failed");
                return;
            }
        };

        let mut complete = true;
        for (topic, rev) in changes.topics {
            if covered.get(&topic).is_some_and(|c| *c >= rev) {
                continue;
            }
            debug!(topic = %topic, revision = rev, "sweep found undelivered change");
            match self.notifier.fan_out(topic, Trigger::Sweep).await {
                Some(observed) => {
                    bump(&self.notifier.counters.sweep_repairs, 1);
                    cover(covered, topic, observed);
                }
                None => complete = false,
            }
        }

        // Keep the cursor on failure so the next sweep retries.
        if complete {
            *cursor = changes.latest;
        }
    }
}

fn cover(covered: &mut HashMap<Topic, u64>, topic: Topic, revision: u64) {
    let entry = covered.entry(topic).or_insert(0);
    *entry = (*entry).max(revision);
}
