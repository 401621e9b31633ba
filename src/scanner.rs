//! Periodic Jira scanners.
//!
//! A scanner runs its query once immediately and then on every tick, and
//! hands each matching ticket to its handler on a task of its own. One
//! ticket's failure never reaches another ticket or the scan loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clients::IssueClient;
use crate::config::Config;
use crate::pipeline::{FeedbackPipeline, InFlight, TicketPipeline};

/// Processes one ticket found by a scan.
/// Real implementations: `TicketPipeline`, `FeedbackPipeline`.
#[async_trait]
pub trait TicketHandler: Send + Sync {
    async fn handle(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl TicketHandler for TicketPipeline {
    async fn handle(&self, key: &str) -> Result<()> {
        self.process(key).await?;
        Ok(())
    }
}

#[async_trait]
impl TicketHandler for FeedbackPipeline {
    async fn handle(&self, key: &str) -> Result<()> {
        self.process(key).await?;
        Ok(())
    }
}

/// Tickets assigned to the bot that are ready to be picked up.
pub fn ticket_query(config: &Config) -> String {
    format!(
        "assignee = \"{}\" AND status = \"{}\" ORDER BY updated DESC",
        config.jira.username, config.jira.status_transitions.todo
    )
}

/// Tickets in review that carry a pull request link. `None` when no PR
/// field is configured.
pub fn feedback_query(config: &Config) -> Option<String> {
    let field = config
        .jira
        .pr_field_name
        .as_deref()
        .filter(|f| !f.is_empty())?;
    Some(format!(
        "assignee = \"{}\" AND status = \"{}\" AND \"{}\" IS NOT EMPTY ORDER BY updated DESC",
        config.jira.username, config.jira.status_transitions.in_review, field
    ))
}

#[derive(Clone)]
struct ScanContext {
    name: &'static str,
    query: String,
    issues: Arc<dyn IssueClient>,
    handler: Arc<dyn TicketHandler>,
    in_flight: InFlight,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl ScanContext {
    async fn scan_once(&self) -> usize {
        let tickets = match self.issues.search(&self.query).await {
            Ok(tickets) => tickets,
            Err(e) => {
                warn!(scanner = self.name, error = %format!("{e:#}"), "ticket search failed");
                return 0;
            }
        };
        debug!(scanner = self.name, found = tickets.len(), "scan complete");

        let mut dispatched = 0;
        for ticket in tickets {
            let Some(guard) = self.in_flight.try_claim(&ticket.key) else {
                debug!(scanner = self.name, ticket = %ticket.key, "already in flight, skipping");
                continue;
            };

            let handler = Arc::clone(&self.handler);
            let name = self.name;
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                let key = guard.key().to_string();
                if let Err(e) = handler.handle(&key).await {
                    warn!(scanner = name, ticket = %key, error = %format!("{e:#}"), "ticket processing failed");
                }
                drop(guard);
            });
            dispatched += 1;
        }
        dispatched
    }
}

#[derive(Default)]
struct LoopState {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

pub struct Scanner {
    ctx: ScanContext,
    interval: Duration,
    state: Mutex<LoopState>,
}

impl Scanner {
    pub fn new(
        name: &'static str,
        query: String,
        interval: Duration,
        issues: Arc<dyn IssueClient>,
        handler: Arc<dyn TicketHandler>,
    ) -> Self {
        Self {
            ctx: ScanContext {
                name,
                query,
                issues,
                handler,
                in_flight: InFlight::new(),
                tasks: Arc::new(Mutex::new(JoinSet::new())),
            },
            // tokio intervals panic on zero
            interval: interval.max(Duration::from_millis(1)),
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.ctx.name
    }

    /// Start the scan loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut state = self.lock_state();
        if state.stop.is_some() {
            debug!(scanner = self.ctx.name, "scanner already running");
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(self.ctx.clone(), self.interval, stop_rx));
        state.stop = Some(stop_tx);
        state.task = Some(task);
        info!(
            scanner = self.ctx.name,
            interval_secs = self.interval.as_secs(),
            "scanner started"
        );
        true
    }

    /// Signal the scan loop to stop. Returns `false` if it was not running.
    /// Tickets already dispatched keep running.
    pub fn stop(&self) -> bool {
        let Some(stop) = self.lock_state().stop.take() else {
            return false;
        };
        let _ = stop.send(());
        info!(scanner = self.ctx.name, "scanner stopping");
        true
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().stop.is_some()
    }

    /// Tickets dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.ctx.in_flight.len()
    }

    /// Run one scan now, outside the loop. Returns how many tickets were dispatched.
    pub async fn scan_once(&self) -> usize {
        self.ctx.scan_once().await
    }

    /// Wait for every dispatched ticket to finish.
    pub async fn drain(&self) {
        if !self.ctx.in_flight.is_empty() {
            info!(
                scanner = self.ctx.name,
                in_flight = self.ctx.in_flight.len(),
                "waiting for in-flight tickets"
            );
        }
        let mut tasks = {
            let mut guard = self.ctx.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!(scanner = self.ctx.name, "ticket task panicked");
            }
        }
    }

    /// Stop the loop, wait for it to exit, then drain dispatched tickets.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.lock_state().task.take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.drain().await;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_loop(ctx: ScanContext, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let dispatched = ctx.scan_once().await;
                if dispatched > 0 {
                    info!(scanner = ctx.name, dispatched, "dispatched tickets");
                }
            }
        }
    }
    info!(scanner = ctx.name, "scanner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Ticket;
    use crate::testing::{FakeIssueClient, test_config};
    use anyhow::bail;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingHandler {
        handled: Mutex<Vec<String>>,
        failing: HashSet<String>,
        gate: Option<Arc<Notify>>,
        delay: Option<Duration>,
    }

    impl RecordingHandler {
        fn handled(&self) -> Vec<String> {
            let mut keys = self.handled.lock().unwrap().clone();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl TicketHandler for RecordingHandler {
        async fn handle(&self, key: &str) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.handled.lock().unwrap().push(key.to_string());
            if self.failing.contains(key) {
                bail!("{} exploded", key);
            }
            Ok(())
        }
    }

    fn ticket(key: &str) -> Ticket {
        Ticket {
            key: key.into(),
            ..Default::default()
        }
    }

    fn scanner(issues: Arc<FakeIssueClient>, handler: Arc<RecordingHandler>) -> Scanner {
        Scanner::new(
            "test",
            "status = \"To Do\"".into(),
            Duration::from_secs(300),
            issues,
            handler,
        )
    }

    // ── queries ──

    #[test]
    fn test_ticket_query_uses_bot_and_todo_status() {
        assert_eq!(
            ticket_query(&test_config()),
            "assignee = \"jira-bot\" AND status = \"To Do\" ORDER BY updated DESC"
        );
    }

    #[test]
    fn test_feedback_query_requires_pr_field() {
        let mut config = test_config();
        assert_eq!(
            feedback_query(&config).unwrap(),
            "assignee = \"jira-bot\" AND status = \"In Review\" AND \"Git Pull Request\" IS NOT EMPTY ORDER BY updated DESC"
        );
        config.jira.pr_field_name = None;
        assert!(feedback_query(&config).is_none());
    }

    // ── lifecycle ──

    #[tokio::test(start_paused = true)]
    async fn test_start_scans_immediately_then_on_interval() {
        let issues = Arc::new(FakeIssueClient::new());
        issues.set_search_results(vec![ticket("TEST-1"), ticket("TEST-2")]);
        let handler = Arc::new(RecordingHandler::default());
        let scanner = scanner(issues.clone(), handler.clone());

        assert!(scanner.start());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(issues.search_count(), 1);
        assert_eq!(handler.handled(), vec!["TEST-1", "TEST-2"]);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(issues.search_count(), 2);

        scanner.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let issues = Arc::new(FakeIssueClient::new());
        let scanner = scanner(issues, Arc::new(RecordingHandler::default()));

        assert!(!scanner.stop());
        assert!(scanner.start());
        assert!(!scanner.start());
        assert!(scanner.is_running());
        assert!(scanner.stop());
        assert!(!scanner.stop());
        assert!(!scanner.is_running());

        assert!(scanner.start());
        scanner.shutdown().await;
        assert!(!scanner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_further_scans() {
        let issues = Arc::new(FakeIssueClient::new());
        let scanner = scanner(issues.clone(), Arc::new(RecordingHandler::default()));

        scanner.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        scanner.shutdown().await;
        tokio::time::sleep(Duration::from_secs(3000)).await;
        assert_eq!(issues.search_count(), 1);
    }

    // ── dispatch ──

    #[tokio::test]
    async fn test_ticket_in_flight_is_not_dispatched_twice() {
        let issues = Arc::new(FakeIssueClient::new());
        issues.set_search_results(vec![ticket("TEST-1")]);
        let gate = Arc::new(Notify::new());
        let handler = Arc::new(RecordingHandler {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let scanner = scanner(issues, handler.clone());

        assert_eq!(scanner.scan_once().await, 1);
        assert_eq!(scanner.scan_once().await, 0);
        assert_eq!(scanner.in_flight(), 1);

        gate.notify_one();
        scanner.drain().await;
        assert_eq!(handler.handled(), vec!["TEST-1"]);
        assert_eq!(scanner.in_flight(), 0);

        gate.notify_one();
        assert_eq!(scanner.scan_once().await, 1);
        scanner.drain().await;
        assert_eq!(handler.handled(), vec!["TEST-1", "TEST-1"]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let issues = Arc::new(FakeIssueClient::new());
        issues.set_search_results(vec![ticket("TEST-1"), ticket("TEST-2"), ticket("TEST-3")]);
        let handler = Arc::new(RecordingHandler {
            failing: HashSet::from(["TEST-2".to_string()]),
            ..Default::default()
        });
        let scanner = scanner(issues, handler.clone());

        assert_eq!(scanner.scan_once().await, 3);
        scanner.drain().await;
        assert_eq!(handler.handled(), vec!["TEST-1", "TEST-2", "TEST-3"]);
    }

    #[tokio::test]
    async fn test_search_failure_dispatches_nothing() {
        let issues = Arc::new(FakeIssueClient::new());
        issues.set_search_results(vec![ticket("TEST-1")]);
        issues.fail_search.store(true, Ordering::SeqCst);
        let handler = Arc::new(RecordingHandler::default());
        let scanner = scanner(issues, handler.clone());

        assert_eq!(scanner.scan_once().await, 0);
        scanner.drain().await;
        assert!(handler.handled().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_dispatched_tickets_finish() {
        let issues = Arc::new(FakeIssueClient::new());
        issues.set_search_results(vec![ticket("TEST-1")]);
        let handler = Arc::new(RecordingHandler {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let scanner = scanner(issues, handler.clone());

        scanner.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handler.handled().is_empty());

        scanner.shutdown().await;
        assert_eq!(handler.handled(), vec!["TEST-1"]);
    }
}
