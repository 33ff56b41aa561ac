//! Staggered, fault-isolated plugin execution.

use exn::ResultExt;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};
use trawl_config::Config;
use trawl_plugin::{MountedPlugin, RunStatus};
use trawl_store::Connector;

use crate::error::{ErrorKind, Result};
use crate::schedule::{Schedule, ScheduleEntry};

pub const DEFAULT_BASE_UNIT: Duration = Duration::from_secs(60);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Runs every scheduled plugin on its own timer until the run status says
/// stop.
///
/// The entry at offset `n` is first invoked `n` base units after start, then
/// every `interval` after that. Invocations of one plugin never overlap; a
/// run still going when the next one is due delays it, and missed ticks are
/// skipped rather than bunched. A plugin's error or panic is logged and
/// affects nothing else.
#[derive(Debug)]
pub struct Scheduler {
    schedule: Schedule,
    connector: Connector,
    status: RunStatus,
    base_unit: Duration,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(schedule: Schedule, connector: Connector, status: RunStatus) -> Self {
        Self {
            schedule,
            connector,
            status,
            base_unit: DEFAULT_BASE_UNIT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn from_config(schedule: Schedule, config: &Config, status: RunStatus) -> Result<Self> {
        let connector = Connector::from_config(&config.database).or_raise(|| ErrorKind::Database)?;
        Ok(Self::new(schedule, connector, status)
            .base_unit(config.scheduler.base_unit())
            .shutdown_grace(config.scheduler.shutdown_grace()))
    }

    /// Time represented by one startup offset step.
    pub fn base_unit(mut self, base_unit: Duration) -> Self {
        self.base_unit = base_unit;
        self
    }

    /// How long to wait for running plugins once stopping.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    fn mount(&self) -> Result<Vec<(ScheduleEntry, MountedPlugin)>> {
        self.schedule
            .entries()
            .map(|entry| -> Result<_> {
                let mounted = MountedPlugin::new(entry.plugin.clone(), self.connector.clone())
                    .or_raise(|| ErrorKind::Mount(entry.offset))?;
                Ok((entry.clone(), mounted))
            })
            .collect()
    }

    /// Drive every plugin until stopped, then wait up to the shutdown grace
    /// period for in-flight invocations before abandoning them.
    ///
    /// Fails only if a plugin cannot be mounted, in which case nothing runs.
    pub async fn run(self) -> Result<()> {
        let mounted = self.mount()?;
        info!(
            plugins = mounted.len(),
            base_unit = ?self.base_unit,
            "Scheduler starting with {} plugins",
            mounted.len()
        );

        let mut tasks = JoinSet::new();
        for (entry, plugin) in mounted {
            tasks.spawn(drive(entry, plugin, self.status.clone(), self.base_unit));
        }

        loop {
            tokio::select! {
                biased;
                () = self.status.cancelled() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {},
                    Some(Err(err)) => error!(error = %err, "Plugin driver ended unexpectedly"),
                    None => {
                        info!("Scheduler stopped");
                        return Ok(());
                    },
                },
            }
        }

        info!(running = tasks.len(), grace = ?self.shutdown_grace, "Stop requested; waiting for running plugins");
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "Plugin driver ended unexpectedly");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(abandoned = tasks.len(), "Shutdown grace period elapsed; abandoning running plugins");
            tasks.abort_all();
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Invoke every plugin once, in offset order, ignoring intervals.
    ///
    /// Failures are logged and the next plugin still runs. Stops early if the
    /// run status says so.
    pub async fn run_once(self) -> Result<()> {
        let mounted = self.mount()?;
        info!(plugins = mounted.len(), "Running each plugin once");
        for (entry, plugin) in mounted {
            if !self.status.is_running() {
                info!(offset = entry.offset, "Stop requested; skipping remaining plugins");
                break;
            }
            invoke_isolated(&entry, &plugin, &self.status).await;
        }
        Ok(())
    }
}

/// One plugin's timer loop.
async fn drive(entry: ScheduleEntry, plugin: MountedPlugin, status: RunStatus, base_unit: Duration) {
    let delay = base_unit.saturating_mul(entry.offset);
    debug!(plugin = plugin.name(), offset = entry.offset, delay = ?delay, "Waiting for first invocation");
    tokio::select! {
        biased;
        () = status.cancelled() => return,
        () = tokio::time::sleep(delay) => {},
    }

    info!(plugin = plugin.name(), offset = entry.offset, interval = ?entry.interval, "Starting plugin");
    let mut ticker = tokio::time::interval(entry.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = status.cancelled() => break,
            _ = ticker.tick() => {},
        }
        invoke_isolated(&entry, &plugin, &status).await;
    }
    debug!(plugin = plugin.name(), "Plugin timer stopped");
}

/// Run one invocation in its own task so that a panic is caught and logged
/// like an error. Dropping the future aborts the invocation.
async fn invoke_isolated(entry: &ScheduleEntry, plugin: &MountedPlugin, status: &RunStatus) {
    let task = AbortOnDropHandle::new(tokio::spawn({
        let plugin = plugin.clone();
        let status = status.clone();
        async move { plugin.invoke(&status).await }
    }));
    match task.await {
        Ok(Ok(())) => debug!(plugin = plugin.name(), offset = entry.offset, "Plugin run finished"),
        Ok(Err(err)) => error!(
            plugin = plugin.name(),
            offset = entry.offset,
            interval = ?entry.interval,
            error = ?err,
            "Plugin run failed"
        ),
        Err(err) if err.is_panic() => error!(
            plugin = plugin.name(),
            offset = entry.offset,
            interval = ?entry.interval,
            "Plugin run panicked"
        ),
        Err(err) => warn!(plugin = plugin.name(), offset = entry.offset, error = %err, "Plugin run cancelled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{Behaviour, Journal, Recorder};
    use tokio::time::Instant;

    fn scheduler(dir: &tempfile::TempDir, schedule: Schedule, status: &RunStatus) -> Scheduler {
        Scheduler::new(schedule, Connector::local(dir.path().join("trawl.db")), status.clone())
            .base_unit(Duration::from_secs(1))
            .shutdown_grace(Duration::from_secs(5))
    }

    fn offsets(recorder: &Recorder, start: Instant) -> Vec<u64> {
        recorder.calls().iter().map(|at| (*at - start).as_secs()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_and_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let steady = Recorder::new("steady");
        let faulty = Recorder::with("faulty", Behaviour::Faulty);
        let listener = Recorder::with("listener", Behaviour::Listen);
        let schedule = Schedule::new()
            .with(0, steady.handle(), Duration::from_secs(10))
            .unwrap()
            .with(1, faulty.handle(), Duration::from_secs(10))
            .unwrap()
            .with(2, listener.handle(), Duration::from_secs(10))
            .unwrap();

        let start = Instant::now();
        let run = tokio::spawn(scheduler(&dir, schedule, &status).run());
        tokio::time::sleep(Duration::from_secs(35)).await;
        status.stop();
        run.await.unwrap().unwrap();

        assert_eq!(offsets(&steady, start), [0, 10, 20, 30]);
        // Alternately fails and panics, and keeps being invoked.
        assert_eq!(offsets(&faulty, start), [1, 11, 21, 31]);
        // Still inside its first invocation until the stop.
        assert_eq!(offsets(&listener, start), [2]);
        assert!(Instant::now() - start < Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_runs_delay_rather_than_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let slow = Recorder::with("slow", Behaviour::Sleep(Duration::from_secs(25)));
        let schedule = Schedule::new().with(0, slow.handle(), Duration::from_secs(10)).unwrap();

        let start = Instant::now();
        let run = tokio::spawn(scheduler(&dir, schedule, &status).run());
        tokio::time::sleep(Duration::from_secs(55)).await;
        status.stop();
        run.await.unwrap().unwrap();

        // A late tick fires as soon as the previous run ends; the ones missed
        // meanwhile are dropped. The third run is abandoned after the grace.
        assert_eq!(offsets(&slow, start), [0, 25, 50]);
        assert_eq!(Instant::now() - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_plugins_are_abandoned_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let stubborn = Recorder::with("stubborn", Behaviour::Sleep(Duration::from_secs(3600)));
        let schedule = Schedule::new().with(0, stubborn.handle(), Duration::from_secs(10)).unwrap();

        let start = Instant::now();
        let run = tokio::spawn(scheduler(&dir, schedule, &status).run());
        tokio::time::sleep(Duration::from_secs(1)).await;
        status.stop();
        run.await.unwrap().unwrap();

        assert_eq!(Instant::now() - start, Duration::from_secs(6));
        assert_eq!(stubborn.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let late = Recorder::new("late");
        let schedule = Schedule::new().with(30, late.handle(), Duration::from_secs(10)).unwrap();

        let run = tokio::spawn(scheduler(&dir, schedule, &status).run());
        tokio::time::sleep(Duration::from_secs(10)).await;
        status.stop();
        run.await.unwrap().unwrap();
        assert!(late.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_schedule_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        scheduler(&dir, Schedule::new(), &status).run().await.unwrap();
        assert!(status.is_running());
    }

    #[tokio::test]
    async fn test_unmountable_plugin_prevents_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let fine = Recorder::new("fine");
        let broken = Recorder::new("not a table key");
        let schedule = Schedule::new()
            .with(0, fine.handle(), Duration::from_secs(10))
            .unwrap()
            .with(4, broken.handle(), Duration::from_secs(10))
            .unwrap();
        let err = scheduler(&dir, schedule, &status).run().await.unwrap_err();
        assert_eq!(*err, ErrorKind::Mount(4));
        assert!(fine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_once_goes_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let journal = Journal::default();
        let schedule = Schedule::new()
            .with(7, Recorder::journaled("last", Behaviour::Record, &journal).handle(), Duration::from_secs(1))
            .unwrap()
            .with(0, Recorder::journaled("first", Behaviour::Record, &journal).handle(), Duration::from_secs(1))
            .unwrap()
            .with(3, Recorder::journaled("middle", Behaviour::Faulty, &journal).handle(), Duration::from_secs(1))
            .unwrap();
        scheduler(&dir, schedule, &status).run_once().await.unwrap();
        assert_eq!(journal.names(), ["first", "middle", "last"]);
    }

    #[tokio::test]
    async fn test_run_once_stops_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let journal = Journal::default();
        let schedule = Schedule::new()
            .with(0, Recorder::journaled("stopper", Behaviour::Stop, &journal).handle(), Duration::from_secs(1))
            .unwrap()
            .with(1, Recorder::journaled("skipped", Behaviour::Record, &journal).handle(), Duration::from_secs(1))
            .unwrap();
        scheduler(&dir, schedule, &status).run_once().await.unwrap();
        assert_eq!(journal.names(), ["stopper"]);
    }

    #[tokio::test]
    async fn test_plugins_write_through_their_own_store() {
        let dir = tempfile::tempdir().unwrap();
        let status = RunStatus::new();
        let writer = Recorder::with("writer", Behaviour::Write);
        let schedule = Schedule::new().with(0, writer.handle(), Duration::from_secs(1)).unwrap();
        let scheduler = scheduler(&dir, schedule, &status);
        scheduler.run_once().await.unwrap();

        let mounted = MountedPlugin::new(writer.handle(), Connector::local(dir.path().join("trawl.db"))).unwrap();
        let cx = mounted.resources().enter();
        let titles = mounted.store().fetch_column(&cx, "title_key").await.unwrap();
        assert_eq!(titles.len(), 1);
        assert_eq!(titles[0].as_str(), Some("trawl.plugins.writer.Thread-1"));
    }

    #[test]
    fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.url = format!("sqlite://{}?mode=rwc", dir.path().join("trawl.db").display());
        config.scheduler.base_unit_secs = 5;
        config.scheduler.shutdown_grace_secs = 2;
        let scheduler = Scheduler::from_config(Schedule::new(), &config, RunStatus::new()).unwrap();
        assert_eq!(scheduler.base_unit, Duration::from_secs(5));
        assert_eq!(scheduler.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn test_from_config_rejects_other_databases() {
        let mut config = Config::default();
        config.database.url = "postgres://localhost/trawl".into();
        let err = Scheduler::from_config(Schedule::new(), &config, RunStatus::new()).unwrap_err();
        assert_eq!(*err, ErrorKind::Database);
    }
}
