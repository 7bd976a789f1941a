//! Migration orchestration controller.
//!
//! Drives the UI-facing state machine, owns the cached legacy inputs the
//! shell streams over, broadcasts engine progress as snapshots, and runs
//! the engine itself on a blocking thread (the engine is synchronous
//! SQLite + file work).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use hearth_store::{ExportedTableReader, PersistedStateReader, TargetDb};

use crate::engine::{EngineEvent, MigrationEngine};
use crate::migrator::{MigrationSources, Migrator};
use crate::migrators::default_migrators;

/// UI-facing stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    Introduction,
    BackupRequired,
    BackupProgress,
    BackupConfirmed,
    Migration,
    Completed,
    Error,
}

/// Per-migrator status shown in the progress UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigratorRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorProgress {
    pub id: String,
    pub name: String,
    pub status: MigratorRunStatus,
}

/// One snapshot of the whole migration state, pushed on every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub stage: MigrationStage,
    pub overall_progress: u8,
    pub current_message: String,
    pub migrators: Vec<MigratorProgress>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    fn initial() -> Self {
        Self {
            stage: MigrationStage::Introduction,
            overall_progress: 0,
            current_message: String::new(),
            migrators: Vec::new(),
            error: None,
        }
    }
}

/// Host-shell operations the controller needs but does not own.
pub trait ShellDelegate: Send + Sync {
    fn relaunch(&self);
    fn quit(&self);
    fn user_data_path(&self) -> PathBuf;
}

/// Commands mirroring the shell's named channels.
#[derive(Debug, Clone)]
pub enum ControllerCommand {
    CheckNeeded,
    GetProgress,
    GetLastError,
    GetUserDataPath,
    ProceedToBackup,
    ShowBackupDialog,
    BackupCompleted { success: bool },
    StartMigration,
    Retry,
    Cancel,
    Restart,
    SendPersistedState { state: Value },
    ExportCompleted { dir: PathBuf },
    WriteExportFile { dir: PathBuf, table: String, json: String },
}

/// Replies to controller commands.
#[derive(Debug, Clone)]
pub enum ControllerResponse {
    Ack,
    Bool(bool),
    Progress(ProgressSnapshot),
    LastError(Option<String>),
    Path(PathBuf),
}

struct ControllerState {
    stage: MigrationStage,
    persisted_state: Option<Value>,
    export_dir: PathBuf,
    last_error: Option<String>,
    snapshot: ProgressSnapshot,
    running: bool,
}

/// Factory for the migrator set a run registers; injectable for tests.
pub type MigratorFactory = dyn Fn() -> Vec<Box<dyn Migrator>> + Send + Sync;

pub struct MigrationController {
    state: Arc<Mutex<ControllerState>>,
    progress_tx: Arc<watch::Sender<ProgressSnapshot>>,
    delegate: Arc<dyn ShellDelegate>,
    migrator_factory: Arc<MigratorFactory>,
    db_path: PathBuf,
    dev_mode: bool,
}

impl MigrationController {
    #[must_use]
    pub fn new(
        db_path: PathBuf,
        export_dir: PathBuf,
        delegate: Arc<dyn ShellDelegate>,
        dev_mode: bool,
    ) -> Self {
        let (progress_tx, _) = watch::channel(ProgressSnapshot::initial());
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                stage: MigrationStage::Introduction,
                persisted_state: None,
                export_dir,
                last_error: None,
                snapshot: ProgressSnapshot::initial(),
                running: false,
            })),
            progress_tx: Arc::new(progress_tx),
            delegate,
            migrator_factory: Arc::new(default_migrators),
            db_path,
            dev_mode,
        }
    }

    /// Replace the migrator set (tests).
    pub fn set_migrator_factory(
        &mut self,
        factory: impl Fn() -> Vec<Box<dyn Migrator>> + Send + Sync + 'static,
    ) {
        self.migrator_factory = Arc::new(factory);
    }

    /// Subscribe to progress snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_tx.subscribe()
    }

    #[must_use]
    pub fn stage(&self) -> MigrationStage {
        self.state.lock().expect("controller state poisoned").stage
    }

    /// Handle one command from the shell.
    pub fn handle(&self, command: ControllerCommand) -> Result<ControllerResponse> {
        match command {
            ControllerCommand::CheckNeeded => {
                let db = TargetDb::open(&self.db_path)?;
                Ok(ControllerResponse::Bool(MigrationEngine::needs_migration(
                    &db,
                )?))
            }
            ControllerCommand::GetProgress => {
                let state = self.state.lock().expect("controller state poisoned");
                Ok(ControllerResponse::Progress(state.snapshot.clone()))
            }
            ControllerCommand::GetLastError => {
                let state = self.state.lock().expect("controller state poisoned");
                Ok(ControllerResponse::LastError(state.last_error.clone()))
            }
            ControllerCommand::GetUserDataPath => {
                Ok(ControllerResponse::Path(self.delegate.user_data_path()))
            }
            ControllerCommand::ProceedToBackup => {
                self.transition(MigrationStage::Introduction, MigrationStage::BackupRequired)?;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::ShowBackupDialog => {
                self.transition(MigrationStage::BackupRequired, MigrationStage::BackupProgress)?;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::BackupCompleted { success } => {
                let target = if success {
                    MigrationStage::BackupConfirmed
                } else {
                    MigrationStage::BackupRequired
                };
                self.transition(MigrationStage::BackupProgress, target)?;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::StartMigration => {
                self.start_migration()?;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::Retry => {
                self.transition(MigrationStage::Error, MigrationStage::BackupConfirmed)?;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::Cancel => {
                let state = self.state.lock().expect("controller state poisoned");
                if state.running {
                    bail!("migration is running; cancel closes the window after completion");
                }
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::Restart => {
                if self.dev_mode {
                    self.delegate.quit();
                } else {
                    self.delegate.relaunch();
                }
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::SendPersistedState { state } => {
                self.state
                    .lock()
                    .expect("controller state poisoned")
                    .persisted_state = Some(state);
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::ExportCompleted { dir } => {
                self.state
                    .lock()
                    .expect("controller state poisoned")
                    .export_dir = dir;
                Ok(ControllerResponse::Ack)
            }
            ControllerCommand::WriteExportFile { dir, table, json } => {
                ExportedTableReader::new(dir).write_table(&table, &json)?;
                // Export progress rides the same snapshot channel.
                let snapshot = {
                    let mut state = self.state.lock().expect("controller state poisoned");
                    state.snapshot.current_message = format!("Exported table {table}");
                    state.snapshot.clone()
                };
                let _ = self.progress_tx.send(snapshot);
                Ok(ControllerResponse::Ack)
            }
        }
    }

    fn transition(&self, from: MigrationStage, to: MigrationStage) -> Result<()> {
        let mut state = self.state.lock().expect("controller state poisoned");
        if state.stage != from {
            bail!("invalid transition: expected stage {from:?}, currently {:?}", state.stage);
        }
        state.stage = to;
        state.snapshot.stage = to;
        let snapshot = state.snapshot.clone();
        drop(state);
        let _ = self.progress_tx.send(snapshot);
        Ok(())
    }

    /// Kick off the engine on a blocking thread. Requires a confirmed
    /// backup; progress flows through the watch channel until the run
    /// lands in `Completed` or `Error`.
    fn start_migration(&self) -> Result<()> {
        let (persisted_state, export_dir) = {
            let mut state = self.state.lock().expect("controller state poisoned");
            if state.stage != MigrationStage::BackupConfirmed {
                bail!(
                    "invalid transition: expected stage BackupConfirmed, currently {:?}",
                    state.stage
                );
            }
            state.stage = MigrationStage::Migration;
            state.running = true;
            state.snapshot.stage = MigrationStage::Migration;
            state.snapshot.error = None;
            (
                state.persisted_state.clone().unwrap_or(Value::Null),
                state.export_dir.clone(),
            )
        };
        let _ = self
            .progress_tx
            .send(self.state.lock().expect("controller state poisoned").snapshot.clone());

        let state = Arc::clone(&self.state);
        let progress_tx = Arc::clone(&self.progress_tx);
        let factory = Arc::clone(&self.migrator_factory);
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let outcome = run_engine(
                &db_path,
                persisted_state,
                export_dir,
                factory.as_ref(),
                &state,
                &progress_tx,
            );

            let mut guard = state.lock().expect("controller state poisoned");
            guard.running = false;
            match outcome {
                Ok(()) => {
                    guard.stage = MigrationStage::Completed;
                    guard.snapshot.stage = MigrationStage::Completed;
                    guard.snapshot.overall_progress = 100;
                    guard.snapshot.current_message = "Migration completed".to_string();
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    tracing::error!("Migration failed: {message}");
                    guard.stage = MigrationStage::Error;
                    guard.last_error = Some(message.clone());
                    guard.snapshot.stage = MigrationStage::Error;
                    guard.snapshot.error = Some(message);
                }
            }
            let snapshot = guard.snapshot.clone();
            drop(guard);
            let _ = progress_tx.send(snapshot);
        });

        Ok(())
    }
}

fn run_engine(
    db_path: &std::path::Path,
    persisted_state: Value,
    export_dir: PathBuf,
    factory: &MigratorFactory,
    state: &Arc<Mutex<ControllerState>>,
    progress_tx: &watch::Sender<ProgressSnapshot>,
) -> Result<()> {
    let mut db = TargetDb::open(db_path)?;
    let sources = MigrationSources::new(
        PersistedStateReader::new(persisted_state),
        ExportedTableReader::new(export_dir),
    );

    let mut engine = MigrationEngine::new();
    engine.register(factory());

    {
        let mut guard = state.lock().expect("controller state poisoned");
        guard.snapshot.migrators = engine
            .migrator_descriptors()
            .into_iter()
            .map(|(id, name)| MigratorProgress {
                id: id.to_string(),
                name: name.to_string(),
                status: MigratorRunStatus::Pending,
            })
            .collect();
        let snapshot = guard.snapshot.clone();
        drop(guard);
        let _ = progress_tx.send(snapshot);
    }

    engine.run(&sources, &mut db, |event| {
        let mut guard = state.lock().expect("controller state poisoned");
        match event {
            EngineEvent::MigratorStarted { id, .. } => {
                if let Some(entry) = guard.snapshot.migrators.iter_mut().find(|m| m.id == id) {
                    entry.status = MigratorRunStatus::Running;
                }
            }
            EngineEvent::Progress {
                overall, message, ..
            } => {
                guard.snapshot.overall_progress = overall;
                guard.snapshot.current_message = message;
            }
            EngineEvent::MigratorFinished { id, success } => {
                if let Some(entry) = guard.snapshot.migrators.iter_mut().find(|m| m.id == id) {
                    entry.status = if success {
                        MigratorRunStatus::Completed
                    } else {
                        MigratorRunStatus::Failed
                    };
                }
            }
        }
        let snapshot = guard.snapshot.clone();
        drop(guard);
        let _ = progress_tx.send(snapshot);
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::{
        ControllerCommand, ControllerResponse, MigrationController, MigrationStage,
        MigratorRunStatus, ShellDelegate,
    };
    use crate::migrator::{
        ExecuteResult, MigrationContext, Migrator, PrepareResult, ValidateResult, ValidateStats,
    };

    struct NullShell {
        relaunches: AtomicUsize,
        quits: AtomicUsize,
    }

    impl NullShell {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                relaunches: AtomicUsize::new(0),
                quits: AtomicUsize::new(0),
            })
        }
    }

    impl ShellDelegate for NullShell {
        fn relaunch(&self) {
            self.relaunches.fetch_add(1, Ordering::SeqCst);
        }
        fn quit(&self) {
            self.quits.fetch_add(1, Ordering::SeqCst);
        }
        fn user_data_path(&self) -> PathBuf {
            PathBuf::from("/tmp/userdata")
        }
    }

    struct NoopMigrator {
        fail: bool,
    }

    impl Migrator for NoopMigrator {
        fn id(&self) -> &'static str {
            "noop"
        }
        fn name(&self) -> &'static str {
            "Noop"
        }
        fn description(&self) -> &'static str {
            "test"
        }
        fn order(&self) -> u32 {
            1
        }
        fn prepare(&mut self, _: &mut MigrationContext<'_>) -> anyhow::Result<PrepareResult> {
            Ok(PrepareResult::ok(0))
        }
        fn execute(&mut self, _: &mut MigrationContext<'_>) -> anyhow::Result<ExecuteResult> {
            if self.fail {
                Ok(ExecuteResult::failed("forced failure"))
            } else {
                Ok(ExecuteResult::ok(0))
            }
        }
        fn validate(&mut self, _: &mut MigrationContext<'_>) -> anyhow::Result<ValidateResult> {
            Ok(ValidateResult::ok(ValidateStats::default()))
        }
    }

    fn controller(dir: &tempfile::TempDir, fail: bool) -> MigrationController {
        let mut controller = MigrationController::new(
            dir.path().join("hearth.db"),
            dir.path().join("export"),
            NullShell::new(),
            false,
        );
        controller.set_migrator_factory(move || vec![Box::new(NoopMigrator { fail })]);
        controller
    }

    fn walk_to_backup_confirmed(controller: &MigrationController) {
        controller
            .handle(ControllerCommand::ProceedToBackup)
            .unwrap();
        controller
            .handle(ControllerCommand::ShowBackupDialog)
            .unwrap();
        controller
            .handle(ControllerCommand::BackupCompleted { success: true })
            .unwrap();
    }

    #[test]
    fn stage_transitions_follow_the_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir, false);
        assert_eq!(controller.stage(), MigrationStage::Introduction);

        walk_to_backup_confirmed(&controller);
        assert_eq!(controller.stage(), MigrationStage::BackupConfirmed);

        // Out-of-order command is rejected.
        assert!(controller.handle(ControllerCommand::ProceedToBackup).is_err());
    }

    #[test]
    fn failed_backup_returns_to_backup_required() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir, false);
        controller
            .handle(ControllerCommand::ProceedToBackup)
            .unwrap();
        controller
            .handle(ControllerCommand::ShowBackupDialog)
            .unwrap();
        controller
            .handle(ControllerCommand::BackupCompleted { success: false })
            .unwrap();
        assert_eq!(controller.stage(), MigrationStage::BackupRequired);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_run_reaches_completed() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir, false);
        controller
            .handle(ControllerCommand::SendPersistedState { state: json!({}) })
            .unwrap();
        walk_to_backup_confirmed(&controller);

        let mut rx = controller.subscribe();
        controller.handle(ControllerCommand::StartMigration).unwrap();

        loop {
            rx.changed().await.unwrap();
            let snapshot = rx.borrow().clone();
            match snapshot.stage {
                MigrationStage::Completed => {
                    assert_eq!(snapshot.overall_progress, 100);
                    assert!(snapshot
                        .migrators
                        .iter()
                        .all(|m| m.status == MigratorRunStatus::Completed));
                    break;
                }
                MigrationStage::Error => panic!("unexpected error: {:?}", snapshot.error),
                _ => {}
            }
        }

        // A completed run flips needs-migration off.
        let ControllerResponse::Bool(needed) =
            controller.handle(ControllerCommand::CheckNeeded).unwrap()
        else {
            panic!("expected bool response");
        };
        assert!(!needed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_run_reaches_error_and_retry_resets() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir, true);
        controller
            .handle(ControllerCommand::SendPersistedState { state: json!({}) })
            .unwrap();
        walk_to_backup_confirmed(&controller);

        let mut rx = controller.subscribe();
        controller.handle(ControllerCommand::StartMigration).unwrap();

        loop {
            rx.changed().await.unwrap();
            let stage = rx.borrow().stage;
            if stage == MigrationStage::Error {
                break;
            }
            assert_ne!(stage, MigrationStage::Completed);
        }

        let ControllerResponse::LastError(Some(error)) = controller
            .handle(ControllerCommand::GetLastError)
            .unwrap()
        else {
            panic!("expected an error");
        };
        assert!(error.contains("forced failure"));

        controller.handle(ControllerCommand::Retry).unwrap();
        assert_eq!(controller.stage(), MigrationStage::BackupConfirmed);
    }

    #[test]
    fn restart_routes_by_mode() {
        let dir = tempfile::tempdir().unwrap();
        let shell = NullShell::new();
        let controller = MigrationController::new(
            dir.path().join("hearth.db"),
            dir.path().join("export"),
            shell.clone(),
            true,
        );
        controller.handle(ControllerCommand::Restart).unwrap();
        assert_eq!(shell.quits.load(Ordering::SeqCst), 1);
        assert_eq!(shell.relaunches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn write_export_file_persists_one_table() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(&dir, false);
        controller
            .handle(ControllerCommand::WriteExportFile {
                dir: dir.path().join("export"),
                table: "topics".to_string(),
                json: "[]".to_string(),
            })
            .unwrap();
        assert!(dir.path().join("export/topics.json").is_file());
    }
}
