//! Shared harness for engine integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use aegis_core::identity::{ComponentName, UserId};
use aegis_engine::platform::fakes::{FakeDirectory, RecordingNotifier, RecordingSink};
use aegis_engine::{CallerContext, EngineConfig, PolicyEngine};

/// One engine with scripted platform collaborators and a temp store.
pub struct Harness {
    pub directory: Arc<FakeDirectory>,
    pub sink: Arc<RecordingSink>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: PolicyEngine,
    tempdir: tempfile::TempDir,
}

impl Harness {
    /// Brings up an engine on a fresh temp directory with a short
    /// deactivation timeout so timeout paths are testable.
    pub fn new() -> Self {
        // Log output for failing tests; RUST_LOG selects the level.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let tempdir = tempfile::tempdir().expect("tempdir");
        let directory = Arc::new(FakeDirectory::new());
        let sink = Arc::new(RecordingSink::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let config = EngineConfig::new(tempdir.path())
            .with_deactivation_timeout(Duration::from_millis(100));
        let engine = PolicyEngine::new(
            config,
            directory.clone(),
            sink.clone(),
            notifier.clone(),
        )
        .expect("engine");
        Self {
            directory,
            sink,
            notifier,
            engine,
            tempdir,
        }
    }

    /// Registers `package` as an admin component for `user` and activates
    /// it. Returns the component and a caller context matching its uid.
    pub fn activate_admin(
        &self,
        package: &str,
        user: UserId,
        uid: u32,
    ) -> (ComponentName, CallerContext) {
        let component = ComponentName::new(package, ".AdminReceiver").expect("component");
        self.directory.register_admin(&component, user, uid);
        self.engine
            .activate_admin(&component, user, false)
            .expect("activate");
        (component, CallerContext::app(uid))
    }

    /// Restarts the engine against the same data directory, simulating a
    /// process restart.
    pub fn restart(self) -> Self {
        let Harness {
            directory,
            sink,
            notifier,
            engine,
            tempdir,
        } = self;
        drop(engine);
        let config = EngineConfig::new(tempdir.path())
            .with_deactivation_timeout(Duration::from_millis(100));
        let engine = PolicyEngine::new(
            config,
            directory.clone(),
            sink.clone(),
            notifier.clone(),
        )
        .expect("engine restart");
        Self {
            directory,
            sink,
            notifier,
            engine,
            tempdir,
        }
    }
}
