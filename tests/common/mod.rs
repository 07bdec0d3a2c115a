//! In-process test doubles for the bus and engine contracts, plus helpers to
//! drive a relay through its lifecycle.
#![allow(dead_code)] // each test binary uses a different slice of the helpers

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cog_relay::bus::{BusConnector, BusError, Handlers, MessageBus, RELAY_INFO_TOPIC};
use cog_relay::engines::{Engine, EngineError, EngineFactory, ExecOutput};
use cog_relay::protocol::{Bundle, BundleKind, BundleListResponse, ExecutionRequest};
use cog_relay::{Config, Relay, RelayState};

pub const DIRECTIVE_TOPIC: &str = "/bot/relays/test/directives";

// ---------------------------------------------------------------------------
// Mock bus
// ---------------------------------------------------------------------------

pub struct MockBus {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    halted: AtomicBool,
}

impl MockBus {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            halted: AtomicBool::new(false),
        }
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

impl MessageBus for MockBus {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn directive_reply_to(&self) -> String {
        DIRECTIVE_TOPIC.to_string()
    }
}

// ---------------------------------------------------------------------------
// Mock connector
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockConnector {
    bus: Mutex<Option<Arc<MockBus>>>,
    handlers: Mutex<Option<Handlers>>,
    connects: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_bus(&self) -> Arc<MockBus> {
        self.bus.lock().clone().expect("no bus connected yet")
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Deliver a message the way the bus reader task would.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers = self.handlers.lock();
        let handlers = handlers.as_ref().expect("no handlers registered");
        (handlers.on_message)(topic, payload);
    }

    /// Fire the disconnect handler, simulating a dropped broker link.
    pub fn disconnect(&self, reason: &str) {
        let handlers = self.handlers.lock();
        let handlers = handlers.as_ref().expect("no handlers registered");
        (handlers.on_disconnect)(reason);
    }
}

#[async_trait]
impl BusConnector for MockConnector {
    async fn connect(&self, handlers: Handlers) -> Result<Arc<dyn MessageBus>, BusError> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(BusError::Connect("connection refused".to_string()));
        }
        let bus = Arc::new(MockBus::new());
        *self.bus.lock() = Some(Arc::clone(&bus));
        *self.handlers.lock() = Some(handlers);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(bus)
    }
}

// ---------------------------------------------------------------------------
// Scripted engines
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum Script {
    Output { stdout: String, stderr: String },
    Slow { delay: Duration, stdout: String },
    Fail(String),
}

#[derive(Default)]
pub struct ScriptedEngines {
    scripts: Mutex<HashMap<String, Script>>,
    fail_create: AtomicBool,
    fail_verify: AtomicBool,
    clean_calls: AtomicUsize,
}

impl ScriptedEngines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, command: &str, script: Script) {
        self.scripts.lock().insert(command.to_string(), script);
    }

    pub fn stdout(&self, command: &str, stdout: &str) {
        self.script(
            command,
            Script::Output {
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    /// How many times the cleanup timer has invoked `clean`.
    pub fn clean_calls(&self) -> usize {
        self.clean_calls.load(Ordering::SeqCst)
    }
}

struct ScriptedEngine {
    scripts: HashMap<String, Script>,
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        _bundle: &Bundle,
    ) -> Result<ExecOutput, EngineError> {
        match self.scripts.get(&request.command) {
            Some(Script::Output { stdout, stderr }) => Ok(ExecOutput {
                stdout: stdout.clone().into_bytes(),
                stderr: stderr.clone().into_bytes(),
            }),
            Some(Script::Slow { delay, stdout }) => {
                tokio::time::sleep(*delay).await;
                Ok(ExecOutput {
                    stdout: stdout.clone().into_bytes(),
                    stderr: Vec::new(),
                })
            }
            Some(Script::Fail(message)) => Err(EngineError::Execution(message.clone())),
            None => Err(EngineError::Execution(format!(
                "no script for command {}",
                request.command
            ))),
        }
    }
}

impl EngineFactory for ScriptedEngines {
    fn create(&self, _kind: BundleKind) -> Result<Box<dyn Engine>, EngineError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Setup("container daemon unreachable".into()));
        }
        Ok(Box::new(ScriptedEngine {
            scripts: self.scripts.lock().clone(),
        }))
    }

    fn verify(&self) -> Result<(), EngineError> {
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(EngineError::Setup("container daemon unreachable".into()));
        }
        Ok(())
    }

    fn clean(&self) -> Result<usize, EngineError> {
        self.clean_calls.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Payload builders and wait helpers
// ---------------------------------------------------------------------------

pub fn native_bundle(name: &str) -> Bundle {
    Bundle {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        kind: BundleKind::Native,
        image: None,
        commands: vec![],
    }
}

pub fn bundle_list(bundles: Vec<Bundle>) -> Vec<u8> {
    serde_json::to_vec(&BundleListResponse { bundles }).unwrap()
}

pub fn exec_payload(bundle: &str, command: &str, reply_to: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "bundle_name": bundle,
        "command": command,
        "reply_to": reply_to,
        "pipeline_id": "p1",
        "args": []
    }))
    .unwrap()
}

pub async fn wait_for_state(relay: &Relay, target: RelayState) {
    let mut rx = relay.subscribe_state();
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == target {
                return;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for state {target:?}"));
}

pub async fn wait_for_publish(bus: &MockBus, topic: &str, index: usize) -> Vec<u8> {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(payload) = bus.published_on(topic).get(index) {
                return payload.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    waited.unwrap_or_else(|_| panic!("timed out waiting for publish #{index} on {topic}"))
}

pub struct Harness {
    pub relay: Relay,
    pub connector: Arc<MockConnector>,
    pub engines: Arc<ScriptedEngines>,
}

/// Start a relay against the mock bus and walk it to `Ready` with the given
/// bundle assignment.
pub async fn ready_relay(config: Config, bundles: Vec<Bundle>) -> Harness {
    let connector = Arc::new(MockConnector::new());
    let engines = Arc::new(ScriptedEngines::new());
    let relay = Relay::new(
        config,
        Arc::clone(&connector) as Arc<dyn BusConnector>,
        Arc::clone(&engines) as Arc<dyn EngineFactory>,
    );
    relay.start().await.expect("relay startup");

    let bus = connector.current_bus();
    wait_for_publish(&bus, RELAY_INFO_TOPIC, 0).await;
    connector.deliver(DIRECTIVE_TOPIC, &bundle_list(bundles));
    wait_for_state(&relay, RelayState::Ready).await;

    Harness {
        relay,
        connector,
        engines,
    }
}
