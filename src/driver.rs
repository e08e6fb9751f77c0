use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::interpreter::{CustomBlock, Interpreter, SetupError, Verdict};
use crate::protocol::{EditorMessage, HostMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Finished,
}

/// What the visualization sees after every `step()` and `reset()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<S> {
    pub state: S,
    pub highlighted_block: Option<String>,
    pub verdict: Option<Verdict>,
    pub phase: Phase,
}

impl<S> Snapshot<S> {
    pub fn highlight_message(&self) -> HostMessage {
        HostMessage::Highlight { highlighted_block: self.highlighted_block.clone() }
    }
}

/// Stops a running [`SteppingDriver::run`] before its next step.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Rc<Cell<bool>>);

impl PauseHandle {
    pub fn request_pause(&self) {
        self.0.set(true);
    }

    fn take(&self) -> bool {
        self.0.replace(false)
    }
}

type Subscriber<S> = Box<dyn FnMut(&Snapshot<S>)>;

/// Interactive single-program mode.
///
/// Also holds the editor session: the last generated code, the workspace
/// blocks, and the mapping from generated identifiers to display names.
pub struct SteppingDriver<S> {
    code: String,
    blocks: Vec<CustomBlock<S>>,
    initial_state: S,
    config: EngineConfig,
    interpreter: Option<Interpreter<S>>,
    phase: Phase,
    subscribers: Vec<Subscriber<S>>,
    pause: PauseHandle,
    workspace: serde_json::Value,
    variable_mappings: BTreeMap<String, String>,
}

impl<S: Clone + 'static> SteppingDriver<S> {
    pub fn new(
        code: impl Into<String>,
        blocks: Vec<CustomBlock<S>>,
        initial_state: S,
        config: EngineConfig,
    ) -> Result<Self, SetupError> {
        let mut driver = SteppingDriver {
            code: code.into(),
            blocks,
            initial_state,
            config,
            interpreter: None,
            phase: Phase::Idle,
            subscribers: Vec::new(),
            pause: PauseHandle::default(),
            workspace: serde_json::Value::Null,
            variable_mappings: BTreeMap::new(),
        };
        driver.reset()?;
        Ok(driver)
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&Snapshot<S>) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    /// Replace the interpreter with a fresh one over the same inputs.
    ///
    /// On error the driver has no interpreter and `step()` does nothing until
    /// the next successful reset.
    pub fn reset(&mut self) -> Result<(), SetupError> {
        self.interpreter = None;
        self.phase = Phase::Idle;
        self.pause.take();
        let result = Interpreter::with_config(&self.code, &self.blocks, &self.initial_state, self.config.clone());
        let outcome = match result {
            Ok(interpreter) => {
                self.interpreter = Some(interpreter);
                Ok(())
            }
            Err(e) => {
                log::warn!("reset failed: {e}");
                Err(e)
            }
        };
        self.publish();
        outcome
    }

    /// Step once and publish. Returns `false` once the program has a verdict
    /// or when there is nothing to step.
    pub async fn step(&mut self) -> bool {
        let more = self.advance().await;
        if more && self.phase != Phase::Running {
            self.phase = Phase::Paused;
        }
        self.publish();
        more
    }

    /// Step every `interval` until the program finishes or a pause is requested
    /// through [`SteppingDriver::pause_handle`].
    pub async fn run(&mut self, interval: Duration) -> Phase {
        if self.interpreter.as_ref().is_none_or(Interpreter::is_finished) {
            return self.phase;
        }
        self.phase = Phase::Running;
        loop {
            if self.pause.take() {
                self.phase = Phase::Paused;
                self.publish();
                break;
            }
            if !self.step().await {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        self.phase
    }

    async fn advance(&mut self) -> bool {
        let Some(interpreter) = self.interpreter.as_mut() else {
            return false;
        };
        let more = interpreter.step().await;
        if !more {
            self.phase = Phase::Finished;
        }
        more
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    pub fn snapshot(&self) -> Snapshot<S> {
        match &self.interpreter {
            Some(i) => Snapshot {
                state: i.state().clone(),
                highlighted_block: i.highlighted_block().map(str::to_string),
                verdict: i.verdict().cloned(),
                phase: self.phase,
            },
            None => Snapshot {
                state: self.initial_state.clone(),
                highlighted_block: None,
                verdict: None,
                phase: self.phase,
            },
        }
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for subscriber in &mut self.subscribers {
            subscriber(&snapshot);
        }
    }

    pub fn load_code(&mut self, code: impl Into<String>) -> Result<(), SetupError> {
        self.code = code.into();
        self.reset()
    }

    pub fn set_initial_state(&mut self, state: S) -> Result<(), SetupError> {
        self.initial_state = state;
        self.reset()
    }

    pub fn handle_message(&mut self, message: EditorMessage) -> Result<(), SetupError> {
        match message {
            EditorMessage::Ready => {
                log::info!("editor ready");
                Ok(())
            }
            EditorMessage::Code { code, blocks, variable_mappings } => {
                self.workspace = blocks;
                self.variable_mappings = variable_mappings;
                self.load_code(code)
            }
            EditorMessage::Error { message } => {
                log::warn!("editor reported: {message}");
                Ok(())
            }
        }
    }

    /// Program variables keyed by their display names.
    pub fn variables(&self) -> BTreeMap<String, serde_json::Value> {
        let Some(interpreter) = &self.interpreter else {
            return BTreeMap::new();
        };
        interpreter
            .global_scope()
            .into_iter()
            .filter(|(name, _)| *name != self.config.loop_trap_name)
            .map(|(name, value)| {
                let display = self.variable_mappings.get(&name).cloned().unwrap_or(name);
                (display, value)
            })
            .collect()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn workspace(&self) -> &serde_json::Value {
        &self.workspace
    }

    pub fn interpreter(&self) -> Option<&Interpreter<S>> {
        self.interpreter.as_ref()
    }
}
