use std::cell::Ref;
use std::collections::HashSet;
use std::future::poll_fn;
use std::task::Poll;

use futures_util::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};

use crate::ast::{Program, SourceMap, Span};
use crate::config::EngineConfig;
use crate::vm::{self, CompiledProgram, NativeHost, NativeId, NativeOutcome, Value, Vm, VmError};
use crate::{lexer, parser};

pub mod blocks;
pub mod context;

pub use blocks::{BlockError, BlockResult, CustomBlock, StateHandle};
pub use context::{ExecutionContext, Pause};

use blocks::BlockFn;

/// Message of every verdict produced by a program that stopped on its own.
pub const TERMINATED: &str = "program terminated without finishing";

/// Final outcome of a program. Once set it never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub success: bool,
    pub message: String,
}

impl Verdict {
    pub fn success(message: impl Into<String>) -> Self {
        Verdict { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Verdict { success: false, message: message.into() }
    }
}

/// The generated source could not be turned into bytecode. Always a bug in
/// the code generator, never in the user's program.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct CodegenError {
    pub code: &'static str,
    pub message: String,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl CodegenError {
    fn new(code: &'static str, message: String, span: Span, map: &SourceMap) -> Self {
        let location = map.locate_span(span);
        CodegenError { code, message, span, line: location.line, column: location.column }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("code generation error at {0}")]
    Codegen(#[from] CodegenError),
    #[error("custom block type '{0}' is defined more than once")]
    DuplicateBlock(String),
}

/// Lex and parse generated source.
pub fn parse_program(code: &str) -> Result<Program, CodegenError> {
    let map = SourceMap::new(code);
    let tokens = lexer::lex(code).map_err(|e| CodegenError::new(e.code, e.to_string(), e.span, &map))?;
    parser::parse(tokens).map_err(|e| CodegenError::new(e.code, e.message, e.span, &map))
}

/// Lex, parse and compile generated source.
pub fn compile_program(code: &str) -> Result<CompiledProgram, CodegenError> {
    let program = parse_program(code)?;
    vm::compile(&program).map_err(|e| CodegenError::new(e.code, e.message, e.span, &SourceMap::new(code)))
}

// ── Native bindings ──────────────────────────────────────────────────

enum Binding {
    Highlight,
    Error,
    Exit,
    Custom(usize),
}

const BUILTIN_NATIVES: [(&str, Binding); 3] =
    [("highlightBlock", Binding::Highlight), ("error", Binding::Error), ("exit", Binding::Exit)];

enum BlockPoll {
    Settled(BlockResult),
    Paused,
}

/// Everything the VM can reach through its natives.
struct Runtime<S> {
    state: StateHandle<S>,
    blocks: Vec<CustomBlock<S>>,
    /// Indexed by [`NativeId`].
    bindings: Vec<Binding>,
    ctx: ExecutionContext,
    highlighted: Option<String>,
    /// Set by `highlightBlock`; ends the current step.
    progressed: bool,
    verdict: Option<Verdict>,
    current_block: Option<LocalBoxFuture<'static, BlockResult>>,
}

impl<S: 'static> Runtime<S> {
    fn finish(&mut self, verdict: Verdict) {
        if self.verdict.is_none() {
            log::debug!("verdict: success={} message={:?}", verdict.success, verdict.message);
            self.verdict = Some(verdict);
        }
    }

    /// Drive the suspended block until it settles or parks in `pause()`.
    async fn settle_block(&mut self) -> BlockPoll {
        let Some(block) = self.current_block.as_mut() else {
            return BlockPoll::Settled(Ok(Value::Undefined));
        };
        let suspension = self.ctx.suspension();
        poll_fn(|cx| match block.as_mut().poll(cx) {
            Poll::Ready(result) => Poll::Ready(BlockPoll::Settled(result)),
            Poll::Pending if suspension.is_pending() => Poll::Ready(BlockPoll::Paused),
            Poll::Pending => Poll::Pending,
        })
        .await
    }
}

impl<S: 'static> NativeHost for Runtime<S> {
    fn call_native(&mut self, id: NativeId, args: Vec<Value>) -> Result<NativeOutcome, VmError> {
        let binding = self.bindings.get(id.index()).ok_or(VmError::Internal("unbound native"))?;
        match binding {
            Binding::Highlight => {
                self.highlighted = args.first().filter(|v| !v.is_nullish()).map(Value::to_string);
                self.progressed = true;
                Ok(NativeOutcome::Return(Value::Undefined))
            }
            Binding::Error => {
                let message = args.first().map(Value::to_string).unwrap_or_default();
                self.finish(Verdict::failure(message));
                Ok(NativeOutcome::Return(Value::Undefined))
            }
            Binding::Exit => {
                let success = args.first().is_some_and(Value::truthy);
                let message = args.get(1).filter(|v| !v.is_nullish()).map(Value::to_string).unwrap_or_default();
                Err(VmError::Exit(Verdict { success, message }))
            }
            Binding::Custom(index) => {
                let block = self.blocks.get(*index).ok_or(VmError::Internal("unbound block"))?;
                log::trace!("custom block {}", block.block_type());
                match block.func.clone() {
                    BlockFn::Sync(f) => {
                        let result = f(&self.ctx, &mut *self.state.write(), args);
                        if let Some(verdict) = self.ctx.take_exit() {
                            return Err(VmError::Exit(verdict));
                        }
                        Ok(NativeOutcome::Return(result?))
                    }
                    BlockFn::Async(f) => {
                        self.current_block = Some(f(self.ctx.clone(), self.state.clone(), args));
                        Ok(NativeOutcome::Suspend)
                    }
                }
            }
        }
    }
}

// ── Interpreter ──────────────────────────────────────────────────────

/// Executes one generated program against its own copy of the world state,
/// one visible step at a time.
pub struct Interpreter<S> {
    vm: Vm,
    runtime: Runtime<S>,
    config: EngineConfig,
    steps: u64,
}

impl<S: Clone + 'static> Interpreter<S> {
    pub fn new(code: &str, blocks: &[CustomBlock<S>], initial_state: &S) -> Result<Self, SetupError> {
        Self::with_config(code, blocks, initial_state, EngineConfig::default())
    }

    pub fn with_config(
        code: &str,
        blocks: &[CustomBlock<S>],
        initial_state: &S,
        config: EngineConfig,
    ) -> Result<Self, SetupError> {
        let mut seen = HashSet::new();
        if let Some(dup) = blocks.iter().find(|b| !seen.insert(b.block_type())) {
            return Err(SetupError::DuplicateBlock(dup.block_type().to_string()));
        }

        let mut vm = Vm::new(compile_program(code)?, &config);
        let mut bindings = Vec::with_capacity(BUILTIN_NATIVES.len() + blocks.len());
        for (name, binding) in BUILTIN_NATIVES {
            vm.define_native(name);
            bindings.push(binding);
        }
        vm.set_global(&config.loop_trap_name, Value::from(config.loop_budget));
        // Custom blocks come last so they shadow the built-in natives.
        for (index, block) in blocks.iter().enumerate() {
            vm.define_native(block.block_type());
            bindings.push(Binding::Custom(index));
        }

        Ok(Interpreter {
            vm,
            runtime: Runtime {
                state: StateHandle::new(initial_state.clone()),
                blocks: blocks.to_vec(),
                bindings,
                ctx: ExecutionContext::new(),
                highlighted: None,
                progressed: false,
                verdict: None,
                current_block: None,
            },
            config,
            steps: 0,
        })
    }

    /// Advance to the next visible point: a highlight, a pause inside a custom
    /// block, or the end of the program. Returns `false` once a verdict exists.
    pub async fn step(&mut self) -> bool {
        if self.runtime.verdict.is_some() {
            return false;
        }
        self.steps += 1;
        self.runtime.progressed = false;
        self.runtime.ctx.suspension().resume();

        let mut executed: u64 = 0;
        loop {
            if self.vm.is_paused() {
                match self.runtime.settle_block().await {
                    BlockPoll::Paused => break,
                    BlockPoll::Settled(result) => {
                        self.runtime.current_block = None;
                        if let Some(verdict) = self.runtime.ctx.take_exit() {
                            self.runtime.finish(verdict);
                            break;
                        }
                        match result {
                            Ok(value) => self.vm.resume(value),
                            Err(err) => {
                                let verdict = self.convert_error(err.into());
                                self.runtime.finish(verdict);
                                break;
                            }
                        }
                    }
                }
            }

            match self.vm.step(&mut self.runtime) {
                Ok(true) => {}
                Ok(false) => {
                    self.runtime.finish(Verdict::failure(TERMINATED));
                    break;
                }
                Err(err) => {
                    let verdict = self.convert_error(err);
                    self.runtime.finish(verdict);
                    break;
                }
            }
            if self.runtime.verdict.is_some() || self.runtime.progressed {
                break;
            }

            executed += 1;
            let over_budget = self.config.max_instructions_per_step.is_some_and(|limit| executed >= limit);
            if over_budget && !self.vm.is_paused() {
                self.runtime.finish(Verdict::failure(format!("{TERMINATED}: no visible progress")));
                break;
            }
        }

        self.runtime.verdict.is_none()
    }

    fn convert_error(&self, err: VmError) -> Verdict {
        match err {
            VmError::Exit(verdict) => verdict,
            other => {
                let budget = self.vm.global(&self.config.loop_trap_name).map(Value::to_number);
                if budget.is_some_and(|b| b <= 0.0) {
                    Verdict::failure(format!("{TERMINATED}: infinite loop"))
                } else {
                    Verdict::failure(other.to_string())
                }
            }
        }
    }
}

impl<S> Interpreter<S> {
    pub fn state(&self) -> Ref<'_, S> {
        self.runtime.state.read()
    }

    pub fn highlighted_block(&self) -> Option<&str> {
        self.runtime.highlighted.as_deref()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.runtime.verdict.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.runtime.verdict.is_some()
    }

    /// Number of `step()` calls that did work.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Program globals as JSON, without functions or engine builtins.
    pub fn global_scope(&self) -> serde_json::Map<String, serde_json::Value> {
        self.vm.globals_json()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
