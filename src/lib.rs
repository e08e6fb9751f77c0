//! Step-wise execution engine for programs generated from visual block
//! diagrams.
//!
//! An [`Interpreter`] runs one generated program against its own copy of a
//! world state. Each `step()` advances to the next highlighted block, the next
//! pause inside a custom block, or the end of the program. The
//! [`SteppingDriver`] wraps one interpreter for interactive use; the
//! [`BatchEvaluator`] scores a program against many testcases.

pub mod ast;
pub mod batch;
pub mod config;
pub mod diagnostic;
pub mod driver;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod protocol;
pub mod vm;
pub mod world;

pub use batch::{BatchEvaluator, TestcaseResult};
pub use config::{BatchConfig, ConfigError, EngineConfig};
pub use driver::{PauseHandle, Phase, Snapshot, SteppingDriver};
pub use interpreter::{
    BlockError, CodegenError, CustomBlock, ExecutionContext, Interpreter, SetupError, StateHandle, Verdict,
};
pub use vm::Value;
