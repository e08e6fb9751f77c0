use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::FutureExt;
use futures_util::future::LocalBoxFuture;

use super::Verdict;
use super::context::ExecutionContext;
use crate::vm::{Value, VmError};

/// How a custom block can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlockError {
    /// Produced by [`ExecutionContext::exit`]; ends the program with this verdict.
    #[error("exit({}, {})", .0.success, .0.message)]
    Exit(Verdict),
    #[error("{0}")]
    Failed(String),
}

impl BlockError {
    pub fn failed(message: impl Into<String>) -> Self {
        BlockError::Failed(message.into())
    }
}

impl From<BlockError> for VmError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Exit(verdict) => VmError::Exit(verdict),
            BlockError::Failed(message) => VmError::Host(message),
        }
    }
}

pub type BlockResult = Result<Value, BlockError>;

/// Shared access to the interpreter's world state for asynchronous blocks.
///
/// Borrows must not be held across an `.await`.
pub struct StateHandle<S>(Rc<RefCell<S>>);

impl<S> StateHandle<S> {
    pub(crate) fn new(state: S) -> Self {
        StateHandle(Rc::new(RefCell::new(state)))
    }

    pub fn read(&self) -> Ref<'_, S> {
        self.0.borrow()
    }

    pub fn write(&self) -> RefMut<'_, S> {
        self.0.borrow_mut()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

impl<S> Clone for StateHandle<S> {
    fn clone(&self) -> Self {
        StateHandle(Rc::clone(&self.0))
    }
}

type SyncBlockFn<S> = dyn Fn(&ExecutionContext, &mut S, Vec<Value>) -> BlockResult;
type AsyncBlockFn<S> = dyn Fn(ExecutionContext, StateHandle<S>, Vec<Value>) -> LocalBoxFuture<'static, BlockResult>;

pub(crate) enum BlockFn<S> {
    Sync(Rc<SyncBlockFn<S>>),
    Async(Rc<AsyncBlockFn<S>>),
}

impl<S> Clone for BlockFn<S> {
    fn clone(&self) -> Self {
        match self {
            BlockFn::Sync(f) => BlockFn::Sync(Rc::clone(f)),
            BlockFn::Async(f) => BlockFn::Async(Rc::clone(f)),
        }
    }
}

/// A native operation exposed to generated code under the name `block_type`.
pub struct CustomBlock<S> {
    block_type: String,
    pub(crate) func: BlockFn<S>,
}

impl<S: 'static> CustomBlock<S> {
    /// A block that completes within the instruction that calls it.
    pub fn new<F>(block_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ExecutionContext, &mut S, Vec<Value>) -> BlockResult + 'static,
    {
        CustomBlock { block_type: block_type.into(), func: BlockFn::Sync(Rc::new(f)) }
    }

    /// A block that suspends the program until its future settles. The future
    /// may await [`ExecutionContext::pause`] to hand control back to the caller
    /// of `step()`.
    pub fn new_async<F, Fut>(block_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext, StateHandle<S>, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = BlockResult> + 'static,
    {
        let boxed = move |ctx, state, args| f(ctx, state, args).boxed_local();
        CustomBlock { block_type: block_type.into(), func: BlockFn::Async(Rc::new(boxed)) }
    }
}

impl<S> CustomBlock<S> {
    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn is_async(&self) -> bool {
        matches!(self.func, BlockFn::Async(_))
    }
}

impl<S> Clone for CustomBlock<S> {
    fn clone(&self) -> Self {
        CustomBlock { block_type: self.block_type.clone(), func: self.func.clone() }
    }
}

impl<S> fmt::Debug for CustomBlock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomBlock")
            .field("block_type", &self.block_type)
            .field("async", &self.is_async())
            .finish()
    }
}
