use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use super::Verdict;
use super::blocks::BlockError;

/// Capability object handed to every custom block.
///
/// Clones share the same underlying context; there is one per interpreter.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    inner: Rc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    exit: RefCell<Option<Verdict>>,
    suspension: Suspension,
}

impl ExecutionContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the final verdict and return the signal the block should
    /// propagate. The first recorded verdict wins.
    pub fn exit(&self, success: bool, message: impl Into<String>) -> BlockError {
        let verdict = Verdict { success, message: message.into() };
        self.inner.exit.borrow_mut().get_or_insert_with(|| verdict.clone());
        BlockError::Exit(verdict)
    }

    /// Suspend the calling block until the next `step()`.
    pub fn pause(&self) -> Pause {
        Pause { ctx: Rc::clone(&self.inner), ticket: None }
    }

    pub(crate) fn take_exit(&self) -> Option<Verdict> {
        self.inner.exit.borrow_mut().take()
    }

    pub(crate) fn suspension(&self) -> &Suspension {
        &self.inner.suspension
    }
}

struct Resolver {
    ticket: u64,
    waker: Waker,
}

/// Bookkeeping for the (at most one) outstanding [`Pause`].
#[derive(Default)]
pub(crate) struct Suspension {
    pending_resume: RefCell<Option<Resolver>>,
    issued: Cell<u64>,
    resumed_through: Cell<u64>,
}

impl Suspension {
    /// Whether a block is parked in `pause()` waiting for the next step.
    pub(crate) fn is_pending(&self) -> bool {
        self.pending_resume.borrow().is_some()
    }

    /// Release the parked block, if any.
    pub(crate) fn resume(&self) {
        let resolver = self.pending_resume.borrow_mut().take();
        if let Some(resolver) = resolver {
            self.resumed_through.set(resolver.ticket);
            resolver.waker.wake();
        }
    }

    fn park(&self, waker: &Waker) -> u64 {
        let ticket = self.issued.get() + 1;
        self.issued.set(ticket);
        *self.pending_resume.borrow_mut() = Some(Resolver { ticket, waker: waker.clone() });
        ticket
    }

    fn refresh(&self, ticket: u64, waker: &Waker) {
        if let Some(resolver) = self.pending_resume.borrow_mut().as_mut() {
            if resolver.ticket == ticket && !resolver.waker.will_wake(waker) {
                resolver.waker = waker.clone();
            }
        }
    }
}

/// Future returned by [`ExecutionContext::pause`].
#[must_use = "a pause does nothing unless awaited"]
pub struct Pause {
    ctx: Rc<ContextInner>,
    ticket: Option<u64>,
}

impl Future for Pause {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let ctx = Rc::clone(&self.ctx);
        let suspension = &ctx.suspension;
        match self.ticket {
            None => {
                let ticket = suspension.park(cx.waker());
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) if suspension.resumed_through.get() >= ticket => Poll::Ready(()),
            Some(ticket) => {
                suspension.refresh(ticket, cx.waker());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;

    #[test]
    fn exit_records_first_verdict() {
        let ctx = ExecutionContext::new();
        let signal = ctx.exit(true, "done");
        assert_eq!(signal, BlockError::Exit(Verdict::success("done")));
        let _ = ctx.exit(false, "later");
        assert_eq!(ctx.take_exit(), Some(Verdict::success("done")));
        assert_eq!(ctx.take_exit(), None);
    }

    #[test]
    fn pause_resolves_after_resume() {
        let ctx = ExecutionContext::new();
        let mut pause = ctx.pause();
        assert!(pause.poll_unpin(&mut Context::from_waker(Waker::noop())).is_pending());
        assert!(ctx.suspension().is_pending());

        // Polling again without a resume stays parked.
        assert!(pause.poll_unpin(&mut Context::from_waker(Waker::noop())).is_pending());

        ctx.suspension().resume();
        assert!(!ctx.suspension().is_pending());
        assert!(pause.poll_unpin(&mut Context::from_waker(Waker::noop())).is_ready());
    }

    #[test]
    fn resume_without_pause_is_a_no_op() {
        let ctx = ExecutionContext::new();
        ctx.suspension().resume();
        let mut pause = ctx.pause();
        assert!(pause.poll_unpin(&mut Context::from_waker(Waker::noop())).is_pending());
    }

    #[test]
    fn clones_share_the_context() {
        let ctx = ExecutionContext::new();
        let other = ctx.clone();
        let _ = other.exit(false, "boom");
        assert_eq!(ctx.take_exit(), Some(Verdict::failure("boom")));
    }
}
