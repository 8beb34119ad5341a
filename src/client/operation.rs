//! Cancellable handles for asynchronous stream operations.

use std::cell::RefCell;
use std::rc::Rc;

use super::context::Context;
use super::stream::Stream;

/// A callback invoked when an operation completes. `success` is false when
/// the server reported an error for the command.
pub type SuccessCallback = Box<dyn FnOnce(&Stream, bool)>;

/// The lifecycle of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// The operation is still in progress.
    Running,
    /// The operation has completed.
    Done,
    /// The operation has been cancelled; its callback will never run.
    Cancelled,
}

struct OperationInner {
    state: OperationState,
    stream_id: u64,
    context: Option<Context>,
    callback: Option<SuccessCallback>,
}

/// A handle for an in-flight stream operation.
///
/// The handle can be cloned and held by the application; cancelling it
/// prevents the completion callback from firing. Operations are cancelled
/// automatically when their stream unlinks.
#[derive(Clone)]
pub struct Operation {
    inner: Rc<RefCell<OperationInner>>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Operation").field(&self.state()).finish()
    }
}

impl Operation {
    pub(crate) fn new(context: Context, stream_id: u64, callback: Option<SuccessCallback>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(OperationInner {
                state: OperationState::Running,
                stream_id,
                context: Some(context),
                callback,
            })),
        }
    }

    /// The current state of the operation.
    pub fn state(&self) -> OperationState {
        self.inner.borrow().state
    }

    /// Cancels the operation. The completion callback will not be invoked.
    ///
    /// Note that this only detaches the local completion handling; the
    /// command itself has already been sent and will still take effect on
    /// the server.
    pub fn cancel(&self) {
        let context = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != OperationState::Running {
                return;
            }

            inner.state = OperationState::Cancelled;
            inner.callback = None;
            inner.context.take()
        };

        if let Some(context) = context {
            context.forget_operation(self);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.borrow().state == OperationState::Cancelled
    }

    pub(crate) fn stream_id(&self) -> u64 {
        self.inner.borrow().stream_id
    }

    pub(crate) fn same_as(&self, other: &Operation) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Marks the operation done and fires the completion callback.
    pub(crate) fn complete(&self, stream: &Stream, success: bool) {
        let (callback, context) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != OperationState::Running {
                return;
            }

            inner.state = OperationState::Done;
            (inner.callback.take(), inner.context.take())
        };

        if let Some(context) = context {
            context.forget_operation(self);
        }

        if let Some(callback) = callback {
            callback(stream, success);
        }
    }

    /// Marks the operation done without firing the callback, for replies
    /// that arrive after the stream has left the ready state.
    pub(crate) fn finish_silently(&self) {
        let context = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != OperationState::Running {
                return;
            }

            inner.state = OperationState::Done;
            inner.callback = None;
            inner.context.take()
        };

        if let Some(context) = context {
            context.forget_operation(self);
        }
    }
}
