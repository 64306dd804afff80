//! The rc/result continuation protocol.
//!
//! Every asynchronous operation in the runtime resolves through a
//! two-value outcome: success carries a JSON payload (possibly null),
//! failure carries a human-readable message. An async-callable receives
//! its continuation first, then its arguments, and invokes it exactly
//! once — the `FnOnce` bound makes double delivery unrepresentable, and
//! the [`Task`] resolve-once flag suppresses late deliveries after a
//! timeout.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

/// Two-value async outcome. `Success(Value::Null)` is the "none" case.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Error(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// One-shot continuation. Invoked exactly once, eventually, unless the
/// owning connection is torn down first.
pub type Callback = Box<dyn FnOnce(Outcome)>;

/// Positional and keyword arguments threaded through a dispatched call.
#[derive(Debug, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
}

impl CallArgs {
    pub fn new(args: Vec<Value>, kwargs: HashMap<String, Value>) -> Self {
        Self { args, kwargs }
    }
}

/// An async-callable. Task injection is an explicit opt-in: a callable
/// that wants the chaining handle constructs itself as `WithTask`; the
/// dispatcher checks the variant rather than inspecting anything.
pub enum Callable {
    WithCallback(Box<dyn FnOnce(Callback, CallArgs)>),
    WithTask(Box<dyn FnOnce(Task, CallArgs)>),
}

impl Callable {
    pub fn with_callback(f: impl FnOnce(Callback, CallArgs) + 'static) -> Self {
        Callable::WithCallback(Box::new(f))
    }

    pub fn with_task(f: impl FnOnce(Task, CallArgs) + 'static) -> Self {
        Callable::WithTask(Box::new(f))
    }
}

/// Continuation handle threading state across chained async steps.
///
/// Cloning shares the same underlying state, and a task injected into a
/// later step of a chain shares the attribute bag of the task that
/// started the chain, so a field set in one step is visible in every
/// later step. Resolution happens exactly once: the first of
/// `respond`/`error`/timeout wins and anything later is silently
/// discarded.
#[derive(Clone)]
pub struct Task {
    callback: Rc<RefCell<Option<Callback>>>,
    fields: Rc<RefCell<HashMap<String, Value>>>,
}

impl Task {
    pub fn new(callback: Callback) -> Self {
        Self {
            callback: Rc::new(RefCell::new(Some(callback))),
            fields: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// A fresh continuation sharing an existing attribute bag.
    fn chained(callback: Callback, fields: Rc<RefCell<HashMap<String, Value>>>) -> Self {
        Self {
            callback: Rc::new(RefCell::new(Some(callback))),
            fields,
        }
    }

    pub fn is_done(&self) -> bool {
        self.callback.borrow().is_none()
    }

    /// Store a value in the attribute bag.
    pub fn set(&self, name: &str, value: Value) {
        self.fields.borrow_mut().insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }

    pub fn respond(&self, result: Value) {
        self.resolve(Outcome::Success(result));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.resolve(Outcome::Error(message.into()));
    }

    pub(crate) fn resolve(&self, outcome: Outcome) {
        let callback = self.callback.borrow_mut().take();
        match callback {
            Some(callback) => callback(outcome),
            // already resolved; a stray late delivery is dropped
            None => tracing::debug!("task already resolved, discarding late outcome"),
        }
    }

    /// Adapt the task to the plain callback convention.
    pub fn into_callback(self) -> Callback {
        Box::new(move |outcome| self.resolve(outcome))
    }

    /// Chain another async step through this task.
    pub fn call(&self, callable: Callable) -> Call<Task> {
        Call::new(self.clone(), callable)
    }

    /// Arm the deadline. Synthesizes an error outcome of "timeout" when
    /// it elapses before the chain resolves; the resolve-once flag then
    /// turns any later real resolution into a no-op. Must run on a
    /// reactor thread.
    pub(crate) fn arm_timeout(&self, deadline: Duration) {
        let task = self.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(deadline).await;
            if !task.is_done() {
                task.resolve(Outcome::Error("timeout".to_string()));
            }
        });
    }
}

/// Anything that can originate a `call` and absorb its resolution: an
/// inbound [`Request`](crate::http::request::Request) replying over its
/// connection, or a [`Task`] resolving its own continuation.
pub trait Caller: Clone + 'static {
    /// Flag the caller response-delayed; no implicit reply until the
    /// chain resolves.
    fn mark_delayed(&self);

    /// Short identity for log lines.
    fn identity(&self) -> String;

    fn deliver_success(&self, code: u16, result: Value);

    fn deliver_error(&self, message: &str);

    fn deliver_not_found(&self);

    /// The task handed to a task-aware callable. A task caller shares
    /// its attribute bag with it so state persists across chained steps.
    fn spawn_task(&self, dispatcher: Callback) -> Task {
        Task::new(dispatcher)
    }
}

impl Caller for Task {
    fn mark_delayed(&self) {}

    fn identity(&self) -> String {
        "task".to_string()
    }

    fn deliver_success(&self, _code: u16, result: Value) {
        self.respond(result);
    }

    fn deliver_error(&self, message: &str) {
        self.error(message);
    }

    fn deliver_not_found(&self) {
        self.error("not found");
    }

    fn spawn_task(&self, dispatcher: Callback) -> Task {
        Task::chained(dispatcher, self.fields.clone())
    }
}

/// One outstanding `call` invocation, built fluently and fired with
/// [`Call::send`]. Exactly one of `on_success` / `on_none` / `on_error`
/// fires per resolution.
pub struct Call<C: Caller> {
    caller: C,
    callable: Callable,
    args: Vec<Value>,
    kwargs: HashMap<String, Value>,
    on_success: Option<Box<dyn FnOnce(C, Value)>>,
    success_code: u16,
    on_error: Option<Box<dyn FnOnce(C, String)>>,
    on_none: Option<Box<dyn FnOnce(C)>>,
    none_404: bool,
    timeout: Option<Duration>,
}

impl<C: Caller> Call<C> {
    pub(crate) fn new(caller: C, callable: Callable) -> Self {
        Self {
            caller,
            callable,
            args: Vec::new(),
            kwargs: HashMap::new(),
            on_success: None,
            success_code: 200,
            on_error: None,
            on_none: None,
            none_404: false,
            timeout: None,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.to_string(), value.into());
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(C, Value) + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Status used when replying with the raw result (default 200).
    pub fn success_code(mut self, code: u16) -> Self {
        self.success_code = code;
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(C, String) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_none(mut self, f: impl FnOnce(C) + 'static) -> Self {
        self.on_none = Some(Box::new(f));
        self
    }

    /// Reply 404 when the chain resolves successfully with a null result.
    pub fn on_none_404(mut self) -> Self {
        self.none_404 = true;
        self
    }

    pub fn timeout(mut self, deadline: Duration) -> Self {
        self.timeout = Some(deadline);
        self
    }

    /// Mark the caller delayed and invoke the callable with a dispatcher
    /// continuation. A callable that fails before I/O begins resolves
    /// the continuation immediately, so the caller is never left delayed.
    pub fn send(self) {
        let Call {
            caller,
            callable,
            args,
            kwargs,
            on_success,
            success_code,
            on_error,
            on_none,
            none_404,
            timeout,
        } = self;

        caller.mark_delayed();

        let dispatch_caller = caller.clone();
        let dispatcher: Callback = Box::new(move |outcome| match outcome {
            Outcome::Success(result) if !result.is_null() => match on_success {
                Some(f) => f(dispatch_caller, result),
                None => dispatch_caller.deliver_success(success_code, result),
            },
            Outcome::Success(_) => {
                if let Some(f) = on_none {
                    f(dispatch_caller);
                } else if none_404 {
                    dispatch_caller.deliver_not_found();
                } else {
                    dispatch_caller.deliver_success(success_code, Value::Null);
                }
            }
            Outcome::Error(message) => match on_error {
                Some(f) => f(dispatch_caller, message),
                None => {
                    tracing::error!(
                        caller = %dispatch_caller.identity(),
                        error = %message,
                        "call failed"
                    );
                    dispatch_caller.deliver_error(&message);
                }
            },
        });

        let call_args = CallArgs::new(args, kwargs);
        match callable {
            Callable::WithCallback(f) => match timeout {
                // a deadline needs the resolve-once guard even for plain
                // callback callables
                Some(deadline) => {
                    let guard = Task::new(dispatcher);
                    guard.arm_timeout(deadline);
                    f(guard.into_callback(), call_args);
                }
                None => f(dispatcher, call_args),
            },
            Callable::WithTask(f) => {
                let task = caller.spawn_task(dispatcher);
                if let Some(deadline) = timeout {
                    task.arm_timeout(deadline);
                }
                f(task, call_args);
            }
        }
    }
}

/// A continuation that can be awaited, for `Reactor::wait` and for
/// resuming connection drivers.
pub struct PendingReply {
    rx: oneshot::Receiver<Outcome>,
}

impl PendingReply {
    /// Returns the pending side and the callback that resolves it.
    pub fn new() -> (Self, Callback) {
        let (tx, rx) = oneshot::channel();
        let callback: Callback = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (Self { rx }, callback)
    }
}

impl Future for PendingReply {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // the resolving side was dropped without firing
            Poll::Ready(Err(_)) => Poll::Ready(Outcome::Error(
                "connection closed before completion".to_string(),
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}
