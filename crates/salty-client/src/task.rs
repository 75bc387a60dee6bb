//! Task extension point.
//!
//! A task is the protocol that takes over once both peers are
//! authenticated. Tasks never touch the signaling state directly: every
//! callback receives a [`TaskContext`] that queues what the task wants done,
//! and the signaling engine applies it afterwards.

use rmpv::Value;
use salty_core::{CloseCode, TaskMessage, ValidationError};

use crate::error::SignalingError;
use crate::state::SignalingState;

pub trait Task: Send {
    /// Protocol name, e.g. `v0.relayed-data.tasks.saltyrtc.org`.
    fn name(&self) -> &str;

    /// Message types this task handles on the signaling channel.
    fn supported_message_types(&self) -> &[&'static str];

    /// Data sent to the peer alongside the task name in `auth`.
    fn data(&self) -> Option<Value>;

    /// Called once the task was chosen, with the peer's data for it.
    fn init(&mut self, peer_data: Option<&Value>) -> Result<(), ValidationError>;

    fn on_peer_handshake_done(&mut self, ctx: &mut TaskContext);

    fn on_task_message(&mut self, message: TaskMessage, ctx: &mut TaskContext);

    /// Carry a signaling frame over the task's own channel after the local
    /// handover latch was set.
    fn send_signaling_message(&mut self, _frame: Vec<u8>) -> Result<(), SignalingError> {
        Err(SignalingError::internal(format!(
            "task {} does not support handover",
            self.name()
        )))
    }

    /// The signaling channel closed.
    fn close(&mut self, reason: CloseCode);
}

/// Requests queued by a task callback.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    Send(TaskMessage),
    Emit(Value),
    HandoverLocal,
    HandoverPeer,
    Close(CloseCode),
}

#[derive(Debug)]
pub struct TaskContext {
    state: SignalingState,
    actions: Vec<TaskAction>,
}

impl TaskContext {
    pub fn new(state: SignalingState) -> Self {
        Self {
            state,
            actions: Vec::new(),
        }
    }

    /// Signaling state at the time of the callback.
    pub fn state(&self) -> SignalingState {
        self.state
    }

    /// Send a task message to the peer through the signaling channel.
    pub fn send_message(&mut self, message: TaskMessage) {
        self.actions.push(TaskAction::Send(message));
    }

    /// Hand a value to the application.
    pub fn emit(&mut self, value: Value) {
        self.actions.push(TaskAction::Emit(value));
    }

    /// Outgoing signaling messages go through the task from now on.
    pub fn handover_local(&mut self) {
        self.actions.push(TaskAction::HandoverLocal);
    }

    /// Incoming signaling messages arrive through the task from now on.
    pub fn handover_peer(&mut self) {
        self.actions.push(TaskAction::HandoverPeer);
    }

    /// Send `close` to the peer and shut down.
    pub fn close(&mut self, reason: CloseCode) {
        self.actions.push(TaskAction::Close(reason));
    }

    pub fn into_actions(self) -> Vec<TaskAction> {
        self.actions
    }
}

/// Pick the first of `ours` that the peer offered.
pub fn select_task(ours: &[&str], offered: &[String]) -> Option<usize> {
    ours.iter()
        .position(|name| offered.iter().any(|o| o == name))
}
