//! Relayed data task.
//!
//! Keeps using the signaling channel after the handshake: arbitrary
//! MessagePack values travel as `data { p }` messages through the relay,
//! still end-to-end encrypted with the session keys. There is no handover.

use rmpv::Value;
use salty_core::{CloseCode, TaskMessage, ValidationError};
use tracing::{debug, info, warn};

use crate::task::{Task, TaskContext};

pub const RELAYED_DATA_TASK_NAME: &str = "v0.relayed-data.tasks.saltyrtc.org";

const DATA_MESSAGE_TYPE: &str = "data";
const PAYLOAD_FIELD: &str = "p";

#[derive(Debug, Default)]
pub struct RelayedDataTask {
    ready: bool,
    close_reason: Option<CloseCode>,
}

impl RelayedDataTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a value into a `data` message.
    pub fn data_message(payload: Value) -> TaskMessage {
        TaskMessage::new(DATA_MESSAGE_TYPE, vec![(PAYLOAD_FIELD.to_string(), payload)])
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn close_reason(&self) -> Option<CloseCode> {
        self.close_reason
    }
}

impl Task for RelayedDataTask {
    fn name(&self) -> &str {
        RELAYED_DATA_TASK_NAME
    }

    fn supported_message_types(&self) -> &[&'static str] {
        &[DATA_MESSAGE_TYPE]
    }

    fn data(&self) -> Option<Value> {
        None
    }

    fn init(&mut self, _peer_data: Option<&Value>) -> Result<(), ValidationError> {
        self.ready = false;
        self.close_reason = None;
        Ok(())
    }

    fn on_peer_handshake_done(&mut self, _ctx: &mut TaskContext) {
        info!("relayed data task ready");
        self.ready = true;
    }

    fn on_task_message(&mut self, message: TaskMessage, ctx: &mut TaskContext) {
        match message.get(PAYLOAD_FIELD) {
            Some(payload) => {
                debug!("relayed data received");
                ctx.emit(payload.clone());
            }
            None => warn!("dropping data message without payload"),
        }
    }

    fn close(&mut self, reason: CloseCode) {
        info!("relayed data task closed: {}", reason);
        self.ready = false;
        self.close_reason = Some(reason);
    }
}
