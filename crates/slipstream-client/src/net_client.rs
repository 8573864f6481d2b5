use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use slipstream_core::net::messages::{ClientMessage, ServerMessage};
use slipstream_core::net::protocol::{
    ProtocolError, decode_server_message, encode_client_message,
};

/// Connection as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// Join sent, waiting for `RoomJoined`.
    Joining,
    Connected,
}

/// Frames received from the transport, waiting for the next update.
///
/// The transport's callbacks hold a clone and push raw bytes; the session
/// drains it once per frame, so messages never land mid-step. Single
/// threaded, hence `Rc<RefCell>`.
#[derive(Debug, Clone, Default)]
pub struct Inbox {
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: Vec<u8>) {
        self.frames.borrow_mut().push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    /// Take every pending frame, decoding as it goes. Malformed frames are
    /// dropped here.
    pub fn drain_decoded(&self) -> Vec<ServerMessage> {
        let frames = std::mem::take(&mut *self.frames.borrow_mut());
        frames
            .iter()
            .filter_map(|data| match decode_server_message(data) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    debug!(error = %e, len = data.len(), "dropping malformed server frame");
                    None
                },
            })
            .collect()
    }
}

/// Encode outgoing messages for the transport.
pub fn encode_outgoing(messages: &[ClientMessage]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    messages.iter().map(encode_client_message).collect()
}
