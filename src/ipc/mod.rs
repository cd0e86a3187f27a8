//! IPC module for controller/monitor communication

mod channel;
pub(crate) mod protocol;

pub use channel::{
    control_channel, forward_frames, forward_messages, ControlChannel, MonitorEndpoint,
    COMMAND_CAPACITY, NOTICE_CAPACITY,
};
pub use protocol::Command;
