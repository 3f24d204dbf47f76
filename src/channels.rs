use crate::prelude::*;
use crate::solis::listener::ChannelData;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_listener: broadcast::Sender<ChannelData>,
    pub to_listener: broadcast::Sender<ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_listener: Self::channel(),
            to_listener: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
