pub mod listener;
pub mod packet;
