//! Streams sampled flows from sampler processes to a trainer.
//!
//! Every sender owns one persistent connection. It writes `DATA` frames
//! holding a single flow, `BATCH` frames holding several, and a single
//! `FINALIZE` frame once it has nothing more to send.

mod receiver;
mod sender;

pub use receiver::{ReceiverConfig, SamplerReceiver};
pub use sender::SamplerSender;

/// The kinds of frame a sampler connection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Kind {
    Data = 0,
    Finalize = 1,
    Batch = 2,
}

impl TryFrom<u8> for Kind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Finalize),
            2 => Ok(Self::Batch),
            byte => Err(byte),
        }
    }
}
