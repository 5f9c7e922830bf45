pub mod frame;
pub mod handshake;

pub use frame::{read_frame, write_close_frame, write_text_frame, Frame, FrameReadOutcome, Opcode};
pub use handshake::accept_key;
