//! Message passing: communicator backends, wire framing, and the collectives built
//! on them.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use collective::{Collective, CommCollective};
pub use communicator::{CommTag, Communicator, LocalComm, SerialComm, Wait};
