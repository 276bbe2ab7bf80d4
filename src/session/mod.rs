//! Server process sessions over stdio.
//!
//! - `codec`: newline framing with a per-line size bound.
//! - `spawner`: launch specifications for both server modes and spawning.
//! - `process`: [`ProcessSession`], the exclusive owner of one child's
//!   streams, with bounded reads and guaranteed termination.

pub mod codec;
pub mod process;
pub mod spawner;

pub use process::{with_session, ProcessSession, SessionIo};
pub use spawner::{LaunchMode, LaunchSpec};
