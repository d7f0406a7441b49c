//! CLI command implementations.
//!
//! | Module    | Commands handled          |
//! |-----------|---------------------------|
//! | `serve`   | `Serve`, `Init`           |
//! | `watch`   | `Watch`                   |
//! | `emit`    | `Emit`, `Status`          |

pub mod emit;
pub mod serve;
pub mod watch;

pub use emit::{cmd_emit, cmd_status};
pub use serve::{cmd_init, cmd_serve};
pub use watch::cmd_watch;
