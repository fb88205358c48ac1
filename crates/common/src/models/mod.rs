mod event;
mod session;

pub use event::TunnelEvent;
pub use session::{ConnectionDetails, Session};
