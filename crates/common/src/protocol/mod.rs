mod message;
mod relay;
mod request;
mod response;

pub use message::{ErrorCode, Message};
pub use relay::{RelayAssignment, RelayReply};
pub use request::HttpRequest;
pub use response::HttpResponse;
