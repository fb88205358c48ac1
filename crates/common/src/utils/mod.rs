mod encoding;
mod headers;
mod time;
mod token;

pub use encoding::{decode_body, encode_body};
pub use headers::{headers_to_map, map_to_headers, strip_matching_headers};
pub use time::current_timestamp_secs;
pub use token::issue_secret_token;
