//! RCSP (RCS protocol) codec
//!
//! Request:
//!
//! ```text
//! RCSP/1.0 <VERB>\r\n
//! KEY: <key>\r\n        (optional)
//! VALUE: <value>\r\n    (optional, only after KEY)
//! ```
//!
//! Response:
//!
//! ```text
//! RCSP/1.0 [<VERB>] OK|NOT_OK\r\n
//! MESSAGE: <text>\r\n   (each field optional, only when non-empty)
//! KEY: <key>\r\n
//! VALUE: <value>\r\n
//! ```

pub mod command;
pub mod parser;
pub mod response;

pub use command::{DEFAULT_MAX_MESSAGE_SIZE, PROTOCOL_TOKEN, Request, Verb};
pub use parser::{parse_request, parse_response};
pub use response::{Response, ResponseWriter};
