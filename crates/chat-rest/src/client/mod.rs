//! HTTP dispatcher and typed endpoint helpers

mod dispatcher;
mod gateway;
mod request;

pub use dispatcher::{RestDispatcher, RestResponse};
pub use gateway::{GatewayBotInfo, GatewayInfo, SessionStartLimit};
pub use request::{Attachment, RestRequest};
