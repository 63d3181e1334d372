//! KRI relay core: browser-equivalent portal session emulation and sheet decoding.

pub mod client;
pub mod cookie;
pub mod credentials;
pub mod error;
pub mod portal;
pub mod relay;
pub mod session;
pub mod sheet;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{CookieClient, PortalResponse, RequestStep, ReqwestTransport, Transport};
pub use cookie::{CookieJar, CookieRecord};
pub use credentials::Credentials;
pub use error::{RelayError, RelayResult, StepRole};
pub use portal::PortalEndpoints;
pub use relay::{Achievements, ColumnOverrides, Relay, SheetResult};
pub use session::{PortalSession, SessionLease, SessionState, DEFAULT_SESSION_TTL};
pub use sheet::{decode, ColumnSpec, Record};
