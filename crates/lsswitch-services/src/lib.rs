//! lsswitch-services — the stateful building blocks of the relay plane:
//! the peer connection hub, the two TTL-reaped lounges, and the HTTP
//! worker pool.

pub mod client_lounge;
pub mod http_pool;
pub mod hub;
pub mod switch_lounge;

pub use client_lounge::LocalClientLounge;
pub use http_pool::{HttpPool, HttpRequest, HttpRequestKind, HttpResponse};
pub use hub::{ConnWithChan, ConnectionHub, HubError};
pub use switch_lounge::{LoungeError, SwitchLounge};
