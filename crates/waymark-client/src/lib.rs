//! Client core for the waymark live position protocol: the relay client,
//! the per-player reconciler, and the opportunistic peer-upgrade
//! negotiator. The relay path is always authoritative; direct links are
//! additive and may be absent at any time without affecting correctness.

pub mod direct;
pub mod error;
pub mod negotiator;
pub mod reconciler;
pub mod relay;
pub mod session;

pub use direct::{DirectConnector, LinkState, LocalDirectHub, NoDirectChannel, PeerLink};
pub use error::{ClientError, ClientResult, Connectivity};
pub use negotiator::Negotiator;
pub use reconciler::{PlayerEvent, Reconciler};
pub use relay::{RelayClient, RelayEvent, RelayHandle};
pub use session::{SyncConfig, SyncSession};
