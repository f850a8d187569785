//! Network layer: request descriptors, the transport seam, the request
//! pipeline and the shared token refresh.

mod pipeline;
mod refresh;
mod request;
mod transport;

pub use pipeline::{RequestPipeline, Timeouts};
pub use refresh::{RefreshCoordinator, RefreshPolicy, TokenPair};
pub use request::{ApiRequest, HttpRequest, HttpResponse, NoContent};
pub use transport::{ReqwestTransport, Transport};
