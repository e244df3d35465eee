//! Reverse proxy in front of the Vertex AI OpenAI-compatible endpoint

mod headers;
mod inspect;
mod models;
mod proxy;
mod rewrite;
mod router;
mod server;
mod target;

pub use headers::{append_forwarded_for, strip_hop_by_hop};
pub use inspect::{DiagnosticBody, ResponseInspector, decode_gzip, describe_body};
pub use models::{DEFAULT_MODEL_IDS, Model, ModelCatalog, ModelList};
pub use proxy::{PROXY_ERROR_PREFIX, ProxyCore};
pub use rewrite::{
    CHAT_COMPLETIONS_PATH, ForwardBody, ForwardedRequest, ROUTE_PREFIX, RequestRewriter,
    rewrite_path,
};
pub use router::{AppState, create_router};
pub use server::Gateway;
pub use target::ProxyTarget;
