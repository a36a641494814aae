//! HTTP API server for assessment streaming:
//! - POST /api/assess - Start an assessment, response is an SSE event stream
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
