//! axum surface of the gateway.
//!
//! | Route | Auth | Success |
//! |---|---|---|
//! | `GET /health` | none | 200 `{"status":"ok"}` |
//! | `GET /ready` | none | 200 `{"status":"ready"}` once the task store answers |
//! | `POST /api/upload` | bearer | 201 task JSON |
//! | `GET /api/tasks` | bearer | 200 array of task JSON |
//! | `GET /metrics` | none | Prometheus text, when an exporter is attached |
//!
//! Failures use the body `{"error": string}`.

mod error;
mod extract;
mod interceptor;
mod routes;
mod server;

pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use extract::{Authenticated, REQUEST_TIMEOUT_HEADER, RequestDeadline};
pub use interceptor::{
    Admission, BearerAuthInterceptor, InterceptorChain, REQUEST_ID_HEADER, Rejection, RequestId,
    RequestIdInterceptor, RequestInterceptor,
};
pub use server::{AppState, DynIngestionService, router, serve};
