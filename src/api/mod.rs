//! The API layer, containing operator handlers and routing.

pub mod admin;
pub mod handlers;
pub mod router;

pub use admin::{
    DepositListResponse, DepositView, LedgerStatsResponse, RequeueFailedResponse,
    RequeueResponse, SweepJobView, SweepListResponse, UserBindingView, UserListResponse,
};
pub use handlers::ApiDoc;
pub use router::create_router;
