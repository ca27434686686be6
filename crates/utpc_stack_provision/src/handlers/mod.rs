pub mod apply;
pub mod destroy;
pub mod pipeline;
pub mod retry;
pub mod routes;
