mod routes;
mod ws;

pub use routes::create_router;
pub use ws::viewer_ws_handler;
