mod app;
mod export;

pub use app::add_routes;
