//! HTTP API.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /health` | [`handlers::health`] |
//! | `GET /feeds`, `POST /feeds` | [`handlers::list_feeds`], [`handlers::subscribe`] |
//! | `GET /feeds/:id`, `DELETE /feeds/:id` | [`handlers::get_feed`], [`handlers::delete_feed`] |
//! | `POST /feeds/:id/refresh` | [`handlers::refresh_feed`] |
//! | `GET /episodes` | [`handlers::list_episodes`] |

mod error;
pub mod handlers;
mod router;

pub use error::ApiError;
pub use handlers::AppState;
pub use router::create_router;
