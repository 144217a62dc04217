// HTTP surface: a plain `axum::Router` wired with `State<AppState>`
// handlers returning `AppResult<Json<Value>>`.

pub mod routes;

pub use routes::create_router;
