use axum::response::IntoResponse;

/// Undocumented landing route; points humans at the health endpoint.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
