use axum::response::{IntoResponse, Redirect};

use crate::auth::SIGN_IN_PAGE;

// axum handler for /
pub async fn root() -> impl IntoResponse {
    Redirect::temporary(SIGN_IN_PAGE)
}
