pub mod cors;
pub mod shutdown;

pub mod response {
    use std::fmt::{Debug, Display};

    use anyhow::Error;
    use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
    use tracing::error;

    pub fn err_resp<T>(e: T, code: StatusCode) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        let reason = format!("{}", e);
        error!("{:?}", e.into());
        (code, Json(serde_json::json!({ "reason": reason }))).into_response()
    }

    pub fn not_found<T>(e: T) -> Response
    where
        T: Into<Error> + Display + Debug,
    {
        err_resp(e, StatusCode::NOT_FOUND)
    }
}
