//! Request body extraction
//!
//! axum's `Json` rejects malformed bodies with a plain-text response.
//! [`ApiJson`] reports them through [`ApiError`] instead, so clients get the
//! same envelope and request id as for every other failure.

use super::{errors::ApiError, middleware::RequestId};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::generate);

        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(body_rejected(request_id, rejection)),
        }
    }
}

fn body_rejected(request_id: RequestId, rejection: JsonRejection) -> ApiError {
    let message = match &rejection {
        JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
        JsonRejection::JsonDataError(_) => "request body has missing or mistyped fields",
        JsonRejection::MissingJsonContentType(_) => "expected content-type: application/json",
        _ => "request body could not be read",
    };
    ApiError::bad_request(request_id.0, message.to_string())
        .with_details(serde_json::json!({ "reason": rejection.body_text() }))
}
