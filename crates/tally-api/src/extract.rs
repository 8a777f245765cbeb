//! JSON body extractor with this API's rejection statuses.
//!
//! axum's `Json` answers 422 for well-formed JSON of the wrong shape and uses
//! its own plain-text bodies. Here every decode failure is 400 with an
//! `{"error"}` body, and a missing or foreign `Content-Type` is 415.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(JsonRejection::MissingJsonContentType(e)) => {
                Err(ApiError::UnsupportedMedia(e.body_text()))
            }
            Err(e) => Err(ApiError::InvalidInput(e.body_text())),
        }
    }
}
