//! Mapping from service errors to HTTP responses.

use {
    axum::{
        extract::rejection::{JsonRejection, PathRejection},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    cardvault_cards::Error as CardError,
    cardvault_vault::VaultError,
    tracing::{error, warn},
};

/// Error returned by every API handler. Renders as `{"error": ".."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Card(CardError),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Card(err) => card_status(err),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Unauthorized => "missing or invalid x-user-id header".into(),
            Self::BadRequest(msg) => msg.clone(),
            Self::Card(err) => match card_status(err) {
                StatusCode::SERVICE_UNAVAILABLE => "storage unavailable, retry later".into(),
                StatusCode::INTERNAL_SERVER_ERROR => "internal error".into(),
                _ => err.to_string(),
            },
        }
    }
}

fn card_status(err: &CardError) -> StatusCode {
    if err.is_storage() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match err {
        CardError::Validation { .. } => StatusCode::BAD_REQUEST,
        CardError::CardNotFound { .. } => StatusCode::NOT_FOUND,
        CardError::Conflict { .. } => StatusCode::CONFLICT,
        CardError::Vault(VaultError::RotationInProgress) => StatusCode::CONFLICT,
        CardError::Vault(
            VaultError::KeyUnavailable { .. }
            | VaultError::AuthenticationFailure
            | VaultError::MalformedCiphertext { .. },
        ) => StatusCode::UNPROCESSABLE_ENTITY,
        CardError::Vault(_)
        | CardError::Sqlx(_)
        | CardError::Migrate(_)
        | CardError::CorruptRow { .. }
        | CardError::External { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CardError> for ApiError {
    fn from(err: CardError) -> Self {
        Self::Card(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(format!("invalid card id: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Card(err) = &self {
            if status.is_server_error() {
                error!(error = %err, status = status.as_u16(), "request failed");
            } else if status == StatusCode::UNPROCESSABLE_ENTITY {
                warn!(error = %err, "stored card could not be opened");
            }
        }
        (status, Json(serde_json::json!({ "error": self.message() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, uuid::Uuid};

    #[test]
    fn card_errors_map_to_statuses() {
        let cases = [
            (CardError::validation("bad"), StatusCode::BAD_REQUEST),
            (CardError::card_not_found(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                CardError::Conflict {
                    card_id: Uuid::nil(),
                },
                StatusCode::CONFLICT,
            ),
            (
                CardError::Vault(VaultError::RotationInProgress),
                StatusCode::CONFLICT,
            ),
            (
                CardError::Vault(VaultError::AuthenticationFailure),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CardError::Vault(VaultError::KeyUnavailable { version: 7 }),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CardError::Vault(VaultError::persistence("save", std::io::Error::other("db"))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CardError::Vault(VaultError::RandomSource("no entropy".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                CardError::corrupt_row("updated_at_ms", std::io::Error::other("out of range")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn server_errors_hide_details() {
        let err = ApiError::from(CardError::Vault(VaultError::RandomSource(
            "getrandom: EAGAIN".into(),
        )));
        assert_eq!(err.message(), "internal error");
    }
}
