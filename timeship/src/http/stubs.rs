//! Reserved mutation endpoints. The wire contract defines them; none are
//! implemented, and all answer 501 with the standard envelope.

use super::error::ApiError;

pub async fn not_implemented() -> ApiError {
    ApiError::not_implemented()
}
