//! Credits HTTP client implementation.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, BalanceResponse, ConsumeRequest, ConsumeResponse, GrantOutcome,
    GrantRequest, PurchaseRequest, PurchaseResponse,
};

/// Canvas credits API client.
///
/// Authenticates with the service API key; every method is a
/// service-to-service call.
#[derive(Debug, Clone)]
pub struct CreditsClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl CreditsClient {
    /// Create a new credits client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the credits service (e.g., `"http://canvas-credits:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new credits client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Consume credits for a user.
    ///
    /// A replayed idempotency key is an ordinary success; check
    /// [`ConsumeResponse::is_replay`] to tell the cases apart.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InsufficientCredits`] when the balance does not
    /// cover the amount, or another error if the request fails.
    pub async fn consume(&self, request: ConsumeRequest) -> Result<ConsumeResponse, ClientError> {
        let url = format!("{}/v1/credits/consume", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !matches!(
            status,
            StatusCode::OK | StatusCode::PAYMENT_REQUIRED | StatusCode::BAD_REQUEST
        ) {
            return Self::handle_response(response).await;
        }

        let body = response.bytes().await?;
        let Ok(outcome) = serde_json::from_slice::<ConsumeResponse>(&body) else {
            return Err(Self::error_from_body(status, &body));
        };

        if outcome.ok {
            return Ok(outcome);
        }

        if status == StatusCode::PAYMENT_REQUIRED {
            tracing::debug!(user_id = %request.user_id, amount = request.amount, "Insufficient credits");
            return Err(ClientError::InsufficientCredits {
                balance: outcome.balance.unwrap_or(0),
                required: request.amount,
            });
        }

        Err(ClientError::Api {
            code: outcome.error.unwrap_or_else(|| "unknown".to_string()),
            message: format!("consume of {} credits rejected", request.amount),
            status: status.as_u16(),
        })
    }

    /// Record a completed purchase.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<PurchaseResponse, ClientError> {
        let url = format!("{}/v1/credits/purchase", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&request)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Get any user's balance.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn balance_for_user(&self, user_id: &str) -> Result<BalanceResponse, ClientError> {
        let url = format!("{}/v1/users/{user_id}/balance", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Grant a user's subscription credits for a billing period.
    ///
    /// Repeating a period returns [`GrantOutcome::AlreadyGranted`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotFound`] if the user has no subscription, or
    /// another error if the request fails.
    pub async fn grant_subscription_credits(
        &self,
        user_id: &str,
        period_cursor: &str,
    ) -> Result<GrantOutcome, ClientError> {
        let url = format!("{}/v1/subscriptions/grant", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
            .json(&GrantRequest {
                user_id,
                period_cursor,
            })
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.bytes().await?;
        Err(Self::error_from_body(status, &body))
    }

    /// Map an error body onto a typed error.
    fn error_from_body(status: StatusCode, body: &[u8]) -> ClientError {
        let Ok(api_error) = serde_json::from_slice::<ApiErrorResponse>(body) else {
            return ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            };
        };

        let detail = |name: &str| {
            api_error
                .error
                .details
                .as_ref()
                .and_then(|d| d.get(name))
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0)
        };

        match api_error.error.code.as_str() {
            "insufficient_credits" => ClientError::InsufficientCredits {
                balance: detail("balance"),
                required: detail("required"),
            },
            "not_found" => ClientError::NotFound(api_error.error.message),
            code => ClientError::Api {
                code: code.to_string(),
                message: api_error.error.message,
                status: status.as_u16(),
            },
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_trims_trailing_slash() {
        let client = CreditsClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("generation-worker");
        let client = CreditsClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "generation-worker");
    }

    #[test]
    fn unparseable_error_body_keeps_status() {
        let err = CreditsClient::error_from_body(StatusCode::BAD_GATEWAY, b"<html>");
        assert!(matches!(err, ClientError::Api { status: 502, .. }));
    }
}
