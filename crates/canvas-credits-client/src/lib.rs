//! Canvas Credits Client SDK.
//!
//! This crate provides a client library for trusted services (generation
//! workers, billing jobs) to interact with the canvas credits API.
//!
//! # Example
//!
//! ```no_run
//! use canvas_credits_client::{ConsumeRequest, CreditsClient};
//!
//! # async fn example() -> Result<(), canvas_credits_client::ClientError> {
//! let client = CreditsClient::new("http://canvas-credits:8080", "your-service-api-key")?;
//!
//! let response = client
//!     .consume(ConsumeRequest {
//!         user_id: "user_42".to_string(),
//!         amount: 3,
//!         reason: Some("image-generation".to_string()),
//!         idempotency_key: Some("job_123".to_string()),
//!     })
//!     .await?;
//!
//! println!("Remaining: {:?} credits", response.balance);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, CreditsClient};
pub use error::ClientError;
pub use types::*;
