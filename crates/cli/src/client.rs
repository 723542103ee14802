//! reqwest client for the gateway's HTTP facade.

use courier_protocol::{ClearedQueue, DeliveryReceipt, FailureBody, HealthSnapshot, RecoveryAck, RestartAck, SendRequest};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{CliError, Result};

#[derive(Debug, Clone)]
pub struct GatewayClient {
	http: reqwest::Client,
	base_url: String,
}

impl GatewayClient {
	pub fn new(base_url: &str) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.trim_end_matches('/').to_string(),
		}
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	pub async fn health(&self) -> Result<HealthSnapshot> {
		let response = self.execute(self.request(Method::GET, "/health")).await?;
		decode(response).await
	}

	/// Waits for the receipt; the gateway holds the request until the message is dispatched or fails.
	pub async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryReceipt> {
		let request = SendRequest {
			recipient: recipient.to_string(),
			body: body.to_string(),
		};
		let response = self.execute(self.request(Method::POST, "/messages").json(&request)).await?;
		decode(response).await
	}

	/// A recovery already in flight comes back as `accepted: false`, not as an error.
	pub async fn recover(&self) -> Result<RecoveryAck> {
		let response = self.execute(self.request(Method::POST, "/session/recover")).await?;
		if response.status() == StatusCode::CONFLICT {
			return response.json().await.map_err(|source| self.unreachable(source));
		}
		decode(response).await
	}

	pub async fn restart(&self) -> Result<RestartAck> {
		let response = self.execute(self.request(Method::POST, "/session/restart")).await?;
		decode(response).await
	}

	pub async fn clear(&self) -> Result<ClearedQueue> {
		let response = self.execute(self.request(Method::DELETE, "/queue")).await?;
		decode(response).await
	}

	fn request(&self, method: Method, path: &str) -> RequestBuilder {
		self.http.request(method, format!("{}{path}", self.base_url))
	}

	async fn execute(&self, request: RequestBuilder) -> Result<Response> {
		let response = request.send().await.map_err(|source| self.unreachable(source))?;
		debug!(target = "courier.client", status = %response.status(), url = %response.url(), "gateway responded");
		Ok(response)
	}

	fn unreachable(&self, source: reqwest::Error) -> CliError {
		CliError::Unreachable {
			url: self.base_url.clone(),
			source,
		}
	}
}

/// Parses a success body, or turns a failure body into [`CliError::Gateway`].
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
	let status = response.status();
	let bytes = response.bytes().await.map_err(|source| CliError::Unreachable {
		url: source.url().map(|u| u.to_string()).unwrap_or_default(),
		source,
	})?;

	if status.is_success() {
		return Ok(serde_json::from_slice(&bytes)?);
	}

	match serde_json::from_slice::<FailureBody>(&bytes) {
		Ok(body) => Err(CliError::Gateway {
			status: status.as_u16(),
			code: Some(body.error.code),
			message: body.error.message,
		}),
		Err(_) => Err(CliError::Gateway {
			status: status.as_u16(),
			code: None,
			message: format!("gateway returned {status}"),
		}),
	}
}
