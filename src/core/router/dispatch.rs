// src/core/router/dispatch.rs

//! Protocol-specific command dispatch. HTTP is the only live transport;
//! MQTT and WebSocket keep the dispatch signature so future implementations
//! slot in without touching callers.

use crate::core::errors::EdgeLinkError;
use crate::core::models::{CommandResult, ErrorCode, ErrorDetail, Protocol, Robot};
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
}

impl Dispatcher {
    /// Builds the shared HTTP client. TLS verification is on unless the
    /// configuration explicitly disables it for development.
    pub fn new(ssl_verify: bool) -> Result<Self, EdgeLinkError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!ssl_verify)
            .build()?;
        Ok(Self { http })
    }

    /// Sends a command over the robot's protocol. The caller owns the
    /// deadline; this method only translates transport failures into the
    /// wire error taxonomy.
    pub async fn send(
        &self,
        robot: &Robot,
        command_type: &str,
        params: &Value,
        trace_id: &str,
    ) -> Result<CommandResult, ErrorDetail> {
        info!(
            robot_id = %robot.robot_id,
            protocol = %robot.protocol,
            endpoint = %robot.endpoint,
            "Dispatching command to robot."
        );

        match robot.protocol {
            Protocol::Http => {
                self.send_http(&robot.endpoint, command_type, params, trace_id)
                    .await
            }
            Protocol::Mqtt | Protocol::Websocket => {
                warn!(protocol = %robot.protocol, "Dispatch requested over a reserved protocol.");
                Err(ErrorDetail {
                    code: ErrorCode::ErrProtocol,
                    message: format!("{} dispatch is not implemented", robot.protocol),
                    details: None,
                })
            }
        }
    }

    async fn send_http(
        &self,
        endpoint: &str,
        command_type: &str,
        params: &Value,
        trace_id: &str,
    ) -> Result<CommandResult, ErrorDetail> {
        let url = format!("{}/api/command", endpoint.trim_end_matches('/'));
        let body = json!({
            "trace_id": trace_id,
            "command_type": command_type,
            "params": params,
        });

        let response = match self.http.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                return Err(ErrorDetail {
                    code: ErrorCode::ErrProtocol,
                    message: format!("HTTP request failed: {e}"),
                    details: None,
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            let data = response.json::<Value>().await.unwrap_or(Value::Null);
            Ok(CommandResult {
                data: Some(data),
                summary: "command executed successfully".to_string(),
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ErrorDetail {
                code: ErrorCode::ErrProtocol,
                message: format!("HTTP error {status}: {body}"),
                details: None,
            })
        }
    }
}
