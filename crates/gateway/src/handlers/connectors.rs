//! Connector catalogue handlers (read-only)

use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use harvester_common::errors::{AppError, Result};
use harvester_common::models::Connector;
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
pub struct ConnectorResponse {
    pub id: Uuid,
    pub name: String,
    pub connector_type: String,
    pub channel: String,
    pub enabled: bool,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

impl From<Connector> for ConnectorResponse {
    fn from(connector: Connector) -> Self {
        let capabilities = connector
            .capabilities()
            .iter()
            .map(|op| op.as_str().to_string())
            .collect();
        Self {
            id: connector.id,
            name: connector.name,
            connector_type: connector.connector_type,
            channel: connector.channel,
            enabled: connector.enabled,
            capabilities,
            login_url: connector.login_url,
            icon_url: connector.icon_url,
        }
    }
}

#[derive(Serialize)]
pub struct ConnectorListResponse {
    pub connectors: Vec<ConnectorResponse>,
}

/// The connector catalogue is global, not account-scoped
pub async fn list_connectors(State(state): State<AppState>) -> Result<Json<ConnectorListResponse>> {
    let connectors = state
        .repo
        .list_connectors()
        .await?
        .into_iter()
        .map(ConnectorResponse::from)
        .collect();
    Ok(Json(ConnectorListResponse { connectors }))
}

pub async fn get_connector(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectorResponse>> {
    let connector = state
        .repo
        .find_connector_by_id(id)
        .await?
        .ok_or_else(|| AppError::ConnectorNotFound { id: id.to_string() })?;
    Ok(Json(connector.into()))
}
