//! API handlers.
//!
//! Each handler resolves the target enclave, delegates to its service
//! network, and maps the error taxonomy onto HTTP status codes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use burrow_core::{EnclaveId, PartitionId, PortSpec, ServiceGuid, ServiceId};
use burrow_network::{
    ConnectionId, Enclave, ErrorKind, NetworkError, PartitionConnection, ServiceStartConfig,
};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(message: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message.to_string()),
        }),
    )
        .into_response()
}

fn network_error_response(err: &NetworkError) -> axum::response::Response {
    let status = match err.kind() {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Exhausted => StatusCode::INSUFFICIENT_STORAGE,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::BackendFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::PartialEnforcement
        | ErrorKind::Cancelled
        | ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&err.to_string(), status)
}

async fn resolve_enclave(
    state: &ApiState,
    enclave: &str,
) -> Result<Arc<Enclave>, axum::response::Response> {
    state
        .manager
        .get_enclave(&EnclaveId::from(enclave))
        .await
        .ok_or_else(|| error_response(&format!("no enclave '{enclave}' exists"), StatusCode::NOT_FOUND))
}

// ── Enclaves ───────────────────────────────────────────────────────

/// GET /api/v1/enclaves
pub async fn list_enclaves(State(state): State<ApiState>) -> impl IntoResponse {
    let ids: Vec<String> = state
        .manager
        .list_enclaves()
        .await
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    ApiResponse::ok(ids)
}

#[derive(Deserialize)]
pub struct CreateEnclaveRequest {
    pub id: String,
    #[serde(default)]
    pub partitioning_enabled: Option<bool>,
}

/// POST /api/v1/enclaves
pub async fn create_enclave(
    State(state): State<ApiState>,
    Json(request): Json<CreateEnclaveRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .manager
        .create_enclave(
            &cancel,
            &EnclaveId::from(request.id.as_str()),
            request.partitioning_enabled,
        )
        .await
    {
        Ok(enclave) => (
            StatusCode::CREATED,
            ApiResponse::ok(enclave.id.to_string()),
        )
            .into_response(),
        Err(err) => network_error_response(&err),
    }
}

/// DELETE /api/v1/enclaves/{enclave}
pub async fn destroy_enclave(
    State(state): State<ApiState>,
    Path(enclave): Path<String>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state
        .manager
        .destroy_enclave(&cancel, &EnclaveId::from(enclave.as_str()))
        .await
    {
        Ok(()) => ApiResponse::ok("destroyed").into_response(),
        Err(err) => network_error_response(&err),
    }
}

// ── Services ───────────────────────────────────────────────────────

/// GET /api/v1/enclaves/{enclave}/services
pub async fn list_services(
    State(state): State<ApiState>,
    Path(enclave): Path<String>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };
    match enclave.network.service_ids().await {
        Ok(ids) => {
            let ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
            ApiResponse::ok(ids).into_response()
        }
        Err(err) => network_error_response(&err),
    }
}

#[derive(Deserialize)]
pub struct PortRequest {
    pub number: u16,
    #[serde(default)]
    pub udp: bool,
}

#[derive(Deserialize)]
pub struct AddServiceRequest {
    pub id: String,
    #[serde(default)]
    pub partition: Option<String>,
    pub image: String,
    #[serde(default)]
    pub ports: BTreeMap<String, PortRequest>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub publish_ports: bool,
}

#[derive(Serialize)]
pub struct AddServiceResponse {
    pub private_ip: String,
    pub public_ip: Option<String>,
    pub public_ports: BTreeMap<String, u16>,
}

/// POST /api/v1/enclaves/{enclave}/services
pub async fn add_service(
    State(state): State<ApiState>,
    Path(enclave): Path<String>,
    Json(request): Json<AddServiceRequest>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };
    let cancel = CancellationToken::new();
    let id = ServiceId::from(request.id.as_str());
    let partition = request
        .partition
        .as_deref()
        .map(PartitionId::from);

    let (private_ip, _dir) = match enclave.network.register_service(&id, partition).await {
        Ok(result) => result,
        Err(err) => return network_error_response(&err),
    };

    let config = ServiceStartConfig {
        image: request.image,
        private_ports: request
            .ports
            .into_iter()
            .map(|(port_id, port)| {
                let spec = if port.udp {
                    PortSpec::udp(port.number)
                } else {
                    PortSpec::tcp(port.number)
                };
                (port_id, spec)
            })
            .collect(),
        entrypoint: request.entrypoint,
        cmd: request.cmd,
        env: request.env,
        artifact_mounts: BTreeMap::new(),
        publish_ports: request.publish_ports,
    };
    match enclave.network.start_service(&cancel, &id, config).await {
        Ok((public_ip, public_ports)) => ApiResponse::ok(AddServiceResponse {
            private_ip: private_ip.to_string(),
            public_ip: public_ip.map(|ip| ip.to_string()),
            public_ports: public_ports
                .into_iter()
                .map(|(port_id, spec)| (port_id, spec.number))
                .collect(),
        })
        .into_response(),
        Err(err) => network_error_response(&err),
    }
}

#[derive(Serialize)]
pub struct ServiceDetails {
    pub guid: String,
    pub private_ip: String,
    pub partition: String,
    pub is_running: bool,
}

/// GET /api/v1/enclaves/{enclave}/services/{service}
pub async fn get_service(
    State(state): State<ApiState>,
    Path((enclave, service)): Path<(String, String)>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };
    let id = ServiceId::from(service.as_str());
    let registration = match enclave.network.registration_info(&id).await {
        Ok(registration) => registration,
        Err(err) => return network_error_response(&err),
    };
    let is_running = enclave.network.run_info(&id).await.is_ok();
    ApiResponse::ok(ServiceDetails {
        guid: registration.guid.to_string(),
        private_ip: registration.private_ip.to_string(),
        partition: registration.partition.to_string(),
        is_running,
    })
    .into_response()
}

/// DELETE /api/v1/enclaves/{enclave}/services/{service}
pub async fn remove_service(
    State(state): State<ApiState>,
    Path((enclave, service)): Path<(String, String)>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };
    let cancel = CancellationToken::new();
    match enclave
        .network
        .remove_service(&cancel, &ServiceId::from(service.as_str()), state.stop_timeout)
        .await
    {
        Ok(guid) => ApiResponse::ok(guid.to_string()).into_response(),
        Err(err) => network_error_response(&err),
    }
}

// ── Exec ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
}

#[derive(Serialize)]
pub struct ExecResponse {
    pub exit_code: i32,
    /// Combined output, lossily decoded as UTF-8.
    pub output: String,
}

/// POST /api/v1/enclaves/{enclave}/services/{service}/exec
pub async fn exec_command(
    State(state): State<ApiState>,
    Path((enclave, service)): Path<(String, String)>,
    Json(request): Json<ExecRequest>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };
    let cancel = CancellationToken::new();
    match enclave
        .network
        .exec_command(&cancel, &ServiceId::from(service.as_str()), &request.argv)
        .await
    {
        Ok((exit_code, output)) => ApiResponse::ok(ExecResponse {
            exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
        .into_response(),
        Err(err) => network_error_response(&err),
    }
}

// ── Repartition ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ConnectionRequest {
    pub first: String,
    pub second: String,
    pub packet_loss_percentage: f32,
}

#[derive(Deserialize)]
pub struct RepartitionRequest {
    /// Partition → member service GUIDs.
    pub partitions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub connections: Vec<ConnectionRequest>,
    #[serde(default)]
    pub default_packet_loss_percentage: f32,
}

/// POST /api/v1/enclaves/{enclave}/repartition
pub async fn repartition(
    State(state): State<ApiState>,
    Path(enclave): Path<String>,
    Json(request): Json<RepartitionRequest>,
) -> impl IntoResponse {
    let enclave = match resolve_enclave(&state, &enclave).await {
        Ok(enclave) => enclave,
        Err(response) => return response,
    };

    let partitions: BTreeMap<PartitionId, BTreeSet<ServiceGuid>> = request
        .partitions
        .into_iter()
        .map(|(partition, members)| {
            (
                PartitionId::from(partition.as_str()),
                members
                    .into_iter()
                    .map(|guid| ServiceGuid::new(guid))
                    .collect(),
            )
        })
        .collect();

    let mut connections = BTreeMap::new();
    for connection in request.connections {
        let policy = match PartitionConnection::new(connection.packet_loss_percentage) {
            Ok(policy) => policy,
            Err(err) => return error_response(&err.to_string(), StatusCode::BAD_REQUEST),
        };
        connections.insert(
            ConnectionId::new(
                PartitionId::from(connection.first.as_str()),
                PartitionId::from(connection.second.as_str()),
            ),
            policy,
        );
    }
    let default_connection =
        match PartitionConnection::new(request.default_packet_loss_percentage) {
            Ok(policy) => policy,
            Err(err) => return error_response(&err.to_string(), StatusCode::BAD_REQUEST),
        };

    let cancel = CancellationToken::new();
    match enclave
        .network
        .repartition(&cancel, partitions, connections, default_connection)
        .await
    {
        Ok(()) => ApiResponse::ok("repartitioned").into_response(),
        Err(err) => network_error_response(&err),
    }
}
