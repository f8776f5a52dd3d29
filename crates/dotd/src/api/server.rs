//! HTTP dispatch for the docker volume plugin protocol.
//!
//! One POST route per driver operation. The driver does blocking
//! filesystem I/O and may suspend on a directory lock, so every call runs
//! on the blocking thread pool.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use dot::Driver;
use dot_common::DotError;

use super::protocol::{
    ActivateResponse, CapabilitiesResponse, CapabilityInfo, CreateRequest, ErrorResponse,
    GetRequest, GetResponse, ListResponse, MountRequest, MountResponse, PathRequest,
    PathResponse, RemoveRequest, UnmountRequest, VolumeInfo, PLUGIN_CONTENT_TYPE,
};

/// Build the plugin router over a shared driver.
pub fn app(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(driver)
}

fn plugin_json<T: Serialize>(value: &T) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PLUGIN_CONTENT_TYPE),
    );
    response
}

fn plugin_error(err: &DotError) -> Response {
    if err.is_user_error() {
        // Internal errors were already logged where they happened
        tracing::debug!(%err, "Request rejected");
    }
    plugin_json(&ErrorResponse {
        err: err.to_string(),
    })
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("driver task panicked")
}

async fn activate() -> Response {
    tracing::debug!("Plugin activation handshake");
    plugin_json(&ActivateResponse {
        implements: vec!["VolumeDriver"],
    })
}

async fn create(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<CreateRequest>,
) -> Response {
    let opts = request.opts.unwrap_or_default();
    match blocking(move || driver.create(&request.name, &opts)).await {
        Ok(()) => plugin_json(&ErrorResponse::ok()),
        Err(err) => plugin_error(&err),
    }
}

async fn list(State(driver): State<Arc<Driver>>) -> Response {
    match blocking(move || driver.list()).await {
        Ok(names) => plugin_json(&ListResponse {
            volumes: names
                .into_iter()
                .map(|name| VolumeInfo { name })
                .collect(),
        }),
        Err(err) => plugin_error(&err),
    }
}

async fn get(State(driver): State<Arc<Driver>>, Json(request): Json<GetRequest>) -> Response {
    let name = request.name;
    match blocking(move || driver.get(&name).map(|()| name)).await {
        Ok(name) => plugin_json(&GetResponse {
            volume: VolumeInfo { name },
        }),
        Err(err) => plugin_error(&err),
    }
}

async fn path(State(driver): State<Arc<Driver>>, Json(request): Json<PathRequest>) -> Response {
    plugin_json(&PathResponse {
        mountpoint: driver.path(&request.name).display().to_string(),
    })
}

async fn remove(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<RemoveRequest>,
) -> Response {
    match blocking(move || driver.remove(&request.name)).await {
        Ok(()) => plugin_json(&ErrorResponse::ok()),
        Err(err) => plugin_error(&err),
    }
}

async fn mount(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<MountRequest>,
) -> Response {
    match blocking(move || driver.mount(&request.name, &request.id)).await {
        Ok(mountpoint) => plugin_json(&MountResponse {
            mountpoint: mountpoint.display().to_string(),
        }),
        Err(err) => plugin_error(&err),
    }
}

async fn unmount(
    State(driver): State<Arc<Driver>>,
    Json(request): Json<UnmountRequest>,
) -> Response {
    match blocking(move || driver.unmount(&request.name, &request.id)).await {
        Ok(()) => plugin_json(&ErrorResponse::ok()),
        Err(err) => plugin_error(&err),
    }
}

async fn capabilities(State(driver): State<Arc<Driver>>) -> Response {
    let caps = driver.capabilities();
    plugin_json(&CapabilitiesResponse {
        capabilities: CapabilityInfo { scope: caps.scope },
    })
}
