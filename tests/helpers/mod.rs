//! Mock analysis backend for integration tests

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_EMAIL: &str = "admin@admin.com";
pub const TEST_PASSWORD: &str = "admin";

/// What the mock saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub struct MockState {
    requests: Mutex<Vec<RecordedRequest>>,
    job_script: Mutex<VecDeque<Value>>,
    rejected_paths: Mutex<HashSet<String>>,
    analyze_bodies: Mutex<Vec<Value>>,
}

/// In-process backend speaking the analysis API on an ephemeral port.
pub struct MockBackend {
    pub base_url: String,
    state: Arc<MockState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let api = Router::new()
            .route("/auth/login", post(login_handler))
            .route("/auth/logout", post(logout_handler))
            .route("/auth/me", get(me_handler))
            .route("/analysis/upload", post(upload_handler))
            .route("/analysis/analyze", post(analyze_handler))
            .route("/analysis/results", get(list_handler))
            .route("/analysis/results/{id}", get(result_handler));

        let app = Router::new()
            .nest("/api/v1", api)
            .layer(middleware::from_fn_with_state(state.clone(), record_request))
            .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Mock backend has no address");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                eprintln!("Mock backend error: {}", e);
            }
        });

        Self {
            base_url: format!("http://{}/api/v1", addr),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Responses for successive `GET /analysis/results/{id}` calls. The last
    /// one repeats once the script runs out.
    pub fn script_job(&self, responses: Vec<Value>) {
        *self.state.job_script.lock().unwrap() = responses.into();
    }

    /// Answer 401 for every request to `path` (including the `/api/v1` prefix).
    pub fn reject_path(&self, path: &str) {
        self.state
            .rejected_paths
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn analyze_bodies(&self) -> Vec<Value> {
        self.state.analyze_bodies.lock().unwrap().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

/// Build a backend job document the way the real service shapes it.
pub fn job_json(id: &str, status: &str, results: Value) -> Value {
    json!({
        "id": id,
        "timestamp": "2024-05-01T10:15:30.000123",
        "image_path": "uploads/20240501_101530_field.jpg",
        "status": status,
        "results": results,
    })
}

async fn record_request(State(state): State<Arc<MockState>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    state.requests.lock().unwrap().push(RecordedRequest {
        method: request.method().to_string(),
        path: path.clone(),
        authorization,
    });

    if state.rejected_paths.lock().unwrap().contains(&path) {
        return (StatusCode::UNAUTHORIZED, "Token inválido").into_response();
    }

    next.run(request).await
}

async fn login_handler(Json(body): Json<Value>) -> Response {
    if body["email"] == TEST_EMAIL && body["password"] == TEST_PASSWORD {
        Json(json!({
            "access_token": TEST_TOKEN,
            "token_type": "bearer",
            "user": {
                "id": "1",
                "email": TEST_EMAIL,
                "name": "Administrador",
                "role": "admin"
            }
        }))
        .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, "Credenciais inválidas").into_response()
    }
}

async fn logout_handler() -> Json<Value> {
    Json(json!({"detail": "logged out"}))
}

async fn me_handler(headers: axum::http::HeaderMap) -> Response {
    let expected = format!("Bearer {}", TEST_TOKEN);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected);

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Not authenticated").into_response();
    }

    Json(json!({
        "id": "1",
        "email": TEST_EMAIL,
        "name": "Administrador",
        "role": "admin"
    }))
    .into_response()
}

async fn upload_handler(mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        let filename = format!("20240501_101530_{}", original);

        return Json(json!({
            "filename": filename,
            "file_path": format!("uploads/{}", filename),
            "size": data.len(),
            "dimensions": "640x480"
        }))
        .into_response();
    }

    (StatusCode::BAD_REQUEST, "Arquivo inválido ou não é uma imagem").into_response()
}

async fn analyze_handler(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Json<Value> {
    state.analyze_bodies.lock().unwrap().push(body);
    Json(json!({"analysis_id": "analysis_20240501_101531", "status": "queued"}))
}

async fn list_handler(State(state): State<Arc<MockState>>) -> Json<Value> {
    let script = state.job_script.lock().unwrap();
    Json(Value::Array(script.iter().cloned().collect()))
}

async fn result_handler(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    let mut script = state.job_script.lock().unwrap();
    let next = if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().cloned()
    };

    match next {
        Some(mut job) => {
            job["id"] = Value::String(id);
            Json(job).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Análise não encontrada").into_response(),
    }
}
