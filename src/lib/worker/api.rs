use std::{future::Future, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State as AxumState, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{ErrorResponse, TaskServer, Worker, WorkerError};
use crate::tasks::types::{Task, TaskEvent};

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = match &self {
            WorkerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            WorkerError::InvalidStateTransition { .. }
            | WorkerError::UnexpectedState { .. }
            | WorkerError::MissingContainer(_) => StatusCode::BAD_REQUEST,
            WorkerError::Runtime { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ErrorResponse::new(status, self.to_string()).into_response()
    }
}

pub fn parse_task_id(raw: &str) -> Result<Uuid, ErrorResponse> {
    Uuid::parse_str(raw).map_err(|e| {
        warn!(task_id = raw, error = %e, "failed to parse task id");
        ErrorResponse::new(StatusCode::BAD_REQUEST, format!("invalid task id {raw:?}: {e}"))
    })
}

pub fn body_rejected(rejection: JsonRejection) -> ErrorResponse {
    let msg = format!("error decoding body: {}", rejection.body_text());
    warn!("{msg}");
    ErrorResponse::new(StatusCode::BAD_REQUEST, msg)
}

pub async fn missing_task_id() -> ErrorResponse {
    warn!("no task id passed in request");
    ErrorResponse::new(StatusCode::BAD_REQUEST, "missing task id")
}

impl TaskServer {
    pub fn new(worker: Arc<Worker>, address: &str, port: u16) -> Self {
        Self {
            worker,
            address: address.to_string(),
            port,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/tasks",
                get(TaskServer::get_tasks)
                    .post(TaskServer::start_task)
                    .delete(missing_task_id),
            )
            .route("/tasks/", delete(missing_task_id))
            .route("/tasks/{id}", delete(TaskServer::stop_task))
            .route("/stats", get(TaskServer::get_stats))
            .with_state(self.worker.clone())
    }

    async fn get_tasks(AxumState(worker): AxumState<Arc<Worker>>) -> Json<Vec<Task>> {
        Json(worker.get_tasks().await)
    }

    async fn start_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Response {
        let Json(event) = match payload {
            Ok(payload) => payload,
            Err(rejection) => return body_rejected(rejection).into_response(),
        };

        let task = event.task.clone();
        info!(task_id = %task.id, event_id = %event.id, state = ?event.state, "task queued");
        worker.add_task(event).await;
        (StatusCode::CREATED, Json(task)).into_response()
    }

    async fn stop_task(
        AxumState(worker): AxumState<Arc<Worker>>,
        Path(id): Path<String>,
    ) -> Response {
        let task_id = match parse_task_id(&id) {
            Ok(task_id) => task_id,
            Err(err) => return err.into_response(),
        };

        match worker.request_stop(task_id).await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => {
                warn!(%task_id, error = %err, "cannot stop task");
                err.into_response()
            }
        }
    }

    async fn get_stats(AxumState(worker): AxumState<Arc<Worker>>) -> Response {
        match worker.stats.read().await.clone() {
            Some(stats) => Json(stats).into_response(),
            None => ErrorResponse::new(StatusCode::SERVICE_UNAVAILABLE, "stats not collected yet")
                .into_response(),
        }
    }

    pub async fn start_server<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        info!(worker = %self.worker.name, address = %self.address, port = self.port, "worker api listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
