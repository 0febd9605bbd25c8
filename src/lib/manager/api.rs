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

use super::types::{Manager, ManagerError, ManagerServer};
use crate::tasks::types::{State, Task, TaskEvent};
use crate::worker::{
    api::{body_rejected, missing_task_id, parse_task_id},
    types::ErrorResponse,
};

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ManagerError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::InvalidSubmission { .. } => StatusCode::BAD_REQUEST,
            ManagerError::Transport { .. }
            | ManagerError::WorkerRejected { .. }
            | ManagerError::Decode { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ErrorResponse::new(status, self.to_string()).into_response()
    }
}

impl ManagerServer {
    pub fn new(manager: Arc<Manager>, address: &str, port: u16) -> Self {
        Self {
            address: address.to_string(),
            port,
            manager,
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/tasks",
                get(ManagerServer::get_tasks)
                    .post(ManagerServer::start_task)
                    .delete(missing_task_id),
            )
            .route("/tasks/", delete(missing_task_id))
            .route("/tasks/{id}", delete(ManagerServer::stop_task))
            .with_state(self.manager.clone())
    }

    async fn get_tasks(AxumState(manager): AxumState<Arc<Manager>>) -> Json<Vec<Task>> {
        Json(manager.get_tasks().await)
    }

    async fn start_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        payload: Result<Json<TaskEvent>, JsonRejection>,
    ) -> Response {
        let Json(event) = match payload {
            Ok(payload) => payload,
            Err(rejection) => return body_rejected(rejection).into_response(),
        };

        if event.state != State::Scheduled {
            let err = ManagerError::InvalidSubmission {
                expected: State::Scheduled,
                got: event.state,
            };
            warn!(task_id = %event.task.id, error = %err, "rejected submission");
            return err.into_response();
        }

        manager.add_task(event.clone()).await;
        info!(task_id = %event.task.id, event_id = %event.id, "task added to the queue");
        (StatusCode::CREATED, Json(event)).into_response()
    }

    async fn stop_task(
        AxumState(manager): AxumState<Arc<Manager>>,
        Path(id): Path<String>,
    ) -> Response {
        let task_id = match parse_task_id(&id) {
            Ok(task_id) => task_id,
            Err(err) => return err.into_response(),
        };

        match manager.request_stop(task_id).await {
            Ok(_) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => {
                warn!(%task_id, error = %err, "cannot stop task");
                err.into_response()
            }
        }
    }

    pub async fn start_server<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = TcpListener::bind((self.address.as_str(), self.port)).await?;
        info!(address = %self.address, port = self.port, workers = ?self.manager.workers, "manager api listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
