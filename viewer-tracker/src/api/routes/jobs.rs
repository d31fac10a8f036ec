//! Tracking job routes.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt, stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::api::error::ApiResult;
use crate::api::models::{CancelJobResponse, CreateJobRequest, CreateJobResponse, ListJobsQuery};
use crate::api::server::AppState;
use crate::domain::{Sample, TrackingJob};
use crate::scheduler::{JobEvent, JobReport, JobStatus};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/report", get(get_report))
        .route("/{id}/samples", get(get_samples))
        .route("/{id}/events", get(stream_events))
}

async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    let job = state
        .scheduler
        .create(&request.broadcast_ref, &request.notify_target)
        .await?;
    Ok((StatusCode::CREATED, Json(CreateJobResponse { id: job.id })))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<TrackingJob>>> {
    let jobs = state.scheduler.recent(query.effective_limit()).await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.scheduler.status(&id).await?))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let job_state = state.scheduler.cancel(&id).await?;
    Ok(Json(CancelJobResponse {
        id,
        state: job_state,
    }))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobReport>> {
    Ok(Json(state.scheduler.report(&id).await?))
}

async fn get_samples(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Sample>>> {
    Ok(Json(state.scheduler.history(&id).await?))
}

/// Server-sent events for one job, ending after its `finished` event.
async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before reading the job so a transition in between is not lost.
    let receiver = state.scheduler.subscribe();
    let status = state.scheduler.status(&id).await?;

    // Nothing would ever publish for a job without an actor.
    let events = if status.job.is_terminal() || !status.tracking {
        let has_report = matches!(
            state.scheduler.report(&id).await?,
            JobReport::Ready { .. }
        );
        let finished = JobEvent::Finished {
            job_id: id,
            state: status.job.state,
            has_report,
        };
        stream::iter([to_sse(&finished)]).boxed()
    } else {
        debug!(job_id = %id, "Streaming job events");
        job_events(receiver, id).map(|event| to_sse(&event)).boxed()
    };

    Ok(Sse::new(events.map(Ok)).keep_alive(KeepAlive::default()))
}

fn job_events(
    receiver: broadcast::Receiver<JobEvent>,
    job_id: String,
) -> impl Stream<Item = JobEvent> {
    stream::unfold(Some(receiver), move |receiver| {
        let job_id = job_id.clone();
        async move {
            let mut receiver = receiver?;
            loop {
                match receiver.recv().await {
                    Ok(event) if event.job_id() == job_id => {
                        let next = match event {
                            JobEvent::Finished { .. } => None,
                            _ => Some(receiver),
                        };
                        return Some((event, next));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(job_id = %job_id, skipped, "Event stream lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    })
}

fn to_sse(event: &JobEvent) -> Event {
    let sse = Event::default().event(event.event_type());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(e) => sse.data(format!("{{\"error\":\"{e}\"}}")),
    }
}
