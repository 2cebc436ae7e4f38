//! REST API handlers for the search orchestrator

use super::WebState;
use crate::diagnostics::HealthReport;
use crate::kernel::{ConfigError, FilterSummary};
use crate::search::{
    Deck, JobId, RegistryError, ResultAccumulator, ResultExport, SearchEvent, SearchId,
    SearchInstance, SearchResult, SearchSummary, Stake, StartError,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Handler failures, mapped onto HTTP status codes.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("search {0} not found")]
    NotFound(SearchId),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) | ApiError::Start(StartError::Removed) => StatusCode::NOT_FOUND,
            ApiError::Start(StartError::AlreadyRunning) => StatusCode::CONFLICT,
            ApiError::Start(StartError::ConfigInvalid(_)) | ApiError::Config(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Start(StartError::Spawn(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Registry(RegistryError::StillRunning(_)) => StatusCode::CONFLICT,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn find(state: &WebState, id: u64) -> Result<Arc<SearchInstance>, ApiError> {
    let id = SearchId::from(id);
    state.registry.get_search(id).ok_or(ApiError::NotFound(id))
}

/// Body of `POST /api/searches/{id}/start`. Omitted fields fall back to the
/// configured search defaults.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub config_path: String,
    pub thread_count: Option<usize>,
    pub batch_size: Option<usize>,
    pub min_score: Option<i64>,
    pub max_seeds: Option<u64>,
    pub deck: Option<Deck>,
    pub stake: Option<Stake>,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: SearchId,
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub id: SearchId,
    pub job: u64,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    offset: usize,
}

/// A slice of the accumulator starting at `offset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsPage {
    pub offset: usize,
    pub total: usize,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    path: String,
}

/// Frames pushed over `/ws/searches/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame {
    /// First frame: everything accumulated so far.
    Snapshot {
        results: Vec<SearchResult>,
        messages: Vec<String>,
    },
    /// A throttled event plus any results stored since the previous frame.
    Event {
        event: SearchEvent,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        new_results: Vec<SearchResult>,
    },
}

/// How far one WebSocket client has read into the current job's results.
#[derive(Debug)]
struct ResultCursor {
    job: JobId,
    delivered: usize,
}

impl ResultCursor {
    fn new(job: JobId, delivered: usize) -> Self {
        Self { job, delivered }
    }

    /// Wrap `event`, attaching the results this client has not seen yet.
    /// Events of a job the accumulator has already moved past carry none.
    fn frame(&mut self, event: SearchEvent, accumulator: &ResultAccumulator) -> WsFrame {
        if let SearchEvent::Started { job, .. } = &event {
            if *job != self.job {
                self.job = *job;
                self.delivered = 0;
            }
        }
        let new_results = match event {
            SearchEvent::ResultsUpdated { .. } | SearchEvent::Finished { .. } => accumulator
                .job_snapshot_from(self.job, self.delivered)
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        self.delivered += new_results.len();
        WsFrame::Event { event, new_results }
    }
}

pub async fn health_handler(State(state): State<WebState>) -> Json<HealthReport> {
    Json(HealthReport::from_registry(&state.registry))
}

pub async fn list_handler(State(state): State<WebState>) -> Json<Vec<SearchSummary>> {
    Json(state.registry.list())
}

pub async fn create_handler(State(state): State<WebState>) -> impl IntoResponse {
    let instance = state.registry.create_search();
    (
        StatusCode::CREATED,
        Json(CreatedResponse { id: instance.id() }),
    )
}

pub async fn summary_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
) -> Result<Json<SearchSummary>, ApiError> {
    Ok(Json(find(&state, id)?.summary()))
}

pub async fn remove_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let search_id = SearchId::from(id);
    match state.registry.remove(search_id)? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(search_id)),
    }
}

pub async fn start_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartedResponse>), ApiError> {
    let instance = find(&state, id)?;

    let defaults = &state.defaults;
    let mut criteria = defaults.criteria_for(request.config_path);
    if let Some(threads) = request.thread_count {
        criteria = criteria.with_threads(threads);
    }
    if let Some(batch_size) = request.batch_size {
        criteria = criteria.with_batch_size(batch_size);
    }
    if let Some(min_score) = request.min_score {
        criteria = criteria.with_min_score(min_score);
    }
    if request.max_seeds.is_some() {
        criteria = criteria.with_max_seeds(request.max_seeds);
    }
    if let Some(deck) = request.deck {
        criteria = criteria.with_deck(deck);
    }
    if let Some(stake) = request.stake {
        criteria = criteria.with_stake(stake);
    }

    // Filter validation reads from disk.
    let job = tokio::task::spawn_blocking({
        let instance = instance.clone();
        move || instance.start(criteria)
    })
    .await
    .map_err(|e| StartError::Spawn(std::io::Error::other(e.to_string())))??;

    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            id: instance.id(),
            job,
        }),
    ))
}

pub async fn stop_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<SearchSummary>), ApiError> {
    let instance = find(&state, id)?;
    instance.stop();
    Ok((StatusCode::ACCEPTED, Json(instance.summary())))
}

pub async fn results_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsPage>, ApiError> {
    let instance = find(&state, id)?;
    let all = instance.accumulator().snapshot();
    let total = all.len();
    let results = all.into_iter().skip(query.offset).collect();
    Ok(Json(ResultsPage {
        offset: query.offset,
        total,
        results,
    }))
}

pub async fn export_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
) -> Result<Json<ResultExport>, ApiError> {
    let instance = find(&state, id)?;
    let labels = match instance.criteria() {
        Some(criteria) => match state.registry.factory().load_config(&criteria.config_path) {
            Ok(summary) => summary.labels,
            Err(e) => {
                warn!(search_id = %instance.id(), error = %e, "Export without filter labels");
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    Ok(Json(instance.accumulator().export(labels)))
}

pub async fn messages_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let instance = find(&state, id)?;
    Ok(Json(MessagesResponse {
        lines: instance.messages().lines(),
    }))
}

pub async fn validate_handler(
    State(state): State<WebState>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<FilterSummary>, ApiError> {
    Ok(Json(state.registry.factory().load_config(&query.path)?))
}

/// WebSocket upgrade handler for one search's live progress
pub async fn ws_search_handler(
    State(state): State<WebState>,
    Path(id): Path<u64>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let instance = find(&state, id)?;
    Ok(ws.on_upgrade(move |socket| handle_search_socket(socket, instance)))
}

/// Stream a snapshot, then every event with the results it announces.
async fn handle_search_socket(socket: WebSocket, instance: Arc<SearchInstance>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so nothing falls between the two.
    let mut subscription = instance.subscribe();
    let (job, backfill) = instance.accumulator().job_snapshot();
    let mut cursor = ResultCursor::new(job, backfill.len());
    let snapshot = WsFrame::Snapshot {
        results: backfill,
        messages: instance.messages().lines(),
    };
    if !send_frame(&mut sender, &snapshot).await {
        return;
    }

    let search_id = instance.id();
    let send_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let frame = cursor.frame(event, instance.accumulator());
            if !send_frame(&mut sender, &frame).await {
                break;
            }
        }
    });

    // Wait for client to close connection
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    debug!(search_id = %search_id, "WebSocket subscriber detached");
    send_task.abort();
}

async fn send_frame<S>(sender: &mut S, frame: &WsFrame) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket frame");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Outcome;

    #[test]
    fn test_event_frame_omits_empty_deltas() {
        let frame = WsFrame::Event {
            event: SearchEvent::Progress { seeds_searched: 9 },
            new_results: Vec::new(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "progress");
        assert!(json.get("new_results").is_none());
    }

    #[test]
    fn test_finished_frame_round_trips_with_results() {
        let frame = WsFrame::Event {
            event: SearchEvent::Finished {
                outcome: Outcome::Completed,
                found: 1,
                seeds_searched: 10,
                message: None,
            },
            new_results: vec![SearchResult::new("ABCDEFGH", 4, vec![4], 2)],
        };
        let text = serde_json::to_string(&frame).unwrap();
        match serde_json::from_str::<WsFrame>(&text).unwrap() {
            WsFrame::Event { event, new_results } => {
                assert!(event.is_terminal());
                assert_eq!(new_results[0].seed, "ABCDEFGH");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    fn new_results(frame: &WsFrame) -> Vec<String> {
        match frame {
            WsFrame::Event { new_results, .. } => {
                new_results.iter().map(|r| r.seed.clone()).collect()
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    fn finished(found: usize) -> SearchEvent {
        SearchEvent::Finished {
            outcome: Outcome::Completed,
            found,
            seeds_searched: 0,
            message: None,
        }
    }

    #[test]
    fn test_cursor_sends_each_result_once() {
        let acc = ResultAccumulator::new();
        acc.reset(1);
        acc.append(SearchResult::new("AAAA0000", 1, vec![1], 1));
        let mut cursor = ResultCursor::new(1, 1);

        acc.append(SearchResult::new("BBBB0000", 1, vec![1], 1));
        let updated = SearchEvent::ResultsUpdated {
            found: 2,
            seeds_searched: 0,
        };
        assert_eq!(new_results(&cursor.frame(updated, &acc)), vec!["BBBB0000"]);
        assert!(new_results(&cursor.frame(finished(2), &acc)).is_empty());
    }

    #[test]
    fn test_cursor_after_restart_never_mixes_jobs() {
        let acc = ResultAccumulator::new();
        acc.reset(1);
        for i in 0..5 {
            acc.append(SearchResult::new(format!("OLD{i}"), 1, vec![1], 1));
        }
        // A lagging client has read 3 of job 1's results.
        let mut cursor = ResultCursor::new(1, 3);

        // Another surface restarts the search before the client catches up.
        acc.reset(2);
        for i in 0..7 {
            acc.append(SearchResult::new(format!("NEW{i}"), 1, vec![1], 1));
        }

        assert!(new_results(&cursor.frame(finished(5), &acc)).is_empty());
        let started = SearchEvent::Started {
            job: 2,
            criteria: crate::search::SearchCriteria::new("filter.json"),
        };
        assert!(new_results(&cursor.frame(started, &acc)).is_empty());
        let updated = SearchEvent::ResultsUpdated {
            found: 7,
            seeds_searched: 0,
        };
        let seeds = new_results(&cursor.frame(updated, &acc));
        assert_eq!(seeds.len(), 7);
        assert_eq!(seeds[0], "NEW0");
        assert!(new_results(&cursor.frame(finished(7), &acc)).is_empty());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (ApiError::NotFound(SearchId::from(3)), StatusCode::NOT_FOUND),
            (ApiError::Start(StartError::AlreadyRunning), StatusCode::CONFLICT),
            (
                ApiError::Config(ConfigError::NotFound("x.json".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::Registry(RegistryError::StillRunning(3)),
                StatusCode::CONFLICT,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
