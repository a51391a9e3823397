//! Analysis request lifecycle.
//!
//! ```text
//! Idle ──begin──▶ Pending ──reply parsed──▶ Ready(detections)
//!                   │  ▲
//!                   │  └──────begin────── Ready | Failed
//!                   └──client/parse error──▶ Failed(reason)
//! ```
//!
//! Only one request may be pending. Entering `Pending` discards the previous
//! result at once. Each request resolves exactly once: completion is applied
//! only if the state is still `Pending` for the same request generation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::client::{ModelClient, ModelRequest, SourceImage};
use crate::detect::{parse_detections, Detection};
use crate::error::AnalysisError;

/// What the UI should show for the current request.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AnalysisResult {
    #[default]
    Idle,
    Pending,
    Ready(Vec<Detection>),
    Failed(String),
}

impl AnalysisResult {
    pub fn is_pending(&self) -> bool {
        matches!(self, AnalysisResult::Pending)
    }

    /// Whether the control that starts an analysis may be enabled.
    pub fn can_submit(&self) -> bool {
        !self.is_pending()
    }

    pub fn detections(&self) -> Option<&[Detection]> {
        match self {
            AnalysisResult::Ready(detections) => Some(detections),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            AnalysisResult::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    result: AnalysisResult,
    generation: u64,
}

type SharedState = Arc<Mutex<State>>;
type SharedClient = Arc<Mutex<dyn ModelClient>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the current [`AnalysisResult`] and the model client.
///
/// Cloning yields another handle onto the same state, so a renderer can hold
/// one while a controller issues requests through another.
#[derive(Clone)]
pub struct Analyzer {
    client: SharedClient,
    state: SharedState,
}

impl Analyzer {
    pub fn new<C: ModelClient + 'static>(client: C) -> Self {
        Self::with_shared_client(Arc::new(Mutex::new(client)))
    }

    pub fn with_shared_client(client: Arc<Mutex<dyn ModelClient>>) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Snapshot of the current result.
    pub fn state(&self) -> AnalysisResult {
        lock(&self.state).result.clone()
    }

    /// Accept a request and enter `Pending`.
    ///
    /// Fails without touching the state when the prompt is blank or another
    /// request is pending. The returned request must be [`run`](PendingRequest::run)
    /// to resolve it.
    pub fn begin(&self, prompt: &str, image: &SourceImage) -> Result<PendingRequest, AnalysisError> {
        if prompt.trim().is_empty() {
            return Err(AnalysisError::EmptyPrompt);
        }
        let generation = {
            let mut state = lock(&self.state);
            if state.result.is_pending() {
                log::warn!("rejected analysis request: generation {} pending", state.generation);
                return Err(AnalysisError::ConcurrentRequestRejected);
            }
            state.generation += 1;
            state.result = AnalysisResult::Pending;
            state.generation
        };
        log::debug!(
            "analysis {} pending ({}x{} {})",
            generation,
            image.width(),
            image.height(),
            image.mime_type()
        );
        Ok(PendingRequest {
            generation,
            request: ModelRequest::new(prompt, image),
            client: self.client.clone(),
            state: self.state.clone(),
            resolved: false,
        })
    }

    /// Start a request and resolve it on a background thread.
    pub fn analyze(&self, prompt: &str, image: &SourceImage) -> Result<AnalysisHandle, AnalysisError> {
        let pending = self.begin(prompt, image)?;
        let generation = pending.generation;
        let (handoff, inbox) = mpsc::channel::<PendingRequest>();
        let spawned = std::thread::Builder::new()
            .name(format!("analysis-{}", generation))
            .spawn(move || match inbox.recv() {
                Ok(pending) => pending.run(),
                Err(_) => AnalysisResult::Failed(AnalysisError::Abandoned.to_string()),
            });
        match spawned {
            Ok(join) => {
                // A failed send drops the request, which resolves it as abandoned.
                let _ = handoff.send(pending);
                Ok(AnalysisHandle {
                    generation,
                    join,
                    state: self.state.clone(),
                })
            }
            Err(err) => {
                let err = AnalysisError::WorkerUnavailable(err.to_string());
                log::error!("analysis {}: {}", generation, err);
                pending.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Start a request and resolve it on the calling thread.
    pub fn analyze_blocking(
        &self,
        prompt: &str,
        image: &SourceImage,
    ) -> Result<AnalysisResult, AnalysisError> {
        Ok(self.begin(prompt, image)?.run())
    }

    /// Return to `Idle`, e.g. when a different image is selected.
    pub fn reset(&self) -> Result<(), AnalysisError> {
        let mut state = lock(&self.state);
        if state.result.is_pending() {
            return Err(AnalysisError::ConcurrentRequestRejected);
        }
        state.result = AnalysisResult::Idle;
        Ok(())
    }
}

/// An accepted request that has not been resolved yet.
///
/// Dropping it without calling [`run`](Self::run) resolves it as `Failed`.
pub struct PendingRequest {
    generation: u64,
    request: ModelRequest,
    client: SharedClient,
    state: SharedState,
    resolved: bool,
}

impl PendingRequest {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Call the model, parse its reply and resolve the request.
    ///
    /// Every failure, including a panic in the client, becomes `Failed`.
    pub fn run(mut self) -> AnalysisResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()))
            .unwrap_or(Err(AnalysisError::WorkerPanicked));
        let result = match outcome {
            Ok(detections) => {
                log::info!("analysis {} ready: {} detections", self.generation, detections.len());
                AnalysisResult::Ready(detections)
            }
            Err(err) => {
                log::warn!("analysis {} failed: {}", self.generation, err);
                AnalysisResult::Failed(err.to_string())
            }
        };
        self.resolved = true;
        complete(&self.state, self.generation, result)
    }

    /// Resolve the request as `Failed` without calling the model.
    pub fn fail(mut self, err: AnalysisError) -> AnalysisResult {
        self.resolved = true;
        complete(&self.state, self.generation, AnalysisResult::Failed(err.to_string()))
    }

    fn execute(&self) -> Result<Vec<Detection>, AnalysisError> {
        let reply = {
            let mut client = lock(&self.client);
            log::debug!("analysis {} sent to {}", self.generation, client.name());
            client
                .generate(&self.request)
                .map_err(|e| AnalysisError::Client(format!("{:#}", e)))?
        };
        log::debug!("analysis {} reply: {}", self.generation, preview(&reply));
        parse_detections(&reply).map_err(AnalysisError::from)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.resolved {
            complete(
                &self.state,
                self.generation,
                AnalysisResult::Failed(AnalysisError::Abandoned.to_string()),
            );
        }
    }
}

/// Background request started by [`Analyzer::analyze`].
#[derive(Debug)]
pub struct AnalysisHandle {
    generation: u64,
    join: JoinHandle<AnalysisResult>,
    state: SharedState,
}

impl AnalysisHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the request resolves and return its final result.
    pub fn wait(self) -> Result<AnalysisResult, AnalysisError> {
        match self.join.join() {
            Ok(result) => Ok(result),
            Err(_) => {
                complete(
                    &self.state,
                    self.generation,
                    AnalysisResult::Failed(AnalysisError::WorkerPanicked.to_string()),
                );
                Err(AnalysisError::WorkerPanicked)
            }
        }
    }
}

/// Single-assignment resolution of request `generation`.
fn complete(state: &Mutex<State>, generation: u64, result: AnalysisResult) -> AnalysisResult {
    let mut state = lock(state);
    if state.generation == generation && state.result.is_pending() {
        state.result = result;
    } else {
        log::warn!(
            "dropping stale completion for analysis {} (current {})",
            generation,
            state.generation
        );
    }
    state.result.clone()
}

fn preview(reply: &str) -> String {
    const MAX_CHARS: usize = 200;
    let mut out: String = reply.chars().take(MAX_CHARS).collect();
    if reply.chars().nth(MAX_CHARS).is_some() {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StubClient;
    use crate::detect::{NormalizedBox, ParseError};
    use anyhow::Result;
    use image::{ImageEncoder, RgbImage};

    const CAR_REPLY: &str = r#"Here you go: [{"label":"car","boundingBox":{"x_min":0.1,"y_min":0.2,"x_max":0.3,"y_max":0.4}}]"#;

    fn test_image() -> SourceImage {
        let img = RgbImage::from_pixel(4, 2, image::Rgb([0, 0, 0]));
        let mut buffer = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buffer)
            .write_image(img.as_raw(), 4, 2, image::ExtendedColorType::Rgb8)
            .unwrap();
        SourceImage::decode(buffer).unwrap()
    }

    struct PanickingClient;

    impl ModelClient for PanickingClient {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn generate(&mut self, _request: &ModelRequest) -> Result<String> {
            panic!("client exploded");
        }
    }

    #[test]
    fn starts_idle() {
        let analyzer = Analyzer::new(StubClient::new());
        assert_eq!(analyzer.state(), AnalysisResult::Idle);
        assert!(analyzer.state().can_submit());
    }

    #[test]
    fn successful_reply_becomes_ready() {
        let analyzer = Analyzer::new(StubClient::with_replies([CAR_REPLY]));
        let result = analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        let expected = vec![Detection::new("car", NormalizedBox::new(0.1, 0.2, 0.3, 0.4))];
        assert_eq!(result, AnalysisResult::Ready(expected.clone()));
        assert_eq!(analyzer.state().detections(), Some(expected.as_slice()));
    }

    #[test]
    fn empty_array_is_ready_not_failed() {
        let analyzer = Analyzer::new(StubClient::with_replies(["[]"]));
        let result = analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        assert_eq!(result, AnalysisResult::Ready(vec![]));
    }

    #[test]
    fn parse_failure_becomes_failed_with_reason() {
        let analyzer = Analyzer::new(StubClient::with_replies(["I see no cars."]));
        let result = analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        assert_eq!(
            result,
            AnalysisResult::Failed(AnalysisError::Parse(ParseError::NoJsonFound).to_string())
        );
    }

    #[test]
    fn client_failure_becomes_failed_with_reason() {
        let analyzer = Analyzer::new(StubClient::new().then_fail("quota exceeded"));
        let result = analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        let reason = result.failure().unwrap();
        assert!(reason.contains("model request failed"));
        assert!(reason.contains("quota exceeded"));
    }

    #[test]
    fn client_panic_becomes_failed() {
        let analyzer = Analyzer::new(PanickingClient);
        let result = analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        assert_eq!(result, AnalysisResult::Failed("analysis worker panicked".to_string()));
        assert!(analyzer.state().can_submit());
    }

    #[test]
    fn blank_prompt_is_rejected_without_state_change() {
        let analyzer = Analyzer::new(StubClient::with_replies([CAR_REPLY]));
        let err = analyzer.analyze_blocking("   ", &test_image()).unwrap_err();
        assert_eq!(err, AnalysisError::EmptyPrompt);
        assert_eq!(analyzer.state(), AnalysisResult::Idle);
    }

    #[test]
    fn new_request_discards_previous_result_immediately() {
        let analyzer = Analyzer::new(StubClient::with_replies([CAR_REPLY, "[]"]));
        let image = test_image();
        analyzer.analyze_blocking("Find the cars", &image).unwrap();
        assert!(analyzer.state().detections().is_some());

        let pending = analyzer.begin("Find the buses", &image).unwrap();
        assert_eq!(analyzer.state(), AnalysisResult::Pending);
        assert!(!analyzer.state().can_submit());
        assert_eq!(pending.run(), AnalysisResult::Ready(vec![]));
    }

    #[test]
    fn second_request_while_pending_is_rejected() {
        let (release, gate) = mpsc::channel();
        let analyzer = Analyzer::new(StubClient::with_replies([CAR_REPLY, "[]"]).with_gate(gate));
        let image = test_image();

        let handle = analyzer.analyze("Find the cars", &image).unwrap();
        assert!(analyzer.state().is_pending());

        let err = analyzer.analyze("Find the cars again", &image).unwrap_err();
        assert_eq!(err, AnalysisError::ConcurrentRequestRejected);
        assert_eq!(analyzer.reset(), Err(AnalysisError::ConcurrentRequestRejected));
        assert!(analyzer.state().is_pending());

        release.send(()).unwrap();
        let result = handle.wait().unwrap();
        assert_eq!(result.detections().map(|d| d.len()), Some(1));
        assert_eq!(analyzer.state(), result);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let analyzer = Analyzer::new(StubClient::with_replies(["[]"]));
        let image = test_image();
        let first = analyzer.begin("Find the cars", &image).unwrap();
        let generation = first.generation();
        assert_eq!(first.run(), AnalysisResult::Ready(vec![]));

        let resolved = complete(
            &analyzer.state,
            generation,
            AnalysisResult::Failed("late".to_string()),
        );
        assert_eq!(resolved, AnalysisResult::Ready(vec![]));
    }

    #[test]
    fn dropped_request_does_not_stay_pending() {
        let analyzer = Analyzer::new(StubClient::with_replies(["[]"]));
        let pending = analyzer.begin("Find the cars", &test_image()).unwrap();
        drop(pending);
        assert_eq!(
            analyzer.state(),
            AnalysisResult::Failed(AnalysisError::Abandoned.to_string())
        );
        assert!(analyzer.state().can_submit());
    }

    #[test]
    fn failed_worker_start_is_reported_as_such() {
        let analyzer = Analyzer::new(StubClient::with_replies(["[]"]));
        let pending = analyzer.begin("Find the cars", &test_image()).unwrap();
        let err = AnalysisError::WorkerUnavailable("resource temporarily unavailable".to_string());
        let result = pending.fail(err);
        let reason = result.failure().unwrap();
        assert!(reason.starts_with("failed to start analysis worker"));
        assert!(!reason.contains("model request failed"));
        assert!(!reason.contains("dropped before it ran"));
        assert_eq!(analyzer.state(), result);
        assert!(analyzer.state().can_submit());
    }

    #[test]
    fn reset_returns_to_idle() {
        let analyzer = Analyzer::new(StubClient::new().then_fail("offline"));
        analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        assert!(analyzer.state().failure().is_some());
        analyzer.reset().unwrap();
        assert_eq!(analyzer.state(), AnalysisResult::Idle);
    }

    #[test]
    fn prompt_carries_structured_instruction() {
        let client = StubClient::with_replies(["[]"]);
        let log = client.prompt_log();
        let analyzer = Analyzer::new(client);
        analyzer.analyze_blocking("Find the cars", &test_image()).unwrap();
        let prompts = log.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Find the cars"));
        assert!(prompts[0].contains("boundingBox"));
    }

    #[test]
    fn preview_truncates_long_replies() {
        let long = "x".repeat(500);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), 201);
        assert!(shown.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
