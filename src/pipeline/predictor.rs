//! Action classification stage running on its own thread.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::track::{Detection, Frame, TrackId};

const WORKER_NAME: &str = "prediction";

/// One action label with its confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLabel {
    pub name: String,
    pub score: f32,
}

impl ActionLabel {
    pub fn new<S: Into<String>>(name: S, score: f32) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Action labels for the tracks of one classified frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionPrediction {
    pub labels: BTreeMap<TrackId, Vec<ActionLabel>>,
}

impl ActionPrediction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label for `track_id`.
    pub fn with_label<S: Into<String>>(mut self, track_id: TrackId, name: S, score: f32) -> Self {
        self.labels
            .entry(track_id)
            .or_default()
            .push(ActionLabel::new(name, score));
        self
    }

    pub fn get(&self, track_id: TrackId) -> Option<&[ActionLabel]> {
        self.labels.get(&track_id).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// State of the prediction output queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// Nothing ready yet; the worker is still running.
    Pending,
    Ready(ActionPrediction),
    /// The worker has finished and every prediction has been read.
    Completed,
}

/// Trait for action classification backends.
///
/// Implement this to connect an action model to the pipeline.
pub trait ActionClassifier {
    /// Error type for classification failures.
    type Error: std::fmt::Display;

    fn classify(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
    ) -> Result<ActionPrediction, Self::Error>;
}

/// A frame and its detections, queued for classification.
#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub frame: Frame,
    pub detections: Vec<Detection>,
}

impl PredictionRequest {
    pub fn new(frame: Frame, detections: Vec<Detection>) -> Self {
        Self { frame, detections }
    }
}

/// Outcome of a non-blocking submit.
#[derive(Debug)]
pub enum Submit {
    Accepted,
    /// The input queue is full; the request is handed back.
    Full(PredictionRequest),
}

/// Runs an [`ActionClassifier`] on a worker thread behind bounded queues.
///
/// Every `interval`-th submitted request is classified and produces exactly
/// one prediction, in submission order. Predictions carry no frame tag;
/// consumers pair them with frames by that order.
pub struct PredictionWorker {
    input: Option<Sender<PredictionRequest>>,
    output: Option<Receiver<ActionPrediction>>,
    handle: Option<JoinHandle<()>>,
}

impl PredictionWorker {
    pub fn spawn<C>(classifier: C, capacity: usize, interval: usize) -> Result<Self, WorkerError>
    where
        C: ActionClassifier + Send + 'static,
    {
        let (input_tx, input_rx) = bounded::<PredictionRequest>(capacity.max(1));
        let (output_tx, output_rx) = bounded::<ActionPrediction>(capacity.max(1));
        let interval = interval.max(1);

        let handle = thread::Builder::new()
            .name("action-predictor".into())
            .spawn(move || worker_loop(classifier, input_rx, output_tx, interval))
            .map_err(|e| WorkerError::Spawn {
                name: WORKER_NAME,
                reason: e.to_string(),
            })?;

        Ok(Self {
            input: Some(input_tx),
            output: Some(output_rx),
            handle: Some(handle),
        })
    }

    /// Queue a request, waiting while the input queue is full.
    pub fn submit(&self, request: PredictionRequest) -> Result<(), WorkerError> {
        let input = self.input.as_ref().ok_or(WorkerError::Disconnected(WORKER_NAME))?;
        input
            .send(request)
            .map_err(|_| WorkerError::Disconnected(WORKER_NAME))
    }

    /// Queue a request without waiting.
    pub fn try_submit(&self, request: PredictionRequest) -> Result<Submit, WorkerError> {
        let input = self.input.as_ref().ok_or(WorkerError::Disconnected(WORKER_NAME))?;
        match input.try_send(request) {
            Ok(()) => Ok(Submit::Accepted),
            Err(TrySendError::Full(request)) => Ok(Submit::Full(request)),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::Disconnected(WORKER_NAME)),
        }
    }

    /// Take the next prediction if one is ready.
    pub fn poll(&self) -> Poll {
        let Some(output) = self.output.as_ref() else {
            return Poll::Completed;
        };
        match output.try_recv() {
            Ok(prediction) => Poll::Ready(prediction),
            Err(TryRecvError::Empty) => Poll::Pending,
            Err(TryRecvError::Disconnected) => Poll::Completed,
        }
    }

    /// Close the input queue. The worker finishes what is queued, then completes.
    pub fn finish(&mut self) {
        if self.input.take().is_some() {
            debug!("prediction input closed");
        }
    }

    /// Stop the worker and wait for its thread.
    ///
    /// Unread predictions are discarded.
    pub fn terminate(&mut self) -> Result<(), WorkerError> {
        self.input.take();
        self.output.take();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WorkerError::Panicked(WORKER_NAME)),
            None => Ok(()),
        }
    }
}

fn worker_loop<C: ActionClassifier>(
    mut classifier: C,
    input: Receiver<PredictionRequest>,
    output: Sender<ActionPrediction>,
    interval: usize,
) {
    info!(interval, "prediction worker started");
    let mut received = 0usize;
    let mut emitted = 0usize;

    while let Ok(request) = input.recv() {
        let position = received;
        received += 1;
        if position % interval != 0 {
            continue;
        }

        let prediction = match classifier.classify(&request.frame, &request.detections) {
            Ok(p) => p,
            Err(e) => {
                // Still emit, so later predictions keep their position.
                warn!(frame = request.frame.index(), error = %e, "classification failed");
                ActionPrediction::default()
            }
        };

        if output.send(prediction).is_err() {
            debug!("prediction output closed, stopping");
            break;
        }
        emitted += 1;
    }

    info!(requests = received, predictions = emitted, "prediction worker finished");
}
