use super::types::{Accuracy, AlphaMask, SegmentationModel};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use image::RgbImage;
use std::thread;

/// Asynchronous access to a segmentation model
///
/// At most one request is in flight at a time. A result produced for a
/// request issued before the last `reset` is never returned.
pub trait MaskProvider {
    /// Hand a frame to the model. Returns false if a request is already in flight.
    fn submit(&mut self, frame: &RgbImage) -> bool;

    /// Collect the completed mask, if the in-flight request has finished
    fn poll(&mut self) -> Option<Result<AlphaMask>>;

    /// True while the model is still working, including on a request made stale by `reset`
    fn in_flight(&self) -> bool;

    /// Applies to the next request
    fn set_accuracy(&mut self, accuracy: Accuracy);

    /// Drop any pending result and the model's temporal state
    fn reset(&mut self);
}

/// Runs the model synchronously inside `submit`
///
/// The result is held until the next `poll`, so callers see the same
/// submit/poll sequence as with the threaded provider.
pub struct InlineSegmenter<M> {
    model: M,
    pending: Option<Result<AlphaMask>>,
}

impl<M: SegmentationModel> InlineSegmenter<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            pending: None,
        }
    }
}

impl<M: SegmentationModel> MaskProvider for InlineSegmenter<M> {
    fn submit(&mut self, frame: &RgbImage) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(self.model.segment(frame));
        true
    }

    fn poll(&mut self) -> Option<Result<AlphaMask>> {
        self.pending.take()
    }

    fn in_flight(&self) -> bool {
        self.pending.is_some()
    }

    fn set_accuracy(&mut self, accuracy: Accuracy) {
        self.model.set_accuracy(accuracy);
    }

    fn reset(&mut self) {
        self.pending = None;
        self.model.reset_state();
    }
}

enum Request {
    Segment { generation: u64, frame: RgbImage },
    SetAccuracy(Accuracy),
    Reset,
}

struct Reply {
    generation: u64,
    mask: Result<AlphaMask>,
}

/// Runs the model on a dedicated worker thread
///
/// The worker holds at most one segment request. A `reset` only changes the
/// generation results must carry; the request already running still blocks
/// new submissions until its (discarded) reply comes back.
pub struct ThreadedSegmenter {
    requests: Option<Sender<Request>>,
    replies: Receiver<Reply>,
    generation: u64,
    busy: bool,
    handle: Option<thread::JoinHandle<()>>,
}

impl ThreadedSegmenter {
    pub fn spawn<M>(model: M) -> Result<Self>
    where
        M: SegmentationModel + Send + 'static,
    {
        let (request_tx, request_rx) = unbounded::<Request>();
        let (reply_tx, reply_rx) = unbounded::<Reply>();

        let handle = thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || run_worker(model, request_rx, reply_tx))
            .context("Failed to spawn segmentation worker")?;

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            generation: 0,
            busy: false,
            handle: Some(handle),
        })
    }

    fn send(&mut self, request: Request) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        if requests.send(request).is_err() {
            tracing::warn!("Segmentation worker has stopped");
            self.requests = None;
            return false;
        }
        true
    }

    /// Stop the worker. Requests still running finish on their own and are discarded.
    pub fn stop(&mut self) {
        self.generation += 1;
        self.busy = false;
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Segmentation worker panicked");
            }
        }
    }
}

impl MaskProvider for ThreadedSegmenter {
    fn submit(&mut self, frame: &RgbImage) -> bool {
        if self.busy {
            return false;
        }
        let request = Request::Segment {
            generation: self.generation,
            frame: frame.clone(),
        };
        // A lost worker is still "accepted": the next poll reports it as an error.
        self.busy = self.send(request) || self.requests.is_none();
        self.busy
    }

    fn poll(&mut self) -> Option<Result<AlphaMask>> {
        loop {
            match self.replies.try_recv() {
                Ok(reply) => {
                    self.busy = false;
                    if reply.generation == self.generation {
                        return Some(reply.mask);
                    }
                    tracing::debug!("Discarding stale mask from generation {}", reply.generation);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    let was_busy = std::mem::replace(&mut self.busy, false);
                    return was_busy.then(|| Err(anyhow!("segmentation worker exited")));
                }
            }
        }
    }

    fn in_flight(&self) -> bool {
        self.busy
    }

    fn set_accuracy(&mut self, accuracy: Accuracy) {
        self.send(Request::SetAccuracy(accuracy));
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.send(Request::Reset);
    }
}

impl Drop for ThreadedSegmenter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<M: SegmentationModel>(mut model: M, requests: Receiver<Request>, replies: Sender<Reply>) {
    tracing::info!("Segmentation worker started");

    while let Ok(request) = requests.recv() {
        match request {
            Request::Segment { generation, frame } => {
                let mask = model.segment(&frame);
                if replies.send(Reply { generation, mask }).is_err() {
                    break;
                }
            }
            Request::SetAccuracy(accuracy) => model.set_accuracy(accuracy),
            Request::Reset => model.reset_state(),
        }
    }

    tracing::info!("Segmentation worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct Constant {
        value: f32,
        resets: usize,
    }

    impl SegmentationModel for Constant {
        fn segment(&mut self, frame: &RgbImage) -> Result<AlphaMask> {
            Ok(AlphaMask::from_pixel(frame.width(), frame.height(), Luma([self.value])))
        }

        fn set_accuracy(&mut self, accuracy: Accuracy) {
            self.value = match accuracy {
                Accuracy::Fast => 0.25,
                Accuracy::Accurate => 1.0,
            };
        }

        fn reset_state(&mut self) {
            self.resets += 1;
        }

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    /// Sleeps before answering so tests can observe the request in flight
    struct Slow {
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl SegmentationModel for Slow {
        fn segment(&mut self, frame: &RgbImage) -> Result<AlphaMask> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(AlphaMask::from_pixel(frame.width(), frame.height(), Luma([1.0])))
        }

        fn set_accuracy(&mut self, _accuracy: Accuracy) {}

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    struct Crashing;

    impl SegmentationModel for Crashing {
        fn segment(&mut self, _frame: &RgbImage) -> Result<AlphaMask> {
            panic!("model crashed");
        }

        fn set_accuracy(&mut self, _accuracy: Accuracy) {}

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    fn wait_for(provider: &mut ThreadedSegmenter) -> Option<Result<AlphaMask>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(result) = provider.poll() {
                return Some(result);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn inline_rejects_second_submit_until_polled() {
        let mut provider = InlineSegmenter::new(Constant { value: 0.5, resets: 0 });
        let frame = RgbImage::new(2, 2);

        assert!(provider.submit(&frame));
        assert!(provider.in_flight());
        assert!(!provider.submit(&frame));

        let mask = provider.poll().unwrap().unwrap();
        assert_eq!(mask.get_pixel(1, 1)[0], 0.5);
        assert!(!provider.in_flight());
        assert!(provider.poll().is_none());
    }

    #[test]
    fn inline_reset_drops_pending_result() {
        let mut provider = InlineSegmenter::new(Constant { value: 0.5, resets: 0 });
        provider.submit(&RgbImage::new(2, 2));
        provider.reset();

        assert!(provider.poll().is_none());
        assert_eq!(provider.model.resets, 1);
    }

    #[test]
    fn threaded_round_trip_and_accuracy_switch() {
        let mut provider = ThreadedSegmenter::spawn(Constant { value: 0.5, resets: 0 }).unwrap();
        let frame = RgbImage::new(3, 2);

        assert!(provider.submit(&frame));
        assert!(!provider.submit(&frame));
        let mask = wait_for(&mut provider).unwrap().unwrap();
        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.get_pixel(0, 0)[0], 0.5);

        provider.set_accuracy(Accuracy::Fast);
        assert!(provider.submit(&frame));
        let mask = wait_for(&mut provider).unwrap().unwrap();
        assert_eq!(mask.get_pixel(2, 1)[0], 0.25);
    }

    #[test]
    fn threaded_reset_discards_in_flight_result() {
        let mut provider = ThreadedSegmenter::spawn(Constant { value: 0.5, resets: 0 }).unwrap();
        let frame = RgbImage::new(2, 2);

        assert!(provider.submit(&frame));
        provider.reset();

        // The stale reply is swallowed and frees the worker for the next request.
        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.in_flight() && Instant::now() < deadline {
            assert!(provider.poll().is_none());
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!provider.in_flight());

        assert!(provider.submit(&frame));
        let mask = wait_for(&mut provider).unwrap().unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0.5);
    }

    #[test]
    fn reset_does_not_queue_behind_a_running_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = Slow {
            delay: Duration::from_millis(200),
            calls: calls.clone(),
        };
        let mut provider = ThreadedSegmenter::spawn(model).unwrap();
        let frame = RgbImage::new(2, 2);

        assert!(provider.submit(&frame));
        provider.reset();
        assert!(provider.in_flight());
        assert!(!provider.submit(&frame));
        assert!(provider.poll().is_none());

        let deadline = Instant::now() + Duration::from_secs(5);
        while provider.in_flight() && Instant::now() < deadline {
            assert!(provider.poll().is_none());
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(provider.submit(&frame));
        assert!(wait_for(&mut provider).unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dead_worker_reports_errors_instead_of_staying_busy() {
        let mut provider = ThreadedSegmenter::spawn(Crashing).unwrap();
        let frame = RgbImage::new(2, 2);

        assert!(provider.submit(&frame));
        assert!(wait_for(&mut provider).unwrap().is_err());

        assert!(provider.submit(&frame));
        assert!(wait_for(&mut provider).unwrap().is_err());
        assert!(!provider.in_flight());
    }
}
