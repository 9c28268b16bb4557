//! Polling a resource's status until it settles.
//!
//! A [`StatusProbe`] fetches the current status; [`spawn_status_poller`] runs it on a fixed
//! interval in a background task and publishes changes through a [`PollerHandle`].

use crate::api::ApiClient;
use crate::api::error::ApiError;
use crate::api::videos::{ProcessingStatus, Video};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long to wait between two status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// A source of status updates for one resource.
pub trait StatusProbe: Send + Sync + 'static {
    type Status: Clone + fmt::Debug + PartialEq + Send + Sync + 'static;

    /// Probe once before the first wait instead of after it.
    const POLL_IMMEDIATELY: bool = false;

    fn probe(&self) -> impl Future<Output = Result<Self::Status, ApiError>> + Send;

    /// Once a terminal status is seen, polling stops for good.
    fn is_terminal(status: &Self::Status) -> bool;
}

/// Follows the encoding status of an uploaded video.
#[derive(Debug, Clone)]
pub struct EncodingStatusProbe {
    pub client: ApiClient,
    pub video_id: String,
}

impl StatusProbe for EncodingStatusProbe {
    type Status = ProcessingStatus;

    async fn probe(&self) -> Result<ProcessingStatus, ApiError> {
        let video = self.client.get_video(&self.video_id).await?;
        Ok(video.status)
    }

    fn is_terminal(status: &ProcessingStatus) -> bool {
        status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    Waiting,
    Ready,
}

/// Waits for a live stream's playback URL to start serving.
#[derive(Debug, Clone)]
pub struct LiveReadinessProbe {
    pub client: ApiClient,
    pub playback_url: String,
}

impl StatusProbe for LiveReadinessProbe {
    type Status = Readiness;

    const POLL_IMMEDIATELY: bool = true;

    async fn probe(&self) -> Result<Readiness, ApiError> {
        Ok(if self.client.probe_playback(&self.playback_url).await? {
            Readiness::Ready
        } else {
            Readiness::Waiting
        })
    }

    fn is_terminal(status: &Readiness) -> bool {
        *status == Readiness::Ready
    }
}

/// Handle to a running status poller.
///
/// Dropping the handle stops the poller. Receivers obtained through [`Self::subscribe`] do not
/// keep it alive.
pub struct PollerHandle<S> {
    rx: watch::Receiver<S>,
    task: Option<JoinHandle<()>>,
    is_terminal: fn(&S) -> bool,
}

impl<S: fmt::Debug> fmt::Debug for PollerHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerHandle")
            .field("status", &*self.rx.borrow())
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl<S: Clone> PollerHandle<S> {
    /// The most recently observed status.
    pub fn status(&self) -> S {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.rx.clone()
    }

    /// Waits until a terminal status is observed and returns it.
    ///
    /// Returns `None` if the poller was cancelled first.
    pub async fn wait_terminal(&mut self) -> Option<S> {
        let is_terminal = self.is_terminal;
        self.rx
            .wait_for(|status| is_terminal(status))
            .await
            .ok()
            .map(|status| status.clone())
    }

    /// Stops polling. Any fetch in flight is abandoned and its answer discarded.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl<S> Drop for PollerHandle<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Starts polling `probe` every `interval` until it reports a terminal status.
///
/// At most one probe is in flight at a time, and answers are published in the order they were
/// requested. Failed probes are logged and retried on the next tick; they never end the poll.
/// Starting from a terminal status does not probe at all.
pub fn spawn_status_poller<P: StatusProbe>(
    probe: P,
    initial: P::Status,
    interval: Duration,
) -> PollerHandle<P::Status> {
    let is_terminal = P::is_terminal;
    if is_terminal(&initial) {
        tracing::debug!(status = ?initial, "status is already terminal, not polling");
        let (_, rx) = watch::channel(initial);
        return PollerHandle {
            rx,
            task: None,
            is_terminal,
        };
    }

    let (tx, rx) = watch::channel(initial);
    let task = tokio::spawn(async move {
        if !P::POLL_IMMEDIATELY {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => return,
            }
        }

        loop {
            match probe.probe().await {
                Ok(status) => {
                    tx.send_if_modified(|current| {
                        if *current == status {
                            return false;
                        }
                        tracing::debug!(from = ?current, to = ?status, "status changed");
                        *current = status;
                        true
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "status fetch failed, retrying on next tick");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "status fetch failed, retrying on next tick");
                }
            }

            if is_terminal(&tx.borrow()) {
                tracing::debug!("reached terminal status, stopping poller");
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = tx.closed() => {
                    tracing::trace!("nobody is watching anymore, stopping poller");
                    return;
                }
            }
        }
    });

    PollerHandle {
        rx,
        task: Some(task),
        is_terminal,
    }
}

/// Polls the encoding status of `video` until it is `completed` or `failed`.
pub fn watch_encoding(
    client: &ApiClient,
    video: &Video,
    interval: Duration,
) -> PollerHandle<ProcessingStatus> {
    let probe = EncodingStatusProbe {
        client: client.clone(),
        video_id: video.id().to_string(),
    };
    spawn_status_poller(probe, video.status, interval)
}

/// Polls a live stream's playback URL until it starts serving.
pub fn watch_live_readiness(
    client: &ApiClient,
    playback_url: &str,
    interval: Duration,
) -> PollerHandle<Readiness> {
    let probe = LiveReadinessProbe {
        client: client.clone(),
        playback_url: playback_url.to_string(),
    };
    spawn_status_poller(probe, Readiness::Waiting, interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::build_client;
    use http::StatusCode;
    use mockito::Server;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const TICK: Duration = DEFAULT_POLL_INTERVAL;

    /// Answers from a script; once the script runs out it keeps answering `processing`.
    struct ScriptedProbe {
        answers: Mutex<VecDeque<Result<ProcessingStatus, ApiError>>>,
        fetches: Arc<AtomicUsize>,
    }

    fn scripted(
        answers: impl IntoIterator<Item = Result<ProcessingStatus, ApiError>>,
    ) -> (ScriptedProbe, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let probe = ScriptedProbe {
            answers: Mutex::new(answers.into_iter().collect()),
            fetches: Arc::clone(&fetches),
        };
        (probe, fetches)
    }

    impl StatusProbe for ScriptedProbe {
        type Status = ProcessingStatus;

        fn probe(&self) -> impl Future<Output = Result<ProcessingStatus, ApiError>> + Send {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ProcessingStatus::Processing));
            async move { answer }
        }

        fn is_terminal(status: &ProcessingStatus) -> bool {
            status.is_terminal()
        }
    }

    fn bad_gateway() -> ApiError {
        ApiError::Unavailable {
            status: StatusCode::BAD_GATEWAY,
            message: "no details".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_completion_on_second_tick() {
        let (probe, fetches) = scripted([
            Ok(ProcessingStatus::Processing),
            Ok(ProcessingStatus::Completed),
        ]);
        let mut handle = spawn_status_poller(probe, ProcessingStatus::Processing, TICK);

        tokio::time::sleep(TICK - Duration::from_millis(100)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 0);

        assert_eq!(
            handle.wait_terminal().await,
            Some(ProcessingStatus::Completed)
        );
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        tokio::time::sleep(TICK * 10).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_swallowed_and_retried() {
        let (probe, fetches) = scripted([
            Err(bad_gateway()),
            Err(ApiError::NotFound {
                message: "not yet indexed".to_string(),
            }),
            Ok(ProcessingStatus::Failed),
        ]);
        let mut handle = spawn_status_poller(probe, ProcessingStatus::Pending, TICK);

        assert_eq!(handle.wait_terminal().await, Some(ProcessingStatus::Failed));
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_start_never_fetches() {
        let (probe, fetches) = scripted([]);
        let mut handle = spawn_status_poller(probe, ProcessingStatus::Completed, TICK);

        assert!(handle.is_finished());
        assert_eq!(
            handle.wait_terminal().await,
            Some(ProcessingStatus::Completed)
        );
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_fetching() {
        let (probe, fetches) = scripted([]);
        let mut handle = spawn_status_poller(probe, ProcessingStatus::Processing, TICK);

        tokio::time::sleep(TICK * 2 + Duration::from_millis(100)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);

        handle.cancel();
        assert!(handle.is_finished());
        tokio::time::sleep(TICK * 10).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(handle.wait_terminal().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_fetching() {
        let (probe, fetches) = scripted([]);
        let handle = spawn_status_poller(probe, ProcessingStatus::Processing, TICK);
        let mut updates = handle.subscribe();

        tokio::time::sleep(TICK + Duration::from_millis(100)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        drop(handle);
        tokio::time::sleep(TICK * 10).await;
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        // the poller is gone, so the channel is closed
        assert!(updates.changed().await.is_err());
    }

    /// Takes `delay` to answer, alternating between `pending` and `processing`.
    struct SlowProbe {
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        started: Arc<AtomicUsize>,
        answered: Arc<AtomicUsize>,
    }

    impl StatusProbe for SlowProbe {
        type Status = ProcessingStatus;

        async fn probe(&self) -> Result<ProcessingStatus, ApiError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = self.answered.fetch_add(1, Ordering::SeqCst);
            Ok(if n % 2 == 0 {
                ProcessingStatus::Processing
            } else {
                ProcessingStatus::Pending
            })
        }

        fn is_terminal(status: &ProcessingStatus) -> bool {
            status.is_terminal()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_never_sees_overlapping_fetches() {
        let probe = SlowProbe {
            delay: Duration::from_secs(10),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
            started: Arc::default(),
            answered: Arc::default(),
        };
        let max_in_flight = Arc::clone(&probe.max_in_flight);
        let started = Arc::clone(&probe.started);
        let answered = Arc::clone(&probe.answered);
        let mut handle = spawn_status_poller(probe, ProcessingStatus::Pending, TICK);

        // fetches start at 3s, 16s, 29s, 42s and 55s; the last one is still running at 60s
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(started.load(Ordering::SeqCst), 5);
        assert_eq!(answered.load(Ordering::SeqCst), 4);
        let last_seen = handle.status();
        let mut updates = handle.subscribe();
        updates.mark_unchanged();

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(started.load(Ordering::SeqCst), 5);
        assert_eq!(answered.load(Ordering::SeqCst), 4);
        assert_eq!(handle.status(), last_seen);
        // the sender is gone without publishing the abandoned answer
        assert!(updates.has_changed().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_transitions_in_order() {
        let (probe, _) = scripted([
            Ok(ProcessingStatus::Processing),
            Ok(ProcessingStatus::Processing),
            Ok(ProcessingStatus::Completed),
        ]);
        let handle = spawn_status_poller(probe, ProcessingStatus::Pending, TICK);
        let mut updates = handle.subscribe();

        let mut seen = Vec::new();
        while updates.changed().await.is_ok() {
            let status = *updates.borrow_and_update();
            seen.push(status);
            if status.is_terminal() {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![ProcessingStatus::Processing, ProcessingStatus::Completed]
        );
        assert_eq!(handle.status(), ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn live_readiness_probes_immediately() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/live/abc/index.m3u8")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let client = build_client(&server);
        let url = format!("{}/live/abc/index.m3u8", server.url());
        // a long interval: only the immediate probe can finish this test in time
        let mut handle = watch_live_readiness(&client, &url, Duration::from_secs(3600));

        let ready = tokio::time::timeout(Duration::from_secs(5), handle.wait_terminal())
            .await
            .unwrap();
        assert_eq!(ready, Some(Readiness::Ready));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn encoding_probe_reads_video_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/video/v1")
            .with_body(
                crate::api::videos::tests::video_json("v1", "owner", "completed").to_string(),
            )
            .create_async()
            .await;

        let probe = EncodingStatusProbe {
            client: build_client(&server),
            video_id: "v1".to_string(),
        };
        assert_eq!(probe.probe().await.unwrap(), ProcessingStatus::Completed);
    }
}
