//! Drives a long-running backend operation to a terminal state.

use crate::api::{OperationHandle, OperationStatus, VideoBackend};
use crate::error::PollError;
use crate::{logi, logok, logw};
use async_trait::async_trait;
use std::time::Duration;

/// Suspends the caller between polls and retries. Swapped out in tests so
/// simulated time passes instantly.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Polling { attempt: u32 },
    Done(String),
    Failed(String),
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Done(_) | PollState::Failed(_) | PollState::TimedOut)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

pub struct OperationPoller<'a> {
    backend: &'a dyn VideoBackend,
    sleeper: &'a dyn Sleeper,
    policy: PollPolicy,
}

impl<'a> OperationPoller<'a> {
    pub fn new(backend: &'a dyn VideoBackend, sleeper: &'a dyn Sleeper, policy: PollPolicy) -> Self {
        Self { backend, sleeper, policy }
    }

    /// Polls `handle` until done, failed, or `max_attempts` checks have come
    /// back unfinished. Consumes the handle.
    pub async fn wait(&self, handle: OperationHandle) -> Result<String, PollError> {
        let mut state = PollState::Pending;
        let mut attempt = 0u32;

        while !state.is_terminal() {
            if attempt >= self.policy.max_attempts {
                state = PollState::TimedOut;
                break;
            }
            attempt += 1;
            state = PollState::Polling { attempt };

            match self.backend.fetch_status(&handle).await {
                Ok(OperationStatus::Pending) => {
                    logi(format!(
                        "Still generating {} ({}/{})",
                        handle.name, attempt, self.policy.max_attempts
                    ));
                }
                Ok(OperationStatus::Done { asset_uri: Some(uri) }) => {
                    state = PollState::Done(uri);
                    continue;
                }
                Ok(OperationStatus::Done { asset_uri: None }) => {
                    logw(format!("{} finished without a usable video", handle.name));
                    return Err(PollError::EmptyResult);
                }
                Ok(OperationStatus::Failed(reason)) => {
                    state = PollState::Failed(reason);
                    continue;
                }
                Err(err) => {
                    logw(format!("Poll attempt {} for {} errored: {:#}", attempt, handle.name, err));
                }
            }

            if attempt < self.policy.max_attempts {
                self.sleeper.sleep(self.policy.interval).await;
            }
        }

        match state {
            PollState::Done(uri) => {
                logok(format!("{} completed: {}", handle.name, uri));
                Ok(uri)
            }
            PollState::Failed(reason) => Err(PollError::Failed(reason)),
            _ => {
                let waited = self.policy.interval * self.policy.max_attempts;
                logw(format!("{} timed out after {:?}", handle.name, waited));
                Err(PollError::TimedOut { attempts: attempt, waited })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Returns immediately and remembers every requested delay.
    #[derive(Default)]
    pub struct RecordingSleeper {
        pub sleeps: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn recorded(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSleeper;
    use super::*;
    use crate::api::SceneRequest;
    use crate::error::SubmissionError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<VecDeque<anyhow::Result<OperationStatus>>>,
        polls: Mutex<u32>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<anyhow::Result<OperationStatus>>) -> Self {
            Self { replies: Mutex::new(replies.into()), polls: Mutex::new(0) }
        }

        fn polls(&self) -> u32 {
            *self.polls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VideoBackend for ScriptedBackend {
        async fn submit(&self, _request: &SceneRequest) -> Result<OperationHandle, SubmissionError> {
            Ok(OperationHandle { name: "op".into() })
        }

        async fn fetch_status(&self, _handle: &OperationHandle) -> anyhow::Result<OperationStatus> {
            *self.polls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(OperationStatus::Pending))
        }
    }

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy { interval: Duration::from_secs(15), max_attempts }
    }

    fn handle() -> OperationHandle {
        OperationHandle { name: "operations/7".into() }
    }

    #[tokio::test]
    async fn returns_asset_after_pending_polls() {
        let backend = ScriptedBackend::new(vec![
            Ok(OperationStatus::Pending),
            Ok(OperationStatus::Pending),
            Ok(OperationStatus::Done { asset_uri: Some("gs://b/x.mp4".into()) }),
        ]);
        let sleeper = RecordingSleeper::default();
        let uri = OperationPoller::new(&backend, &sleeper, policy(40)).wait(handle()).await.unwrap();

        assert_eq!(uri, "gs://b/x.mp4");
        assert_eq!(backend.polls(), 3);
        assert_eq!(sleeper.recorded(), vec![Duration::from_secs(15); 2]);
    }

    #[tokio::test]
    async fn done_without_asset_is_empty_result() {
        let backend = ScriptedBackend::new(vec![Ok(OperationStatus::Done { asset_uri: None })]);
        let sleeper = RecordingSleeper::default();
        let err = OperationPoller::new(&backend, &sleeper, policy(40)).wait(handle()).await.unwrap_err();
        assert!(matches!(err, PollError::EmptyResult));
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced() {
        let backend = ScriptedBackend::new(vec![
            Ok(OperationStatus::Pending),
            Ok(OperationStatus::Failed("quota".into())),
        ]);
        let sleeper = RecordingSleeper::default();
        let err = OperationPoller::new(&backend, &sleeper, policy(40)).wait(handle()).await.unwrap_err();
        assert!(matches!(err, PollError::Failed(ref r) if r == "quota"));
        assert_eq!(backend.polls(), 2);
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let backend = ScriptedBackend::new(vec![]);
        let sleeper = RecordingSleeper::default();
        let err = OperationPoller::new(&backend, &sleeper, policy(4)).wait(handle()).await.unwrap_err();

        match err {
            PollError::TimedOut { attempts, waited } => {
                assert_eq!(attempts, 4);
                assert_eq!(waited, Duration::from_secs(60));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(backend.polls(), 4);
        assert_eq!(sleeper.recorded().len(), 3);
    }

    #[tokio::test]
    async fn transport_errors_count_as_attempts() {
        let backend = ScriptedBackend::new(vec![
            Err(anyhow::anyhow!("connection reset")),
            Ok(OperationStatus::Done { asset_uri: Some("gs://b/y.mp4".into()) }),
        ]);
        let sleeper = RecordingSleeper::default();
        let uri = OperationPoller::new(&backend, &sleeper, policy(40)).wait(handle()).await.unwrap();
        assert_eq!(uri, "gs://b/y.mp4");
        assert_eq!(sleeper.recorded().len(), 1);
    }
}
