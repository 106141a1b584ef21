//! Batch request dispatcher.
//!
//! Reads the pending ledger lazily, bounds in-flight records with a
//! semaphore, and drives each record through the state machine in its own
//! task. Records of one provider take their first grant in file order, but
//! never wait on another provider's budget. Every terminal record is
//! appended to the outcome ledger as soon as it resolves, so an interrupted
//! run keeps everything finished so far.

use crate::client::{
    ChatClient, ChatRequest, ChatResponse, ClientFactory, ClientSource, CredentialSource, EnvCredentials, Grant,
    ParsingMode, Provider, RateLimiter,
};
use crate::dispatch::state::{DispatchState, RetryPolicy, transition};
use crate::ledger::{OutcomeLedger, PendingLedger, RecordDefaults};
use crate::models::{
    AnyLlmError, Config, ConfigError, MalformedLine, OutcomeRecord, ProviderError, RequestRecord,
    Result, RunStats,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Run-level dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Maximum records in flight
    pub concurrency: usize,
    /// Bound on each provider call
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Parsing mode override for every client (None = registry default)
    pub parsing_mode: Option<ParsingMode>,
    pub show_progress: bool,
    /// Skip records whose index already has an outcome
    pub resume: bool,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.dispatch.concurrency.max(1),
            request_timeout: config.dispatch.request_timeout(),
            retry: RetryPolicy::from(&config.retry),
            parsing_mode: None,
            show_progress: config.dispatch.show_progress,
            resume: false,
        }
    }
}

/// How one dispatch unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitReport {
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
    /// Cancelled while waiting; no outcome written
    Interrupted { attempts: u32 },
}

/// State shared by every dispatch unit of a run.
struct DispatchUnit {
    clients: Arc<dyn ClientSource>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<OutcomeLedger>,
    retry: RetryPolicy,
    timeout: Duration,
    mode: Option<ParsingMode>,
    run_id: String,
    cancel: CancellationToken,
}

impl DispatchUnit {
    /// One call: resolve the client, then complete under the timeout.
    async fn attempt(&self, record: &RequestRecord) -> std::result::Result<ChatResponse, ProviderError> {
        let client = self
            .clients
            .client_for(record.provider, &record.model, self.mode)
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let request = ChatRequest::new(record.payload.clone());
        match tokio::time::timeout(self.timeout, client.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }

    /// Wait for the record's place in its provider's grant queue, then take a grant.
    ///
    /// Returns `None` when the run is cancelled first. The turn is passed on
    /// either way, since dropping `done` also releases the next record.
    async fn first_grant(&self, record: &RequestRecord, turn: Turn) -> Option<Grant> {
        let Turn { after, done } = turn;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            grant = async move {
                if let Some(after) = after {
                    after.await.ok();
                }
                self.limiter.acquire(record.provider, record.estimated_tokens).await
            } => {
                done.send(()).ok();
                Some(grant)
            }
        }
    }

    /// Drive a record from `Pending` to a terminal state.
    async fn drive(&self, mut record: RequestRecord, turn: Turn) -> Result<UnitReport> {
        let mut turn = Some(turn);
        let mut state = DispatchState::Pending;
        let mut last: Option<std::result::Result<ChatResponse, ProviderError>> = None;

        loop {
            state = match state {
                DispatchState::Pending => {
                    let Some(turn) = turn.take() else {
                        return Err(AnyLlmError::Internal(format!("record {} queued twice", record.index)));
                    };
                    let Some(grant) = self.first_grant(&record, turn).await else {
                        return Ok(UnitReport::Interrupted { attempts: 0 });
                    };
                    debug!(
                        index = record.index,
                        provider = %record.provider,
                        waited_ms = grant.waited.as_millis() as u64,
                        "Dispatching record"
                    );
                    record.begin_attempt()?
                }
                DispatchState::InFlight => {
                    let result = self.attempt(&record).await;
                    if let Err(ProviderError::RateLimited { retry_after }) = &result {
                        let pause = retry_after.unwrap_or_else(|| self.retry.backoff(record.attempts));
                        self.limiter.penalize(record.provider, pause);
                    }
                    let next = transition(&record, &result, &self.retry);
                    last = Some(result);
                    next
                }
                DispatchState::Retrying { delay } => {
                    debug!(
                        index = record.index,
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last.as_ref().and_then(|r| r.as_ref().err()).map(|e| e.to_string()).unwrap_or_default(),
                        "Retrying record"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            return Ok(UnitReport::Interrupted { attempts: record.attempts });
                        }
                        _ = async {
                            tokio::time::sleep(delay).await;
                            self.limiter.acquire(record.provider, record.estimated_tokens).await
                        } => {}
                    }
                    record.begin_attempt()?
                }
                DispatchState::Succeeded | DispatchState::Failed => {
                    let result = last.take().ok_or_else(|| {
                        AnyLlmError::Internal(format!("record {} finished without a call", record.index))
                    })?;
                    return self.finish(&record, result);
                }
            };
        }
    }

    /// Append the record's single outcome.
    fn finish(
        &self,
        record: &RequestRecord,
        result: std::result::Result<ChatResponse, ProviderError>,
    ) -> Result<UnitReport> {
        match result {
            Ok(response) => {
                let outcome = OutcomeRecord::succeeded(record, response_payload(response), &self.run_id);
                self.ledger.append_outcome(&outcome)?;
                Ok(UnitReport::Succeeded {
                    attempts: record.attempts,
                })
            }
            Err(e) => {
                warn!(
                    index = record.index,
                    attempts = record.attempts,
                    error = %e,
                    "Record failed"
                );
                let outcome = OutcomeRecord::failed(record, e.to_string(), &self.run_id);
                self.ledger.append_outcome(&outcome)?;
                Ok(UnitReport::Failed {
                    attempts: record.attempts,
                })
            }
        }
    }
}

/// A record's place in its provider's grant queue.
///
/// Records of one provider take grants in file order; `after` resolves
/// when the previous record of the same provider has taken its grant.
struct Turn {
    after: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
}

/// Outcome payload of a successful call.
fn response_payload(response: ChatResponse) -> serde_json::Value {
    json!({
        "content": response.content,
        "model": response.model,
        "usage": {
            "input_tokens": response.input_tokens,
            "output_tokens": response.output_tokens,
        },
        "raw": response.raw,
    })
}

/// Fold a finished task into the run statistics.
fn tally(
    joined: std::result::Result<Result<UnitReport>, JoinError>,
    stats: &mut RunStats,
    fatal: &mut Option<AnyLlmError>,
    cancel: &CancellationToken,
    pb: &ProgressBar,
) {
    match joined {
        Ok(Ok(report)) => {
            let attempts = match report {
                UnitReport::Succeeded { attempts } => {
                    stats.succeeded += 1;
                    attempts
                }
                UnitReport::Failed { attempts } => {
                    stats.failed += 1;
                    attempts
                }
                UnitReport::Interrupted { attempts } => {
                    stats.interrupted += 1;
                    attempts
                }
            };
            stats.total_attempts += attempts as u64;
            pb.inc(1);
        }
        Ok(Err(e)) => {
            error!(error = %e, "Dispatch unit aborted");
            cancel.cancel();
            fatal.get_or_insert(e);
        }
        Err(e) => {
            error!(error = %e, "Dispatch task panicked");
            cancel.cancel();
            fatal.get_or_insert(AnyLlmError::Internal(format!("dispatch task failed: {e}")));
        }
    }
}

/// Concurrent, rate-limited, resumable dispatcher.
///
/// A dispatcher is single-use once cancelled: its token stays cancelled.
pub struct BatchDispatcher {
    clients: Arc<dyn ClientSource>,
    limiter: Arc<RateLimiter>,
    settings: DispatchSettings,
    cancel: CancellationToken,
    run_id: String,
}

impl BatchDispatcher {
    pub fn new(clients: Arc<dyn ClientSource>, limiter: Arc<RateLimiter>, settings: DispatchSettings) -> Self {
        Self {
            clients,
            limiter,
            settings,
            cancel: CancellationToken::new(),
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Dispatcher for one provider/model invocation.
    ///
    /// Builds the invocation's client up front, so an unknown or unsupported
    /// provider or a missing credential fails here rather than per record.
    pub fn for_invocation(
        config: &Config,
        credentials: Arc<dyn CredentialSource>,
        provider: Provider,
        model: &str,
    ) -> Result<Self> {
        config.validate()?;
        let factory = ClientFactory::new(config.clone(), credentials);
        factory.build_client(provider, model, true, None)?;
        let limiter = RateLimiter::from_config(config)?;

        Ok(Self::new(
            Arc::new(factory),
            Arc::new(limiter),
            DispatchSettings::from_config(config),
        ))
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.settings.resume = resume;
        self
    }

    /// Force one parsing mode on every client instead of the registry default.
    pub fn with_parsing_mode(mut self, mode: Option<ParsingMode>) -> Self {
        self.settings.parsing_mode = mode;
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    }

    /// Dispatch every pending record and append its outcome to `output_path`.
    ///
    /// Returns once every started record is terminal or interrupted.
    pub async fn run(&self, pending: &PendingLedger, output_path: &Path) -> Result<RunStats> {
        let start = Instant::now();
        let ledger = Arc::new(OutcomeLedger::new(output_path));
        let completed: HashSet<usize> = if self.settings.resume {
            ledger.completed_indices()?
        } else {
            HashSet::new()
        };

        info!(
            run_id = %self.run_id,
            input = %pending.path().display(),
            output = %output_path.display(),
            concurrency = self.settings.concurrency,
            already_done = completed.len(),
            "Starting dispatch"
        );

        let pb = self.progress_bar();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let unit = Arc::new(DispatchUnit {
            clients: Arc::clone(&self.clients),
            limiter: Arc::clone(&self.limiter),
            ledger,
            retry: self.settings.retry,
            timeout: self.settings.request_timeout,
            mode: self.settings.parsing_mode,
            run_id: self.run_id.clone(),
            cancel: self.cancel.clone(),
        });

        let mut tasks: JoinSet<Result<UnitReport>> = JoinSet::new();
        let mut stats = RunStats::default();
        let mut fatal: Option<AnyLlmError> = None;
        let mut lanes: HashMap<Provider, oneshot::Receiver<()>> = HashMap::new();

        for item in pending.records()? {
            while let Some(joined) = tasks.try_join_next() {
                tally(joined, &mut stats, &mut fatal, &self.cancel, &pb);
            }
            if self.cancel.is_cancelled() {
                break;
            }

            let record = match item {
                Ok(record) => record,
                Err(AnyLlmError::MalformedRecord { line, message }) => {
                    warn!(line = line, error = %message, "Skipping malformed record");
                    stats.malformed.push(MalformedLine { line, message });
                    continue;
                }
                Err(e) => {
                    self.cancel.cancel();
                    fatal.get_or_insert(e);
                    break;
                }
            };

            stats.total_records += 1;
            if completed.contains(&record.index) {
                stats.skipped += 1;
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stats.interrupted += 1;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        fatal.get_or_insert(AnyLlmError::Internal("Semaphore closed".to_string()));
                        break;
                    }
                },
            };

            // Queue behind the previous record of the same provider only.
            let (done, next) = oneshot::channel();
            let turn = Turn {
                after: lanes.insert(record.provider, next),
                done,
            };

            pb.inc_length(1);
            let unit = Arc::clone(&unit);
            tasks.spawn(async move {
                let _permit = permit;
                unit.drive(record, turn).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            tally(joined, &mut stats, &mut fatal, &self.cancel, &pb);
        }
        pb.finish_with_message("done");

        stats.runtime_secs = start.elapsed().as_secs_f64();
        stats.finalize();

        info!(
            run_id = %self.run_id,
            records = stats.total_records,
            succeeded = stats.succeeded,
            failed = stats.failed,
            malformed = stats.malformed.len(),
            skipped = stats.skipped,
            interrupted = stats.interrupted,
            attempts = stats.total_attempts,
            "Dispatch finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

/// Dispatch a pending file against one provider and model.
///
/// Credentials come from the environment. Records may override provider,
/// model and attempt ceiling per line.
pub async fn dispatch_file(
    config: &Config,
    input: &Path,
    output: &Path,
    provider: &str,
    model: &str,
    max_attempts: u32,
) -> Result<RunStats> {
    if max_attempts == 0 {
        return Err(ConfigError::InvalidValue("max_attempts must be at least 1".to_string()).into());
    }
    let provider: Provider = provider.parse()?;
    let dispatcher = BatchDispatcher::for_invocation(config, Arc::new(EnvCredentials), provider, model)?;

    let pending = PendingLedger::new(
        input,
        RecordDefaults {
            provider,
            model: model.to_string(),
            max_attempts,
            default_token_estimate: config.dispatch.default_token_estimate,
        },
    );
    dispatcher.run(&pending, output).await
}
