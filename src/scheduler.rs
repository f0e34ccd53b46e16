//! Request scheduler: the single owner of pipeline state.
//! Consumes clipboard candidates and user intents from one channel, debounces
//! bursts, throttles dispatch rate, short-circuits through the cache and keeps
//! at most one translation in flight. Results go out on the presentation queue.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as cb;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cancellation::{TaskGeneration, TimerSlot};
use crate::clipboard::Clipboard;
use crate::config::PipelineConfig;
use crate::metrics::{metric_names, MetricsRegistry, RequestIds};
use crate::monitor::{ClipboardSnapshot, MonitorGate};
use crate::supervisor::{ServiceError, ServiceState, ServiceSupervisor};
use crate::translate::cache::TranslationCache;
use crate::translate::retry::RetryPolicy;
use crate::translate::{translate_with_retry, TranslateError, Translator};

/// Everything the scheduler reacts to.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Changed, non-native clipboard text from the monitor.
    Candidate(ClipboardSnapshot),

    // User intents
    Start,
    Stop,
    Toggle,
    SetModel(String),
    RefreshModels,
    RecheckService,
    CopyResult(String),
    Shutdown,

    // Internal completions
    TimerFired(u64),
    TranslationDone {
        ids: RequestIds,
        text: String,
        model: String,
        observed_at: Instant,
        result: Result<String, TranslateError>,
    },
    ServiceChecked(Result<(), ServiceError>),
    ModelsListed(Result<Vec<String>, ServiceError>),
}

/// What the presentation layer gets to show.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    Translation {
        original: String,
        translated: String,
        cached: bool,
    },
    TranslationFailed {
        text: String,
        error: String,
    },
    ServiceStatus(ServiceState),
    ServiceProblem(String),
    ModelsLoaded {
        models: Vec<String>,
        selected: Option<String>,
    },
    ModelChanged(String),
    MonitoringChanged(bool),
    Copied,
}

/// Monitoring flag, selected model and the cache tied to that model.
pub struct PipelineState {
    running: bool,
    model: Option<String>,
    cache: TranslationCache,
}

impl PipelineState {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            running: false,
            model: None,
            cache: TranslationCache::new(cache_capacity),
        }
    }

    /// Returns false if already running.
    pub fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.running, true)
    }

    /// Returns false if already stopped.
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    /// Select `model`. A different model invalidates every cached translation.
    pub fn set_model(&mut self, model: String) -> bool {
        if self.model.as_deref() == Some(model.as_str()) {
            return false;
        }
        self.cache.clear();
        self.model = Some(model);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TranslationCache {
        &mut self.cache
    }

    fn gate(&self) -> MonitorGate {
        MonitorGate {
            running: self.running,
            model_selected: self.model.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Debounce,
    Throttle,
}

/// The one text waiting on the timer.
#[derive(Debug)]
struct PendingRequest {
    text: String,
    observed_at: Instant,
    deadline: Instant,
    stage: Stage,
}

/// Cloneable entry point for feeding the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<PipelineEvent>,
    gate: watch::Receiver<MonitorGate>,
}

impl SchedulerHandle {
    /// False once the scheduler has exited.
    pub fn send(&self, event: PipelineEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<PipelineEvent> {
        self.tx.clone()
    }

    pub fn gate(&self) -> watch::Receiver<MonitorGate> {
        self.gate.clone()
    }
}

pub struct RequestScheduler {
    debounce: Duration,
    throttle: Duration,
    call_retry: RetryPolicy,
    preferred_model: Option<String>,
    autostart: bool,

    state: PipelineState,
    translator: Arc<dyn Translator>,
    supervisor: Arc<ServiceSupervisor>,
    clipboard: Arc<dyn Clipboard>,
    metrics: Arc<MetricsRegistry>,
    presenter: cb::Sender<PresentationEvent>,

    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
    gate_tx: watch::Sender<MonitorGate>,

    timer: TimerSlot,
    pending: Option<PendingRequest>,
    /// Due for dispatch but blocked by an in-flight call or a down service.
    held: Option<(String, Instant)>,
    in_flight: Option<RequestIds>,
    /// Advanced on stop and model change; older results are dropped.
    dispatch_gen: TaskGeneration,
    last_dispatch: Option<Instant>,
    checking_service: bool,
}

impl RequestScheduler {
    pub fn new(
        config: &PipelineConfig,
        translator: Arc<dyn Translator>,
        supervisor: Arc<ServiceSupervisor>,
        clipboard: Arc<dyn Clipboard>,
        metrics: Arc<MetricsRegistry>,
        presenter: cb::Sender<PresentationEvent>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (gate_tx, _) = watch::channel(MonitorGate::default());

        Self {
            debounce: config.debounce,
            throttle: config.throttle,
            call_retry: config.call_retry,
            preferred_model: config.preferred_model.clone(),
            autostart: config.autostart,
            state: PipelineState::new(config.cache_capacity),
            translator,
            supervisor,
            clipboard,
            metrics,
            presenter,
            events_tx,
            events_rx: Some(events_rx),
            gate_tx,
            timer: TimerSlot::new(),
            pending: None,
            held: None,
            in_flight: None,
            dispatch_gen: TaskGeneration::new(),
            last_dispatch: None,
            checking_service: false,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.events_tx.clone(),
            gate: self.gate_tx.subscribe(),
        }
    }

    /// Event loop. Checks the backend first, then processes events until `Shutdown`.
    pub async fn run(mut self) {
        let Some(mut rx) = self.events_rx.take() else {
            error!("scheduler event receiver missing");
            return;
        };

        info!("request scheduler started");
        self.request_service_check();
        if self.autostart {
            self.start();
        }

        while let Some(event) = rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.timer.cancel();
        self.dispatch_gen.cancel_and_advance();
        info!("request scheduler exiting");
    }

    fn handle_event(&mut self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::Candidate(snapshot) => self.on_candidate(snapshot),
            PipelineEvent::Start => self.start(),
            PipelineEvent::Stop => self.stop(),
            PipelineEvent::Toggle => {
                if self.state.is_running() {
                    self.stop()
                } else {
                    self.start()
                }
            }
            PipelineEvent::SetModel(model) => self.set_model(model),
            PipelineEvent::RefreshModels => {
                if self.supervisor.state() == ServiceState::Up {
                    self.request_model_list();
                } else {
                    self.request_service_check();
                }
            }
            PipelineEvent::RecheckService => self.request_service_check(),
            PipelineEvent::CopyResult(text) => self.copy_result(text),
            PipelineEvent::Shutdown => return false,
            PipelineEvent::TimerFired(generation) => self.on_timer(generation),
            PipelineEvent::TranslationDone {
                ids,
                text,
                model,
                observed_at,
                result,
            } => self.on_translation_done(ids, text, model, observed_at, result),
            PipelineEvent::ServiceChecked(result) => self.on_service_checked(result),
            PipelineEvent::ModelsListed(result) => self.on_models_listed(result),
        }
        true
    }

    fn present(&self, event: PresentationEvent) {
        let _ = self.presenter.send(event);
    }

    fn publish_gate(&self) {
        self.gate_tx.send_replace(self.state.gate());
    }

    // --- lifecycle ---

    fn start(&mut self) {
        if !self.state.start() {
            return;
        }
        info!(model = ?self.state.model(), "monitoring started");
        self.publish_gate();
        self.present(PresentationEvent::MonitoringChanged(true));
        if self.supervisor.state() != ServiceState::Up {
            self.request_service_check();
        }
    }

    fn stop(&mut self) {
        if !self.state.stop() {
            return;
        }
        self.timer.cancel();
        self.pending = None;
        self.held = None;
        // Aborts a retry backoff; a call on the wire completes and is discarded.
        self.dispatch_gen.cancel_and_advance();
        info!("monitoring stopped");
        self.publish_gate();
        self.present(PresentationEvent::MonitoringChanged(false));
    }

    fn set_model(&mut self, model: String) {
        let model = model.trim().to_string();
        if model.is_empty() {
            warn!("ignoring empty model selection");
            return;
        }
        if !self.state.set_model(model.clone()) {
            return;
        }
        self.dispatch_gen.cancel_and_advance();
        info!(model = %model, "model selected, cache cleared");
        self.publish_gate();
        self.present(PresentationEvent::ModelChanged(model));
    }

    // --- debounce / throttle ---

    fn on_candidate(&mut self, snapshot: ClipboardSnapshot) {
        if !self.state.is_running() {
            debug!("candidate while stopped, dropped");
            return;
        }
        let deadline = Instant::now() + self.debounce;
        let tx = self.events_tx.clone();
        self.timer.arm(self.debounce, tx, PipelineEvent::TimerFired);
        self.held = None;
        self.pending = Some(PendingRequest {
            text: snapshot.text,
            observed_at: snapshot.observed_at,
            deadline,
            stage: Stage::Debounce,
        });
    }

    fn on_timer(&mut self, generation: u64) {
        if !self.timer.take_fire(generation) {
            debug!(generation, "stale timer fire ignored");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        debug!(stage = ?pending.stage, late_us = pending.deadline.elapsed().as_micros() as u64, "timer fired");
        match pending.stage {
            Stage::Debounce => self.throttle_then_dispatch(pending.text, pending.observed_at),
            Stage::Throttle => self.dispatch(pending.text, pending.observed_at),
        }
    }

    fn throttle_then_dispatch(&mut self, text: String, observed_at: Instant) {
        let now = Instant::now();
        let elapsed = self.last_dispatch.map(|at| now.saturating_duration_since(at));
        match elapsed {
            Some(elapsed) if elapsed < self.throttle => {
                let remaining = self.throttle - elapsed;
                debug!(remaining_ms = remaining.as_millis() as u64, "throttled");
                let tx = self.events_tx.clone();
                self.timer.arm(remaining, tx, PipelineEvent::TimerFired);
                self.pending = Some(PendingRequest {
                    text,
                    observed_at,
                    deadline: now + remaining,
                    stage: Stage::Throttle,
                });
            }
            _ => self.dispatch(text, observed_at),
        }
    }

    // --- dispatch ---

    fn dispatch(&mut self, text: String, observed_at: Instant) {
        if !self.state.is_running() {
            return;
        }
        if let Some(ids) = &self.in_flight {
            debug!(in_flight = %ids.request_id, "translation in flight, holding latest text");
            self.held = Some((text, observed_at));
            return;
        }
        if self.supervisor.state() != ServiceState::Up {
            info!("backend not up, holding text until recheck");
            self.held = Some((text, observed_at));
            self.request_service_check();
            return;
        }
        let Some(model) = self.state.model().map(str::to_string) else {
            self.present(PresentationEvent::TranslationFailed {
                text,
                error: "no model selected".into(),
            });
            return;
        };

        self.last_dispatch = Some(Instant::now());
        self.metrics.record(
            metric_names::CHANGE_TO_DISPATCH,
            observed_at.elapsed().as_micros() as f64,
        );

        let lookup = std::time::Instant::now();
        if let Some(cached) = self.state.cache().get(&text) {
            let translated = cached.to_string();
            self.metrics
                .record(metric_names::CACHE_HIT, lookup.elapsed().as_micros() as f64);
            debug!(chars = text.chars().count(), "cache hit");
            self.present(PresentationEvent::Translation {
                original: text,
                translated,
                cached: true,
            });
            return;
        }

        let (token, generation) = self.dispatch_gen.child_token();
        let ids = RequestIds::new(generation);
        info!(
            request_id = %ids.request_id,
            model = %model,
            chars = text.chars().count(),
            "dispatching translation"
        );
        self.in_flight = Some(ids.clone());

        let translator = Arc::clone(&self.translator);
        let metrics = Arc::clone(&self.metrics);
        let policy = self.call_retry;
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let span = metrics.span(metric_names::TRANSLATE_DONE);
            let result =
                translate_with_retry(translator.as_ref(), &text, &model, &policy, &token).await;
            span.finish();
            let _ = tx.send(PipelineEvent::TranslationDone {
                ids,
                text,
                model,
                observed_at,
                result,
            });
        });
    }

    fn on_translation_done(
        &mut self,
        ids: RequestIds,
        text: String,
        model: String,
        observed_at: Instant,
        result: Result<String, TranslateError>,
    ) {
        self.in_flight = None;

        let current = self.dispatch_gen.is_current(ids.generation) && self.state.is_running();
        if !current {
            debug!(request_id = %ids.request_id, "stale translation result discarded");
        } else {
            match result {
                Ok(translated) => {
                    info!(
                        request_id = %ids.request_id,
                        model = %model,
                        total_ms = observed_at.elapsed().as_millis() as u64,
                        "translation complete"
                    );
                    self.state.cache_mut().put(text.clone(), translated.clone());
                    self.present(PresentationEvent::Translation {
                        original: text,
                        translated,
                        cached: false,
                    });
                }
                Err(TranslateError::Cancelled) => {
                    debug!(request_id = %ids.request_id, "translation cancelled");
                }
                Err(e) => {
                    warn!(request_id = %ids.request_id, error = %e, "translation failed");
                    self.present(PresentationEvent::TranslationFailed {
                        text,
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Some((text, observed_at)) = self.held.take() {
            self.throttle_then_dispatch(text, observed_at);
        }
    }

    // --- backend ---

    fn request_service_check(&mut self) {
        if self.checking_service {
            return;
        }
        self.checking_service = true;
        let supervisor = Arc::clone(&self.supervisor);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = supervisor.ensure_available().await;
            let _ = tx.send(PipelineEvent::ServiceChecked(result));
        });
    }

    fn request_model_list(&self) {
        let supervisor = Arc::clone(&self.supervisor);
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = supervisor.list_models().await;
            let _ = tx.send(PipelineEvent::ModelsListed(result));
        });
    }

    fn on_service_checked(&mut self, result: Result<(), ServiceError>) {
        self.checking_service = false;
        self.present(PresentationEvent::ServiceStatus(self.supervisor.state()));

        match result {
            Ok(()) => {
                self.request_model_list();
                if let Some((text, observed_at)) = self.held.take() {
                    self.throttle_then_dispatch(text, observed_at);
                }
            }
            Err(e) => {
                warn!(error = %e, "backend check failed");
                self.present(PresentationEvent::ServiceProblem(e.to_string()));
                if let Some((text, _)) = self.held.take() {
                    self.present(PresentationEvent::TranslationFailed {
                        text,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn on_models_listed(&mut self, result: Result<Vec<String>, ServiceError>) {
        let models = match result {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "model listing failed");
                self.present(PresentationEvent::ServiceProblem(e.to_string()));
                return;
            }
        };

        if self.state.model().is_none() {
            let choice = self
                .preferred_model
                .as_ref()
                .filter(|p| models.iter().any(|m| m == *p))
                .or_else(|| models.first())
                .cloned();
            if let Some(model) = choice {
                self.set_model(model);
            } else {
                warn!("backend has no models installed");
            }
        }

        info!(count = models.len(), selected = ?self.state.model(), "models loaded");
        self.present(PresentationEvent::ModelsLoaded {
            models,
            selected: self.state.model().map(str::to_string),
        });
    }

    fn copy_result(&self, text: String) {
        let clipboard = Arc::clone(&self.clipboard);
        let presenter = self.presenter.clone();
        tokio::task::spawn_blocking(move || match clipboard.write(&text) {
            Ok(()) => {
                info!(chars = text.chars().count(), "translation copied to clipboard");
                let _ = presenter.send(PresentationEvent::Copied);
            }
            Err(e) => warn!(error = %e, "copy to clipboard failed"),
        });
    }
}
