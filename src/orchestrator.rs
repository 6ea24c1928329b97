// WipeOrchestrator - lifecycle state machine for a single wipe operation.
//
// PENDING -> AUTHORIZING -> DETECTING_HIDDEN -> [REMOVING_HIDDEN] ->
// ERASING (pass by pass) -> [VERIFYING] -> CERTIFYING -> DONE, with FAILED
// reachable from any non-terminal state and ABORTED only via cancellation
// during ERASING/VERIFYING. Whatever the terminal state, exactly one
// certificate is produced per request; a denied or aborted operation gets a
// certificate saying precisely what did and did not happen.

use crate::cert::{
    Certificate, CertificateBuilder, CertificateDraft, DeviceIdentity, RequestSummary,
};
use crate::dispatch::{EraseDispatcher, OverwriteDispatcher, PassOutcome, PassResult};
use crate::hidden::{HiddenAreaInspector, HiddenAreaReport, SectorCountSource, UnsupportedSectorSource};
use crate::progress::{CancelToken, NullSink, ProgressSink, ProgressUpdate};
use crate::safety::{DecisionRecord, SafetyGuard, SafetyPolicy};
use crate::crypto::Signer;
use crate::verify::{VerdictClass, VerificationEngine, VerificationVerdict, VerifyPolicy};
use crate::{EngineConfig, WipeError, WipeRequest, WipeResult, WipeState};
use lazy_static::lazy_static;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

lazy_static! {
    /// Process-global registry of devices with an operation in flight.
    static ref DEVICE_LOCKS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Exclusive per-device lock, held from PENDING to the terminal state.
struct DeviceLockGuard {
    path: String,
}

impl DeviceLockGuard {
    fn acquire(path: &str) -> WipeResult<Self> {
        let mut locks = DEVICE_LOCKS
            .lock()
            .map_err(|_| WipeError::DeviceBusy("lock registry poisoned".to_string()))?;
        if !locks.insert(path.to_string()) {
            return Err(WipeError::DeviceBusy(format!(
                "another operation is running on {}",
                path
            )));
        }
        Ok(Self {
            path: path.to_string(),
        })
    }
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        if let Ok(mut locks) = DEVICE_LOCKS.lock() {
            locks.remove(&self.path);
        }
    }
}

/// Final product of one orchestrated operation.
#[derive(Debug)]
pub struct WipeReport {
    pub state: WipeState,
    pub certificate: Certificate,
    /// Human-readable detail when the state is Failed or Aborted.
    pub failure: Option<String>,
}

/// Everything collected on the way to the terminal state, waiting to be
/// certified.
struct OperationTrace {
    state: WipeState,
    decision: DecisionRecord,
    hidden_before: Option<HiddenAreaReport>,
    hidden_after: Option<HiddenAreaReport>,
    pass_results: Vec<PassResult>,
    verdict: Option<VerificationVerdict>,
    warnings: Vec<String>,
    failure: Option<String>,
}

impl OperationTrace {
    fn new(decision: DecisionRecord) -> Self {
        Self {
            state: WipeState::Pending,
            decision,
            hidden_before: None,
            hidden_after: None,
            pass_results: Vec::new(),
            verdict: None,
            warnings: Vec::new(),
            failure: None,
        }
    }

    fn fail(&mut self, detail: impl Into<String>) {
        self.state = WipeState::Failed;
        self.failure = Some(detail.into());
    }

    fn abort(&mut self, detail: impl Into<String>) {
        self.state = WipeState::Aborted;
        self.failure = Some(detail.into());
    }
}

pub struct WipeOrchestrator {
    dispatcher: Arc<dyn EraseDispatcher>,
    inspector: HiddenAreaInspector,
    guard: SafetyGuard,
    builder: CertificateBuilder,
    config: EngineConfig,
    sink: Arc<dyn ProgressSink>,
}

impl WipeOrchestrator {
    pub fn new(
        dispatcher: Arc<dyn EraseDispatcher>,
        sector_source: Arc<dyn SectorCountSource>,
        safety_policy: SafetyPolicy,
        signer: Signer,
        config: EngineConfig,
    ) -> Self {
        Self {
            dispatcher,
            inspector: HiddenAreaInspector::new(sector_source),
            guard: SafetyGuard::new(safety_policy),
            builder: CertificateBuilder::new(signer),
            config,
            sink: Arc::new(NullSink),
        }
    }

    /// Default wiring: software overwrite dispatcher, no platform
    /// hidden-area binding, fresh HMAC signing secret.
    pub fn with_defaults(config: EngineConfig) -> WipeResult<Self> {
        Ok(Self::new(
            Arc::new(OverwriteDispatcher::new(config.clone())),
            Arc::new(UnsupportedSectorSource),
            SafetyPolicy::default(),
            Signer::generate_hmac()?,
            config,
        ))
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    fn publish(&self, phase: WipeState) {
        self.sink.publish(ProgressUpdate::phase_only(phase));
    }

    /// Run one request to a terminal state and certify it.
    ///
    /// Returns `Err` only when no lifecycle ran (the device is locked by a
    /// concurrent operation) or when certificate signing itself failed; every
    /// other outcome, including denial, failure and cancellation, is reported
    /// through the certificate.
    pub async fn run(
        &self,
        request: WipeRequest,
        cancel: CancelToken,
        prior_certificate_hash: Option<String>,
    ) -> WipeResult<WipeReport> {
        let _lock = DeviceLockGuard::acquire(&request.device.path)?;
        self.publish(WipeState::Pending);
        info!(
            "wipe operation starting: {} via {} ({} pass(es))",
            request.device.path, request.method, request.passes
        );

        let trace = self.execute_lifecycle(&request, &cancel).await;

        self.publish(WipeState::Certifying);
        let draft = CertificateDraft {
            request: RequestSummary::from_request(&request),
            device: DeviceIdentity::from_device(&request.device),
            safety_decision: trace.decision.clone(),
            hidden_before: trace.hidden_before.clone(),
            hidden_after: trace.hidden_after.clone(),
            pass_results: trace.pass_results.clone(),
            verdict: trace.verdict.clone(),
            state: trace.state,
            warnings: trace.warnings.clone(),
            prior_certificate_hash,
        };
        let certificate = self.builder.build(draft).map_err(|e| {
            // The outcome cannot be persisted as a trusted record; surface it
            // loudly rather than pretending the operation never happened
            error!(
                "operation on {} reached {:?} but cannot be certified: {}",
                request.device.path, trace.state, e
            );
            e
        })?;

        self.publish(trace.state);
        info!(
            "wipe operation finished: {} -> {:?} (certificate {})",
            request.device.path, trace.state, certificate.certificate_id
        );
        Ok(WipeReport {
            state: trace.state,
            certificate,
            failure: trace.failure,
        })
    }

    async fn execute_lifecycle(&self, request: &WipeRequest, cancel: &CancelToken) -> OperationTrace {
        // AUTHORIZING
        self.publish(WipeState::Authorizing);
        let classification = self.guard.classify(&request.device);
        let decision = self.guard.authorize(request, classification);
        let mut trace = OperationTrace::new(decision);
        if let Err(e) = trace.decision.as_result() {
            trace.fail(e.to_string());
            return trace;
        }
        if let Err(e) = request.device.revalidate() {
            trace.fail(e.to_string());
            return trace;
        }

        // DETECTING_HIDDEN
        self.publish(WipeState::DetectingHidden);
        match self.inspector.detect(&request.device) {
            Ok(report) => trace.hidden_before = Some(report),
            Err(e) if request.require_hidden_clearance => {
                trace.fail(format!("hidden-area clearance required: {}", e));
                return trace;
            }
            Err(e) => {
                // Unknown, not absent
                warn!("hidden-area state unknown for {}: {}", request.device.path, e);
                trace
                    .warnings
                    .push(format!("hidden-area state unknown: {}", e));
            }
        }

        // REMOVING_HIDDEN (optional)
        if request.remove_hidden_areas {
            if let Some(before) = trace.hidden_before.clone() {
                if before.hpa_present() || before.dco_present() {
                    self.publish(WipeState::RemovingHidden);
                    if let Err(e) = request.device.revalidate() {
                        trace.fail(e.to_string());
                        return trace;
                    }
                    match self.remove_hidden(request, &before) {
                        Ok(after) => trace.hidden_after = Some(after),
                        Err(e) if request.require_hidden_clearance => {
                            trace.fail(e.to_string());
                            return trace;
                        }
                        Err(e) => {
                            warn!("proceeding despite {}", e);
                            trace.warnings.push(e.to_string());
                        }
                    }
                } else {
                    trace.hidden_after = Some(before);
                }
            }
        } else {
            trace.hidden_after = trace.hidden_before.clone();
        }

        // ERASING
        let plan = match self.dispatcher.plan(request, &request.device) {
            Ok(plan) => plan,
            Err(e) => {
                trace.fail(e.to_string());
                return trace;
            }
        };
        self.publish(WipeState::Erasing);
        for spec in &plan.passes {
            if cancel.is_cancelled() {
                trace.abort(format!("cancelled before pass {}", spec.index + 1));
                return trace;
            }
            if let Err(e) = request.device.revalidate() {
                trace.fail(e.to_string());
                return trace;
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let sink = Arc::clone(&self.sink);
            let worker_spec = spec.clone();
            let worker_plan = plan.clone();
            let worker_device = request.device.clone();
            let worker_cancel = cancel.clone();
            let handle = tokio::task::spawn_blocking(move || {
                dispatcher.execute(
                    &worker_spec,
                    &worker_plan,
                    &worker_device,
                    sink.as_ref(),
                    &worker_cancel,
                )
            });

            let timeout = Duration::from_secs(self.config.pass_timeout_secs);
            let result = match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    PassResult::failed(spec, format!("erase worker panicked: {}", join_err))
                }
                Err(_) => {
                    // Trip the shared token so the abandoned worker stops
                    // writing at its next checkpoint instead of racing any
                    // later operation on this device. An unresponsive device
                    // halts even a best-effort wipe.
                    cancel.request_cancel();
                    let detail = format!("timed out after {}s", self.config.pass_timeout_secs);
                    trace.pass_results.push(PassResult::failed(spec, detail.clone()));
                    trace.fail(format!("pass {} {}", spec.index + 1, detail));
                    return trace;
                }
            };

            let outcome = result.outcome;
            let detail = result.error.clone();
            trace.pass_results.push(result);

            match outcome {
                PassOutcome::Success => {}
                PassOutcome::Partial => {
                    trace.abort(detail.unwrap_or_else(|| "cancelled mid-pass".to_string()));
                    return trace;
                }
                PassOutcome::Failed => {
                    let detail =
                        detail.unwrap_or_else(|| format!("pass {} failed", spec.index + 1));
                    if request.tolerate_pass_failure {
                        // Explicit best-effort opt-in; the certificate still
                        // shows the failed pass
                        warn!("continuing past failed pass {}: {}", spec.index + 1, detail);
                        trace
                            .warnings
                            .push(format!("pass {} failed: {}", spec.index + 1, detail));
                    } else {
                        trace.fail(detail);
                        return trace;
                    }
                }
            }
        }

        // VERIFYING (optional)
        if request.verify {
            if cancel.is_cancelled() {
                trace.abort("cancelled before verification".to_string());
                return trace;
            }
            self.publish(WipeState::Verifying);

            let written_extent = trace
                .pass_results
                .iter()
                .map(|p| p.bytes_written)
                .min()
                .unwrap_or(0);
            let policy = VerifyPolicy::for_method(request.method)
                .with_prewipe_digests(request.prewipe_digests.clone());
            let placeholder_policy = policy.clone();
            let engine = VerificationEngine::new(policy);
            let device = request.device.clone();

            let handle =
                tokio::task::spawn_blocking(move || engine.verify(&device, written_extent));
            let timeout = Duration::from_secs(self.config.pass_timeout_secs);
            let verdict = match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(Ok(verdict))) => verdict,
                Ok(Ok(Err(WipeError::VerificationInconclusive(msg)))) => {
                    warn!("verification inconclusive: {}", msg);
                    trace
                        .warnings
                        .push(format!("verification inconclusive: {}", msg));
                    VerificationVerdict::inconclusive(&placeholder_policy)
                }
                Ok(Ok(Err(e))) => {
                    trace.fail(format!("verification error: {}", e));
                    return trace;
                }
                Ok(Err(join_err)) => {
                    trace.fail(format!("verification worker panicked: {}", join_err));
                    return trace;
                }
                Err(_) => {
                    trace.fail(format!(
                        "verification timed out after {}s",
                        self.config.pass_timeout_secs
                    ));
                    return trace;
                }
            };

            if cancel.is_cancelled() {
                // Cancellation raced the sampling; the aborted certificate
                // must not claim verified erasure
                trace.abort("cancelled during verification".to_string());
                return trace;
            }

            match verdict.classification {
                VerdictClass::Fail => {
                    trace.verdict = Some(verdict);
                    trace.fail("verification failed: residual patterns detected".to_string());
                    return trace;
                }
                VerdictClass::Suspect => {
                    trace
                        .warnings
                        .push("verification verdict is SUSPECT".to_string());
                    trace.verdict = Some(verdict);
                }
                VerdictClass::Pass => trace.verdict = Some(verdict),
            }
        }

        trace.state = WipeState::Done;
        trace
    }

    fn remove_hidden(
        &self,
        request: &WipeRequest,
        before: &HiddenAreaReport,
    ) -> WipeResult<HiddenAreaReport> {
        let mut current = before.clone();
        if current.hpa_present() {
            current = self.inspector.remove_hpa(&request.device, &current)?;
        }
        if current.dco_present() {
            if request.allow_dco_removal {
                current =
                    self.inspector
                        .remove_dco(&request.device, &current, request.allow_dco_removal)?;
            } else {
                return Err(WipeError::RemovalFailed(
                    "DCO present but removal was not explicitly forced".to_string(),
                ));
            }
        }
        Ok(current)
    }
}

/// Convenience wrapper: default wiring, no cancellation, no chain.
pub async fn wipe_device(request: WipeRequest) -> WipeResult<WipeReport> {
    let orchestrator = WipeOrchestrator::with_defaults(EngineConfig::default())?;
    orchestrator.run(request, CancelToken::new(), None).await
}
