use crate::config::{EngineConfig, NON_INTERFERENCE_ACTION_ID};
use crate::error::{ServiceError, ServiceResult};
use crate::keys;
use crate::remediation::{dedup, minimal_fix};
use crate::requests::{
    cited_ids, Caller, DecideRequest, NonInterferenceRequest, PromoteRequest, PromotionCandidate,
};
use crate::responses::{
    CanonStoreView, CanonVersionView, DecideProof, DecideResponse, DenialBody, LedgerView,
    NonInterferenceProof, NonInterferenceResponse, PromoteProof, PromoteResponse, RecentView,
    Reply, Verdict, VerifyView, WhyNotView,
};
use canon_gate::{gate_invariants, InvariantContext, INV_PROMOTION_GATE};
use canon_interference::{forecast_deltas, gate_non_interference, ContentionEstimator, TtvEstimator};
use canon_ledger::{
    EventDraft, HashChainLedger, IdempotencyCache, IdempotencyKind, LedgerEventType,
    DEFAULT_IDEMPOTENCY_TTL,
};
use canon_optr::{
    gate_authority_boundary, gate_missing_prereqs, resolve, OptrRequest, SuppliedFeatures,
};
use canon_promotion::{promotion_gate, validate_promotion_path, PromotionError};
use canon_store::{CanonStore, CanonStoreResult};
use canon_types::{
    canonical_hash, sha256_hex, Action, CandidatePath, CanonBody, CanonItem, CanonKind, CanonLevel,
    CanonSnapshot, Clock, DenialReasonCode, PromotionTest, PromotionTests, Provenance, Severity,
    SystemClock, TenantId, WhyNotTrace,
};
use canon_whynot::{
    create_denied_decision_proof, format_why_not_panel, merge_traces,
    verify_denied_decision_proof, DenialKind, DenialRecord,
};
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where one decision is recorded.
struct DecisionScope<'a> {
    ts: DateTime<Utc>,
    tenant: &'a TenantId,
    /// Action id under which ledger events are written.
    ledger_action_id: String,
    stable_key: &'a str,
    pointer: String,
}

impl DecisionScope<'_> {
    fn draft(
        &self,
        event_type: LedgerEventType,
        decision_id: Option<String>,
        payload: Value,
    ) -> EventDraft {
        EventDraft {
            ts: self.ts,
            tenant_id: self.tenant.clone(),
            action_id: self.ledger_action_id.clone(),
            stable_key: self.stable_key.to_string(),
            pointer: self.pointer.clone(),
            event_type,
            decision_id,
            payload,
        }
    }
}

/// The decision API: every decision is gated against one canon snapshot,
/// chained into the ledger, and cached for idempotent replay.
pub struct DecisionService {
    canon: Arc<dyn CanonStore>,
    ledger: Arc<HashChainLedger>,
    idempotency: IdempotencyCache,
    estimator: Arc<dyn TtvEstimator>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl DecisionService {
    pub fn new(canon: Arc<dyn CanonStore>, ledger: Arc<HashChainLedger>, config: EngineConfig) -> Self {
        let idempotency = IdempotencyCache::new(
            ledger.fast_store().clone(),
            ledger.keys().clone(),
            DEFAULT_IDEMPOTENCY_TTL,
            ledger.config().store_timeout,
        );
        Self {
            canon,
            ledger,
            idempotency,
            estimator: Arc::new(ContentionEstimator::default()),
            clock: Arc::new(SystemClock),
            config,
            inflight: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TtvEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency = IdempotencyCache::new(
            self.ledger.fast_store().clone(),
            self.ledger.keys().clone(),
            ttl,
            self.ledger.config().store_timeout,
        );
        self
    }

    pub fn ledger(&self) -> &Arc<HashChainLedger> {
        &self.ledger
    }

    pub fn canon(&self) -> &Arc<dyn CanonStore> {
        &self.canon
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ============ Decide ============

    /// Decide whether an action may run under the current canon.
    ///
    /// `idempotency_key` (usually from a header) takes precedence over the
    /// body's `idempotencyKey`.
    pub async fn decide(
        &self,
        caller: &Caller,
        request: DecideRequest,
        idempotency_key: Option<&str>,
    ) -> ServiceResult<Reply<DecideResponse>> {
        request.validate()?;
        let tenant = caller.tenant_for(request.context.as_ref())?;
        let idem = idempotency_key.or(request.idempotency_key.as_deref());
        let stable_key = keys::decide_key(&tenant, &request, idem)?;

        self.single_flight(&tenant, IdempotencyKind::Decide, &stable_key, || {
            self.run_decide(&tenant, &request, &stable_key)
        })
        .await
    }

    async fn run_decide(
        &self,
        tenant: &TenantId,
        request: &DecideRequest,
        stable_key: &str,
    ) -> ServiceResult<DecideResponse> {
        let scope = DecisionScope {
            ts: self.clock.now(),
            tenant,
            ledger_action_id: request.action_id.clone(),
            stable_key,
            pointer: keys::ledger_pointer(stable_key),
        };
        let ts = scope.ts;

        // Step 1: Record the request before any gate runs
        self.record_requested(&scope, DenialKind::Decide, canonical_hash(request)?)
            .await?;

        // Step 2: One snapshot for every gate in this request
        let snapshot = self.snapshot().await?;
        let present = snapshot.authoritative_ids();
        let cited = cited_ids(&request.canon_refs);
        let required = self.config.required_canon_for(&request.action_id);

        let direct = Action::new(&request.action_id, &request.intent.proposed_action)
            .with_description(request.intent.objective.clone())
            .with_prerequisites(required.iter().cloned())
            .with_risk(request.risk_level.unwrap_or_default());

        // Step 3: Invariant gate, the cheap rejection
        let ctx = InvariantContext::default()
            .with_action(&direct)
            .with_canon_ids(&present);
        if let Some(trace) = gate_invariants(ts, &request.action_id, snapshot.invariants(), &ctx) {
            return self
                .deny_decision(&scope, &request.action_id, trace)
                .await;
        }

        // Step 4: OPTR over the supplied paths, or the action alone
        let candidates = match &request.candidates {
            Some(paths) => paths
                .iter()
                .cloned()
                .map(|path| require_on_every_action(path, &required))
                .collect(),
            None => vec![CandidatePath::new(request.action_id.clone(), vec![direct])],
        };
        let features = SuppliedFeatures::new(request.features.clone().unwrap_or_default());
        let run = resolve(
            OptrRequest {
                ts,
                tenant_id: tenant.clone(),
                goal: request.intent.objective.clone(),
                candidates,
                canon_refs_used: cited.clone(),
                canon_ids_present: present,
                weights: self.config.weights,
                bounds: self.config.bounds,
            },
            &snapshot,
            &features,
        )?;

        // Step 5: Allow the admitted path, otherwise explain the least-bad one
        let Some(admitted) = run.admitted() else {
            let traces = run
                .selected()
                .map(|s| s.denials.clone())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| run.deny_traces.clone());
            let trace = merge_traces(traces).unwrap_or_else(|| {
                WhyNotTrace::new(
                    ts,
                    &request.action_id,
                    DenialReasonCode::CostBoundExceeded,
                    "Denied: no candidate path has a finite score",
                )
            });
            return self
                .deny_decision(&scope, &request.action_id, trace)
                .await;
        };

        let decision_id = keys::decision_id(stable_key, true);
        let response = DecideResponse {
            decision: Verdict::Allow,
            decision_id: decision_id.clone(),
            ts,
            action_id: request.action_id.clone(),
            proof: Some(DecideProof {
                canon_version: snapshot.version_label(),
                evaluated_refs: cited.into_iter().collect(),
                ledger_pointer: scope.pointer.clone(),
                selected_path_id: admitted.candidate.id.clone(),
                score: admitted.score,
            }),
            denial_trace: None,
        };

        // Step 6: Chain the outcome
        self.ledger
            .append(&scope.draft(
                LedgerEventType::DecisionAllowed,
                Some(decision_id),
                json!({ "kind": DenialKind::Decide, "response": response }),
            ))
            .await?;
        info!(
            tenant_id = %tenant,
            action_id = %request.action_id,
            pointer = %scope.pointer,
            selected = %admitted.candidate.id,
            "Decision allowed"
        );
        Ok(response)
    }

    async fn deny_decision(
        &self,
        scope: &DecisionScope<'_>,
        action_id: &str,
        trace: WhyNotTrace,
    ) -> ServiceResult<DecideResponse> {
        let decision_id = keys::decision_id(scope.stable_key, false);
        let body = denial_body(scope.stable_key, trace, Vec::new(), Vec::new());
        let response = DecideResponse {
            decision: Verdict::Deny,
            decision_id: decision_id.clone(),
            ts: scope.ts,
            action_id: action_id.to_string(),
            proof: None,
            denial_trace: Some(body.clone()),
        };
        self.record_denial(scope, DenialKind::Decide, action_id, decision_id, &body)
            .await?;
        Ok(response)
    }

    // ============ Promote ============

    /// Move a knowledge item up one canon level through the four-test gate.
    pub async fn promote(
        &self,
        caller: &Caller,
        request: PromoteRequest,
        idempotency_key: Option<&str>,
    ) -> ServiceResult<Reply<PromoteResponse>> {
        request.validate()?;
        let tenant = caller.tenant_for(request.context.as_ref())?;
        let idem = idempotency_key.or(request.idempotency_key.as_deref());
        let stable_key = keys::promote_key(&tenant, &request, idem)?;

        self.single_flight(&tenant, IdempotencyKind::Promote, &stable_key, || {
            self.run_promote(&tenant, &request, &stable_key)
        })
        .await
    }

    async fn run_promote(
        &self,
        tenant: &TenantId,
        request: &PromoteRequest,
        stable_key: &str,
    ) -> ServiceResult<PromoteResponse> {
        let candidate = &request.candidate;
        let ts = self.clock.now();

        // Step 1: Resolve the stored level; new candidates enter as EVIDENCE
        let existing = self.bounded_canon("get", self.canon.get(&candidate.id)).await?;
        if let Some(item) = &existing {
            if item.kind() != candidate.kind {
                return Err(ServiceError::Validation(format!(
                    "canon item {} is {:?}, not {:?}",
                    item.id,
                    item.kind(),
                    candidate.kind
                )));
            }
        }
        let from = existing.as_ref().map_or(CanonLevel::Evidence, |i| i.level);
        if let Some(declared) = candidate.from {
            if declared != from {
                return Err(ServiceError::Validation(format!(
                    "canon item {} is at {from}, not {declared}",
                    candidate.id
                )));
            }
        }
        let to = from
            .next()
            .ok_or_else(|| PromotionError::AlreadyCanon(candidate.id.clone()))?;
        if let Some(declared) = candidate.to {
            validate_promotion_path(from, declared)?;
        }

        let scope = DecisionScope {
            ts,
            tenant,
            ledger_action_id: format!("PROMOTE/{}", candidate.id),
            stable_key,
            pointer: keys::ledger_pointer(stable_key),
        };

        // Step 2: Record the request
        self.record_requested(&scope, DenialKind::Promote, canonical_hash(request)?)
            .await?;

        // Step 3: Admit new knowledge as evidence
        let item = match existing {
            Some(item) => item,
            None => {
                let item = evidence_item(request);
                self.bounded_canon("submit_evidence", self.canon.submit_evidence(item.clone()))
                    .await?;
                debug!(canon_id = %item.id, "Candidate admitted as evidence");
                item
            }
        };

        // Step 4: Invariants over the proposed change, then the four tests
        let snapshot = self.snapshot().await?;
        let ctx = InvariantContext::default().with_proposed_change(&item);
        let invariant_trace =
            gate_invariants(ts, &scope.ledger_action_id, snapshot.invariants(), &ctx);
        let decision = promotion_gate(ts, &candidate.id, from, promotion_tests(request))?;

        if decision.approved && invariant_trace.is_none() {
            // Step 5: Apply and prove
            let promoted = self
                .bounded_canon("apply_promotion", self.canon.apply_promotion(&decision))
                .await?;
            let version = self.bounded_canon("version", self.canon.version()).await?;
            let promotion_id = keys::decision_id(stable_key, true);
            let response = PromoteResponse {
                decision: Verdict::Allow,
                promotion_id: promotion_id.clone(),
                ts,
                canon_id: promoted.id.clone(),
                proof: Some(PromoteProof {
                    canon_version: CanonSnapshot::new(version, []).version_label(),
                    from,
                    to: promoted.level,
                    gate_summary: gate_summary(&decision.tests),
                    ledger_pointer: scope.pointer.clone(),
                }),
                denial_trace: None,
            };
            self.ledger
                .append(&scope.draft(
                    LedgerEventType::DecisionAllowed,
                    Some(promotion_id),
                    json!({ "kind": DenialKind::Promote, "response": response }),
                ))
                .await?;
            info!(canon_id = %promoted.id, %from, to = %promoted.level, "Promotion allowed");
            return Ok(response);
        }

        // Step 5: Deny with the failed tests and what would fix them
        let failed_checks: Vec<String> = decision
            .failed_tests
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let mut trace = WhyNotTrace::new(
            ts,
            &scope.ledger_action_id,
            DenialReasonCode::InvariantViolation,
            decision.reason.clone(),
        )
        .with_violated_invariants([INV_PROMOTION_GATE])
        .with_context(json!({
            "canonId": candidate.id,
            "from": from,
            "to": to,
            "failedChecks": failed_checks,
        }));
        if let Some(other) = invariant_trace {
            trace.message = format!("{}; {}", trace.message, other.message);
            trace.absorb(other);
        }

        let promotion_id = keys::decision_id(stable_key, false);
        let body = denial_body(stable_key, trace, failed_checks, decision.remediation);
        let response = PromoteResponse {
            decision: Verdict::Deny,
            promotion_id: promotion_id.clone(),
            ts,
            canon_id: candidate.id.clone(),
            proof: None,
            denial_trace: Some(body.clone()),
        };
        let action_id = scope.ledger_action_id.clone();
        self.record_denial(&scope, DenialKind::Promote, &action_id, promotion_id, &body)
            .await?;
        Ok(response)
    }

    // ============ Non-interference ============

    /// Deny an action that would raise any other agent's expected time-to-value.
    pub async fn check_non_interference(
        &self,
        caller: &Caller,
        request: NonInterferenceRequest,
        idempotency_key: Option<&str>,
    ) -> ServiceResult<Reply<NonInterferenceResponse>> {
        request.validate()?;
        let tenant = caller.tenant_for(request.context.as_ref())?;
        let idem = idempotency_key.or(request.idempotency_key.as_deref());
        let stable_key = keys::non_interference_key(&tenant, &request, idem)?;

        self.single_flight(&tenant, IdempotencyKind::NonInterference, &stable_key, || {
            self.run_non_interference(&tenant, &request, &stable_key)
        })
        .await
    }

    async fn run_non_interference(
        &self,
        tenant: &TenantId,
        request: &NonInterferenceRequest,
        stable_key: &str,
    ) -> ServiceResult<NonInterferenceResponse> {
        let scope = DecisionScope {
            ts: self.clock.now(),
            tenant,
            ledger_action_id: NON_INTERFERENCE_ACTION_ID.to_string(),
            stable_key,
            pointer: keys::ledger_pointer(stable_key),
        };
        let ts = scope.ts;
        let acting = request.proposer.agent_id.as_str();
        let action_id = request.action.action_id.clone();

        // Step 1: Record the request
        self.record_requested(&scope, DenialKind::NonInterference, canonical_hash(request)?)
            .await?;

        // Step 2: Authority over the non-interference requirements
        let snapshot = self.snapshot().await?;
        let present = snapshot.authoritative_ids();
        let cited = cited_ids(&request.canon_refs);
        let action = Action::new(
            &action_id,
            request.action.description.as_deref().unwrap_or(&action_id),
        )
        .with_prerequisites(self.config.required_canon_for(NON_INTERFERENCE_ACTION_ID))
        .with_resources(request.action.resources_used.iter().cloned())
        .with_shared_state(request.action.shared_state_modified.iter().cloned());

        let mut traces: Vec<WhyNotTrace> = Vec::new();
        traces.extend(gate_missing_prereqs(ts, &action, &present));
        traces.extend(gate_authority_boundary(ts, &action, &cited, &snapshot));

        // Step 3: Forecast the effect on every other agent
        let deltas = forecast_deltas(&action, &request.others, self.estimator.as_ref());
        traces.extend(gate_non_interference(ts, acting, &action_id, &deltas));
        let ctx = InvariantContext::default()
            .with_action(&action)
            .with_canon_ids(&present)
            .with_ttv_deltas(acting, &deltas);
        traces.extend(gate_invariants(ts, &action_id, snapshot.invariants(), &ctx));

        if let Some(trace) = merge_traces(traces) {
            let check_id = keys::decision_id(stable_key, false);
            let body = denial_body(stable_key, trace, Vec::new(), Vec::new());
            let response = NonInterferenceResponse {
                decision: Verdict::Deny,
                check_id: check_id.clone(),
                ts,
                action_id: action_id.clone(),
                proof: None,
                denial_trace: Some(body.clone()),
            };
            self.record_denial(&scope, DenialKind::NonInterference, &action_id, check_id, &body)
                .await?;
            return Ok(response);
        }

        // Step 4: Allow with the deltas that justified it
        let check_id = keys::decision_id(stable_key, true);
        let response = NonInterferenceResponse {
            decision: Verdict::Allow,
            check_id: check_id.clone(),
            ts,
            action_id: action_id.clone(),
            proof: Some(NonInterferenceProof {
                canon_version: snapshot.version_label(),
                deltas,
                evaluated_invariants: snapshot.invariants().map(|i| i.id.clone()).collect(),
                ledger_pointer: scope.pointer.clone(),
            }),
            denial_trace: None,
        };
        self.ledger
            .append(&scope.draft(
                LedgerEventType::DecisionAllowed,
                Some(check_id),
                json!({ "kind": DenialKind::NonInterference, "response": response }),
            ))
            .await?;
        info!(tenant_id = %tenant, action_id = %action_id, agent = acting, "Non-interference allowed");
        Ok(response)
    }

    // ============ Reads ============

    pub async fn ledger_events(&self, caller: &Caller, pointer: &str) -> ServiceResult<LedgerView> {
        let events = self.ledger.events(&caller.tenant_id, pointer).await?;
        if events.is_empty() {
            return Err(ServiceError::NotFound(format!("ledger pointer {pointer}")));
        }
        Ok(LedgerView {
            ts: self.clock.now(),
            pointer: pointer.to_string(),
            count: events.len(),
            events,
        })
    }

    pub async fn verify(&self, caller: &Caller, pointer: &str) -> ServiceResult<VerifyView> {
        let report = self.ledger.verify(&caller.tenant_id, pointer).await?;
        Ok(VerifyView {
            ts: self.clock.now(),
            report,
        })
    }

    pub async fn recent(&self, caller: &Caller, limit: Option<usize>) -> ServiceResult<RecentView> {
        let items = self.ledger.recent(&caller.tenant_id, limit).await?;
        Ok(RecentView {
            ts: self.clock.now(),
            tenant_id: caller.tenant_id.clone(),
            items,
        })
    }

    /// Look up a denial and re-verify its proof.
    pub async fn why_not(&self, caller: &Caller, why_not_id: &str) -> ServiceResult<WhyNotView> {
        let record = self
            .ledger
            .get_denial(&caller.tenant_id, why_not_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("why-not {why_not_id}")))?;

        let verification = verify_denied_decision_proof(&record.proof);
        let panel = match serde_json::from_value::<WhyNotTrace>(record.denial_trace.clone()) {
            Ok(trace) => match format_why_not_panel(&trace) {
                Ok(panel) => Some(panel),
                Err(e) => {
                    warn!(why_not_id, error = %e, "Why-not panel could not be formatted");
                    None
                }
            },
            Err(e) => {
                warn!(why_not_id, error = %e, "Stored denial trace is not a why-not trace");
                None
            }
        };

        Ok(WhyNotView {
            found: true,
            id: record.id,
            ts: record.ts,
            kind: record.kind,
            action_id: record.action_id,
            denial_trace: record.denial_trace,
            ledger_pointer: record.pointer,
            seq: record.seq,
            event_hash: record.event_hash,
            verification,
            panel,
        })
    }

    pub async fn canon_store(&self) -> ServiceResult<CanonStoreView> {
        let snapshot = self.snapshot().await?;
        Ok(CanonStoreView {
            ts: self.clock.now(),
            version: snapshot.version,
            version_label: snapshot.version_label(),
            items: snapshot.items.into_values().collect(),
        })
    }

    pub async fn canon_version(&self) -> ServiceResult<CanonVersionView> {
        let version = self.bounded_canon("version", self.canon.version()).await?;
        Ok(CanonVersionView {
            ts: self.clock.now(),
            version,
            version_label: CanonSnapshot::new(version, []).version_label(),
        })
    }

    /// Round-trip every backing store.
    pub async fn ready(&self) -> ServiceResult<()> {
        self.ledger.ping().await?;
        self.bounded_canon("version", self.canon.version()).await?;
        Ok(())
    }

    // ============ Plumbing ============

    /// Run `work` at most once per stable key and cache its serialized
    /// response. Identical concurrent requests wait for the first one.
    async fn single_flight<T, F, Fut>(
        &self,
        tenant: &TenantId,
        kind: IdempotencyKind,
        stable_key: &str,
        work: F,
    ) -> ServiceResult<Reply<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let flight_key = format!("{}:{}:{}", tenant, kind.as_str(), stable_key);
        let gate = self
            .inflight
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;
            self.replay_or_run(tenant, kind, stable_key, work).await
        };

        drop(gate);
        self.inflight
            .remove_if(&flight_key, |_, g| Arc::strong_count(g) == 1);
        result
    }

    async fn replay_or_run<T, F, Fut>(
        &self,
        tenant: &TenantId,
        kind: IdempotencyKind,
        stable_key: &str,
        work: F,
    ) -> ServiceResult<Reply<T>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        if let Some(body) = self.idempotency.get(tenant, kind, stable_key).await? {
            debug!(tenant_id = %tenant, kind = kind.as_str(), "Replaying cached response");
            return Ok(Reply::new(body, true));
        }

        let response = work().await?;
        let body = serde_json::to_string(&response)?;
        match self
            .idempotency
            .put(tenant, kind, stable_key, body.clone())
            .await
        {
            Ok(stored) => Ok(Reply::new(stored, false)),
            Err(e) => {
                // The decision is already chained; a failed cache write only
                // costs replay.
                warn!(tenant_id = %tenant, kind = kind.as_str(), error = %e, "Idempotency cache write failed");
                Ok(Reply::new(body, false))
            }
        }
    }

    async fn bounded_canon<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = CanonStoreResult<T>>,
    ) -> ServiceResult<T> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServiceError::Unavailable(format!(
                "canon store timed out during {operation}"
            ))),
        }
    }

    async fn snapshot(&self) -> ServiceResult<CanonSnapshot> {
        self.bounded_canon("snapshot", self.canon.snapshot()).await
    }

    async fn record_requested(
        &self,
        scope: &DecisionScope<'_>,
        kind: DenialKind,
        request_hash: String,
    ) -> ServiceResult<()> {
        let event = self
            .ledger
            .append(&scope.draft(
                LedgerEventType::DecisionRequested,
                None,
                json!({ "kind": kind, "requestHash": request_hash }),
            ))
            .await?;
        debug!(pointer = %event.pointer, seq = event.seq, kind = kind.as_str(), "Decision requested");
        Ok(())
    }

    /// Chain a denial and index it for why-not lookups.
    async fn record_denial(
        &self,
        scope: &DecisionScope<'_>,
        kind: DenialKind,
        action_id: &str,
        decision_id: String,
        body: &DenialBody,
    ) -> ServiceResult<()> {
        let denial_trace = serde_json::to_value(body)?;
        let event = self
            .ledger
            .append(&scope.draft(
                LedgerEventType::DecisionDenied,
                Some(decision_id.clone()),
                json!({
                    "kind": kind,
                    "decisionId": decision_id,
                    "denialTrace": denial_trace,
                }),
            ))
            .await?;

        let proof = create_denied_decision_proof(&body.why_not_id, &body.trace, scope.ts)?;
        self.ledger
            .put_denial(&DenialRecord {
                id: body.why_not_id.clone(),
                kind,
                ts: scope.ts,
                tenant_id: scope.tenant.clone(),
                action_id: action_id.to_string(),
                stable_key: scope.stable_key.to_string(),
                pointer: event.pointer.clone(),
                seq: event.seq,
                event_hash: event.hash.clone(),
                denial_trace,
                proof,
            })
            .await?;

        warn!(
            tenant_id = %scope.tenant,
            action_id,
            kind = kind.as_str(),
            pointer = %event.pointer,
            reasons = ?body.trace.reason_codes,
            "Decision denied"
        );
        Ok(())
    }
}

fn require_on_every_action(mut path: CandidatePath, required: &[String]) -> CandidatePath {
    for action in &mut path.actions {
        action
            .prerequisites_canon_ids
            .extend(required.iter().cloned());
    }
    path
}

fn denial_body(
    stable_key: &str,
    trace: WhyNotTrace,
    failed_checks: Vec<String>,
    leading_fixes: Vec<String>,
) -> DenialBody {
    let mut fixes = leading_fixes;
    fixes.extend(minimal_fix(&trace));
    DenialBody {
        why_not_id: keys::why_not_id(stable_key),
        minimal_fix: dedup(fixes),
        failed_checks,
        trace,
    }
}

fn promotion_tests(request: &PromoteRequest) -> PromotionTests {
    let gate = &request.gate;
    let evidence_refs: BTreeSet<String> = [
        &gate.resistance,
        &gate.reproducibility,
        &gate.invariant_safety,
        &gate.feasibility_impact,
    ]
    .into_iter()
    .flat_map(|check| check.evidence_ids.iter().cloned())
    .chain(request.provenance.evidence_artifact_hashes.iter().cloned())
    .collect();

    PromotionTests {
        resistance: gate.resistance.passed,
        reproducible: gate.reproducibility.passed,
        invariant_safe: gate.invariant_safety.passed,
        feasibility_impact: gate.feasibility_impact.passed,
        evidence_refs: evidence_refs.into_iter().collect(),
    }
}

fn gate_summary(tests: &PromotionTests) -> BTreeMap<String, bool> {
    PromotionTest::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), tests.passed(*t)))
        .collect()
}

/// Build the EVIDENCE-level item a new candidate enters the store as.
fn evidence_item(request: &PromoteRequest) -> CanonItem {
    let PromotionCandidate {
        kind,
        id,
        title,
        content,
        tags,
        formal,
        severity,
        ..
    } = &request.candidate;

    let body = match kind {
        CanonKind::Definition => CanonBody::Definition {
            term: title.clone(),
            text: content.clone(),
        },
        CanonKind::Invariant => CanonBody::Invariant {
            statement: content.clone(),
            formal: formal.clone().unwrap_or_default(),
            severity: severity.unwrap_or(Severity::HardFail),
        },
        CanonKind::Constraint => CanonBody::Constraint {
            applies_to: tags.clone(),
            rule: content.clone(),
        },
    };

    let source = &request.provenance;
    let mut provenance = Provenance::new(&source.source).with_author(&source.author);
    if let Some(reference) = &source.reference {
        provenance = provenance.with_reference(reference);
    }
    if !source.evidence_artifact_hashes.is_empty() {
        provenance.hash = Some(sha256_hex(source.evidence_artifact_hashes.join("\n")));
    }

    CanonItem::new(id, title, body)
        .with_timestamp(source.created_at.trunc_subsecs(3))
        .with_provenance(provenance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::NON_INTERFERENCE_FIXES;
    use crate::requests::{CanonRef, CanonRefKind, Intent, RequestContext};
    use canon_gate::{
        constitution, INV_CANON_ONLY_EXECUTION, INV_NON_INTERFERENCE, INV_TRUST_DENIAL_TRACE,
        INV_TS_MANDATORY,
    };
    use canon_ledger::{InMemoryCacheStore, InMemoryLedgerStore, LedgerConfig};
    use canon_promotion::remediation;
    use canon_store::InMemoryCanonStore;
    use canon_types::FixedClock;

    fn service() -> DecisionService {
        let canon = Arc::new(InMemoryCanonStore::with_genesis(constitution()).unwrap());
        let ledger = Arc::new(HashChainLedger::new(
            Arc::new(InMemoryCacheStore::new()),
            Arc::new(InMemoryLedgerStore::new()),
            LedgerConfig::default(),
        ));
        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        DecisionService::new(canon, ledger, EngineConfig::default())
            .with_clock(Arc::new(FixedClock::new(at)))
    }

    fn caller() -> Caller {
        Caller::new(TenantId::new("acme"), "svc").with_scopes(["decide"])
    }

    fn refs(ids: &[&str]) -> Vec<CanonRef> {
        ids.iter()
            .map(|id| CanonRef {
                kind: CanonRefKind::Invariant,
                id: id.to_string(),
                version: None,
                hash: None,
            })
            .collect()
    }

    fn base_refs() -> Vec<CanonRef> {
        refs(&[INV_TS_MANDATORY, INV_CANON_ONLY_EXECUTION, INV_TRUST_DENIAL_TRACE])
    }

    fn decide_request(canon_refs: Vec<CanonRef>) -> DecideRequest {
        DecideRequest {
            action_id: "deploy".into(),
            intent: Intent {
                objective: "ship v2".into(),
                proposed_action: "deploy v2".into(),
                target: None,
            },
            canon_refs,
            candidates: None,
            features: None,
            risk_level: None,
            context: None,
            idempotency_key: None,
        }
    }

    fn promote_request(all_pass: bool) -> PromoteRequest {
        serde_json::from_value(json!({
            "candidate": {"kind": "CONSTRAINT", "id": "CON_DEPLOY_WINDOW", "title": "Deploy window",
                          "content": "Deploy only on weekdays", "tags": ["deploy"]},
            "provenance": {"source": "postmortem-17", "author": "sre", "createdAt": "2025-12-30T10:00:00Z"},
            "gate": {
                "resistance": {"passed": true},
                "reproducibility": {"passed": all_pass, "notes": "two trials"},
                "invariantSafety": {"passed": true},
                "feasibilityImpact": {"passed": true}
            }
        }))
        .unwrap()
    }

    fn ni_request(resources: &[&str]) -> NonInterferenceRequest {
        let mut canon_refs = base_refs();
        canon_refs.extend(refs(&[INV_NON_INTERFERENCE]));
        serde_json::from_value(json!({
            "proposer": {"agentId": "agent-a", "goal": "migrate"},
            "action": {"actionId": "migrate-db", "resourcesUsed": resources},
            "others": [{"agentId": "agent-b", "goal": "serve", "dependsOnResources": ["db"]}],
            "canonRefs": canon_refs,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn decide_allows_when_required_canon_is_cited() {
        let svc = service();

        let reply = svc
            .decide(&caller(), decide_request(base_refs()), Some("k1"))
            .await
            .unwrap();
        assert!(!reply.replayed);
        let response = reply.parse().unwrap();
        assert_eq!(response.decision, Verdict::Allow);
        assert!(response.denial_trace.is_none());

        let proof = response.proof.unwrap();
        assert_eq!(proof.canon_version, "canon-v0");
        assert_eq!(proof.selected_path_id, "deploy");

        // Step 1: REQUESTED then ALLOWED on one chain
        let view = svc.ledger_events(&caller(), &proof.ledger_pointer).await.unwrap();
        let types: Vec<_> = view.events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![LedgerEventType::DecisionRequested, LedgerEventType::DecisionAllowed]
        );
        assert!(view.events[0].payload["requestHash"].is_string());

        // Step 2: The chain verifies
        let verified = svc.verify(&caller(), &proof.ledger_pointer).await.unwrap();
        assert!(verified.report.ok);
        assert_eq!(verified.report.count, 2);
    }

    #[tokio::test]
    async fn replay_is_byte_identical_and_appends_once() {
        let svc = service();

        let first = svc
            .decide(&caller(), decide_request(base_refs()), Some("k1"))
            .await
            .unwrap();
        let second = svc
            .decide(&caller(), decide_request(base_refs()), Some("k1"))
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(first.body, second.body);
        let recent = svc.recent(&caller(), None).await.unwrap();
        assert_eq!(recent.items.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_run_once() {
        let svc = service();
        let c = caller();

        let (a, b, d) = tokio::join!(
            svc.decide(&c, decide_request(base_refs()), Some("same")),
            svc.decide(&c, decide_request(base_refs()), Some("same")),
            svc.decide(&c, decide_request(base_refs()), Some("same")),
        );
        let (a, b, d) = (a.unwrap(), b.unwrap(), d.unwrap());
        assert_eq!(a.body, b.body);
        assert_eq!(b.body, d.body);
        assert_eq!([a.replayed, b.replayed, d.replayed].iter().filter(|r| !**r).count(), 1);
        assert_eq!(svc.recent(&c, None).await.unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn uncited_prerequisite_is_denied_with_missing_ids() {
        let svc = service();
        let mut request = decide_request(base_refs());
        request.candidates = Some(vec![CandidatePath::new(
            "p1",
            vec![Action::new("deploy", "deploy v2").with_prerequisites(["X"])],
        )]);

        let response = svc
            .decide(&caller(), request, None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Deny);
        let denial = response.denial_trace.unwrap();
        assert!(denial
            .trace
            .has_reason(DenialReasonCode::MissingCanonPrereqs));
        assert!(denial
            .trace
            .has_reason(DenialReasonCode::AuthorityBoundaryFail));
        assert_eq!(denial.trace.missing_canon_ids, vec!["X".to_string()]);
        assert!(denial.minimal_fix.contains(&"Add canonRef: X".to_string()));

        // The denial is indexed and its proof verifies
        let why = svc.why_not(&caller(), &denial.why_not_id).await.unwrap();
        assert!(why.found);
        assert_eq!(why.kind, DenialKind::Decide);
        assert!(why.verification.valid);
        assert_eq!(why.seq, 2);
        assert!(why.panel.is_some());
    }

    #[tokio::test]
    async fn uncited_required_canon_is_an_authority_denial() {
        let svc = service();
        let response = svc
            .decide(&caller(), decide_request(refs(&[INV_TS_MANDATORY])), None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Deny);
        let denial = response.denial_trace.unwrap();
        assert!(denial
            .trace
            .has_reason(DenialReasonCode::AuthorityBoundaryFail));
        assert!(denial
            .trace
            .missing_canon_ids
            .contains(&INV_CANON_ONLY_EXECUTION.to_string()));
    }

    #[tokio::test]
    async fn admissible_candidate_beats_an_inadmissible_one() {
        let svc = service();
        let mut request = decide_request(base_refs());
        request.candidates = Some(vec![
            CandidatePath::new(
                "blocked",
                vec![Action::new("deploy", "deploy v2").with_prerequisites(["X"])],
            ),
            CandidatePath::new("clear", vec![Action::new("deploy", "deploy v2")]),
        ]);

        let response = svc
            .decide(&caller(), request, None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Allow);
        assert_eq!(response.proof.unwrap().selected_path_id, "clear");
    }

    #[tokio::test]
    async fn tenant_mismatch_is_rejected_before_the_ledger() {
        let svc = service();
        let mut request = decide_request(base_refs());
        request.context = Some(RequestContext {
            tenant_id: Some("globex".into()),
            ..Default::default()
        });

        let err = svc.decide(&caller(), request, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::TenantMismatch { .. }));
        assert!(svc.recent(&caller(), None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn promotion_advances_one_level() {
        let svc = service();

        let response = svc
            .promote(&caller(), promote_request(true), None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Allow);
        let proof = response.proof.unwrap();
        assert_eq!(proof.from, CanonLevel::Evidence);
        assert_eq!(proof.to, CanonLevel::Proposed);
        assert_eq!(proof.canon_version, "canon-v2");
        assert!(proof.gate_summary.values().all(|passed| *passed));

        let stored = svc.canon().get("CON_DEPLOY_WINDOW").await.unwrap().unwrap();
        assert_eq!(stored.level, CanonLevel::Proposed);
    }

    #[tokio::test]
    async fn failed_promotion_names_its_checks() {
        let svc = service();

        let response = svc
            .promote(&caller(), promote_request(false), None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Deny);
        let denial = response.denial_trace.unwrap();
        assert_eq!(denial.failed_checks, vec!["reproducibility".to_string()]);
        assert_eq!(
            denial.trace.reason_codes,
            vec![DenialReasonCode::InvariantViolation]
        );
        assert_eq!(
            denial.trace.violated_invariant_ids,
            vec![INV_PROMOTION_GATE.to_string()]
        );
        assert_eq!(
            denial.minimal_fix[0],
            remediation(PromotionTest::Reproducibility)
        );

        // Evidence was still admitted
        let stored = svc.canon().get("CON_DEPLOY_WINDOW").await.unwrap().unwrap();
        assert_eq!(stored.level, CanonLevel::Evidence);
    }

    #[tokio::test]
    async fn promotion_level_skip_is_rejected_before_the_ledger() {
        let svc = service();
        let mut request = promote_request(true);
        request.candidate.from = Some(CanonLevel::Evidence);
        request.candidate.to = Some(CanonLevel::Canon);

        let err = svc.promote(&caller(), request, None).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(svc.recent(&caller(), None).await.unwrap().items.is_empty());
        assert!(svc.canon().get("CON_DEPLOY_WINDOW").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contended_resource_is_an_interference_denial() {
        let svc = service();

        let response = svc
            .check_non_interference(&caller(), ni_request(&["db"]), None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Deny);
        assert_eq!(response.action_id, "migrate-db");
        let denial = response.denial_trace.unwrap();
        assert!(denial
            .trace
            .has_reason(DenialReasonCode::NonInterferenceViolation));
        for fix in NON_INTERFERENCE_FIXES {
            assert!(denial.minimal_fix.contains(&fix.to_string()));
        }

        let why = svc.why_not(&caller(), &denial.why_not_id).await.unwrap();
        assert_eq!(why.kind, DenialKind::NonInterference);
    }

    #[tokio::test]
    async fn disjoint_resources_are_allowed_with_deltas() {
        let svc = service();

        let response = svc
            .check_non_interference(&caller(), ni_request(&["cache"]), None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(response.decision, Verdict::Allow);
        let proof = response.proof.unwrap();
        assert_eq!(proof.deltas.get("agent-b"), Some(&0.0));
        assert!(proof
            .evaluated_invariants
            .contains(&INV_NON_INTERFERENCE.to_string()));
    }

    #[tokio::test]
    async fn reads_are_tenant_scoped() {
        let svc = service();
        let mut request = decide_request(base_refs());
        request.candidates = Some(vec![CandidatePath::new(
            "p1",
            vec![Action::new("deploy", "deploy v2").with_prerequisites(["X"])],
        )]);
        let response = svc
            .decide(&caller(), request, None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        let why_not_id = response.denial_trace.unwrap().why_not_id;

        let outsider = Caller::new(TenantId::new("globex"), "svc");
        assert!(matches!(
            svc.why_not(&outsider, &why_not_id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(svc.recent(&outsider, None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn unreadable_denial_trace_still_returns_the_record() {
        let svc = service();
        let mut request = decide_request(base_refs());
        request.candidates = Some(vec![CandidatePath::new(
            "p1",
            vec![Action::new("deploy", "deploy v2").with_prerequisites(["X"])],
        )]);
        let response = svc
            .decide(&caller(), request, None)
            .await
            .unwrap()
            .parse()
            .unwrap();
        let why_not_id = response.denial_trace.unwrap().why_not_id;

        let view = svc.why_not(&caller(), &why_not_id).await.unwrap();
        assert!(view.panel.is_some());

        let mut record = svc
            .ledger()
            .get_denial(&caller().tenant_id, &why_not_id)
            .await
            .unwrap()
            .unwrap();
        record.id = "wn-unreadable".into();
        record.denial_trace = json!({"unexpected": true});
        svc.ledger().put_denial(&record).await.unwrap();

        let view = svc.why_not(&caller(), "wn-unreadable").await.unwrap();
        assert!(view.found);
        assert!(view.panel.is_none());
        assert_eq!(view.denial_trace, json!({"unexpected": true}));
    }
}
