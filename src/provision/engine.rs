//! Base-instance provisioning engine
//!
//! Decides whether a clean template instance must be built from scratch or
//! can be reused, serializes provisioning of the same base across
//! processes, and clones the completed base into caller-owned working
//! instances. Every backend call is wrapped in the retry policy; every
//! failing exit from setup destroys the partial base and invalidates its
//! record.

use crate::backend::Executor;
use crate::base::{
    BaseInstanceCache, BaseInstanceRecord, BaseSpecification, CompatibilityTag, DistroFamily,
    ReuseDecision, SetupStep,
};
use crate::error::{KilnError, KilnResult};
use crate::provision::context::ProviderContext;
use crate::provision::environment::{LaunchedEnvironment, ShutdownPolicy, WorkingInstance};
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionStatus};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Partial state left behind if a provisioning run is cancelled mid-setup.
///
/// Tracks only instances created by this call; cleanup after a deadline
/// never touches bases owned by other processes.
#[derive(Debug, Default, Clone)]
struct SetupTracker(Arc<Mutex<Option<(String, String)>>>);

impl SetupTracker {
    fn begin(&self, instance: &str, cache_key: &str) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((instance.to_string(), cache_key.to_string()));
    }

    fn finish(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn take(&self) -> Option<(String, String)> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Orchestrates base provisioning and working-instance cloning
pub struct Provisioner {
    context: ProviderContext,
    executor: Arc<dyn Executor>,
    tag: CompatibilityTag,
}

impl Provisioner {
    /// Create a provisioner with the current compatibility tag
    pub fn new(context: ProviderContext, executor: Arc<dyn Executor>) -> Self {
        Self {
            context,
            executor,
            tag: CompatibilityTag::current(),
        }
    }

    /// Create a provisioner requiring an explicit compatibility tag.
    ///
    /// Client tools extend the tag with their own revision so their setup
    /// changes also invalidate cached bases.
    pub fn with_tag(context: ProviderContext, executor: Arc<dyn Executor>, tag: CompatibilityTag) -> Self {
        Self {
            context,
            executor,
            tag,
        }
    }

    fn retry(&self) -> RetryPolicy {
        self.context.config.provision.retry_policy()
    }

    /// Ensure a working instance named `caller_name` cloned from a valid
    /// base for `spec`, provisioning the base first if needed.
    ///
    /// Honors the configured overall deadline: exceeding it aborts with
    /// `ProvisioningTimeout` and best-effort cleanup of any base left
    /// mid-setup by this call.
    pub async fn ensure_working_instance(
        &self,
        spec: &BaseSpecification,
        caller_name: &str,
    ) -> KilnResult<WorkingInstance> {
        let tracker = SetupTracker::default();

        match self.context.config.provision.overall_deadline() {
            None => self.ensure_inner(spec, caller_name, &tracker).await,
            Some(deadline) => {
                let started = Instant::now();
                match tokio::time::timeout(
                    deadline,
                    self.ensure_inner(spec, caller_name, &tracker),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        // The inner future was dropped, releasing any held
                        // lock with it. Clean up our own partial base only.
                        self.cleanup_partial(&tracker).await;
                        Err(KilnError::ProvisioningTimeout {
                            elapsed_secs: started.elapsed().as_secs(),
                        })
                    }
                }
            }
        }
    }

    /// Ensure a working instance and wrap it in a session-scoped
    /// environment with the given shutdown policy.
    pub async fn launched_environment(
        &self,
        spec: &BaseSpecification,
        caller_name: &str,
        policy: ShutdownPolicy,
    ) -> KilnResult<LaunchedEnvironment> {
        if self.context.sessions.get(caller_name).await?.is_some() {
            return Err(KilnError::SessionExists(caller_name.to_string()));
        }

        let session = Session::new(
            caller_name.to_string(),
            spec.cache_key(),
            SessionStatus::Provisioning,
        );
        self.context.sessions.create(&session).await?;

        match self.ensure_working_instance(spec, caller_name).await {
            Ok(instance) => {
                self.context
                    .sessions
                    .update_status(caller_name, SessionStatus::Ready)
                    .await?;
                Ok(LaunchedEnvironment::new(
                    instance,
                    self.context.sessions.clone(),
                    policy,
                ))
            }
            Err(e) => {
                self.context
                    .sessions
                    .update_status(caller_name, SessionStatus::Failed)
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    async fn ensure_inner(
        &self,
        spec: &BaseSpecification,
        caller_name: &str,
        tracker: &SetupTracker,
    ) -> KilnResult<WorkingInstance> {
        let retry = self.retry();
        if retry
            .run("probe-working-instance", || {
                self.executor.exists(caller_name)
            })
            .await?
        {
            return Err(KilnError::InstanceExists(caller_name.to_string()));
        }

        let base_name = self.ensure_base(spec, tracker).await?;

        // Cloning needs no lock: the base is complete and many callers may
        // clone from it concurrently.
        info!("Cloning {} -> {}", base_name, caller_name);
        retry
            .run("clone-instance", || {
                self.executor.clone_instance(&base_name, caller_name)
            })
            .await?;
        self.wait_until_ready(caller_name).await?;

        Ok(WorkingInstance::new(
            caller_name.to_string(),
            spec.cache_key(),
            Arc::clone(&self.executor),
            self.context.config.session.execute_timeout(),
        ))
    }

    /// Ensure a completed base instance for `spec`, returning its name.
    async fn ensure_base(
        &self,
        spec: &BaseSpecification,
        tracker: &SetupTracker,
    ) -> KilnResult<String> {
        let cache_key = spec.cache_key();
        let expiry_days = self.context.config.provision.expiry_days;

        // Fast path: unlocked read.
        let record = self.context.cache.lookup(&cache_key).await?;
        let decision = BaseInstanceCache::evaluate(record.as_ref(), &self.tag, expiry_days);
        if decision.is_reuse() {
            let record = record.expect("reuse decision implies a record");
            if self.base_still_exists(&record).await? {
                debug!("Reusing base {} (fast path)", record.instance_name);
                return Ok(record.instance_name);
            }
        }

        // Slow path: serialize setup of this base across processes.
        let lock_key = format!("base-{cache_key}");
        let lock = self
            .context
            .locks
            .acquire(&lock_key, self.context.config.provision.lock_timeout())
            .await?;

        let outcome = self.provision_locked(spec, &cache_key, tracker).await;

        match self.context.locks.release(lock) {
            Ok(()) => {}
            Err(release_err) => {
                if outcome.is_ok() {
                    return Err(release_err);
                }
                warn!("Lock release after failed provisioning: {release_err}");
            }
        }

        outcome
    }

    /// Provision (or confirm) the base while holding its lock.
    async fn provision_locked(
        &self,
        spec: &BaseSpecification,
        cache_key: &str,
        tracker: &SetupTracker,
    ) -> KilnResult<String> {
        let expiry_days = self.context.config.provision.expiry_days;
        let retry = self.retry();

        // Re-check under lock: another process may have provisioned or
        // invalidated the base since the unlocked read.
        let record = self.context.cache.lookup(cache_key).await?;
        let decision = BaseInstanceCache::evaluate(record.as_ref(), &self.tag, expiry_days);

        if decision.is_reuse() {
            let record = record.expect("reuse decision implies a record");
            if self.base_still_exists(&record).await? {
                debug!("Reusing base {} (provisioned concurrently)", record.instance_name);
                return Ok(record.instance_name);
            }
            // Record claims a base the backend no longer has. Rebuild.
            warn!(
                "Base {} vanished from the backend; reprovisioning",
                record.instance_name
            );
            self.context.cache.invalidate(cache_key).await?;
        } else if let Some(old) = record {
            match &decision {
                ReuseDecision::ReclaimAbandoned => {
                    info!("Reclaiming abandoned base {}", old.instance_name);
                }
                ReuseDecision::Incompatible { found } => {
                    info!(
                        "Base {} has tag {}, need {}; rebuilding",
                        old.instance_name, found, self.tag
                    );
                }
                ReuseDecision::Expired { age_days } => {
                    info!(
                        "Base {} is {} days old; rebuilding",
                        old.instance_name, age_days
                    );
                }
                ReuseDecision::Provision | ReuseDecision::Reuse => {}
            }
            retry
                .run("destroy-stale-base", || {
                    self.executor.destroy(&old.instance_name)
                })
                .await?;
            self.context.cache.invalidate(cache_key).await?;
        }

        self.build_base(spec, cache_key, tracker).await
    }

    /// Build a fresh base: create, run every setup step in order, commit.
    async fn build_base(
        &self,
        spec: &BaseSpecification,
        cache_key: &str,
        tracker: &SetupTracker,
    ) -> KilnResult<String> {
        let retry = self.retry();
        let name = spec.base_instance_name(&self.tag);
        info!("Provisioning base {} from {}", name, spec.image());

        // A leftover backend instance under this name (crashed run that
        // never wrote a record) would make create fail; clear it first.
        if retry.run("probe-base", || self.executor.exists(&name)).await? {
            warn!("Removing leftover instance {}", name);
            retry
                .run("destroy-leftover", || self.executor.destroy(&name))
                .await?;
        }

        let mut record = BaseInstanceRecord::begin(&name, cache_key, self.tag.clone());
        self.context.cache.commit(&record).await?;
        tracker.begin(&name, cache_key);

        let built = async {
            retry
                .run("create-base", || self.executor.create(spec, &name))
                .await?;
            self.wait_until_ready(&name).await?;

            for step in spec.steps() {
                self.apply_step(&name, step, spec.family()).await?;
            }
            Ok::<_, KilnError>(())
        }
        .await;

        if let Err(e) = built {
            // Never leave an incomplete record (or its instance) behind.
            warn!("Provisioning of {} failed: {}", name, e);
            self.cleanup_partial(tracker).await;
            return Err(e);
        }

        record.setup_complete = true;
        self.context.cache.commit(&record).await?;
        tracker.finish();
        info!("Base {} ready (tag {})", name, self.tag);
        Ok(name)
    }

    /// Run one setup step, mapping failure into `SetupFailed`.
    async fn apply_step(
        &self,
        instance: &str,
        step: &SetupStep,
        family: DistroFamily,
    ) -> KilnResult<()> {
        let step_id = step.id();
        debug!("Running setup step {} in {}", step_id, instance);
        let retry = self.retry();

        let result = match step {
            SetupStep::WriteFile {
                path,
                content,
                mode,
            } => {
                self.write_remote_file(instance, path, content, mode, &retry)
                    .await
            }
            _ => {
                let command = step
                    .command(family)
                    .ok_or_else(|| KilnError::Internal(format!("step {step_id} has no command")))?;
                retry
                    .run(&step_id, || async {
                        let output = self
                            .executor
                            .execute(instance, &command, true, retry.attempt_timeout)
                            .await?;
                        if output.success() {
                            Ok(())
                        } else {
                            Err(KilnError::CommandNonZero {
                                instance: instance.to_string(),
                                exit_code: output.exit_code,
                                stderr: output.stderr,
                            })
                        }
                    })
                    .await
            }
        };

        result.map_err(|e| KilnError::SetupFailed {
            step: step_id,
            reason: e.to_string(),
        })
    }

    /// Push file content into the instance and set its mode.
    async fn write_remote_file(
        &self,
        instance: &str,
        path: &str,
        content: &str,
        mode: &str,
        retry: &RetryPolicy,
    ) -> KilnResult<()> {
        let staging = std::env::temp_dir().join(format!("kiln-{}", uuid::Uuid::new_v4()));
        std::fs::write(&staging, content)
            .map_err(|e| KilnError::io(format!("staging file for {path}"), e))?;

        let pushed = retry
            .run("push-file", || self.executor.push_file(instance, &staging, path))
            .await;
        std::fs::remove_file(&staging).ok();
        pushed?;

        let chmod = vec!["chmod".to_string(), mode.to_string(), path.to_string()];
        let output = self
            .executor
            .execute(instance, &chmod, true, retry.attempt_timeout)
            .await?;
        if output.success() {
            Ok(())
        } else {
            Err(KilnError::CommandNonZero {
                instance: instance.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    /// Wait until the instance answers a trivial command.
    async fn wait_until_ready(&self, instance: &str) -> KilnResult<()> {
        let probe = vec!["true".to_string()];
        RetryPolicy::probe()
            .run("wait-until-ready", || async {
                let output = self
                    .executor
                    .execute(instance, &probe, true, RetryPolicy::probe().attempt_timeout)
                    .await?;
                if output.success() {
                    Ok(())
                } else {
                    Err(KilnError::backend(
                        "wait-until-ready",
                        format!("{instance} not answering yet"),
                    ))
                }
            })
            .await
    }

    async fn base_still_exists(&self, record: &BaseInstanceRecord) -> KilnResult<bool> {
        self.retry()
            .run("probe-base", || self.executor.exists(&record.instance_name))
            .await
    }

    /// Best-effort removal of a partial base created by this call.
    async fn cleanup_partial(&self, tracker: &SetupTracker) {
        if let Some((instance, cache_key)) = tracker.take() {
            if let Err(e) = self.executor.destroy(&instance).await {
                warn!("Failed to destroy partial base {}: {}", instance, e);
            }
            if let Err(e) = self.context.cache.invalidate(&cache_key).await {
                warn!("Failed to invalidate record {}: {}", cache_key, e);
            }
        }
    }
}
