//! Obligation handlers and the registry that orders them.
//!
//! Handlers run after a decision is reached. For every request the registry
//! computes the effective obligations (those whose effect matches the
//! decision) and walks its handlers in a fixed total order: precedence
//! ascending, then obligation id. A handler runs only when its obligation id
//! is effective.
//!
//! # Concurrency
//!
//! The handler set sits behind a task-fair `parking_lot::RwLock`. Request
//! workers take the shared lock for the whole walk; registration takes the
//! exclusive lock. A waiting writer blocks new readers, so administrative
//! changes are never starved by request traffic. Handlers are synchronous,
//! so the shared guard is never held across an await point.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ObligationError, RegistryError};
use crate::outcome::{EvaluationOutcome, FulfillOn, Obligation};
use crate::request::AuthorizationRequest;

/// A post-decision action bound to one obligation id.
pub trait ObligationHandler: Send + Sync {
    /// Obligation identifier this handler fulfils.
    fn obligation_id(&self) -> &str;

    /// Position in the registry; lower runs earlier.
    fn precedence(&self) -> i32 {
        0
    }

    /// Restricts the handler to one decision effect.
    ///
    /// `None` runs the handler whenever its obligation is effective.
    fn fulfill_on(&self) -> Option<FulfillOn> {
        None
    }

    /// Fulfils the obligation for one request.
    fn apply(
        &self,
        request: &AuthorizationRequest,
        outcome: &EvaluationOutcome,
        obligation: &Obligation,
    ) -> Result<(), ObligationError>;
}

type HandlerFn =
    dyn Fn(&AuthorizationRequest, &EvaluationOutcome, &Obligation) -> Result<(), ObligationError>
        + Send
        + Sync;

/// An obligation handler built from a closure.
pub struct FnObligationHandler {
    obligation_id: String,
    precedence: i32,
    fulfill_on: Option<FulfillOn>,
    apply: Box<HandlerFn>,
}

impl FnObligationHandler {
    /// Creates a handler with precedence 0 that runs for either effect.
    pub fn new<F>(obligation_id: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&AuthorizationRequest, &EvaluationOutcome, &Obligation) -> Result<(), ObligationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            obligation_id: obligation_id.into(),
            precedence: 0,
            fulfill_on: None,
            apply: Box::new(apply),
        }
    }

    /// Sets the precedence.
    pub fn with_precedence(mut self, precedence: i32) -> Self {
        self.precedence = precedence;
        self
    }

    /// Restricts the handler to one decision effect.
    pub fn with_fulfill_on(mut self, fulfill_on: FulfillOn) -> Self {
        self.fulfill_on = Some(fulfill_on);
        self
    }
}

impl fmt::Debug for FnObligationHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObligationHandler")
            .field("obligation_id", &self.obligation_id)
            .field("precedence", &self.precedence)
            .field("fulfill_on", &self.fulfill_on)
            .finish_non_exhaustive()
    }
}

impl ObligationHandler for FnObligationHandler {
    fn obligation_id(&self) -> &str {
        &self.obligation_id
    }

    fn precedence(&self) -> i32 {
        self.precedence
    }

    fn fulfill_on(&self) -> Option<FulfillOn> {
        self.fulfill_on
    }

    fn apply(
        &self,
        request: &AuthorizationRequest,
        outcome: &EvaluationOutcome,
        obligation: &Obligation,
    ) -> Result<(), ObligationError> {
        (self.apply)(request, outcome, obligation)
    }
}

/// Registry order: precedence, then obligation id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HandlerKey {
    precedence: i32,
    obligation_id: String,
}

#[derive(Default)]
struct Handlers {
    ordered: BTreeMap<HandlerKey, Arc<dyn ObligationHandler>>,
    by_id: HashMap<String, HandlerKey>,
}

fn same_instance(a: &Arc<dyn ObligationHandler>, b: &Arc<dyn ObligationHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Ordered set of obligation handlers.
#[derive(Default)]
pub struct ObligationRegistry {
    handlers: RwLock<Handlers>,
}

impl fmt::Debug for ObligationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObligationRegistry")
            .field("handlers", &self.handler_ids())
            .finish()
    }
}

impl ObligationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler.
    ///
    /// Registering the instance already present is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateHandler` if a different instance
    /// holds the same obligation id.
    pub fn register(&self, handler: Arc<dyn ObligationHandler>) -> Result<(), RegistryError> {
        let obligation_id = handler.obligation_id().to_string();
        let mut handlers = self.handlers.write();

        if let Some(key) = handlers.by_id.get(&obligation_id) {
            let existing = handlers.ordered.get(key);
            return match existing {
                Some(existing) if same_instance(existing, &handler) => {
                    debug!(obligation_id = %obligation_id, "obligation handler already registered");
                    Ok(())
                }
                _ => Err(RegistryError::DuplicateHandler { obligation_id }),
            };
        }

        let key = HandlerKey {
            precedence: handler.precedence(),
            obligation_id: obligation_id.clone(),
        };
        handlers.by_id.insert(obligation_id.clone(), key.clone());
        handlers.ordered.insert(key, handler);
        info!(obligation_id = %obligation_id, "registered obligation handler");
        Ok(())
    }

    /// Removes a handler instance.
    ///
    /// Unregistering an absent handler is a no-op, as is unregistering a
    /// different instance than the one holding the id.
    pub fn unregister(&self, handler: &Arc<dyn ObligationHandler>) -> bool {
        let mut handlers = self.handlers.write();
        let Some(key) = handlers.by_id.get(handler.obligation_id()).cloned() else {
            return false;
        };
        match handlers.ordered.get(&key) {
            Some(existing) if same_instance(existing, handler) => {}
            _ => {
                warn!(
                    obligation_id = %key.obligation_id,
                    "not unregistering obligation handler: a different instance is registered"
                );
                return false;
            }
        }
        handlers.ordered.remove(&key);
        handlers.by_id.remove(&key.obligation_id);
        info!(obligation_id = %key.obligation_id, "unregistered obligation handler");
        true
    }

    /// Removes whichever handler holds `obligation_id`.
    pub fn unregister_id(&self, obligation_id: &str) -> bool {
        let mut handlers = self.handlers.write();
        let Some(key) = handlers.by_id.remove(obligation_id) else {
            return false;
        };
        handlers.ordered.remove(&key);
        info!(obligation_id = %obligation_id, "unregistered obligation handler");
        true
    }

    /// Whether a handler is registered for `obligation_id`.
    pub fn contains(&self, obligation_id: &str) -> bool {
        self.handlers.read().by_id.contains_key(obligation_id)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().ordered.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered obligation ids in registry order.
    pub fn handler_ids(&self) -> Vec<String> {
        self.handlers
            .read()
            .ordered
            .keys()
            .map(|key| key.obligation_id.clone())
            .collect()
    }

    /// Runs the handlers whose obligations are effective for `outcome`.
    ///
    /// Returns the ids of the handlers invoked, in invocation order.
    ///
    /// # Errors
    ///
    /// The first handler error aborts processing and is returned; later
    /// handlers are not invoked. A panicking handler counts as an error.
    pub fn process(
        &self,
        request: &AuthorizationRequest,
        outcome: &EvaluationOutcome,
    ) -> Result<Vec<String>, ObligationError> {
        let effective = outcome.effective_obligations();
        if effective.is_empty() {
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        let handlers = self.handlers.read();
        for (key, handler) in &handlers.ordered {
            let Some(obligation) = effective.get(key.obligation_id.as_str()) else {
                continue;
            };
            if handler
                .fulfill_on()
                .is_some_and(|effect| !effect.matches(outcome.decision))
            {
                continue;
            }

            debug!(obligation_id = %key.obligation_id, decision = %outcome.decision, "applying obligation");
            catch_unwind(AssertUnwindSafe(|| handler.apply(request, outcome, obligation)))
                .unwrap_or_else(|_| {
                    warn!(obligation_id = %key.obligation_id, "obligation handler panicked");
                    Err(ObligationError::new(key.obligation_id.as_str(), "handler panicked"))
                })?;
            arbiter_telemetry::metrics::record_obligation_applied(&key.obligation_id);
            applied.push(key.obligation_id.clone());
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Decision;
    use parking_lot::Mutex;

    fn recording(
        id: &str,
        precedence: i32,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn ObligationHandler> {
        let log = Arc::clone(log);
        let name = id.to_string();
        Arc::new(
            FnObligationHandler::new(id, move |_, _, _| {
                log.lock().push(name.clone());
                Ok(())
            })
            .with_precedence(precedence),
        )
    }

    fn outcome(decision: Decision, obligations: &[(&str, FulfillOn)]) -> EvaluationOutcome {
        EvaluationOutcome::new(
            decision,
            obligations
                .iter()
                .map(|(id, effect)| Obligation::new(*id, *effect))
                .collect(),
            None,
        )
    }

    #[test]
    fn test_order_by_precedence_then_id() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObligationRegistry::new();
        registry.register(recording("B", 2, &log)).unwrap();
        registry.register(recording("A", 2, &log)).unwrap();
        registry.register(recording("C", 1, &log)).unwrap();

        let outcome = outcome(
            Decision::Permit,
            &[("A", FulfillOn::Permit), ("B", FulfillOn::Permit), ("C", FulfillOn::Permit)],
        );
        let request = AuthorizationRequest::builder().build();
        let applied = registry.process(&request, &outcome).unwrap();

        assert_eq!(applied, vec!["C", "A", "B"]);
        assert_eq!(*log.lock(), vec!["C", "A", "B"]);
    }

    #[test]
    fn test_register_same_instance_is_noop() {
        let registry = ObligationRegistry::new();
        let handler = recording("log-it", 0, &Arc::new(Mutex::new(Vec::new())));
        registry.register(Arc::clone(&handler)).unwrap();
        registry.register(Arc::clone(&handler)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_distinct_instance_same_id_fails() {
        let registry = ObligationRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording("log-it", 0, &log)).unwrap();
        let err = registry.register(recording("log-it", 5, &log)).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateHandler {
                obligation_id: "log-it".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_then_replace() {
        let registry = ObligationRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recording("log-it", 0, &log);
        registry.register(Arc::clone(&first)).unwrap();
        assert!(registry.unregister(&first));
        assert!(!registry.unregister(&first));
        registry.register(recording("log-it", 3, &log)).unwrap();
        assert!(registry.contains("log-it"));
    }

    #[test]
    fn test_unregister_other_instance_is_noop() {
        let registry = ObligationRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording("log-it", 0, &log)).unwrap();
        let other = recording("log-it", 0, &log);
        assert!(!registry.unregister(&other));
        assert!(registry.contains("log-it"));
        assert!(registry.unregister_id("log-it"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handlers_without_effective_obligation_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObligationRegistry::new();
        registry.register(recording("on-permit", 0, &log)).unwrap();
        registry.register(recording("on-deny", 0, &log)).unwrap();
        registry.register(recording("unrelated", 0, &log)).unwrap();

        let outcome = outcome(
            Decision::Permit,
            &[("on-permit", FulfillOn::Permit), ("on-deny", FulfillOn::Deny)],
        );
        let request = AuthorizationRequest::builder().build();
        registry.process(&request, &outcome).unwrap();

        assert_eq!(*log.lock(), vec!["on-permit"]);
    }

    #[test]
    fn test_handler_effect_restriction() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObligationRegistry::new();
        let logged = Arc::clone(&log);
        registry
            .register(Arc::new(
                FnObligationHandler::new("audit", move |_, _, _| {
                    logged.lock().push("audit".to_string());
                    Ok(())
                })
                .with_fulfill_on(FulfillOn::Deny),
            ))
            .unwrap();

        let request = AuthorizationRequest::builder().build();
        let permit = outcome(Decision::Permit, &[("audit", FulfillOn::Permit)]);
        registry.process(&request, &permit).unwrap();
        assert!(log.lock().is_empty());

        let deny = outcome(Decision::Deny, &[("audit", FulfillOn::Deny)]);
        registry.process(&request, &deny).unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_failing_handler_aborts_processing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObligationRegistry::new();
        registry
            .register(Arc::new(
                FnObligationHandler::new("first", |_, _, obligation| {
                    Err(ObligationError::new(&obligation.obligation_id, "account map unavailable"))
                })
                .with_precedence(1),
            ))
            .unwrap();
        registry.register(recording("second", 2, &log)).unwrap();

        let outcome = outcome(
            Decision::Permit,
            &[("first", FulfillOn::Permit), ("second", FulfillOn::Permit)],
        );
        let request = AuthorizationRequest::builder().build();
        let err = registry.process(&request, &outcome).unwrap_err();

        assert_eq!(err.obligation_id, "first");
        assert!(log.lock().is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_panicking_handler_is_an_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObligationRegistry::new();
        registry
            .register(Arc::new(
                FnObligationHandler::new("boom", |_, _, _| panic!("handler exploded"))
                    .with_precedence(1),
            ))
            .unwrap();
        registry.register(recording("later", 2, &log)).unwrap();

        let outcome = outcome(
            Decision::Permit,
            &[("boom", FulfillOn::Permit), ("later", FulfillOn::Permit)],
        );
        let request = AuthorizationRequest::builder().build();
        let err = registry.process(&request, &outcome).unwrap_err();

        assert_eq!(err.obligation_id, "boom");
        assert_eq!(err.message, "handler panicked");
        assert!(log.lock().is_empty());

        // the registry stays usable after the panic
        registry.register(recording("after", 0, &log)).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_handler_receives_assignments() {
        let seen = Arc::new(Mutex::new(None));
        let captured = Arc::clone(&seen);
        let registry = ObligationRegistry::new();
        registry
            .register(Arc::new(FnObligationHandler::new(
                "map-account",
                move |_, _, obligation| {
                    *captured.lock() = obligation.assignments.get("pool").cloned();
                    Ok(())
                },
            )))
            .unwrap();

        let outcome = EvaluationOutcome::new(
            Decision::Permit,
            vec![Obligation::new("map-account", FulfillOn::Permit).with_assignment("pool", "atlas")],
            None,
        );
        let request = AuthorizationRequest::builder().build();
        registry.process(&request, &outcome).unwrap();
        assert_eq!(seen.lock().as_deref(), Some("atlas"));
    }
}
