//! The environment shared by every call of one top-level invocation.

use crate::ledger::errors::LedgerError;
use crate::ledger::writer::{RowChange, StateWriter};
use crate::storage::storage_trait::Storage;
use crate::virtual_machine::value::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Database session used by contracts to change ledger state.
pub trait Session: Send + Sync {
    /// Applies one row change and returns the row's key.
    fn apply(&self, change: &RowChange) -> Result<String, LedgerError>;
}

impl<S: Storage + ?Sized> Session for StateWriter<S> {
    fn apply(&self, change: &RowChange) -> Result<String, LedgerError> {
        self.apply_change(change)
    }
}

/// Environment variable holding the name of the calling contract.
pub const PARENT_VAR: &str = "parent";

/// Observer called when a contract starts (with its name) and ends (with an
/// empty name).
pub type Tracer = Arc<dyn Fn(&dyn Session, &str) + Send + Sync>;

/// Typed environment of an invocation.
///
/// Contract parameters and `$name` variables live in `values`. The set of
/// running contracts guards against recursion.
#[derive(Default)]
pub struct Extend {
    pub values: HashMap<String, Value>,
    /// State used to qualify bare contract names.
    pub state: Option<u32>,
    pub session: Option<Arc<dyn Session>>,
    pub tracer: Option<Tracer>,
    /// Contract that called the running one. Contract code reads it as
    /// `$parent`.
    pub parent: String,
    active: HashSet<String>,
}

impl Extend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: u32) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    /// Whether `contract` is running in this invocation.
    pub fn is_active(&self, contract: &str) -> bool {
        self.active.contains(contract)
    }

    /// Marks `contract` as running; false when it already was.
    pub(crate) fn enter(&mut self, contract: &str) -> bool {
        self.active.insert(contract.to_string())
    }

    pub(crate) fn leave(&mut self, contract: &str) {
        self.active.remove(contract);
    }

    /// Sets the calling contract and returns the previous one.
    pub(crate) fn replace_parent(&mut self, parent: String) -> String {
        self.values.insert(PARENT_VAR.to_string(), Value::Str(parent.clone()));
        std::mem::replace(&mut self.parent, parent)
    }

    pub(crate) fn trace(&self, name: &str) {
        if let (Some(session), Some(tracer)) = (&self.session, &self.tracer) {
            tracer(session.as_ref(), name);
        }
    }
}

impl fmt::Debug for Extend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extend")
            .field("values", &self.values)
            .field("state", &self.state)
            .field("session", &self.session.is_some())
            .field("parent", &self.parent)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::ledger;
    use std::sync::Mutex;

    #[test]
    fn parent_is_visible_to_contract_code() {
        let mut extend = Extend::new();
        assert_eq!(extend.replace_parent("@1Outer".into()), "");
        assert_eq!(extend.parent, "@1Outer");
        assert_eq!(extend.get(PARENT_VAR), Some(&Value::Str("@1Outer".into())));
        assert_eq!(extend.replace_parent(String::new()), "@1Outer");
        assert_eq!(extend.get(PARENT_VAR), Some(&Value::Str(String::new())));
    }

    #[test]
    fn recursion_guard_tracks_running_contracts() {
        let mut extend = Extend::new();
        assert!(extend.enter("@1A"));
        assert!(!extend.enter("@1A"));
        assert!(extend.is_active("@1A"));
        extend.leave("@1A");
        assert!(!extend.is_active("@1A"));
    }

    #[test]
    fn tracer_needs_a_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracer: Tracer = Arc::new(move |_: &dyn Session, name: &str| {
            sink.lock().unwrap().push(name.to_string())
        });

        let extend = Extend::new().with_tracer(tracer.clone());
        extend.trace("@1A");
        assert!(seen.lock().unwrap().is_empty());

        let writer = Arc::new(StateWriter::new(ledger()));
        let extend = Extend::new().with_tracer(tracer).with_session(writer);
        extend.trace("@1A");
        assert_eq!(*seen.lock().unwrap(), vec!["@1A".to_string()]);
    }

    #[test]
    fn writer_is_a_session() {
        let session: Arc<dyn Session> = Arc::new(StateWriter::new(ledger()));
        let id = session.apply(&RowChange::new("accounts").set("balance", "1")).unwrap();
        assert_eq!(id, "1");
    }
}
