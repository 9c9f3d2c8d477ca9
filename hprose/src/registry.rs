use foldhash::fast::RandomState;
use std::{collections::HashMap, sync::Arc};

use crate::Method;

/// Name of the wildcard entry that receives calls to unknown methods.
pub const WILDCARD: &str = "*";

/// Methods keyed by lowercase alias, plus the published names in
/// registration order.
#[derive(Default)]
pub struct Registry {
    methods: HashMap<String, Arc<Method>, RandomState>,
    names: Vec<String>,
}

impl Registry {
    /// Registers `method` under `name`, prefixed by the method's namespace.
    ///
    /// Registering an alias again replaces the method but keeps the name's
    /// original position.
    pub fn add(&mut self, name: &str, method: Method) {
        let name = match &method.options().namespace {
            Some(namespace) if !namespace.is_empty() => format!("{namespace}_{name}"),
            _ => name.to_string(),
        };
        let alias = name.to_lowercase();
        if self.methods.insert(alias, Arc::new(method)).is_none() {
            self.names.push(name);
        } else {
            tracing::debug!("method {name} replaced");
        }
    }

    /// Removes the method published under `name`, case-insensitively.
    pub fn remove(&mut self, name: &str) {
        let alias = name.to_lowercase();
        if self.methods.remove(&alias).is_some() {
            self.names.retain(|n| n.to_lowercase() != alias);
        }
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods.get(&name.to_lowercase())
    }

    /// The handler registered under [`WILDCARD`], if any.
    #[must_use]
    pub fn wildcard(&self) -> Option<&Arc<Method>> {
        self.methods.get(WILDCARD)
    }

    /// Names as originally registered, in registration order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names)
            .finish()
    }
}
