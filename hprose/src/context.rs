use std::{any::Any, collections::HashMap, sync::Arc};

use foldhash::fast::RandomState;

use crate::{Method, io::Value};

/// Per-call state shared by filters, handlers, events and functions.
///
/// A transport creates one context per request and attaches itself as the
/// transport object. The engine fills in the resolved method and the call
/// flags while it dispatches.
#[derive(Clone, Default)]
pub struct ServiceContext {
    method: Option<Arc<Method>>,
    by_ref: bool,
    oneway: bool,
    missing_method: bool,
    transport: Option<Arc<dyn Any + Send + Sync>>,
    user_data: HashMap<String, Value, RandomState>,
}

impl ServiceContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying a transport object, such as a
    /// [`SocketContext`](crate::tcp::SocketContext).
    #[must_use]
    pub fn with_transport<T: Any + Send + Sync>(transport: Arc<T>) -> Self {
        Self {
            transport: Some(transport),
            ..Self::default()
        }
    }

    /// The method resolved for the current sub-call.
    #[must_use]
    pub fn method(&self) -> Option<&Arc<Method>> {
        self.method.as_ref()
    }

    /// Whether the client asked for its arguments back and the method allows it.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.by_ref
    }

    /// Whether the current sub-call runs detached from its response.
    #[must_use]
    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Whether the current sub-call was routed to the wildcard handler.
    #[must_use]
    pub fn is_missing_method(&self) -> bool {
        self.missing_method
    }

    /// The transport object, if there is one and it is a `T`.
    #[must_use]
    pub fn transport<T: Any>(&self) -> Option<&T> {
        self.transport.as_deref()?.downcast_ref::<T>()
    }

    #[must_use]
    pub fn transport_handle(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.transport.as_ref()
    }

    /// Stores user data that travels with the context.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.user_data.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.user_data.get(key)
    }

    pub(crate) fn begin_call(&mut self) {
        self.method = None;
        self.by_ref = false;
        self.oneway = false;
        self.missing_method = false;
    }

    pub(crate) fn resolve(&mut self, method: Arc<Method>, missing: bool, by_ref: bool) {
        self.by_ref = by_ref && method.options().by_ref;
        self.oneway = method.options().oneway;
        self.missing_method = missing;
        self.method = Some(method);
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("method", &self.method)
            .field("by_ref", &self.by_ref)
            .field("oneway", &self.oneway)
            .field("missing_method", &self.missing_method)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}
