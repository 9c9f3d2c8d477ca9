use std::{any::Any, future::Future, sync::Arc};

use futures::future::BoxFuture;

use crate::{Result, ServiceContext, io::Value, io::ValueType};

/// How a method's results are written into the response.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// `R` followed by nil, the single result, or a list of all results.
    #[default]
    Normal,
    /// `R` followed by the first result, which is already serialized.
    Serialized,
    /// Like `Serialized`, but never echoes by-ref arguments.
    Raw,
    /// The first result is the complete, end-tagged response.
    RawWithEndTag,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOptions {
    pub mode: ResultMode,
    /// Encode results without back-references.
    pub simple: bool,
    /// Run detached and answer immediately with an empty result.
    pub oneway: bool,
    /// Honour the client's by-ref marker.
    pub by_ref: bool,
    /// Registered names become `"<namespace>_<name>"`.
    pub namespace: Option<String>,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            mode: ResultMode::Normal,
            simple: false,
            oneway: false,
            by_ref: true,
            namespace: None,
        }
    }
}

/// Declared parameters of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ValueType>,
    variadic: Option<ValueType>,
}

impl Signature {
    #[must_use]
    pub fn new(params: impl IntoIterator<Item = ValueType>) -> Self {
        Self {
            params: params.into_iter().collect(),
            variadic: None,
        }
    }

    /// Fixed parameters followed by any number of `element` arguments.
    #[must_use]
    pub fn variadic(params: impl IntoIterator<Item = ValueType>, element: ValueType) -> Self {
        Self {
            params: params.into_iter().collect(),
            variadic: Some(element),
        }
    }

    /// The fixed (non-variadic) parameter types.
    #[must_use]
    pub fn params(&self) -> &[ValueType] {
        &self.params
    }

    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }

    /// Type of the `index`-th wire argument.
    #[must_use]
    pub fn param_type(&self, index: usize) -> &ValueType {
        self.params
            .get(index)
            .or(self.variadic.as_ref())
            .unwrap_or(&ValueType::Any)
    }
}

/// A context object bound to a trailing parameter instead of a wire value.
#[derive(Clone)]
pub enum Carrier {
    Context(ServiceContext),
    Transport(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for Carrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Carrier::Context(ctx) => f.debug_tuple("Context").field(ctx).finish(),
            Carrier::Transport(_) => f.write_str("Transport"),
        }
    }
}

/// Arguments of one call.
///
/// Dereferences to the argument values; functions may modify them in place,
/// and the modified values are echoed back to by-ref callers.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<Value>,
    carrier: Option<Carrier>,
}

impl Args {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            carrier: None,
        }
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn carrier(&self) -> Option<&Carrier> {
        self.carrier.as_ref()
    }

    /// The call context bound to the trailing parameter, if any.
    #[must_use]
    pub fn context(&self) -> Option<&ServiceContext> {
        match &self.carrier {
            Some(Carrier::Context(ctx)) => Some(ctx),
            _ => None,
        }
    }

    /// The transport object bound to the trailing parameter, if it is a `T`.
    #[must_use]
    pub fn transport<T: Any>(&self) -> Option<&T> {
        match &self.carrier {
            Some(Carrier::Transport(t)) => t.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Binds the trailing parameter to a context object.
    pub fn fix(&mut self, carrier: Carrier) {
        self.carrier = Some(carrier);
    }

    pub(crate) fn split_off(&mut self, at: usize) -> Vec<Value> {
        self.values.split_off(at)
    }

    pub(crate) fn extend(&mut self, values: Vec<Value>) {
        self.values.extend(values);
    }

    /// # Errors
    ///
    /// Fails if the argument is missing or not an integer.
    pub fn int(&self, index: usize) -> Result<i64> {
        self.values
            .get(index)
            .and_then(Value::as_i64)
            .ok_or_else(|| arg_error(index, "int"))
    }

    /// # Errors
    ///
    /// Fails if the argument is missing or not a string.
    pub fn str(&self, index: usize) -> Result<&str> {
        self.values
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| arg_error(index, "string"))
    }
}

fn arg_error(index: usize, expected: &str) -> crate::Error {
    crate::Error::new(
        crate::ErrorKind::InvalidArgument,
        format!("argument {index} is not a {expected}"),
    )
}

impl std::ops::Deref for Args {
    type Target = [Value];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl std::ops::DerefMut for Args {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.values
    }
}

/// A callable registered under a name.
///
/// `name` is the name the client used, which matters to wildcard handlers.
pub trait Function: Send + Sync + 'static {
    fn call<'a>(&'a self, name: &'a str, args: &'a mut Args) -> BoxFuture<'a, Result<Vec<Value>>>;
}

struct SyncFn<F>(F);

impl<F> Function for SyncFn<F>
where
    F: Fn(&mut Args) -> Result<Vec<Value>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, _: &'a str, args: &'a mut Args) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move { (self.0)(args) })
    }
}

struct AsyncFn<F>(F);

impl<F, Fut> Function for AsyncFn<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
{
    fn call<'a>(&'a self, _: &'a str, args: &'a mut Args) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move { (self.0)(args.clone()).await })
    }
}

struct MissingFn<F>(F);

impl<F> Function for MissingFn<F>
where
    F: Fn(&str, &mut Args) -> Result<Vec<Value>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, name: &'a str, args: &'a mut Args) -> BoxFuture<'a, Result<Vec<Value>>> {
        Box::pin(async move { (self.0)(name, args) })
    }
}

/// Descriptor of one registered callable.
pub struct Method {
    function: Arc<dyn Function>,
    signature: Signature,
    options: MethodOptions,
    missing: bool,
}

impl Method {
    pub fn new(signature: Signature, function: impl Function) -> Self {
        Self {
            function: Arc::new(function),
            signature,
            options: MethodOptions::default(),
            missing: false,
        }
    }

    /// A synchronous function. Changes it makes to its arguments are
    /// visible to by-ref callers.
    ///
    /// ```rust
    /// # use hprose::{Method, Signature, io::ValueType};
    /// let add = Method::sync(Signature::new([ValueType::Int, ValueType::Int]), |args| {
    ///     Ok(vec![(args.int(0)? + args.int(1)?).into()])
    /// });
    /// assert_eq!(add.signature().params().len(), 2);
    /// ```
    pub fn sync<F>(signature: Signature, f: F) -> Self
    where
        F: Fn(&mut Args) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self::new(signature, SyncFn(f))
    }

    /// An asynchronous function. It receives a copy of the arguments.
    pub fn future<F, Fut>(signature: Signature, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        Self::new(signature, AsyncFn(f))
    }

    /// A wildcard handler receiving the requested name and every argument
    /// undecoded by type.
    pub fn missing<F>(f: F) -> Self
    where
        F: Fn(&str, &mut Args) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Self {
            missing: true,
            ..Self::new(Signature::default(), MissingFn(f))
        }
    }

    pub(crate) fn into_missing(mut self) -> Self {
        self.missing = true;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: MethodOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ResultMode) -> Self {
        self.options.mode = mode;
        self
    }

    #[must_use]
    pub fn oneway(mut self) -> Self {
        self.options.oneway = true;
        self
    }

    #[must_use]
    pub fn function(&self) -> &Arc<dyn Function> {
        &self.function
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[must_use]
    pub fn options(&self) -> &MethodOptions {
        &self.options
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.missing
    }
}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature)
            .field("options", &self.options)
            .field("missing", &self.missing)
            .finish_non_exhaustive()
    }
}
