use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;

use crate::{
    Args, DefaultFixer, Error, ErrorKind, Filter, FilterHandler, Fixer, InvokeHandler, Method,
    MethodOptions, NextFilter, NextInvoke, Registry, Result, ResultMode, ServiceConfig,
    ServiceContext, ServiceEvent, Signature, fault,
    handler::FilterStage,
    io::{Reader, Value, Writer, tags::*},
    registry::WILDCARD,
};

/// The request dispatch engine.
///
/// A `Service` is configured through `&mut self` methods and then shared,
/// usually behind an `Arc`, by whatever transport feeds it requests.
///
/// # Examples
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() {
/// use hprose::{Method, Service, ServiceContext, Signature, io::ValueType};
///
/// let mut service = Service::default();
/// service.add_function(
///     "hello",
///     Method::sync(Signature::new([ValueType::String]), |args| {
///         Ok(vec![format!("Hello {}!", args.str(0)?).into()])
///     }),
/// );
///
/// let mut ctx = ServiceContext::new();
/// let response = service.handle("Cs5\"hello\"a1{s5\"world\"}z".into(), &mut ctx).await;
/// assert_eq!(&response[..], b"Rs12\"Hello world!\"z");
/// # }
/// ```
pub struct Service {
    config: ServiceConfig,
    registry: Registry,
    filters: Vec<Arc<dyn Filter>>,
    invoke_handlers: Vec<Arc<dyn InvokeHandler>>,
    before_filter_handlers: Vec<Arc<dyn FilterHandler>>,
    after_filter_handlers: Vec<Arc<dyn FilterHandler>>,
    event: Option<Arc<dyn ServiceEvent>>,
    fixer: Arc<dyn Fixer>,
}

/// The encoded result of one method frame.
struct SubResult {
    bytes: Bytes,
    /// Carries its own end tag.
    terminated: bool,
}

impl SubResult {
    fn plain(bytes: Bytes) -> Self {
        Self {
            bytes,
            terminated: false,
        }
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

impl Service {
    /// Creates a service with the built-in `#` function, which hands out a
    /// fresh random identifier to clients that need one.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        let mut service = Self {
            config,
            registry: Registry::default(),
            filters: Vec::new(),
            invoke_handlers: Vec::new(),
            before_filter_handlers: Vec::new(),
            after_filter_handlers: Vec::new(),
            event: None,
            fixer: Arc::new(DefaultFixer),
        };
        let options = MethodOptions {
            simple: true,
            ..Default::default()
        };
        service.add_function(
            "#",
            Method::sync(Signature::default(), |_| {
                Ok(vec![uuid::Uuid::new_v4().to_string().into()])
            })
            .with_options(options),
        );
        service
    }

    /// The configuration the service was created with.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The registered methods, including the built-in `#`.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publishes `method` under `name`, prefixed by the method's namespace
    /// if it has one. Names are matched case-insensitively; registering a
    /// name again replaces the previous method.
    ///
    /// # Returns
    ///
    /// `self`, for chaining.
    pub fn add_function(&mut self, name: &str, method: Method) -> &mut Self {
        self.registry.add(name, method);
        self
    }

    /// Registers the wildcard handler for names with no registered method.
    /// It receives every argument the client sent, untyped.
    pub fn add_missing_method(&mut self, method: Method) -> &mut Self {
        self.registry.add(WILDCARD, method.into_missing());
        self
    }

    /// Unpublishes `name`. Unknown names are ignored.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.registry.remove(name);
        self
    }

    /// Appends a filter. Requests pass the filters last-added first;
    /// responses pass them in the order they were added.
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) -> &mut Self {
        self.filters.push(filter);
        self
    }

    /// Replaces every filter.
    pub fn set_filters(&mut self, filters: Vec<Arc<dyn Filter>>) -> &mut Self {
        self.filters = filters;
        self
    }

    /// # Returns
    ///
    /// The filter at `index`, or `None` if there is none.
    #[must_use]
    pub fn filter(&self, index: usize) -> Option<&Arc<dyn Filter>> {
        self.filters.get(index)
    }

    #[must_use]
    pub fn filters(&self) -> &[Arc<dyn Filter>] {
        &self.filters
    }

    /// Removes `filter`, compared by identity.
    pub fn remove_filter(&mut self, filter: &Arc<dyn Filter>) -> &mut Self {
        self.filters.retain(|f| !Arc::ptr_eq(f, filter));
        self
    }

    /// Removes the filter at `index`, if any.
    pub fn remove_filter_by_index(&mut self, index: usize) -> &mut Self {
        if index < self.filters.len() {
            self.filters.remove(index);
        }
        self
    }

    /// Appends a handler wrapped around every function call. Handlers run
    /// in the order they were added; each decides whether to call `next`.
    pub fn add_invoke_handler(&mut self, handler: impl InvokeHandler + 'static) -> &mut Self {
        self.invoke_handlers.push(Arc::new(handler));
        self
    }

    /// Appends a handler that sees the raw request before the input
    /// filters and the raw response after the output filters.
    pub fn add_before_filter_handler(&mut self, handler: impl FilterHandler + 'static) -> &mut Self {
        self.before_filter_handlers.push(Arc::new(handler));
        self
    }

    /// Appends a handler that sees the filtered request before it is
    /// decoded and the response before the output filters.
    pub fn add_after_filter_handler(&mut self, handler: impl FilterHandler + 'static) -> &mut Self {
        self.after_filter_handlers.push(Arc::new(handler));
        self
    }

    /// Installs the event callbacks, replacing any previous ones.
    pub fn set_event(&mut self, event: Arc<dyn ServiceEvent>) -> &mut Self {
        self.event = Some(event);
        self
    }

    /// The installed event callbacks, if any.
    #[must_use]
    pub fn event(&self) -> Option<&Arc<dyn ServiceEvent>> {
        self.event.as_ref()
    }

    /// Replaces the fixer that binds context parameters.
    /// [`SocketService`](crate::SocketService) installs its own.
    pub fn set_fixer(&mut self, fixer: impl Fixer + 'static) -> &mut Self {
        self.fixer = Arc::new(fixer);
        self
    }

    /// Processes one request and produces its response.
    ///
    /// Never fails: every error, including a panic in user code, is encoded
    /// into the response.
    pub async fn handle(&self, request: Bytes, ctx: &mut ServiceContext) -> Bytes {
        let result = fault::guard_async(self.run_filter(FilterStage::Before, 0, request, ctx)).await;
        match result {
            Ok(response) => response,
            Err(err) => self.end_error(err, ctx),
        }
    }

    pub(crate) fn run_filter<'a>(
        &'a self,
        stage: FilterStage,
        index: usize,
        request: Bytes,
        ctx: &'a mut ServiceContext,
    ) -> BoxFuture<'a, Result<Bytes>> {
        let handlers = match stage {
            FilterStage::Before => &self.before_filter_handlers,
            FilterStage::After => &self.after_filter_handlers,
        };
        match handlers.get(index) {
            Some(handler) => {
                let next = NextFilter {
                    service: self,
                    stage,
                    index: index + 1,
                };
                handler.handle(request, ctx, next)
            }
            None => match stage {
                FilterStage::Before => Box::pin(self.before_filter(request, ctx)),
                FilterStage::After => Box::pin(self.after_filter(request, ctx)),
            },
        }
    }

    pub(crate) fn run_invoke<'a>(
        &'a self,
        index: usize,
        name: &'a str,
        args: &'a mut Args,
        ctx: &'a mut ServiceContext,
    ) -> BoxFuture<'a, Result<Vec<Value>>> {
        match self.invoke_handlers.get(index) {
            Some(handler) => {
                let next = NextInvoke {
                    service: self,
                    index: index + 1,
                };
                handler.handle(name, args, ctx, next)
            }
            None => Box::pin(self.invoke(name, args, ctx)),
        }
    }

    async fn before_filter(&self, request: Bytes, ctx: &mut ServiceContext) -> Result<Bytes> {
        let request = self.input_filter(request, ctx)?;
        let result = fault::guard_async(self.run_filter(FilterStage::After, 0, request, ctx)).await;
        let response = match result {
            Ok(response) => response,
            Err(err) => self.delay_error(err, ctx).await,
        };
        self.output_filter(response, ctx)
    }

    async fn after_filter(&self, request: Bytes, ctx: &mut ServiceContext) -> Result<Bytes> {
        let mut reader = Reader::new(request.clone());
        match reader.read_byte()? {
            TAG_CALL => self.do_invoke(&mut reader, ctx).await,
            TAG_END => Ok(self.do_function_list()),
            _ => {
                tracing::warn!("wrong request of {} bytes", request.len());
                Err(Error::new(
                    ErrorKind::WrongRequest,
                    format!("Wrong Request: \r\n{}", String::from_utf8_lossy(&request)),
                ))
            }
        }
    }

    fn input_filter(&self, data: Bytes, ctx: &ServiceContext) -> Result<Bytes> {
        self.filters.iter().rev().try_fold(data, |data, filter| {
            fault::guard(|| Ok(filter.input_filter(data, ctx)))
        })
    }

    fn output_filter(&self, data: Bytes, ctx: &ServiceContext) -> Result<Bytes> {
        self.filters.iter().try_fold(data, |data, filter| {
            fault::guard(|| Ok(filter.output_filter(data, ctx)))
        })
    }

    fn do_function_list(&self) -> Bytes {
        let mut writer = Writer::new(true);
        writer.write_byte(TAG_FUNCTIONS);
        writer.write_string_slice(self.registry.names());
        writer.write_byte(TAG_END);
        writer.into_bytes()
    }

    async fn do_invoke(&self, reader: &mut Reader, ctx: &mut ServiceContext) -> Result<Bytes> {
        let mut results = Vec::new();
        loop {
            let (result, tag) = self.do_single_invoke(reader, ctx).await?;
            results.push(result);
            if tag != TAG_CALL {
                break;
            }
            reader.reset();
        }
        Ok(merge_results(results))
    }

    /// Decodes and runs one method frame. Returns its encoded result and the
    /// tag that terminated the frame.
    ///
    /// Only decoding errors escape; failures of the call itself become an
    /// error sub-result.
    async fn do_single_invoke(
        &self,
        reader: &mut Reader,
        ctx: &mut ServiceContext,
    ) -> Result<(SubResult, u8)> {
        ctx.begin_call();
        let name = reader.read_string()?;
        let method = self.registry.lookup(&name).cloned();

        let mut values = Vec::new();
        let mut by_ref = false;
        let mut tag = reader.check_tags(&[TAG_LIST, TAG_END, TAG_CALL])?;
        if tag == TAG_LIST {
            reader.reset();
            values = read_arguments(reader, method.as_deref())?;
            tag = reader.check_tags(&[TAG_TRUE, TAG_END, TAG_CALL])?;
            if tag == TAG_TRUE {
                by_ref = true;
                tag = reader.check_tags(&[TAG_END, TAG_CALL])?;
            }
        }

        let (method, missing) = match method {
            Some(method) => (method, false),
            None => match self.registry.wildcard() {
                Some(wildcard) => (wildcard.clone(), true),
                None => {
                    tracing::warn!("method not found: {name}");
                    let err = Error::new(ErrorKind::MethodNotFound, format!("method not found: {name}"));
                    return Ok((SubResult::plain(self.send_error(err, ctx)), tag));
                }
            },
        };
        ctx.resolve(method.clone(), missing, by_ref);

        let mut args = if missing {
            Args::new(values)
        } else {
            self.bind_arguments(values, &method, ctx)
        };
        let result = match self.before_invoke(&name, &mut args, ctx).await {
            Ok(result) => result,
            Err(err) => SubResult::plain(self.send_error(err, ctx)),
        };
        Ok((result, tag))
    }

    /// Fills slots the client did not send with their defaults, and lets the
    /// fixer bind the trailing slot to a context object.
    fn bind_arguments(&self, mut values: Vec<Value>, method: &Method, ctx: &ServiceContext) -> Args {
        let signature = method.signature();
        let n = signature.params().len();
        let count = values.len();
        if n > count {
            values.extend(signature.params()[count..].iter().map(|ty| ty.default_value()));
        }
        let mut args = Args::new(values);
        if !signature.is_variadic()
            && n > count
            && let Some(last) = signature.params().last()
        {
            self.fixer.fix_arguments(last, &mut args, ctx);
        }
        args
    }

    async fn before_invoke(
        &self,
        name: &str,
        args: &mut Args,
        ctx: &mut ServiceContext,
    ) -> Result<SubResult> {
        self.fire_before_invoke(name, args, ctx)?;
        let results = fault::guard_async(self.run_invoke(0, name, args, ctx)).await?;
        self.fire_after_invoke(name, args, &results, ctx)?;
        self.do_output(args, &results, ctx)
    }

    /// The last link of the invoke chain: calls the resolved function.
    async fn invoke(&self, name: &str, args: &mut Args, ctx: &mut ServiceContext) -> Result<Vec<Value>> {
        let Some(method) = ctx.method().cloned() else {
            return Err(Error::new(
                ErrorKind::MethodNotFound,
                format!("method not found: {name}"),
            ));
        };
        if ctx.is_oneway() {
            let mut args = args.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                let result = fault::guard_async(call_function(&method, &name, &mut args)).await;
                if let Err(err) = result {
                    tracing::debug!("oneway call {name} failed: {err}");
                }
            });
            return Ok(Vec::new());
        }
        fault::guard_async(call_function(&method, name, args)).await
    }

    fn do_output(&self, args: &Args, results: &[Value], ctx: &ServiceContext) -> Result<SubResult> {
        let Some(method) = ctx.method() else {
            return Err(Error::kind(ErrorKind::MethodNotFound));
        };
        let options = method.options();
        let mut writer = Writer::new(options.simple || self.config.simple);
        let mode = if ctx.is_oneway() {
            ResultMode::Normal
        } else {
            options.mode
        };
        match mode {
            ResultMode::RawWithEndTag => {
                return Ok(SubResult {
                    bytes: raw_result(results)?,
                    terminated: true,
                });
            }
            ResultMode::Raw => {
                writer.write_byte(TAG_RESULT);
                writer.write_raw(&raw_result(results)?);
                return Ok(SubResult::plain(writer.into_bytes()));
            }
            ResultMode::Serialized => {
                writer.write_byte(TAG_RESULT);
                writer.write_raw(&raw_result(results)?);
            }
            ResultMode::Normal => {
                writer.write_byte(TAG_RESULT);
                match results {
                    [] => writer.write_nil(),
                    [value] => writer.write_value(value),
                    values => writer.write_slice(values),
                }
            }
        }
        if ctx.is_by_ref() {
            writer.write_byte(TAG_ARGUMENT);
            writer.reset();
            writer.write_slice(args.values());
        }
        Ok(SubResult::plain(writer.into_bytes()))
    }

    fn send_error(&self, err: Error, ctx: &ServiceContext) -> Bytes {
        let err = self.fire_error_event(err, ctx);
        let mut writer = Writer::new(true);
        writer.write_byte(TAG_ERROR);
        writer.write_string(&err.wire_message(self.config.debug));
        writer.into_bytes()
    }

    fn end_error(&self, err: Error, ctx: &ServiceContext) -> Bytes {
        let mut writer = Writer::with_bytes(&self.send_error(err, ctx));
        writer.write_byte(TAG_END);
        writer.into_bytes()
    }

    async fn delay_error(&self, err: Error, ctx: &ServiceContext) -> Bytes {
        tracing::warn!("request failed: {err}");
        let response = self.end_error(err, ctx);
        if !self.config.error_delay.is_zero() {
            tokio::time::sleep(self.config.error_delay).await;
        }
        response
    }

    fn fire_before_invoke(&self, name: &str, args: &Args, ctx: &ServiceContext) -> Result<()> {
        match &self.event {
            Some(event) => fault::guard(|| event.on_before_invoke(name, args, ctx.is_by_ref(), ctx)),
            None => Ok(()),
        }
    }

    fn fire_after_invoke(
        &self,
        name: &str,
        args: &Args,
        results: &[Value],
        ctx: &ServiceContext,
    ) -> Result<()> {
        match &self.event {
            Some(event) => fault::guard(|| {
                event.on_after_invoke(name, args, ctx.is_by_ref(), results, ctx)
            }),
            None => Ok(()),
        }
    }

    /// Lets the event observe or replace an error. A panicking event yields
    /// the panic error instead.
    pub(crate) fn fire_error_event(&self, err: Error, ctx: &ServiceContext) -> Error {
        match &self.event {
            Some(event) => {
                fault::guard(|| Ok(event.on_send_error(err, ctx))).unwrap_or_else(|panic| panic)
            }
            None => err,
        }
    }

    pub(crate) fn fire_accept_event(&self, ctx: &ServiceContext) -> Result<()> {
        match &self.event {
            Some(event) => fault::guard(|| event.on_accept(ctx)),
            None => Ok(()),
        }
    }

    pub(crate) fn fire_close_event(&self, ctx: &ServiceContext) -> Result<()> {
        match &self.event {
            Some(event) => fault::guard(|| event.on_close(ctx)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("filters", &self.filters.len())
            .field("invoke_handlers", &self.invoke_handlers.len())
            .field("before_filter_handlers", &self.before_filter_handlers.len())
            .field("after_filter_handlers", &self.after_filter_handlers.len())
            .field("event", &self.event.is_some())
            .finish_non_exhaustive()
    }
}

/// Decodes the argument list of a frame whose `a` tag was consumed. Known
/// methods get typed slots; unknown names are decoded untyped for the
/// wildcard handler.
fn read_arguments(reader: &mut Reader, method: Option<&Method>) -> Result<Vec<Value>> {
    let Some(method) = method else {
        return reader.read_slice_without_tag();
    };
    let count = reader.read_count()?;
    let signature = method.signature();
    reader.read_slice(count, |i| signature.param_type(i).clone())
}

/// Calls the function. A fixed-arity function only sees the arguments it
/// declares; the rest are put back afterwards so a by-ref echo keeps them.
async fn call_function(method: &Method, name: &str, args: &mut Args) -> Result<Vec<Value>> {
    let n = method.signature().params().len();
    if method.is_missing() || method.signature().is_variadic() || args.len() <= n {
        return method.function().call(name, args).await;
    }
    let extra = args.split_off(n);
    let result = method.function().call(name, args).await;
    args.extend(extra);
    result
}

fn raw_result(results: &[Value]) -> Result<Bytes> {
    match results.first() {
        Some(Value::Bytes(bytes)) => Ok(bytes.clone()),
        Some(Value::String(s)) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        other => Err(Error::new(
            ErrorKind::EncodeFailed,
            format!(
                "raw result must be bytes, got {}",
                other.map_or("nothing", Value::type_name)
            ),
        )),
    }
}

/// Concatenates sub-results and terminates the response, unless the last
/// sub-result already carries its own end tag.
fn merge_results(results: Vec<SubResult>) -> Bytes {
    let total = results.iter().map(|r| r.bytes.len()).sum::<usize>() + 1;
    let mut buf = BytesMut::with_capacity(total);
    let last = results.len().saturating_sub(1);
    let mut terminated = false;
    for (i, result) in results.into_iter().enumerate() {
        let bytes: &[u8] = &result.bytes;
        let bytes = if result.terminated && i != last {
            bytes.strip_suffix(&[TAG_END]).unwrap_or(bytes)
        } else {
            bytes
        };
        buf.extend_from_slice(bytes);
        terminated = result.terminated;
    }
    if !terminated {
        buf.put_u8(TAG_END);
    }
    buf.freeze()
}
