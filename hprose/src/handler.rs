//! Middleware around the dispatch engine.
//!
//! Handlers form chains: each receives a `next` continuation and decides
//! whether, when and with what to call it. The last link of every chain is
//! the engine's own step.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::{Args, Result, Service, ServiceContext, io::Value};

/// Wraps each function call.
pub trait InvokeHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        name: &'a str,
        args: &'a mut Args,
        ctx: &'a mut ServiceContext,
        next: NextInvoke<'a>,
    ) -> BoxFuture<'a, Result<Vec<Value>>>;
}

/// Wraps request processing at the byte level.
///
/// A before-filter handler sees the raw request, ahead of input filters. An
/// after-filter handler sees the request after input filters have run.
pub trait FilterHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        request: Bytes,
        ctx: &'a mut ServiceContext,
        next: NextFilter<'a>,
    ) -> BoxFuture<'a, Result<Bytes>>;
}

/// The rest of an invoke chain.
#[derive(Clone, Copy)]
pub struct NextInvoke<'a> {
    pub(crate) service: &'a Service,
    pub(crate) index: usize,
}

impl<'a> NextInvoke<'a> {
    pub fn call<'b>(
        self,
        name: &'b str,
        args: &'b mut Args,
        ctx: &'b mut ServiceContext,
    ) -> BoxFuture<'b, Result<Vec<Value>>>
    where
        'a: 'b,
    {
        self.service.run_invoke(self.index, name, args, ctx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterStage {
    Before,
    After,
}

/// The rest of a filter chain.
#[derive(Clone, Copy)]
pub struct NextFilter<'a> {
    pub(crate) service: &'a Service,
    pub(crate) stage: FilterStage,
    pub(crate) index: usize,
}

impl<'a> NextFilter<'a> {
    pub fn call<'b>(self, request: Bytes, ctx: &'b mut ServiceContext) -> BoxFuture<'b, Result<Bytes>>
    where
        'a: 'b,
    {
        self.service
            .run_filter(self.stage, self.index, request, ctx)
    }
}

impl std::fmt::Debug for NextInvoke<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextInvoke")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for NextFilter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextFilter")
            .field("stage", &self.stage)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
