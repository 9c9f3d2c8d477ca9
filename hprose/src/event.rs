use crate::{Args, Error, Result, ServiceContext, io::Value};

/// Optional lifecycle hooks. Every hook has a no-op default, so an
/// implementation overrides only what it observes.
///
/// Hooks run inside a fault boundary: a panicking hook is reported like an
/// error returned by it.
pub trait ServiceEvent: Send + Sync {
    /// Called before the handler chain runs. An error skips the call and is
    /// sent to the client.
    fn on_before_invoke(
        &self,
        _name: &str,
        _args: &Args,
        _by_ref: bool,
        _ctx: &ServiceContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after a successful call, before its results are encoded.
    fn on_after_invoke(
        &self,
        _name: &str,
        _args: &Args,
        _by_ref: bool,
        _results: &[Value],
        _ctx: &ServiceContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Observes, and may replace, every error about to be sent.
    fn on_send_error(&self, error: Error, _ctx: &ServiceContext) -> Error {
        error
    }

    /// A transport accepted a connection. An error rejects it.
    fn on_accept(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    /// A connection closed.
    fn on_close(&self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }
}
