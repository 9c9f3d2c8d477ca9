use crate::{Args, Carrier, ServiceContext, io::ValueType};

/// Binds a function's trailing parameter to a context object when the client
/// sent fewer arguments than the function declares.
pub trait Fixer: Send + Sync {
    /// `last` is the declared type of the function's last parameter.
    fn fix_arguments(&self, last: &ValueType, args: &mut Args, ctx: &ServiceContext);
}

/// Binds parameters of type [`ValueType::Context`] or [`ValueType::Any`] to
/// the call context.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFixer;

impl Fixer for DefaultFixer {
    fn fix_arguments(&self, last: &ValueType, args: &mut Args, ctx: &ServiceContext) {
        if matches!(last, ValueType::Context | ValueType::Any) {
            args.fix(Carrier::Context(ctx.clone()));
        }
    }
}
