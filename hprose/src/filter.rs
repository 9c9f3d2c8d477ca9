use bytes::Bytes;

use crate::ServiceContext;

/// A byte-level transform applied to every request and response.
///
/// On input, filters run from the last registered to the first; on output,
/// from the first to the last. A chain of inverse transforms therefore
/// nests correctly.
pub trait Filter: Send + Sync {
    fn input_filter(&self, data: Bytes, ctx: &ServiceContext) -> Bytes;

    fn output_filter(&self, data: Bytes, ctx: &ServiceContext) -> Bytes;
}
