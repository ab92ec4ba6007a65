//! Argument and attachment assembly shared by transporters.

use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::arguments::ArgumentResolver;
use crate::context::Context;
use crate::core::error::{ResolveError, ResolveResult};
use crate::core::types::Argument;

/// Resolve call arguments into `(type_names, values)`
///
/// Arguments of an unsupported kind are logged and skipped; any other
/// resolution failure aborts the whole call.
pub fn assemble_arguments(
    resolver: &ArgumentResolver,
    ctx: &Context,
    arguments: &[Argument],
) -> ResolveResult<(Vec<String>, Vec<Value>)> {
    let mut types = Vec::with_capacity(arguments.len());
    let mut values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        match resolver.resolve(argument, ctx) {
            Ok(value) => {
                types.push(argument.class.clone());
                values.push(value);
            }
            Err(ResolveError::UnsupportedArgumentKind(name)) => {
                warn!(
                    request_id = %ctx.request_id(),
                    argument = %name,
                    "TRANSPORTER:ASSEMBLE:ARGUMENT/unsupported"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok((types, values))
}

/// Request attributes exposed to the backend as call attachments
pub fn assemble_attachments(ctx: &Context) -> HashMap<String, Value> {
    ctx.attributes()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
