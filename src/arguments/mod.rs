//! # Argument Resolution
//!
//! Converts request data into typed backend call arguments.
//!
//! Resolving one [`Argument`]:
//! 1. A preset value on the argument is used as-is, skipping lookup.
//! 2. Otherwise the lookup function reads `httpName` from `httpScope`.
//! 3. A missing value is replaced by the `default` annotation, as text.
//! 4. The value is converted by the resolver registered for `class`.
//!
//! Complex arguments resolve every field recursively into an object that also
//! carries a `"class"` entry. A field of unsupported kind is logged and left
//! out; any other field failure aborts the whole argument.
//!
//! ## Rust Concepts Used
//! - The lookup and the resolver table are owned by [`ArgumentResolver`] and
//!   passed explicitly; the argument model holds data only
//! - Recursion over the `fields` tree with `?` propagation

pub mod lookup;
pub mod resolver;

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use crate::context::Context;
use crate::core::error::{ResolveError, ResolveResult};
use crate::core::types::{Argument, ArgumentKind, ARGUMENT_ANNOTATION_DEFAULT};
use crate::core::value::MTValue;

pub use lookup::{default_lookup, default_lookup_func, scopes, LookupFunc};
pub use resolver::{ResolverRegistry, ValueResolver, CLASS_KEY};

/// Resolves arguments against a request context
#[derive(Clone)]
pub struct ArgumentResolver {
    lookup: LookupFunc,
    registry: Arc<ResolverRegistry>,
}

impl std::fmt::Debug for ArgumentResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentResolver").field("registry", &self.registry).finish()
    }
}

impl Default for ArgumentResolver {
    fn default() -> Self {
        Self::new(Arc::new(ResolverRegistry::with_builtins()), default_lookup_func())
    }
}

impl ArgumentResolver {
    pub fn new(registry: Arc<ResolverRegistry>, lookup: LookupFunc) -> Self {
        Self { lookup, registry }
    }

    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Resolve one argument against `ctx`
    pub fn resolve(&self, argument: &Argument, ctx: &Context) -> ResolveResult<Value> {
        match argument.kind {
            ArgumentKind::Primitive => self.resolve_primitive(argument, ctx),
            ArgumentKind::Complex => self.resolve_complex(argument, ctx),
            ArgumentKind::Unknown => Err(ResolveError::UnsupportedArgumentKind(argument.name.clone())),
        }
    }

    /// The raw value of an argument before type conversion
    pub fn lookup(&self, argument: &Argument, ctx: &Context) -> ResolveResult<MTValue> {
        let value = match &argument.preset {
            Some(preset) => preset.clone(),
            None => (self.lookup)(ctx, &argument.http_scope, &argument.http_name)?,
        };
        if value.is_valid() {
            return Ok(value);
        }
        match argument.annotations.get_ex(ARGUMENT_ANNOTATION_DEFAULT) {
            Some(default) => Ok(MTValue::text(default.get_string())),
            None => Ok(value),
        }
    }

    fn resolve_primitive(&self, argument: &Argument, ctx: &Context) -> ResolveResult<Value> {
        let value = self.lookup(argument, ctx)?;
        self.registry.resolve(&value, &argument.class, &argument.generic)
    }

    fn resolve_complex(&self, argument: &Argument, ctx: &Context) -> ResolveResult<Value> {
        let mut object = Map::with_capacity(argument.fields.len() + 1);
        object.insert(CLASS_KEY.to_string(), Value::String(argument.class.clone()));
        for field in &argument.fields {
            match self.resolve(field, ctx) {
                Ok(value) => {
                    object.insert(field.name.clone(), value);
                }
                Err(ResolveError::UnsupportedArgumentKind(name)) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        argument = %argument.name,
                        field = %name,
                        "ARGUMENT:RESOLVE:FIELD/unsupported"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Value::Object(object))
    }
}
