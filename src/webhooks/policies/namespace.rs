//! Namespace policy.
//!
//! Only namespaces prefixed `tool-` belong to a tool. Anything else is denied
//! without a patch; the denial just means the pod is not ours to mutate.

use super::{ValidationContext, ValidationResult};
use crate::config::TOOL_NAMESPACE_PREFIX;
use crate::webhooks::error::PolicyViolation;

/// Returns the tool name owning the namespace.
pub fn validate<'a>(ctx: &ValidationContext<'a>) -> ValidationResult<&'a str> {
    ctx.namespace
        .strip_prefix(TOOL_NAMESPACE_PREFIX)
        .ok_or_else(|| PolicyViolation::NonTenantNamespace {
            namespace: ctx.namespace.to_string(),
        })
}
