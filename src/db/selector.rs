//! Active instance selection.

use crate::error::{GatewayError, GatewayResult};
use crate::models::InstanceDescriptor;
use tracing::warn;

/// Return the first instance marked active, scanning in list order.
///
/// Several active entries are not an error: the first one wins and the rest
/// are named in a warning. An empty list, or one with no active entry, fails
/// with `NoActiveInstance`.
pub fn select_active<'a, I>(instances: I) -> GatewayResult<&'a InstanceDescriptor>
where
    I: IntoIterator<Item = &'a InstanceDescriptor>,
{
    let mut candidates = 0usize;
    let mut selected: Option<&'a InstanceDescriptor> = None;
    let mut ignored: Vec<&str> = Vec::new();

    for instance in instances {
        candidates += 1;
        if !instance.active {
            continue;
        }
        match selected {
            None => selected = Some(instance),
            Some(_) => ignored.push(&instance.instance_id),
        }
    }

    let Some(selected) = selected else {
        return Err(GatewayError::NoActiveInstance { candidates });
    };

    if !ignored.is_empty() {
        warn!(
            selected = %selected.instance_id,
            ignored = ?ignored,
            "Multiple instances are marked active; using the first"
        );
    }
    Ok(selected)
}
