//! Chain partitioning: diff the old and new handler chains into the four
//! buckets the commit phase drives hooks from.
//!
//! Both "handler changed" and "context changed" are monotone down the
//! chain: once a level differs, every deeper level is forced into the
//! stronger bucket. Exited handlers are ordered deepest first, which is
//! the order their `exit` hooks must run in.

use crate::info::{query_params_equal, HandlerInfo};

#[derive(Default)]
pub(crate) struct PartitionedHandlers {
    pub unchanged: Vec<HandlerInfo>,
    pub updated_context: Vec<HandlerInfo>,
    pub entered: Vec<HandlerInfo>,
    /// Deepest first.
    pub exited: Vec<HandlerInfo>,
}

pub(crate) fn partition_handlers(
    old_handlers: &[HandlerInfo],
    new_handlers: &[HandlerInfo],
) -> PartitionedHandlers {
    let mut partition = PartitionedHandlers::default();
    let mut handler_changed = false;
    let mut context_changed = false;

    for (i, new_handler) in new_handlers.iter().enumerate() {
        let old_handler = old_handlers.get(i);

        if old_handler.map_or(true, |old| old.name != new_handler.name) {
            handler_changed = true;
        }

        if handler_changed {
            partition.entered.push(new_handler.clone());
            if let Some(old) = old_handler {
                partition.exited.insert(0, old.clone());
            }
        } else if let Some(old) = old_handler {
            if context_changed
                || !old.same_context(new_handler)
                || !query_params_equal(old.query_params.as_ref(), new_handler.query_params.as_ref())
            {
                context_changed = true;
                partition.updated_context.push(new_handler.clone());
            } else {
                partition.unchanged.push(old.clone());
            }
        }
    }

    for old in old_handlers.iter().skip(new_handlers.len()) {
        partition.exited.insert(0, old.clone());
    }

    partition
}
