//! Event bubbling up the active handler chain.

use crate::error::RouterError;
use crate::handler::{EventArgs, EventOutcome};
use crate::info::HandlerInfo;

/// Bubble a named event from the leaf of `chain` toward its root.
///
/// A handler that returns [`EventOutcome::Propagate`] has handled the
/// event but lets it keep bubbling; [`EventOutcome::Handled`] stops
/// propagation. If nothing along the chain handled the event, that is an
/// error unless `ignore_failure` is set; internal engine events
/// (`willTransition`, `error`) always ignore failure.
pub(crate) fn trigger(
    chain: &[HandlerInfo],
    ignore_failure: bool,
    name: &str,
    args: &EventArgs,
) -> Result<(), RouterError> {
    let mut handled = false;

    for info in chain.iter().rev() {
        match info.handler.on_event(name, args) {
            Some(EventOutcome::Propagate) => {
                handled = true;
            }
            Some(EventOutcome::Handled) => {
                handled = true;
                break;
            }
            None => {}
        }
    }

    if !handled && !ignore_failure {
        return Err(RouterError::UnhandledEvent(name.to_string()));
    }
    Ok(())
}
