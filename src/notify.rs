//! Change notification seam.
//!
//! The core invokes [`ChangeListener::resources_changed`] with the affected
//! `lore://` URIs after each committed mutation. The protocol layer decides
//! what to do with the signal; granular change details are recoverable by
//! reading the most recent transaction (history with limit 1).

pub trait ChangeListener: Send + Sync {
    fn resources_changed(&self, uris: &[String]);
}

/// Default listener: surfaces changes on the tracing stream.
pub struct LogChangeListener;

impl ChangeListener for LogChangeListener {
    fn resources_changed(&self, uris: &[String]) {
        tracing::debug!(?uris, "resources changed");
    }
}
