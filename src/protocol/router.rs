//! Command-based message routing.
//!
//! The router maps a main-command byte to zero or more registered handlers.
//! Unlike a single-dispatch table, a command may carry several handlers
//! (duplicates included); dispatch invokes each of them exactly once, in no
//! guaranteed order. An envelope whose command has no handlers goes to a
//! single fallback callback; with neither a handler nor a fallback it is
//! silently dropped — a deliberate permissive default, not an error.
//!
//! The registration table is mutated rarely (module load/unload) and read on
//! every dispatch, hence the read-write lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::envelope::Envelope;
use crate::error::{constants, Result, SessionError};

/// Handler invoked with a dispatch context and the inbound envelope.
///
/// The context is role-specific: the originating connection id on the
/// server, a send handle on the client. A handler may return a reply
/// envelope, which the server delivers back on the same connection.
pub type Handler<C> = dyn Fn(&C, &Envelope) -> Option<Envelope> + Send + Sync;

/// Fallback sink for envelopes with no registered handler.
pub type Fallback<C> = dyn Fn(&C, &Envelope) + Send + Sync;

/// Result of routing one envelope.
pub struct DispatchOutcome {
    /// Whether at least one handler (not the fallback) saw the envelope.
    pub handled: bool,
    /// Replies produced by handlers, to be sent back by the caller.
    pub replies: Vec<Envelope>,
}

/// Maps main-command bytes to their handler sets.
pub struct CommandRouter<C> {
    handlers: RwLock<HashMap<u8, Vec<Arc<Handler<C>>>>>,
    fallback: RwLock<Option<Box<Fallback<C>>>>,
}

impl<C> Default for CommandRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandRouter<C> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            fallback: RwLock::new(None),
        }
    }

    /// Register a handler for a main command. Duplicates are permitted.
    pub fn register<F>(&self, command: u8, handler: F) -> Result<()>
    where
        F: Fn(&C, &Envelope) -> Option<Envelope> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| SessionError::Custom(constants::ERR_ROUTER_WRITE_LOCK.to_string()))?;
        handlers.entry(command).or_default().push(Arc::new(handler));
        Ok(())
    }

    /// Remove every handler registered for a main command.
    pub fn unregister(&self, command: u8) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| SessionError::Custom(constants::ERR_ROUTER_WRITE_LOCK.to_string()))?;
        handlers.remove(&command);
        Ok(())
    }

    /// Install the fallback sink for unhandled commands.
    pub fn set_fallback<F>(&self, fallback: F) -> Result<()>
    where
        F: Fn(&C, &Envelope) + Send + Sync + 'static,
    {
        let mut slot = self
            .fallback
            .write()
            .map_err(|_| SessionError::Custom(constants::ERR_ROUTER_WRITE_LOCK.to_string()))?;
        *slot = Some(Box::new(fallback));
        Ok(())
    }

    /// Route one envelope through every handler for its main command.
    pub fn dispatch(&self, ctx: &C, envelope: &Envelope) -> Result<DispatchOutcome> {
        let matched: Vec<Arc<Handler<C>>> = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| SessionError::Custom(constants::ERR_ROUTER_READ_LOCK.to_string()))?;
            handlers
                .get(&envelope.main_command)
                .map(|set| set.to_vec())
                .unwrap_or_default()
        };

        if matched.is_empty() {
            let fallback = self
                .fallback
                .read()
                .map_err(|_| SessionError::Custom(constants::ERR_ROUTER_READ_LOCK.to_string()))?;
            if let Some(sink) = fallback.as_ref() {
                sink(ctx, envelope);
            }
            return Ok(DispatchOutcome {
                handled: false,
                replies: Vec::new(),
            });
        }

        let mut replies = Vec::new();
        for handler in matched {
            if let Some(reply) = handler(ctx, envelope) {
                replies.push(reply);
            }
        }
        Ok(DispatchOutcome {
            handled: true,
            replies,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn two_handlers_each_run_once() {
        let router: CommandRouter<()> = CommandRouter::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = first.clone();
        router
            .register(0x01, move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();
        let c = second.clone();
        router
            .register(0x01, move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
                None
            })
            .unwrap();

        let outcome = router.dispatch(&(), &Envelope::new(0x01, 0x00)).unwrap();
        assert!(outcome.handled);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unhandled_command_routes_to_fallback_once() {
        let router: CommandRouter<()> = CommandRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let c = hits.clone();
        router
            .set_fallback(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let outcome = router.dispatch(&(), &Envelope::new(0x42, 0x00)).unwrap();
        assert!(!outcome.handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_handler_no_fallback_is_a_silent_drop() {
        let router: CommandRouter<()> = CommandRouter::new();
        let outcome = router.dispatch(&(), &Envelope::new(0x42, 0x00)).unwrap();
        assert!(!outcome.handled);
        assert!(outcome.replies.is_empty());
    }

    #[test]
    fn unregister_removes_all_handlers_for_command() {
        let router: CommandRouter<()> = CommandRouter::new();
        router.register(0x05, |_, _| None).unwrap();
        router.register(0x05, |_, _| None).unwrap();
        router.unregister(0x05).unwrap();

        let outcome = router.dispatch(&(), &Envelope::new(0x05, 0x00)).unwrap();
        assert!(!outcome.handled);
    }

    #[test]
    fn handler_replies_are_collected() {
        let router: CommandRouter<String> = CommandRouter::new();
        router
            .register(0x10, |conn, envelope| {
                assert_eq!(conn, "conn-1");
                Envelope::new(envelope.main_command, envelope.sub_command)
                    .with_content(&"reply")
                    .ok()
            })
            .unwrap();

        let outcome = router
            .dispatch(&"conn-1".to_string(), &Envelope::new(0x10, 0x02))
            .unwrap();
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(
            outcome.replies[0].content_as::<String>().unwrap(),
            Some("reply".to_string())
        );
    }
}
