//! Consent prompt boundary.
//!
//! The watcher hands a [`ConsentRequest`] to the UI. The UI renders the
//! message and the four actions, then answers through the request's
//! [`ConsentResponder`], which can only be used once.

use std::fmt;

use geowatch_core::ConsentAction;

/// Renders a consent question to the user.
pub trait ConsentPrompt: Send + Sync {
    /// Show `request`. The answer may arrive later, from any thread, or never.
    fn prompt(&self, request: ConsentRequest);
}

/// One-time answer channel back into the watcher.
pub struct ConsentResponder {
    respond: Option<Box<dyn FnOnce(ConsentAction) + Send>>,
}

impl ConsentResponder {
    pub fn new(respond: impl FnOnce(ConsentAction) + Send + 'static) -> Self {
        Self {
            respond: Some(Box::new(respond)),
        }
    }

    pub fn respond(mut self, action: ConsentAction) {
        if let Some(respond) = self.respond.take() {
            respond(action);
        }
    }
}

impl Drop for ConsentResponder {
    fn drop(&mut self) {
        if self.respond.is_some() {
            tracing::debug!("consent prompt dismissed without an answer; decision stays pending");
        }
    }
}

impl fmt::Debug for ConsentResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentResponder")
            .field("answered", &self.respond.is_none())
            .finish()
    }
}

/// What the prompt UI is asked to show.
#[derive(Debug)]
pub struct ConsentRequest {
    app_id: String,
    message: String,
    responder: ConsentResponder,
}

impl ConsentRequest {
    pub fn new(app_id: impl Into<String>, message: impl Into<String>, responder: ConsentResponder) -> Self {
        Self {
            app_id: app_id.into(),
            message: message.into(),
            responder,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Actions to offer, in display order.
    pub fn actions(&self) -> &'static [ConsentAction] {
        &ConsentAction::ALL
    }

    /// Answer the request.
    pub fn respond(self, action: ConsentAction) {
        self.responder.respond(action);
    }

    /// Split off the responder, e.g. to answer from another task.
    pub fn into_responder(self) -> ConsentResponder {
        self.responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording() -> (Arc<Mutex<Vec<ConsentAction>>>, ConsentResponder) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let responder = ConsentResponder::new(move |action| s.lock().expect("test").push(action));
        (seen, responder)
    }

    #[test]
    fn respond_forwards_action() {
        let (seen, responder) = recording();
        let request = ConsentRequest::new("maps", "maps wants to know your location.", responder);
        assert_eq!(request.app_id(), "maps");
        assert_eq!(request.actions().len(), 4);
        request.respond(ConsentAction::DenyAlways);
        assert_eq!(*seen.lock().expect("test"), vec![ConsentAction::DenyAlways]);
    }

    #[test]
    fn dropping_unanswered_responder_does_nothing() {
        let (seen, responder) = recording();
        drop(responder);
        assert!(seen.lock().expect("test").is_empty());
    }

    #[test]
    fn responder_survives_split() {
        let (seen, responder) = recording();
        let responder = ConsentRequest::new("maps", "msg", responder).into_responder();
        responder.respond(ConsentAction::ShareOnce);
        assert_eq!(*seen.lock().expect("test"), vec![ConsentAction::ShareOnce]);
    }
}
