//! Overlay Handlers
//!
//! A handler turns a decoded overlay identity into presentation config and
//! props. Handlers are looked up by typename in a [`HandlerRegistry`]; the
//! identity's arguments are bound to the handler when it is built.
//!
//! Server actions (mutations triggered by the overlay UI) are listed by the
//! handler itself in an [`ActionMap`].

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::identity::{validate_typename, IdentityError, OverlayArgs};
use crate::instance::OverlayConfig;

use super::context::OverlayContext;
use super::props::Props;

/// Failure inside a handler
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The identity's arguments do not fit the handler
    #[error("invalid overlay arguments: {0}")]
    InvalidArguments(String),

    /// The handler could not produce a response
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// A generic handler failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while registering handlers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The typename cannot appear in an identifier
    #[error("invalid typename: {0}")]
    InvalidTypename(#[from] IdentityError),

    /// A handler is already registered under the typename
    #[error("handler already registered for type {0}")]
    Duplicate(String),
}

/// Effect of a server action on the response that follows it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    /// Prop keys to send with the response
    pub refresh: Vec<String>,
    /// Ask the client to close the overlay
    pub close_requested: bool,
}

impl ActionOutcome {
    /// Refresh these keys
    pub fn refresh<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refresh: keys.into_iter().map(Into::into).collect(),
            close_requested: false,
        }
    }

    /// Close the overlay
    #[must_use]
    pub fn close() -> Self {
        Self {
            refresh: Vec::new(),
            close_requested: true,
        }
    }
}

type Action = Box<dyn Fn(&OverlayContext, &Value) -> Result<ActionOutcome, HandlerError> + Send + Sync>;

/// Named server actions of one handler
#[derive(Default)]
pub struct ActionMap {
    actions: HashMap<String, Action>,
}

impl ActionMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&OverlayContext, &Value) -> Result<ActionOutcome, HandlerError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Box::new(action));
        self
    }

    /// Run an action; `None` if no action has that name
    pub fn run(
        &self,
        name: &str,
        ctx: &OverlayContext,
        payload: &Value,
    ) -> Option<Result<ActionOutcome, HandlerError>> {
        self.actions.get(name).map(|action| action(ctx, payload))
    }

    /// Whether an action exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl fmt::Debug for ActionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.actions.keys()).finish()
    }
}

/// Server-side implementation of one overlay type
pub trait OverlayHandler: Send + Sync {
    /// Presentation config (declared prop keys are filled in by the server)
    fn config(&self, _ctx: &OverlayContext) -> OverlayConfig {
        OverlayConfig::default()
    }

    /// The overlay's props
    ///
    /// # Errors
    ///
    /// A [`HandlerError`] turns into a server error response.
    fn props(&self, ctx: &OverlayContext) -> Result<Props, HandlerError>;

    /// Server actions this overlay offers
    fn actions(&self) -> ActionMap {
        ActionMap::new()
    }
}

type Factory =
    Box<dyn Fn(&OverlayArgs) -> Result<Box<dyn OverlayHandler>, HandlerError> + Send + Sync>;

/// Typename to handler factory lookup
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, Factory>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler whose fields are the overlay's arguments
    ///
    /// # Errors
    ///
    /// Fails for an invalid or already registered typename.
    pub fn register<H>(&mut self, typename: &str) -> Result<(), RegistryError>
    where
        H: OverlayHandler + DeserializeOwned + 'static,
    {
        self.register_with(typename, |args| {
            serde_json::from_value::<H>(Value::Object(args.clone()))
                .map_err(|e| HandlerError::InvalidArguments(e.to_string()))
        })
    }

    /// Register a handler built by a factory
    ///
    /// # Errors
    ///
    /// Fails for an invalid or already registered typename.
    pub fn register_with<H, F>(&mut self, typename: &str, factory: F) -> Result<(), RegistryError>
    where
        H: OverlayHandler + 'static,
        F: Fn(&OverlayArgs) -> Result<H, HandlerError> + Send + Sync + 'static,
    {
        validate_typename(typename)?;
        if self.factories.contains_key(typename) {
            return Err(RegistryError::Duplicate(typename.to_string()));
        }

        self.factories.insert(
            typename.to_string(),
            Box::new(move |args| factory(args).map(|h| Box::new(h) as Box<dyn OverlayHandler>)),
        );
        tracing::debug!(typename = %typename, "Registered overlay handler");
        Ok(())
    }

    /// Build the handler for a typename with bound arguments
    ///
    /// `None` when no handler is registered under the typename.
    pub fn build(
        &self,
        typename: &str,
        args: &OverlayArgs,
    ) -> Option<Result<Box<dyn OverlayHandler>, HandlerError>> {
        self.factories.get(typename).map(|factory| factory(args))
    }

    /// Whether a typename is registered
    #[must_use]
    pub fn contains(&self, typename: &str) -> bool {
        self.factories.contains_key(typename)
    }

    /// Number of registered typenames
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerRegistry")
            .field("typenames", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct ProfileEditor {
        id: u64,
    }

    impl OverlayHandler for ProfileEditor {
        fn props(&self, _ctx: &OverlayContext) -> Result<Props, HandlerError> {
            Ok(Props::new().plain("id", self.id))
        }

        fn actions(&self) -> ActionMap {
            ActionMap::new().with("save", |_, payload| {
                if payload.get("name").is_some() {
                    Ok(ActionOutcome::close())
                } else {
                    Err(HandlerError::failed("name is required"))
                }
            })
        }
    }

    fn args(value: Value) -> OverlayArgs {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_binds_arguments() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ProfileEditor>("profile-editor").unwrap();

        let handler = registry
            .build("profile-editor", &args(json!({"id": 7})))
            .unwrap()
            .unwrap();
        let props = handler.props(&OverlayContext::default()).unwrap();
        assert!(props.contains("id"));
    }

    #[test]
    fn test_bad_arguments_are_reported() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ProfileEditor>("profile-editor").unwrap();
        let result = registry.build("profile-editor", &args(json!({"id": "seven"})));
        assert!(matches!(result, Some(Err(HandlerError::InvalidArguments(_)))));
        assert!(registry.build("unknown", &OverlayArgs::new()).is_none());
    }

    #[test]
    fn test_registration_is_validated() {
        let mut registry = HandlerRegistry::new();
        registry.register::<ProfileEditor>("profile-editor").unwrap();
        assert_eq!(
            registry.register::<ProfileEditor>("profile-editor"),
            Err(RegistryError::Duplicate("profile-editor".into()))
        );
        assert!(matches!(
            registry.register::<ProfileEditor>("profile.editor"),
            Err(RegistryError::InvalidTypename(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_actions_dispatch_by_name() {
        let handler = ProfileEditor { id: 1 };
        let actions = handler.actions();
        let ctx = OverlayContext::default();

        let outcome = actions.run("save", &ctx, &json!({"name": "Ann"})).unwrap();
        assert_eq!(outcome, Ok(ActionOutcome::close()));
        assert!(actions.run("save", &ctx, &Value::Null).unwrap().is_err());
        assert!(actions.run("delete", &ctx, &Value::Null).is_none());
    }
}
