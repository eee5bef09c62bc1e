//! Route table and dispatcher
//!
//! Matches parsed requests to registered handlers, binds parameters,
//! invokes, and serializes responses. The route table is owned by the
//! server instance — never ambient global state — and is read as an
//! immutable snapshot during dispatch: `bind` and `remove_routes` publish a
//! new copy-on-write snapshot under a short write lock, so registration is
//! safe concurrent with in-flight dispatches and reads never block writes.

pub mod params;
pub mod serialize;
pub mod template;

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::constants::{HEADER_ACCEPT, HEADER_CONTENT_TYPE};
use crate::error::{Result, TransportError};
use crate::protocol::{RequestHeader, Response, Verb};
use params::{ParamSchema, ParamValue};
use serialize::SerializerRegistry;
use template::RouteTemplate;

/// Async handler: bound input in, serializable result out.
pub type HandlerFuture = BoxFuture<'static, Result<ParamValue>>;
pub type HandlerFn = Arc<dyn Fn(ParamValue) -> HandlerFuture + Send + Sync>;

/// A route plus its input schema and handler
pub struct HandlerBinding {
    template: RouteTemplate,
    verb: Verb,
    schema: ParamSchema,
    handler: HandlerFn,
}

impl HandlerBinding {
    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }
}

/// Route table with copy-on-write snapshots
pub struct Router {
    routes: RwLock<Arc<Vec<Arc<HandlerBinding>>>>,
    serializers: Arc<SerializerRegistry>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::with_serializers(SerializerRegistry::standard())
    }

    /// Construct with a custom serializer registry.
    pub fn with_serializers(serializers: Arc<SerializerRegistry>) -> Self {
        Self {
            routes: RwLock::new(Arc::new(Vec::new())),
            serializers,
        }
    }

    /// Start a binding for a template and verb.
    ///
    /// The template is parsed eagerly so registration fails fast on a
    /// malformed pattern instead of at first dispatch.
    pub fn bind(&self, template: &str, verb: Verb) -> Result<BindingBuilder<'_>> {
        let template = RouteTemplate::parse(template)?;
        Ok(BindingBuilder {
            router: self,
            template,
            verb,
        })
    }

    /// Remove every binding whose template text contains `pattern`.
    /// Returns the number removed.
    pub fn remove_routes(&self, pattern: &str) -> usize {
        let mut guard = self.routes.write();
        let current = guard.as_ref();
        let kept: Vec<Arc<HandlerBinding>> = current
            .iter()
            .filter(|b| !b.template.raw().contains(pattern))
            .cloned()
            .collect();
        let removed = current.len() - kept.len();
        if removed > 0 {
            debug!(pattern, removed, "routes removed");
            *guard = Arc::new(kept);
        }
        removed
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<HandlerBinding>>> {
        self.routes.read().clone()
    }

    fn publish(&self, binding: HandlerBinding) {
        let mut guard = self.routes.write();
        let mut next: Vec<Arc<HandlerBinding>> = guard.as_ref().to_vec();
        next.push(Arc::new(binding));
        *guard = Arc::new(next);
    }

    /// Dispatch a parsed request to the first matching binding.
    ///
    /// Always produces a response; every failure mode maps to an error
    /// status through the transport taxonomy.
    pub async fn dispatch(&self, header: &RequestHeader, body: &[u8]) -> Response {
        match self.try_dispatch(header, body).await {
            Ok(response) => response,
            Err(err) => {
                warn!(verb = %header.verb, path = %header.path, error = %err, "dispatch failed");
                Response::from_error(&err)
            }
        }
    }

    async fn try_dispatch(&self, header: &RequestHeader, body: &[u8]) -> Result<Response> {
        let snapshot = self.snapshot();
        let host = header.header("Host");

        let mut selected = None;
        for binding in snapshot.iter() {
            if binding.verb != header.verb {
                continue;
            }
            if !binding.template.matches_authority(host) {
                continue;
            }
            if let Some(captures) = binding.template.matches(&header.path) {
                selected = Some((binding.clone(), captures));
                break;
            }
        }
        let Some((binding, captures)) = selected else {
            return Err(TransportError::RouteNotFound {
                verb: header.verb.as_str().to_string(),
                path: header.path.clone(),
            });
        };

        // Parameter bag: path captures under bare names, then query values —
        // bare when the template declares them, `query.`-prefixed otherwise.
        let mut bag = captures;
        for (name, value) in &header.query {
            if binding.template.declares_query(name) {
                bag.push((name.clone(), value.clone()));
            } else {
                bag.push((format!("query.{}", name), value.clone()));
            }
        }

        let input = binding
            .schema
            .bind(&bag, body, header.header(HEADER_CONTENT_TYPE))?;

        debug!(verb = %header.verb, path = %header.path, "invoking handler");
        let output = (binding.handler)(input)
            .await
            .map_err(|e| TransportError::HandlerExecution(e.to_string()))?;

        let serializer = self.serializers.negotiate(header.header(HEADER_ACCEPT));
        let body = serializer.serialize(&output)?;
        Ok(Response::ok(body, serializer.content_type()))
    }
}

/// Second half of `bind(template, verb)`
pub struct BindingBuilder<'a> {
    router: &'a Router,
    template: RouteTemplate,
    verb: Verb,
}

impl BindingBuilder<'_> {
    /// Register the handler with its input schema.
    pub fn to<F>(self, schema: ParamSchema, handler: F)
    where
        F: Fn(ParamValue) -> HandlerFuture + Send + Sync + 'static,
    {
        self.router.publish(HandlerBinding {
            template: self.template,
            verb: self.verb,
            schema,
            handler: Arc::new(handler),
        });
    }
}
