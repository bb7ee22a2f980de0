//! The request multiplexer.
//!
//! A [`Mux`] matches each inbound request against registered routes in
//! insertion order; the first match wins and only that handler runs. With no
//! match and no default route, the framework answers
//! `UnwillingToPerform (53)` with diagnostic `"No matching handler found"`.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::codes::{self, AuthChoice, Scope};
use crate::message::Message;
use crate::request::Request;
use crate::response::{ResponseOptions, ResponseWriter};
use crate::{Error, Result};

/// The LDAP operation a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOperation {
    Bind,
    Search,
    Modify,
    Add,
    Delete,
    Unbind,
    Extended,
}

impl std::fmt::Display for RouteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouteOperation::Bind => "bind",
            RouteOperation::Search => "search",
            RouteOperation::Modify => "modify",
            RouteOperation::Add => "add",
            RouteOperation::Delete => "delete",
            RouteOperation::Unbind => "unbind",
            RouteOperation::Extended => "extendedOperation",
        };
        f.write_str(name)
    }
}

/// A registered handler. Handlers write their own responses and do not
/// return errors.
pub type HandlerFunc = Arc<dyn Fn(ResponseWriter, Request) -> BoxFuture<'static, ()> + Send + Sync>;

fn into_handler<H, F>(handler: H) -> HandlerFunc
where
    H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |w, req| -> BoxFuture<'static, ()> { Box::pin(handler(w, req)) })
}

/// Predicates for a search route. Unset fields match any request.
#[derive(Debug, Clone, Default)]
pub struct SearchRouteOptions {
    base_dn: Option<String>,
    filter: Option<String>,
    scope: Option<Scope>,
    label: Option<String>,
}

impl SearchRouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match the request base DN, case-insensitively.
    pub fn with_base_dn(mut self, dn: impl Into<String>) -> Self {
        self.base_dn = Some(dn.into());
        self
    }

    /// Match the request's textual filter, case-insensitively.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Match the request scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Attach a label, carried in [`RouteInfo`] for diagnostics.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Clone)]
enum RouteKind {
    SimpleBind {
        auth_choice: AuthChoice,
    },
    Search {
        base_dn: Option<String>,
        filter: Option<String>,
        scope: Option<Scope>,
    },
    Extended {
        name: String,
    },
    Modify,
    Add,
    Delete,
    Unbind,
    Default,
}

#[derive(Clone)]
struct Route {
    kind: RouteKind,
    handler: HandlerFunc,
    label: Option<String>,
}

impl Route {
    fn operation(&self) -> RouteOperation {
        match self.kind {
            RouteKind::SimpleBind { .. } => RouteOperation::Bind,
            RouteKind::Search { .. } => RouteOperation::Search,
            RouteKind::Extended { .. } => RouteOperation::Extended,
            RouteKind::Modify => RouteOperation::Modify,
            RouteKind::Add => RouteOperation::Add,
            RouteKind::Delete => RouteOperation::Delete,
            RouteKind::Unbind => RouteOperation::Unbind,
            // The default route answers anything; Extended is its closest
            // public description.
            RouteKind::Default => RouteOperation::Extended,
        }
    }

    fn matches(&self, req: &Request) -> bool {
        match &self.kind {
            RouteKind::SimpleBind { auth_choice } => {
                req.route_operation() == RouteOperation::Bind
                    && matches!(req.message(), Message::SimpleBind(m) if m.auth_choice == *auth_choice)
            }
            RouteKind::Search {
                base_dn,
                filter,
                scope,
            } => {
                if req.route_operation() != RouteOperation::Search {
                    return false;
                }
                let Message::Search(m) = req.message() else {
                    return false;
                };
                if let Some(dn) = base_dn {
                    if !m.base_dn.eq_ignore_ascii_case(dn) {
                        return false;
                    }
                }
                if let Some(f) = filter {
                    if !m.filter.eq_ignore_ascii_case(f) {
                        return false;
                    }
                }
                if let Some(s) = scope {
                    if m.scope != *s {
                        return false;
                    }
                }
                true
            }
            RouteKind::Extended { name } => {
                req.route_operation() == RouteOperation::Extended
                    && req.extended_name() == Some(name.as_str())
            }
            RouteKind::Modify => req.route_operation() == RouteOperation::Modify,
            RouteKind::Add => req.route_operation() == RouteOperation::Add,
            RouteKind::Delete => req.route_operation() == RouteOperation::Delete,
            RouteKind::Unbind => req.route_operation() == RouteOperation::Unbind,
            RouteKind::Default => false,
        }
    }
}

/// A public snapshot of one registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub operation: RouteOperation,
    pub label: Option<String>,
    pub base_dn: Option<String>,
    pub filter: Option<String>,
    pub scope: Option<Scope>,
    pub extended_name: Option<String>,
}

impl RouteInfo {
    fn from_route(route: &Route) -> Self {
        let (base_dn, filter, scope, extended_name) = match &route.kind {
            RouteKind::Search {
                base_dn,
                filter,
                scope,
            } => (base_dn.clone(), filter.clone(), *scope, None),
            RouteKind::Extended { name } => (None, None, None, Some(name.clone())),
            _ => (None, None, None, None),
        };
        RouteInfo {
            operation: route.operation(),
            label: route.label.clone(),
            base_dn,
            filter,
            scope,
            extended_name,
        }
    }
}

/// An ldap request multiplexer. Routes are matched in the order they were
/// added and only one route is called per request.
#[derive(Default)]
pub struct Mux {
    routes: Mutex<Vec<Route>>,
    default_route: Mutex<Option<Route>>,
}

impl Mux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for simple bind requests.
    pub fn bind<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::SimpleBind {
                auth_choice: AuthChoice::Simple,
            },
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a handler for search requests matching `opts`.
    pub fn search<H, F>(&self, handler: H, opts: SearchRouteOptions) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::Search {
                base_dn: opts.base_dn,
                filter: opts.filter,
                scope: opts.scope,
            },
            handler: into_handler(handler),
            label: opts.label,
        });
        Ok(())
    }

    /// Register a handler for the extended operation named by `name`.
    pub fn extended_operation<H, F>(&self, handler: H, name: impl Into<String>) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidParameter(
                "mux.extended_operation: missing extended operation name".into(),
            ));
        }
        self.push(Route {
            kind: RouteKind::Extended { name },
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a handler for modify requests.
    pub fn modify<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::Modify,
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a handler for add requests.
    pub fn add<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::Add,
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a handler for delete requests.
    pub fn delete<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::Delete,
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a handler for unbind requests.
    pub fn unbind<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        self.push(Route {
            kind: RouteKind::Unbind,
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// Register a fallback for requests no other route matches.
    pub fn default_route<H, F>(&self, handler: H) -> Result<()>
    where
        H: Fn(ResponseWriter, Request) -> F + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        *self.default_route.lock().expect("route lock poisoned") = Some(Route {
            kind: RouteKind::Default,
            handler: into_handler(handler),
            label: None,
        });
        Ok(())
    }

    /// A snapshot of the registered routes and the default route, in
    /// registration order. Never the live list.
    pub fn routes(&self) -> (Vec<RouteInfo>, Option<RouteInfo>) {
        let routes = self
            .routes
            .lock()
            .expect("route lock poisoned")
            .iter()
            .map(RouteInfo::from_route)
            .collect();
        let default = self
            .default_route
            .lock()
            .expect("route lock poisoned")
            .as_ref()
            .map(RouteInfo::from_route);
        (routes, default)
    }

    fn push(&self, route: Route) {
        self.routes.lock().expect("route lock poisoned").push(route);
    }

    fn find_handler(&self, req: &Request) -> Option<HandlerFunc> {
        let routes = self.routes.lock().expect("route lock poisoned");
        for route in routes.iter() {
            if route.matches(req) {
                return Some(route.handler.clone());
            }
        }
        drop(routes);
        self.default_route
            .lock()
            .expect("route lock poisoned")
            .as_ref()
            .map(|r| r.handler.clone())
    }

    /// Find the matching route and run its handler; with none, write the
    /// no-route response in the shape matching the request's operation.
    pub(crate) async fn serve(&self, w: ResponseWriter, req: Request) {
        const OP: &str = "mux.serve";
        if let Some(handler) = self.find_handler(&req) {
            handler(w, req).await;
            return;
        }
        debug!(
            request = req.id,
            operation = %req.route_operation(),
            "{OP}: no matching handler found"
        );
        let application_code = match req.route_operation() {
            RouteOperation::Bind => codes::APPLICATION_BIND_RESPONSE,
            RouteOperation::Search => codes::APPLICATION_SEARCH_RESULT_DONE,
            RouteOperation::Modify => codes::APPLICATION_MODIFY_RESPONSE,
            RouteOperation::Add => codes::APPLICATION_ADD_RESPONSE,
            RouteOperation::Delete => codes::APPLICATION_DEL_RESPONSE,
            RouteOperation::Unbind | RouteOperation::Extended => {
                codes::APPLICATION_EXTENDED_RESPONSE
            }
        };
        let resp = req.new_response(
            ResponseOptions::new()
                .with_application_code(application_code)
                .with_response_code(codes::RESULT_UNWILLING_TO_PERFORM)
                .with_diagnostic_message("No matching handler found"),
        );
        if let Err(e) = w.write(&resp).await {
            error!(request = req.id, err = %e, "{OP}: unable to write no-route response");
        }
    }
}
