//! Service lookup and hot replacement.
//!
//! # Responsibilities
//! - Compile `ServiceConfig`s into matchers ordered by priority
//! - Resolve a request head to the service that handles it
//! - Swap the whole table on reload without blocking readers
//!
//! # Design Decisions
//! - Readers load an `Arc` snapshot; a reload never mutates a live table
//! - Ties on priority go to the more specific route, then to config order
//! - A service whose node list changes gets a new generation, which orphans
//!   its sticky records; generations of removed services are remembered so a
//!   re-added service never reuses an old one

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::request::Parts;

use crate::config::ServiceConfig;
use crate::load_balancer::BackendNode;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::service::Service;

#[derive(Debug)]
struct Route {
    matcher: AndMatcher,
    priority: u32,
    service: Arc<Service>,
}

#[derive(Debug, Default)]
struct RouteTable {
    routes: Vec<Route>,
    /// Last node list and generation per service id, including removed ones.
    generations: HashMap<String, (Vec<BackendNode>, u64)>,
}

impl RouteTable {
    fn compile(services: &[ServiceConfig], previous: &HashMap<String, (Vec<BackendNode>, u64)>) -> Self {
        let mut generations = previous.clone();
        let mut routes = Vec::with_capacity(services.len());

        for config in services {
            let generation = match previous.get(&config.id) {
                Some((nodes, generation)) if *nodes == config.nodes => *generation,
                Some((_, generation)) => {
                    tracing::info!(
                        service = %config.id,
                        generation = generation + 1,
                        "Node list changed, sticky sessions invalidated"
                    );
                    generation + 1
                }
                None => 0,
            };
            generations.insert(config.id.clone(), (config.nodes.clone(), generation));

            let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
            if let Some(host) = &config.host {
                matchers.push(Box::new(HostMatcher::new(host.clone())));
            }
            if let Some(prefix) = &config.path_prefix {
                matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
            }

            routes.push(Route {
                matcher: AndMatcher::new(matchers),
                priority: config.priority,
                service: Arc::new(Service::from_config(config, generation)),
            });
        }

        routes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.matcher.len().cmp(&a.matcher.len()))
        });

        Self { routes, generations }
    }
}

/// Registered services, resolvable per request.
#[derive(Debug)]
pub struct ServiceRegistry {
    table: ArcSwap<RouteTable>,
}

impl ServiceRegistry {
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let table = RouteTable::compile(services, &HashMap::new());
        tracing::info!(services = table.routes.len(), "Service registry built");
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// The highest priority service whose conditions all match.
    pub fn resolve(&self, parts: &Parts) -> Option<Arc<Service>> {
        let table = self.table.load();
        table
            .routes
            .iter()
            .find(|route| route.matcher.matches(parts))
            .map(|route| route.service.clone())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Service>> {
        self.table
            .load()
            .routes
            .iter()
            .find(|route| route.service.id == id)
            .map(|route| route.service.clone())
    }

    /// Replace every service with a freshly compiled table.
    pub fn reload(&self, services: &[ServiceConfig]) {
        let current = self.table.load();
        let next = RouteTable::compile(services, &current.generations);
        tracing::info!(services = next.routes.len(), "Service registry reloaded");
        self.table.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.table.load().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
