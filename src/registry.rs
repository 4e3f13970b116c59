//! Shard registry: the immutable routing table `extension -> destination`.

use std::collections::HashSet;

use anyhow::{bail, Result};

use crate::config::RouteConfig;
use crate::error::{ShardError, ShardResult};
use crate::paths::{extension_of, is_root_token, normalize_extension};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRoute {
    pub extension: String,
    pub address: String,
    pub root_token: String,
    pub is_local: bool,
    pub archivable: bool,
}

impl ShardRoute {
    /// Human label used in logs and warnings, e.g. `.pdf shard at 127.0.0.1:6501`.
    pub fn label(&self) -> String {
        if self.is_local {
            format!("{} (local)", self.extension)
        } else {
            format!("{} shard at {}", self.extension, self.address)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShardRegistry {
    routes: Vec<ShardRoute>,
    local: usize,
}

impl ShardRegistry {
    /// Build and validate the registry. Exactly one route must be local;
    /// extensions and root tokens must be unique.
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self> {
        let mut seen_ext = HashSet::new();
        let mut seen_tok = HashSet::new();
        let mut out = Vec::with_capacity(routes.len());
        for r in routes {
            let extension = normalize_extension(&r.extension);
            if extension.len() < 2 {
                bail!("route extension '{}' is empty", r.extension);
            }
            if !seen_ext.insert(extension.clone()) {
                bail!("duplicate route for extension {}", extension);
            }
            if !is_root_token(&r.root_token) {
                bail!("root token '{}' for {} must be 3 characters starting with '~'", r.root_token, extension);
            }
            if !seen_tok.insert(r.root_token.clone()) {
                bail!("duplicate root token {}", r.root_token);
            }
            if !r.local && r.address.trim().is_empty() {
                bail!("remote route {} has no address", extension);
            }
            out.push(ShardRoute {
                extension,
                address: r.address.clone(),
                root_token: r.root_token.clone(),
                is_local: r.local,
                archivable: r.archivable,
            });
        }
        let locals: Vec<usize> = out.iter().enumerate().filter(|(_, r)| r.is_local).map(|(i, _)| i).collect();
        if locals.len() != 1 {
            bail!("exactly one local route is required, found {}", locals.len());
        }
        Ok(Self { routes: out, local: locals[0] })
    }

    pub fn routes(&self) -> &[ShardRoute] {
        &self.routes
    }

    pub fn route_for(&self, extension: &str) -> Option<&ShardRoute> {
        let ext = normalize_extension(extension);
        self.routes.iter().find(|r| r.extension == ext)
    }

    /// Route for a filename, or `UnsupportedType` when it has no extension or
    /// no registered handler.
    pub fn route_for_file(&self, filename: &str) -> ShardResult<&ShardRoute> {
        let ext = extension_of(filename)
            .ok_or_else(|| ShardError::unsupported(format!("'{}' has no file extension", filename)))?;
        self.route_for(ext)
            .ok_or_else(|| ShardError::unsupported(format!("no shard handles {} files", ext)))
    }

    pub fn local(&self) -> &ShardRoute {
        &self.routes[self.local]
    }

    /// Remote routes in registry order.
    pub fn remote(&self) -> impl Iterator<Item = &ShardRoute> {
        self.routes.iter().filter(|r| !r.is_local)
    }

    pub fn knows_token(&self, token: &str) -> bool {
        self.routes.iter().any(|r| r.root_token == token)
    }
}
