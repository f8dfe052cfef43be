//! Tenant/graph/branch scoping.
//!
//! `ScopeResolver` resolves and enforces the `(tenant_id, graph_id,
//! branch_id)` context for every request; [`VisibilityFilter`] is the one
//! WHERE-fragment builder every read in `entities` runs through, so the
//! four visibility clauses never drift out of sync between call sites.

mod visibility;

pub use visibility::{IncludeProposed, VisibilityFilter};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ids::{BranchId, GraphId, TenantId};
use crate::store::Store;
use chrono::Utc;
use rusqlite::Row;

/// The resolved `(graph, branch)` pair a request operates under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScope {
    pub graph_id: GraphId,
    pub branch_id: BranchId,
}

/// A tenant-owned graph partition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GraphSpace {
    pub graph_id: GraphId,
    pub name: String,
    pub tenant_id: String,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_graphspace(row: &Row) -> rusqlite::Result<GraphSpace> {
    Ok(GraphSpace {
        graph_id: GraphId::from_string(row.get::<_, String>(0)?),
        name: row.get(1)?,
        tenant_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub struct ScopeResolver<'a> {
    store: &'a Store,
    config: &'a EngineConfig,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(store: &'a Store, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Returns the tenant's active graph and branch, creating the default
    /// pair if none exists yet. Demo-mode tenants are pinned to a fixed
    /// graph.
    pub fn resolve_active(&self, tenant_id: &TenantId) -> EngineResult<ActiveScope> {
        if tenant_id.as_str() == "demo" {
            let graph_id = GraphId::from_string(self.config.demo_graph_id.clone());
            self.ensure_graph(&graph_id, tenant_id)?;
            let branch_id = BranchId::from_string(self.config.default_branch.clone());
            self.ensure_branch(&graph_id, &branch_id)?;
            return Ok(ActiveScope {
                graph_id,
                branch_id,
            });
        }

        let existing: Option<String> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT graph_id FROM graph_spaces WHERE tenant_id = ?1 ORDER BY created_at LIMIT 1",
                [tenant_id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })?;

        let graph_id = match existing {
            Some(g) => GraphId::from_string(g),
            None => {
                let graph_id = GraphId::from_string(self.config.default_graph.clone());
                self.ensure_graph(&graph_id, tenant_id)?;
                graph_id
            }
        };
        let branch_id = BranchId::from_string(self.config.default_branch.clone());
        self.ensure_branch(&graph_id, &branch_id)?;
        Ok(ActiveScope {
            graph_id,
            branch_id,
        })
    }

    /// Validates that `graph_id` exists for `tenant_id`, defaulting branch
    /// to the configured default branch.
    pub fn set_active_graph(
        &self,
        tenant_id: &TenantId,
        graph_id: &GraphId,
    ) -> EngineResult<ActiveScope> {
        let owner: Option<String> = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT tenant_id FROM graph_spaces WHERE graph_id = ?1",
                [graph_id.as_str()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
        })?;

        match owner {
            None => Err(EngineError::NotFound(format!(
                "graph {} does not exist",
                graph_id
            ))),
            Some(owner_tenant) if owner_tenant != tenant_id.as_str() => Err(EngineError::Forbidden(
                format!("graph {} does not belong to this tenant", graph_id),
            )),
            Some(_) => {
                let branch_id = BranchId::from_string(self.config.default_branch.clone());
                self.ensure_branch(graph_id, &branch_id)?;
                Ok(ActiveScope {
                    graph_id: graph_id.clone(),
                    branch_id,
                })
            }
        }
    }

    /// Idempotent graph creation.
    pub fn ensure_graph(&self, graph_id: &GraphId, tenant_id: &TenantId) -> EngineResult<()> {
        let now = Utc::now().to_rfc3339();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO graph_spaces (graph_id, name, tenant_id, created_at, updated_at) \
                 VALUES (?1, ?1, ?2, ?3, ?3) \
                 ON CONFLICT(graph_id) DO NOTHING",
                rusqlite::params![graph_id.as_str(), tenant_id.as_str(), now],
            )
            .map(|_| ())
        })
    }

    /// Idempotent branch creation within a graph.
    pub fn ensure_branch(&self, graph_id: &GraphId, branch_id: &BranchId) -> EngineResult<()> {
        let now = Utc::now().to_rfc3339();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO branches (graph_id, branch_id, name, created_at) \
                 VALUES (?1, ?2, ?2, ?3) \
                 ON CONFLICT(graph_id, branch_id) DO NOTHING",
                rusqlite::params![graph_id.as_str(), branch_id.as_str(), now],
            )
            .map(|_| ())
        })
    }

    /// Every GraphSpace owned by `tenant_id`, oldest first.
    pub fn list_graphs(&self, tenant_id: &TenantId) -> EngineResult<Vec<GraphSpace>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT graph_id, name, tenant_id, created_at, updated_at \
                 FROM graph_spaces WHERE tenant_id = ?1 ORDER BY created_at",
            )?;
            stmt.query_map([tenant_id.as_str()], row_to_graphspace)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })
    }

    /// Creates a brand-new, uniquely-identified GraphSpace for `tenant_id`
    /// and switches it active. Unlike
    /// [`Self::ensure_graph`] this always mints a fresh id; it is not
    /// idempotent by name.
    pub fn create_graph(&self, tenant_id: &TenantId, name: &str) -> EngineResult<GraphSpace> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("graph name must not be empty".into()));
        }
        let graph_id = GraphId::generate();
        let now = Utc::now().to_rfc3339();
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO graph_spaces (graph_id, name, tenant_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![graph_id.as_str(), name, tenant_id.as_str(), now],
            )
        })?;
        self.ensure_branch(&graph_id, &BranchId::from_string(self.config.default_branch.clone()))?;
        Ok(GraphSpace {
            graph_id,
            name: name.to_string(),
            tenant_id: tenant_id.as_str().to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Renames a GraphSpace in place.
    pub fn rename_graph(
        &self,
        tenant_id: &TenantId,
        graph_id: &GraphId,
        name: &str,
    ) -> EngineResult<GraphSpace> {
        if name.trim().is_empty() {
            return Err(EngineError::Invalid("graph name must not be empty".into()));
        }
        self.check_tenant(tenant_id, graph_id)?;
        let now = Utc::now().to_rfc3339();
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE graph_spaces SET name = ?1, updated_at = ?2 WHERE graph_id = ?3",
                rusqlite::params![name, now, graph_id.as_str()],
            )
        })?;
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT graph_id, name, tenant_id, created_at, updated_at \
                 FROM graph_spaces WHERE graph_id = ?1",
                [graph_id.as_str()],
                row_to_graphspace,
            )
        })
        .map_err(EngineError::from)
    }

    /// Deletes a GraphSpace and every branch row scoped to it. The
    /// configured default graph can never be deleted.
    pub fn delete_graph(&self, tenant_id: &TenantId, graph_id: &GraphId) -> EngineResult<()> {
        if graph_id.as_str() == self.config.default_graph {
            return Err(EngineError::Forbidden("the default graph cannot be deleted".into()));
        }
        self.check_tenant(tenant_id, graph_id)?;
        self.store.with_conn(|conn| {
            conn.execute("DELETE FROM branches WHERE graph_id = ?1", [graph_id.as_str()])?;
            conn.execute("DELETE FROM graph_spaces WHERE graph_id = ?1", [graph_id.as_str()])?;
            Ok(())
        })
    }

    /// Rejects the scope if its GraphSpace belongs to a different tenant.
    pub fn check_tenant(&self, tenant_id: &TenantId, graph_id: &GraphId) -> EngineResult<()> {
        let owner: String = self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT tenant_id FROM graph_spaces WHERE graph_id = ?1",
                [graph_id.as_str()],
                |row| row.get(0),
            )
        })?;
        if owner != tenant_id.as_str() {
            return Err(EngineError::Forbidden(format!(
                "graph {} does not belong to this tenant",
                graph_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_active_creates_default_graph_and_branch() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = TenantId::from_string("tenant-a");

        let scope = resolver.resolve_active(&tenant).unwrap();
        assert_eq!(scope.graph_id.as_str(), "default");
        assert_eq!(scope.branch_id.as_str(), "main");

        // Calling again must not create a second graph space.
        let again = resolver.resolve_active(&tenant).unwrap();
        assert_eq!(again, scope);
    }

    #[test]
    fn demo_tenants_are_pinned_to_the_demo_graph() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let scope = resolver.resolve_active(&TenantId::from_string("demo")).unwrap();
        assert_eq!(scope.graph_id.as_str(), config.demo_graph_id);
    }

    #[test]
    fn set_active_graph_rejects_another_tenants_graph() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let owner = TenantId::from_string("owner");
        let intruder = TenantId::from_string("intruder");
        let graph_id = GraphId::from_string("shared");
        resolver.ensure_graph(&graph_id, &owner).unwrap();

        let err = resolver.set_active_graph(&intruder, &graph_id).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn set_active_graph_rejects_unknown_graph() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let err = resolver
            .set_active_graph(&TenantId::from_string("t"), &GraphId::from_string("ghost"))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn create_graph_mints_a_fresh_id_and_lists_it() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = TenantId::from_string("tenant-b");

        let created = resolver.create_graph(&tenant, "Finance").unwrap();
        assert_eq!(created.name, "Finance");
        let graphs = resolver.list_graphs(&tenant).unwrap();
        assert_eq!(graphs.len(), 1);
        assert_eq!(graphs[0].graph_id, created.graph_id);
    }

    #[test]
    fn rename_graph_updates_name_but_not_id() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = TenantId::from_string("tenant-c");
        let created = resolver.create_graph(&tenant, "Old Name").unwrap();

        let renamed = resolver.rename_graph(&tenant, &created.graph_id, "New Name").unwrap();
        assert_eq!(renamed.graph_id, created.graph_id);
        assert_eq!(renamed.name, "New Name");
    }

    #[test]
    fn default_graph_cannot_be_deleted() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = TenantId::from_string("tenant-d");
        resolver.resolve_active(&tenant).unwrap();

        let err = resolver
            .delete_graph(&tenant, &GraphId::from_string(config.default_graph.clone()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn a_non_default_graph_can_be_deleted() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = TenantId::from_string("tenant-e");
        let created = resolver.create_graph(&tenant, "Scratch").unwrap();

        resolver.delete_graph(&tenant, &created.graph_id).unwrap();
        assert!(resolver.list_graphs(&tenant).unwrap().is_empty());
    }
}
