use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::role_map::RoleMap;
use super::store::RolePermissionStore;
use super::PermissionMatch;
use crate::config::CacheConfig;
use crate::errors::AuthzError;
use crate::identity::IdentityClient;

/// Resolves role names to permissions through a read-through cache.
///
/// The cache holds the entire role graph under one key: it is either fully
/// populated or absent. Refreshes are serialized so concurrent misses result in
/// a single upstream fetch.
///
/// Query methods come in two flavours: `try_*` returns the underlying error,
/// the plain form fails closed (`false` / empty) and logs the error.
pub struct RolePermissionService {
    client: Arc<dyn IdentityClient>,
    store: Arc<dyn RolePermissionStore>,
    key: String,
    ttl: Duration,
    permission_match: PermissionMatch,
    refresh_lock: Mutex<()>,
}

impl RolePermissionService {
    pub fn new(client: Arc<dyn IdentityClient>, store: Arc<dyn RolePermissionStore>, cache: &CacheConfig) -> Self {
        Self {
            client,
            store,
            key: cache.key.clone(),
            ttl: cache.ttl,
            permission_match: PermissionMatch::Exact,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_permission_match(mut self, permission_match: PermissionMatch) -> Self {
        self.permission_match = permission_match;
        self
    }

    pub fn permission_match(&self) -> PermissionMatch {
        self.permission_match
    }

    /// Cached snapshot without triggering a fetch.
    pub async fn cached(&self) -> Result<Option<Arc<RoleMap>>, AuthzError> {
        self.store.get(&self.key).await
    }

    /// Current role graph, fetching it first when the cache is empty or expired.
    pub async fn role_map(&self) -> Result<Arc<RoleMap>, AuthzError> {
        if let Some(roles) = self.store.get(&self.key).await? {
            return Ok(roles);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another request may have filled the cache while we waited.
        if let Some(roles) = self.store.get(&self.key).await? {
            return Ok(roles);
        }

        tracing::info!(key = %self.key, "permission cache miss, fetching role graph");
        self.fetch_and_store().await
    }

    /// Re-pull the role graph and replace the cache. On failure the previous
    /// contents are left as they were.
    pub async fn refresh_cache(&self) -> Result<Arc<RoleMap>, AuthzError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_store().await
    }

    /// Drop the snapshot. Waits for an in-flight refresh so its write cannot
    /// land after the delete.
    pub async fn clear_cache(&self) -> Result<(), AuthzError> {
        let _guard = self.refresh_lock.lock().await;
        self.store.delete(&self.key).await?;
        tracing::info!(key = %self.key, "permission cache cleared");
        Ok(())
    }

    async fn fetch_and_store(&self) -> Result<Arc<RoleMap>, AuthzError> {
        let roles = Arc::new(self.client.fetch_role_graph().await?);
        self.store.put(&self.key, Arc::clone(&roles), self.ttl).await?;

        tracing::info!(
            key = %self.key,
            roles = roles.len(),
            permissions = roles.permission_count(),
            "permission cache refreshed"
        );
        Ok(roles)
    }

    pub async fn try_user_permissions<S>(&self, role_names: &[S]) -> Result<BTreeSet<String>, AuthzError>
    where
        S: AsRef<str> + Sync,
    {
        if role_names.is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(self.role_map().await?.permissions_for(role_names))
    }

    pub async fn try_has_permission<S>(&self, role_names: &[S], permission: &str) -> Result<bool, AuthzError>
    where
        S: AsRef<str> + Sync,
    {
        let granted = self.try_user_permissions(role_names).await?;
        Ok(self.contains(&granted, permission))
    }

    pub async fn try_has_any_permission<S, P>(&self, role_names: &[S], permissions: &[P]) -> Result<bool, AuthzError>
    where
        S: AsRef<str> + Sync,
        P: AsRef<str> + Sync,
    {
        if permissions.is_empty() {
            return Ok(false);
        }
        let granted = self.try_user_permissions(role_names).await?;
        Ok(permissions.iter().any(|p| self.contains(&granted, p.as_ref())))
    }

    /// Vacuously true for an empty `permissions` list; no lookup happens.
    pub async fn try_has_all_permissions<S, P>(&self, role_names: &[S], permissions: &[P]) -> Result<bool, AuthzError>
    where
        S: AsRef<str> + Sync,
        P: AsRef<str> + Sync,
    {
        if permissions.is_empty() {
            return Ok(true);
        }
        let granted = self.try_user_permissions(role_names).await?;
        Ok(permissions.iter().all(|p| self.contains(&granted, p.as_ref())))
    }

    pub async fn try_roles_granting(&self, permission: &str) -> Result<Vec<String>, AuthzError> {
        let roles = self.role_map().await?;
        Ok(roles
            .roles_granting(permission, self.permission_match)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    fn contains(&self, granted: &BTreeSet<String>, permission: &str) -> bool {
        match self.permission_match {
            PermissionMatch::Exact => granted.contains(permission),
            policy => granted.iter().any(|g| policy.matches(g, permission)),
        }
    }

    // -------------------------------------------------------------------------
    // fail-closed wrappers
    // -------------------------------------------------------------------------

    pub async fn user_permissions<S>(&self, role_names: &[S]) -> BTreeSet<String>
    where
        S: AsRef<str> + Sync,
    {
        self.try_user_permissions(role_names)
            .await
            .unwrap_or_else(|err| fail_closed(err, "user_permissions"))
    }

    pub async fn has_permission<S>(&self, role_names: &[S], permission: &str) -> bool
    where
        S: AsRef<str> + Sync,
    {
        self.try_has_permission(role_names, permission)
            .await
            .unwrap_or_else(|err| fail_closed(err, "has_permission"))
    }

    pub async fn has_any_permission<S, P>(&self, role_names: &[S], permissions: &[P]) -> bool
    where
        S: AsRef<str> + Sync,
        P: AsRef<str> + Sync,
    {
        self.try_has_any_permission(role_names, permissions)
            .await
            .unwrap_or_else(|err| fail_closed(err, "has_any_permission"))
    }

    pub async fn has_all_permissions<S, P>(&self, role_names: &[S], permissions: &[P]) -> bool
    where
        S: AsRef<str> + Sync,
        P: AsRef<str> + Sync,
    {
        self.try_has_all_permissions(role_names, permissions)
            .await
            .unwrap_or_else(|err| fail_closed(err, "has_all_permissions"))
    }

    pub async fn roles_granting(&self, permission: &str) -> Vec<String> {
        self.try_roles_granting(permission)
            .await
            .unwrap_or_else(|err| fail_closed(err, "roles_granting"))
    }
}

fn fail_closed<T: Default>(err: AuthzError, query: &'static str) -> T {
    tracing::warn!(error = %err, query, "permission lookup failed, denying");
    T::default()
}
