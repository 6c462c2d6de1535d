use canon_types::TenantId;

/// Builds fast-store keys of the form `<prefix>:<tenant>:<kind>:<key>`.
#[derive(Clone, Debug)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, tenant: &TenantId, parts: &[&str]) -> String {
        format!("{}:{}:{}", self.prefix, tenant, parts.join(":"))
    }

    pub fn head(&self, tenant: &TenantId, pointer: &str) -> String {
        self.key(tenant, &["head", pointer])
    }

    pub fn events(&self, tenant: &TenantId, pointer: &str) -> String {
        self.key(tenant, &["events", pointer])
    }

    pub fn recent(&self, tenant: &TenantId) -> String {
        self.key(tenant, &["recent"])
    }

    pub fn denial(&self, tenant: &TenantId, why_not_id: &str) -> String {
        self.key(tenant, &["whynot", why_not_id])
    }

    pub fn idempotency(&self, tenant: &TenantId, kind: &str, stable_key: &str) -> String {
        self.key(tenant, &["idem", kind, stable_key])
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("canon")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_tenant() {
        let keys = CacheKeys::new("canon");
        let a = TenantId::new("a");
        let b = TenantId::new("b");
        assert_eq!(keys.head(&a, "ledger:abc"), "canon:a:head:ledger:abc");
        assert_ne!(keys.head(&a, "ledger:abc"), keys.head(&b, "ledger:abc"));
        assert_eq!(
            keys.idempotency(&a, "decide", "k1"),
            "canon:a:idem:decide:k1"
        );
    }
}
